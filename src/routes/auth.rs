//! Authentication routes

use axum::{
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};

use crate::handlers::auth;
use crate::middleware::{rate_limit, require_access_token};
use crate::state::AppState;

/// Create authentication routes
///
/// Credential endpoints are rate limited per client; session endpoints
/// require a valid access token before the handler runs.
pub fn auth_routes(state: &AppState) -> Router<AppState> {
    let credentials = Router::new()
        .route("/auth/login", post(auth::login))
        .route("/auth/refresh", post(auth::refresh_token))
        .route_layer(from_fn_with_state(state.rate_limiter.clone(), rate_limit));

    let session = Router::new()
        .route("/auth/logout", post(auth::logout))
        .route("/auth/me", get(auth::get_current_user))
        .route_layer(from_fn_with_state(
            state.auth_service.clone(),
            require_access_token,
        ));

    let admin = Router::new().route("/auth/revoke", post(auth::revoke_token));

    credentials.merge(session).merge(admin)
}
