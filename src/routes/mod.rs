//! Route definitions

mod auth;

use axum::{middleware::from_fn, routing::get, Router};

use crate::handlers;
use crate::middleware::{request_tracing, security_headers};
use crate::state::AppState;

pub use auth::auth_routes;

/// Full application router with the per-request middleware stack
///
/// CORS and HSTS depend on deployment and are layered on by the binary.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .merge(auth_routes(&state))
        .with_state(state)
        .layer(from_fn(security_headers))
        .layer(from_fn(request_tracing))
}
