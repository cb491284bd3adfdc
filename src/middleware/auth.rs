//! Authentication middleware
//!
//! Extractors and middleware that run the access gate and expose the
//! resulting [`AuthorizationContext`] to handlers.

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use crate::auth::{AuthService, AuthorizationContext};
use crate::error::ApiError;

/// Authenticated caller extracted from a verified access token
///
/// Reuses the context left by [`require_access_token`] when that middleware
/// already ran, otherwise runs the access gate itself.
///
/// # Example
///
/// ```rust,ignore
/// async fn protected_handler(AuthenticatedUser(ctx): AuthenticatedUser) -> impl IntoResponse {
///     format!("Hello, {}", ctx.subject)
/// }
/// ```
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub AuthorizationContext);

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    Arc<AuthService>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if let Some(context) = parts.extensions.get::<AuthorizationContext>() {
            return Ok(AuthenticatedUser(context.clone()));
        }

        let auth_service = Arc::<AuthService>::from_ref(state);
        let context = auth_service
            .authorize(&parts.headers)
            .await
            .map_err(|e| ApiError::from(e).into_response())?;

        parts.extensions.insert(context.clone());
        Ok(AuthenticatedUser(context))
    }
}

/// Caller holding the configured admin role
#[derive(Debug, Clone)]
pub struct AdminUser(pub AuthorizationContext);

#[async_trait]
impl<S> FromRequestParts<S> for AdminUser
where
    Arc<AuthService>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let auth_service = Arc::<AuthService>::from_ref(state);
        let context = auth_service
            .authorize_admin(&parts.headers)
            .await
            .map_err(|e| ApiError::from(e).into_response())?;

        Ok(AdminUser(context))
    }
}

/// Route layer that rejects requests without a valid access token
///
/// On success the [`AuthorizationContext`] is stored in the request
/// extensions for downstream extractors.
pub async fn require_access_token(
    State(auth_service): State<Arc<AuthService>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let context = auth_service.authorize(request.headers()).await?;
    request.extensions_mut().insert(context);
    Ok(next.run(request).await)
}
