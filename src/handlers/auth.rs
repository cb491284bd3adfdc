//! Authentication HTTP handlers
//!
//! Endpoints for credential login, token refresh, logout and revocation.

use axum::{
    extract::State,
    http::{header::SET_COOKIE, HeaderMap, HeaderValue, StatusCode},
    response::{AppendHeaders, IntoResponse},
    Json,
};
use validator::Validate;

use super::{AdminUser, AuthenticatedUser};
use crate::auth::{cookie_value, AuthError, AuthorizationContext};
use crate::error::ApiError;
use crate::models::{
    AuthTokensResponse, LoginRequest, LogoutRequest, RefreshTokenRequest, RevokeTokenRequest,
};
use crate::state::AppState;

/// POST /auth/login - Verify credentials and issue a token pair
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    req.validate()?;

    let pair = state
        .auth_service
        .authenticate(&req.username, &req.password)
        .await
        .map_err(ApiError::from_login)?;

    let cookie = header_value(state.cookies.set(&pair.refresh_token))?;
    Ok((
        AppendHeaders([(SET_COOKIE, cookie)]),
        Json(AuthTokensResponse::from(pair)),
    ))
}

/// POST /auth/refresh - Rotate a refresh token into a new pair
///
/// The token is read from the body, falling back to the refresh cookie.
pub async fn refresh_token(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Option<Json<RefreshTokenRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let presented = body
        .and_then(|Json(req)| req.refresh_token)
        .or_else(|| cookie_value(&headers, &state.cookies.name))
        .ok_or_else(|| ApiError::from_refresh(AuthError::MissingToken))?;

    let pair = state
        .auth_service
        .refresh(&presented)
        .await
        .map_err(ApiError::from_refresh)?;

    let cookie = header_value(state.cookies.set(&pair.refresh_token))?;
    Ok((
        AppendHeaders([(SET_COOKIE, cookie)]),
        Json(AuthTokensResponse::from(pair)),
    ))
}

/// POST /auth/logout - Revoke the current access token and its refresh token
pub async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
    AuthenticatedUser(context): AuthenticatedUser,
    body: Option<Json<LogoutRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let refresh = body
        .and_then(|Json(req)| req.refresh_token)
        .or_else(|| cookie_value(&headers, &state.cookies.name));

    state
        .auth_service
        .logout(&context, refresh.as_deref())
        .await?;

    let cookie = header_value(state.cookies.clear())?;
    Ok((StatusCode::NO_CONTENT, AppendHeaders([(SET_COOKIE, cookie)])))
}

/// GET /auth/me - Authorization context of the caller
pub async fn get_current_user(
    AuthenticatedUser(context): AuthenticatedUser,
) -> Json<AuthorizationContext> {
    Json(context)
}

/// POST /auth/revoke - Revoke any token (admin only)
pub async fn revoke_token(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Json(req): Json<RevokeTokenRequest>,
) -> Result<StatusCode, ApiError> {
    req.validate()?;

    let newly_revoked = state
        .auth_service
        .revoke_token(&req.token)
        .await
        .map_err(|e| match e {
            AuthError::DependencyUnavailable(_) | AuthError::Internal(_) => ApiError::from(e),
            _ => ApiError::BadRequest("Token is not valid".to_string()),
        })?;

    tracing::info!(admin = %admin.subject, newly_revoked, "Administrative revocation");
    Ok(StatusCode::NO_CONTENT)
}

fn header_value(value: String) -> Result<HeaderValue, ApiError> {
    HeaderValue::from_str(&value).map_err(|e| ApiError::InternalError(e.to_string()))
}
