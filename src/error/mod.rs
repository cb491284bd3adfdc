//! Centralized API error handling
//!
//! This module provides a unified error type for API responses with proper
//! HTTP status code mapping and JSON error responses. Authentication failures
//! are collapsed into a few generic responses here; their precise kind is
//! only ever logged.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::auth::AuthError;

/// API error type with HTTP status code mapping
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    /// Refresh failed; the client has to log in again
    #[error("Session expired, please log in again")]
    Reauthenticate,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Too many requests")]
    TooManyRequests,

    #[error("Internal server error")]
    InternalError(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// JSON error response body
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

/// Error details in the response
#[derive(Serialize)]
pub struct ErrorDetails {
    pub code: String,
    pub message: String,
}

impl ApiError {
    /// Get the error code string
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::Reauthenticate => "REAUTHENTICATE",
            ApiError::Forbidden(_) => "FORBIDDEN",
            ApiError::TooManyRequests => "TOO_MANY_REQUESTS",
            ApiError::InternalError(_) => "INTERNAL_ERROR",
            ApiError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            ApiError::ValidationError(_) => "VALIDATION_ERROR",
        }
    }

    /// Get the HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Reauthenticate => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::ValidationError(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// Map a login failure: every credential or account problem looks the same
    pub fn from_login(err: AuthError) -> Self {
        match err {
            AuthError::DependencyUnavailable(_) | AuthError::Internal(_) => err.into(),
            _ => ApiError::Unauthorized("Invalid username or password".to_string()),
        }
    }

    /// Map a refresh failure: anything short of an outage means log in again
    pub fn from_refresh(err: AuthError) -> Self {
        match err {
            AuthError::DependencyUnavailable(_) | AuthError::Internal(_) => err.into(),
            _ => ApiError::Reauthenticate,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_code = self.error_code();
        let message = self.to_string();

        // Log server errors
        match &self {
            ApiError::InternalError(detail) => {
                tracing::error!(error = %detail, code = %error_code, "Server error occurred");
            }
            ApiError::ServiceUnavailable(_) => {
                tracing::error!(error = %message, code = %error_code, "Server error occurred");
            }
            _ => {
                tracing::debug!(error = %message, code = %error_code, "Client error occurred");
            }
        }

        let body = ErrorResponse {
            error: ErrorDetails {
                code: error_code.to_string(),
                message,
            },
        };

        (status, Json(body)).into_response()
    }
}

// Convenience conversions from common error types

/// Gate mapping: every token problem is a bare 401
impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InsufficientRole => {
                ApiError::Forbidden("Insufficient permissions".to_string())
            }
            AuthError::DependencyUnavailable(_) => ApiError::ServiceUnavailable(
                "Authentication backend unavailable".to_string(),
            ),
            AuthError::Internal(detail) => ApiError::InternalError(detail),
            AuthError::SubjectMismatch => {
                ApiError::BadRequest("Refresh token does not belong to this session".to_string())
            }
            _ => ApiError::Unauthorized("Authentication required".to_string()),
        }
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(err: validator::ValidationErrors) -> Self {
        ApiError::ValidationError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            ApiError::BadRequest("test".to_string()).error_code(),
            "BAD_REQUEST"
        );
        assert_eq!(
            ApiError::Unauthorized("test".to_string()).error_code(),
            "UNAUTHORIZED"
        );
        assert_eq!(ApiError::Reauthenticate.error_code(), "REAUTHENTICATE");
        assert_eq!(ApiError::TooManyRequests.error_code(), "TOO_MANY_REQUESTS");
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            ApiError::BadRequest("test".to_string()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Reauthenticate.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::TooManyRequests.status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            ApiError::InternalError("test".to_string()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_gate_errors_are_generic() {
        for err in [
            AuthError::MissingToken,
            AuthError::Expired,
            AuthError::InvalidSignature,
            AuthError::InvalidIssuer,
            AuthError::WrongTokenType,
            AuthError::Revoked,
            AuthError::MalformedToken("bad segment".to_string()),
        ] {
            let api = ApiError::from(err);
            assert_eq!(api.status_code(), StatusCode::UNAUTHORIZED);
            assert_eq!(api.to_string(), "Authentication required");
        }

        assert_eq!(
            ApiError::from(AuthError::InsufficientRole).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError::from(AuthError::DependencyUnavailable("timeout".into())).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_login_failures_are_uniform() {
        let messages: Vec<String> = [
            AuthError::InvalidCredentials,
            AuthError::AccountLocked,
            AuthError::AccountDisabled,
        ]
        .into_iter()
        .map(|e| ApiError::from_login(e).to_string())
        .collect();

        assert!(messages.iter().all(|m| m == "Invalid username or password"));
        assert_eq!(
            ApiError::from_login(AuthError::DependencyUnavailable("down".into())).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_refresh_failures_ask_for_login() {
        assert!(matches!(
            ApiError::from_refresh(AuthError::Revoked),
            ApiError::Reauthenticate
        ));
        assert!(matches!(
            ApiError::from_refresh(AuthError::Expired),
            ApiError::Reauthenticate
        ));
        assert!(matches!(
            ApiError::from_refresh(AuthError::DependencyUnavailable("down".into())),
            ApiError::ServiceUnavailable(_)
        ));
    }

    #[test]
    fn test_internal_detail_not_in_message() {
        let err = ApiError::InternalError("key parse failure".to_string());
        assert_eq!(err.to_string(), "Internal server error");
    }
}
