//! Authentication error taxonomy

use thiserror::Error;

use super::crypto::CryptoError;
use super::jwt::TokenError;
use super::principal::StoreError;

/// Auth service errors
///
/// The HTTP layer maps these to a smaller set of client-facing responses.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error("Account locked")]
    AccountLocked,

    #[error("Account disabled")]
    AccountDisabled,

    #[error("No token presented")]
    MissingToken,

    #[error("Malformed token: {0}")]
    MalformedToken(String),

    #[error("Token expired")]
    Expired,

    #[error("Invalid token signature")]
    InvalidSignature,

    #[error("Unexpected token issuer")]
    InvalidIssuer,

    #[error("Wrong token type")]
    WrongTokenType,

    #[error("Token revoked")]
    Revoked,

    #[error("Insufficient role")]
    InsufficientRole,

    #[error("Token belongs to another subject")]
    SubjectMismatch,

    #[error("Dependency unavailable: {0}")]
    DependencyUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// Stable reason code for logs
    pub fn kind(&self) -> &'static str {
        match self {
            AuthError::InvalidCredentials => "invalid_credentials",
            AuthError::AccountLocked => "account_locked",
            AuthError::AccountDisabled => "account_disabled",
            AuthError::MissingToken => "missing_token",
            AuthError::MalformedToken(_) => "malformed_token",
            AuthError::Expired => "expired",
            AuthError::InvalidSignature => "invalid_signature",
            AuthError::InvalidIssuer => "invalid_issuer",
            AuthError::WrongTokenType => "wrong_token_type",
            AuthError::Revoked => "revoked",
            AuthError::InsufficientRole => "insufficient_role",
            AuthError::SubjectMismatch => "subject_mismatch",
            AuthError::DependencyUnavailable(_) => "dependency_unavailable",
            AuthError::Internal(_) => "internal",
        }
    }
}

impl From<TokenError> for AuthError {
    fn from(e: TokenError) -> Self {
        match e {
            TokenError::Malformed(detail) => AuthError::MalformedToken(detail),
            TokenError::Expired => AuthError::Expired,
            TokenError::InvalidSignature => AuthError::InvalidSignature,
            TokenError::InvalidIssuer => AuthError::InvalidIssuer,
            TokenError::EncodingFailed(detail) => AuthError::Internal(detail),
        }
    }
}

impl From<StoreError> for AuthError {
    fn from(e: StoreError) -> Self {
        AuthError::DependencyUnavailable(e.to_string())
    }
}

impl From<CryptoError> for AuthError {
    fn from(e: CryptoError) -> Self {
        AuthError::Internal(e.to_string())
    }
}

/// Run a store call with a deadline, failing closed
pub(crate) async fn bounded<T, F>(timeout: std::time::Duration, call: F) -> Result<T, AuthError>
where
    F: std::future::Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result.map_err(AuthError::from),
        Err(_) => Err(AuthError::DependencyUnavailable(format!(
            "store call exceeded {}ms",
            timeout.as_millis()
        ))),
    }
}
