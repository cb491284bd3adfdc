//! Authentication request and response bodies

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::auth::TokenPair;

/// Credentials for `POST /auth/login`
#[derive(Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1, max = 256))]
    pub username: String,
    #[validate(length(min = 1, max = 1024))]
    pub password: String,
}

impl std::fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginRequest")
            .field("username", &self.username)
            .field("password", &"****")
            .finish()
    }
}

/// Auth tokens response
#[derive(Debug, Serialize, Deserialize)]
pub struct AuthTokensResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Access token lifetime in seconds
    pub expires_in: i64,
}

impl From<TokenPair> for AuthTokensResponse {
    fn from(pair: TokenPair) -> Self {
        Self {
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: pair.expires_in,
        }
    }
}

/// Refresh token request; the cookie is used when the field is absent
#[derive(Debug, Default, Deserialize)]
pub struct RefreshTokenRequest {
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// Logout request; the refresh token is optional
#[derive(Debug, Default, Deserialize)]
pub struct LogoutRequest {
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// Administrative revocation of a single token
#[derive(Debug, Deserialize, Validate)]
pub struct RevokeTokenRequest {
    #[validate(length(min = 1))]
    pub token: String,
}
