//! Application state shared across handlers

use std::sync::Arc;

use axum::extract::FromRef;
use chrono::Duration;

use crate::auth::AuthService;
use crate::middleware::RateLimiter;

/// How the refresh token cookie is written
#[derive(Debug, Clone)]
pub struct CookiePolicy {
    pub name: String,
    pub secure: bool,
    pub max_age: Duration,
}

impl CookiePolicy {
    /// `Set-Cookie` value carrying a refresh token
    pub fn set(&self, token: &str) -> String {
        format!(
            "{}={}; HttpOnly; SameSite=Strict; Path=/auth; Max-Age={}{}",
            self.name,
            token,
            self.max_age.num_seconds(),
            if self.secure { "; Secure" } else { "" }
        )
    }

    /// `Set-Cookie` value that removes the refresh token
    pub fn clear(&self) -> String {
        format!(
            "{}=; HttpOnly; SameSite=Strict; Path=/auth; Max-Age=0{}",
            self.name,
            if self.secure { "; Secure" } else { "" }
        )
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub auth_service: Arc<AuthService>,
    pub rate_limiter: RateLimiter,
    pub cookies: CookiePolicy,
}

impl AppState {
    pub fn new(
        auth_service: Arc<AuthService>,
        rate_limiter: RateLimiter,
        cookies: CookiePolicy,
    ) -> Self {
        Self {
            auth_service,
            rate_limiter,
            cookies,
        }
    }
}

impl FromRef<AppState> for Arc<AuthService> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.auth_service.clone()
    }
}

impl FromRef<AppState> for RateLimiter {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.rate_limiter.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cookie_attributes() {
        let policy = CookiePolicy {
            name: "refresh_token".to_string(),
            secure: true,
            max_age: Duration::days(7),
        };

        assert_eq!(
            policy.set("abc.def.ghi"),
            "refresh_token=abc.def.ghi; HttpOnly; SameSite=Strict; Path=/auth; Max-Age=604800; Secure"
        );
        assert!(policy.clear().contains("Max-Age=0"));
    }
}
