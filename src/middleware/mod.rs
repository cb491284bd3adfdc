//! HTTP middleware
//!
//! Request tracing, rate limiting, security headers and the
//! access-token extractors.

pub mod auth;
mod rate_limiter;
mod security;
mod tracing;

pub use auth::{require_access_token, AdminUser, AuthenticatedUser};
pub use rate_limiter::{forwarded_ip, peer_ip, rate_limit, RateLimiter};
pub use security::{hsts_header, security_headers};
pub use tracing::request_tracing;
