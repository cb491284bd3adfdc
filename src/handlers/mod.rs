//! API handlers

pub mod auth;
mod health;

pub use auth::*;
pub use health::health_check;

// Re-export extractors from middleware for handler use
pub use crate::middleware::auth::{AdminUser, AuthenticatedUser};
