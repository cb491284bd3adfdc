//! HTTP data models

use serde::{Deserialize, Serialize};

pub mod auth;
pub use auth::*;

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}
