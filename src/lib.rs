//! Product service authentication core
//!
//! Credential login, JWT issuance and verification, refresh-token rotation
//! and revocation, exposed through an axum router.

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod state;
