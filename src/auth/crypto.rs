//! Password hashing
//!
//! bcrypt hashes compatible with spring-security-crypto's `BCryptPasswordEncoder`
//! (`$2a$`, `$2b$` and `$2y$` prefixes all verify).

use thiserror::Error;

/// Errors that can occur while hashing or verifying passwords
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Password hashing failed: {0}")]
    HashingFailed(String),

    #[error("Stored password hash is invalid: {0}")]
    InvalidHash(String),

    #[error("Password worker failed: {0}")]
    WorkerFailed(String),
}

/// Hash a password with the given bcrypt cost
pub fn hash_password(password: &str, cost: u32) -> Result<String, CryptoError> {
    bcrypt::hash(password, cost).map_err(|e| CryptoError::HashingFailed(e.to_string()))
}

/// Verify a password against a bcrypt hash
///
/// # Returns
/// * `Ok(true)` if the password matches
/// * `Ok(false)` if it does not
/// * `Err(CryptoError)` if the stored hash cannot be parsed
pub fn verify_password(password: &str, hash: &str) -> Result<bool, CryptoError> {
    bcrypt::verify(password, hash).map_err(|e| CryptoError::InvalidHash(e.to_string()))
}

/// Hash on the blocking pool
pub async fn hash_password_blocking(password: String, cost: u32) -> Result<String, CryptoError> {
    tokio::task::spawn_blocking(move || hash_password(&password, cost))
        .await
        .map_err(|e| CryptoError::WorkerFailed(e.to_string()))?
}

/// Verify on the blocking pool so bcrypt never stalls the async workers
pub async fn verify_password_blocking(password: String, hash: String) -> Result<bool, CryptoError> {
    tokio::task::spawn_blocking(move || verify_password(&password, &hash))
        .await
        .map_err(|e| CryptoError::WorkerFailed(e.to_string()))?
}
