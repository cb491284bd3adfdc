//! Signing key material
//!
//! Loaded once at startup and shared read-only for the life of the process.
//! One active key signs every token; additional verify-only keys can be
//! registered so tokens signed before a secret rotation keep verifying
//! until they expire. Keys are selected by the `kid` header.

use std::collections::HashMap;

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Minimum HMAC secret length (256 bits)
pub const MIN_HMAC_SECRET_BYTES: usize = 32;

/// Key material errors
#[derive(Error, Debug)]
pub enum KeyError {
    #[error("HMAC secret must be at least {MIN_HMAC_SECRET_BYTES} bytes, got {0}")]
    WeakSecret(usize),

    #[error("Algorithm {0:?} is not supported for this key type")]
    UnsupportedAlgorithm(Algorithm),

    #[error("Invalid PEM key: {0}")]
    InvalidPem(String),
}

/// A key able to verify signatures
#[derive(Clone)]
pub struct VerificationKey {
    pub algorithm: Algorithm,
    pub decoding: DecodingKey,
}

/// Process-wide signing keys
pub struct KeyMaterial {
    kid: String,
    algorithm: Algorithm,
    encoding: EncodingKey,
    verification: HashMap<String, VerificationKey>,
}

impl KeyMaterial {
    /// Symmetric key material (HS256 by default)
    pub fn hmac(secret: &[u8]) -> Result<Self, KeyError> {
        Self::hmac_with(Algorithm::HS256, secret)
    }

    /// Symmetric key material with an explicit HMAC algorithm
    pub fn hmac_with(algorithm: Algorithm, secret: &[u8]) -> Result<Self, KeyError> {
        ensure_hmac(algorithm)?;
        if secret.len() < MIN_HMAC_SECRET_BYTES {
            return Err(KeyError::WeakSecret(secret.len()));
        }

        let kid = fingerprint(secret);
        let mut verification = HashMap::new();
        verification.insert(
            kid.clone(),
            VerificationKey {
                algorithm,
                decoding: DecodingKey::from_secret(secret),
            },
        );

        Ok(Self {
            kid,
            algorithm,
            encoding: EncodingKey::from_secret(secret),
            verification,
        })
    }

    /// Asymmetric key material from a PEM private/public key pair
    pub fn from_pem(
        algorithm: Algorithm,
        private_pem: &[u8],
        public_pem: &[u8],
    ) -> Result<Self, KeyError> {
        let pem_err = |e: jsonwebtoken::errors::Error| KeyError::InvalidPem(e.to_string());

        let (encoding, decoding) = match algorithm {
            Algorithm::RS256 | Algorithm::RS384 | Algorithm::RS512 | Algorithm::PS256 => (
                EncodingKey::from_rsa_pem(private_pem).map_err(pem_err)?,
                DecodingKey::from_rsa_pem(public_pem).map_err(pem_err)?,
            ),
            Algorithm::ES256 | Algorithm::ES384 => (
                EncodingKey::from_ec_pem(private_pem).map_err(pem_err)?,
                DecodingKey::from_ec_pem(public_pem).map_err(pem_err)?,
            ),
            Algorithm::EdDSA => (
                EncodingKey::from_ed_pem(private_pem).map_err(pem_err)?,
                DecodingKey::from_ed_pem(public_pem).map_err(pem_err)?,
            ),
            other => return Err(KeyError::UnsupportedAlgorithm(other)),
        };

        let kid = fingerprint(public_pem);
        let mut verification = HashMap::new();
        verification.insert(
            kid.clone(),
            VerificationKey {
                algorithm,
                decoding,
            },
        );

        Ok(Self {
            kid,
            algorithm,
            encoding,
            verification,
        })
    }

    /// Register a retired HMAC secret as verify-only
    pub fn with_retired_secret(mut self, secret: &[u8]) -> Result<Self, KeyError> {
        if secret.len() < MIN_HMAC_SECRET_BYTES {
            return Err(KeyError::WeakSecret(secret.len()));
        }
        let algorithm = if is_hmac(self.algorithm) {
            self.algorithm
        } else {
            Algorithm::HS256
        };

        self.verification
            .entry(fingerprint(secret))
            .or_insert_with(|| VerificationKey {
                algorithm,
                decoding: DecodingKey::from_secret(secret),
            });
        Ok(self)
    }

    /// Key id of the active signing key
    pub fn kid(&self) -> &str {
        &self.kid
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn encoding_key(&self) -> &EncodingKey {
        &self.encoding
    }

    /// Verification key for a token header's `kid`; no `kid` means the active key
    pub fn verification_key(&self, kid: Option<&str>) -> Option<&VerificationKey> {
        self.verification.get(kid.unwrap_or(&self.kid))
    }

    /// Number of keys able to verify (active plus retired)
    pub fn verification_key_count(&self) -> usize {
        self.verification.len()
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .field("verification_keys", &self.verification.len())
            .finish()
    }
}

fn is_hmac(algorithm: Algorithm) -> bool {
    matches!(
        algorithm,
        Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512
    )
}

fn ensure_hmac(algorithm: Algorithm) -> Result<(), KeyError> {
    if is_hmac(algorithm) {
        Ok(())
    } else {
        Err(KeyError::UnsupportedAlgorithm(algorithm))
    }
}

/// Short SHA-256 fingerprint used as `kid`
fn fingerprint(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    hex::encode(&digest[..8])
}
