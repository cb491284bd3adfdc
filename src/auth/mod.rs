//! Token authentication core
//!
//! - Credential login with bcrypt-hashed passwords
//! - Signed JWT access and refresh tokens
//! - Per-request verification pipeline
//! - Refresh rotation and token revocation

mod clock;
mod crypto;
mod error;
mod gate;
mod jwt;
mod keys;
mod principal;
mod revocation;
mod service;

pub use clock::{Clock, ManualClock, SystemClock};
pub use crypto::{hash_password, verify_password, CryptoError};
pub use error::AuthError;
pub use gate::{
    cookie_value, AuthorizationContext, CheckRevocation, ExtractBearer, Gate, GateContext,
    GateStage, RequireAnyRole, RequireTokenType, VerifySignature,
};
pub use jwt::{Claims, TokenCodec, TokenError, TokenType};
pub use keys::{KeyError, KeyMaterial, VerificationKey, MIN_HMAC_SECRET_BYTES};
pub use principal::{
    AccountStatus, InMemoryPrincipalStore, Principal, PrincipalRecord, PrincipalStore, StoreError,
};
pub use revocation::{spawn_revocation_sweeper, InMemoryRevocationStore, RevocationStore};
pub use service::{AuthService, TokenPair};
