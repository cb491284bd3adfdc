//! JWT token encoding and verification
//!
//! Tokens are compact JWS strings signed with the process [`KeyMaterial`].
//! Verification checks structure, then the signature (constant-time, inside
//! `jsonwebtoken`), and only then trusts the claims for issuer and expiry.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, decode_header, encode, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::clock::Clock;
use super::keys::KeyMaterial;
use super::principal::Principal;

/// JWT-related errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("Malformed token: {0}")]
    Malformed(String),

    #[error("Token expired")]
    Expired,

    #[error("Invalid token signature")]
    InvalidSignature,

    #[error("Unexpected token issuer")]
    InvalidIssuer,

    #[error("Token encoding failed: {0}")]
    EncodingFailed(String),
}

/// Token type enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::Access => "access",
            TokenType::Refresh => "refresh",
        }
    }
}

/// JWT claims shared by access and refresh tokens
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Claims {
    /// Issuer
    pub iss: String,
    /// Subject (username)
    pub sub: String,
    /// Granted roles
    #[serde(default)]
    pub roles: Vec<String>,
    /// JWT ID (for revocation)
    pub jti: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration (Unix timestamp)
    pub exp: i64,
    /// Token type (access or refresh)
    pub token_type: TokenType,
    /// Extra principal claims
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub ext: BTreeMap<String, String>,
}

impl Claims {
    /// Fresh claims for a principal with a new unique token id
    pub fn for_principal(
        principal: &Principal,
        issuer: &str,
        token_type: TokenType,
        issued_at: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<Self, TokenError> {
        let expires_at = issued_at
            .checked_add_signed(ttl)
            .ok_or_else(|| TokenError::EncodingFailed("token expiry out of range".to_string()))?;

        Ok(Self {
            iss: issuer.to_string(),
            sub: principal.subject.clone(),
            roles: principal.roles.clone(),
            jti: Uuid::new_v4().to_string(),
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
            token_type,
            ext: principal.claims.clone(),
        })
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        timestamp_to_datetime(self.iat)
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        timestamp_to_datetime(self.exp)
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

fn timestamp_to_datetime(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(ts, 0).unwrap_or_default()
}

/// Encodes, signs, decodes and verifies tokens
pub struct TokenCodec {
    keys: Arc<KeyMaterial>,
    clock: Arc<dyn Clock>,
    issuer: String,
    leeway: Duration,
}

impl TokenCodec {
    pub fn new(
        keys: Arc<KeyMaterial>,
        clock: Arc<dyn Clock>,
        issuer: impl Into<String>,
        leeway: Duration,
    ) -> Self {
        Self {
            keys,
            clock,
            issuer: issuer.into(),
            leeway,
        }
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn leeway(&self) -> Duration {
        self.leeway
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Sign claims with the active key
    pub fn encode(&self, claims: &Claims) -> Result<String, TokenError> {
        let mut header = Header::new(self.keys.algorithm());
        header.kid = Some(self.keys.kid().to_string());

        encode(&header, claims, self.keys.encoding_key())
            .map_err(|e| TokenError::EncodingFailed(e.to_string()))
    }

    /// Verify and decode a token
    ///
    /// # Returns
    /// * `Ok(Claims)` if the signature, issuer and expiry all check out
    /// * `Err(TokenError)` naming the first check that failed
    pub fn decode(&self, token: &str) -> Result<Claims, TokenError> {
        let header = decode_header(token).map_err(|e| TokenError::Malformed(e.to_string()))?;

        let key = self
            .keys
            .verification_key(header.kid.as_deref())
            .ok_or(TokenError::InvalidSignature)?;

        let mut validation = Validation::new(key.algorithm);
        // Expiry is checked below against the injected clock
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.set_required_spec_claims(&["exp", "iat", "sub", "iss"]);
        validation.set_issuer(&[self.issuer.as_str()]);

        let data = decode::<Claims>(token, &key.decoding, &validation).map_err(|e| {
            match e.kind() {
                ErrorKind::InvalidSignature
                | ErrorKind::InvalidAlgorithm
                | ErrorKind::InvalidAlgorithmName => TokenError::InvalidSignature,
                ErrorKind::InvalidIssuer => TokenError::InvalidIssuer,
                _ => TokenError::Malformed(e.to_string()),
            }
        })?;
        let claims = data.claims;

        if claims.exp <= claims.iat {
            return Err(TokenError::Malformed(
                "expiry must be after issued-at".to_string(),
            ));
        }

        let now = self.clock.now();
        let latest_issue = now.checked_add_signed(self.leeway).unwrap_or(now);
        if claims.issued_at() > latest_issue {
            return Err(TokenError::Malformed(
                "token issued in the future".to_string(),
            ));
        }
        // Expiries too far out to shift by the leeway never lapse
        let lapses_at = claims.expires_at().checked_add_signed(self.leeway);
        if lapses_at.map_or(false, |lapses_at| now >= lapses_at) {
            return Err(TokenError::Expired);
        }

        Ok(claims)
    }

    /// Whether a token currently verifies
    pub fn is_token_valid(&self, token: &str) -> bool {
        self.decode(token).is_ok()
    }

    /// Subject of a verified token
    pub fn extract_subject(&self, token: &str) -> Result<String, TokenError> {
        self.decode(token).map(|claims| claims.sub)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::clock::ManualClock;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;

    const SECRET: &[u8] = b"test-secret-key-with-at-least-32-bytes!!";

    fn create_test_principal() -> Principal {
        let mut claims = BTreeMap::new();
        claims.insert("email".to_string(), "alice@example.com".to_string());
        Principal {
            subject: "alice".to_string(),
            roles: vec!["USER".to_string(), "ADMIN".to_string()],
            claims,
        }
    }

    fn codec_with(secret: &[u8], clock: Arc<ManualClock>, leeway_secs: i64) -> TokenCodec {
        TokenCodec::new(
            Arc::new(KeyMaterial::hmac(secret).unwrap()),
            clock,
            "product-service",
            Duration::seconds(leeway_secs),
        )
    }

    fn issue(codec: &TokenCodec, token_type: TokenType, ttl_secs: i64) -> (String, Claims) {
        let claims = Claims::for_principal(
            &create_test_principal(),
            codec.issuer(),
            token_type,
            codec.clock().now(),
            Duration::seconds(ttl_secs),
        )
        .unwrap();
        (codec.encode(&claims).unwrap(), claims)
    }

    #[test]
    fn test_decode_returns_encoded_claims() {
        let clock = Arc::new(ManualClock::starting_now());
        let codec = codec_with(SECRET, clock, 30);

        let (token, claims) = issue(&codec, TokenType::Access, 900);
        let decoded = codec.decode(&token).unwrap();

        assert_eq!(decoded, claims);
        assert_eq!(decoded.token_type, TokenType::Access);
        assert!(decoded.has_role("ADMIN"));
        assert_eq!(decoded.ext.get("email").unwrap(), "alice@example.com");
    }

    #[test]
    fn test_token_ids_are_unique() {
        let clock = Arc::new(ManualClock::starting_now());
        let codec = codec_with(SECRET, clock, 30);

        let (_, a) = issue(&codec, TokenType::Access, 900);
        let (_, b) = issue(&codec, TokenType::Access, 900);
        assert_ne!(a.jti, b.jti);
    }

    #[test]
    fn test_expired_after_ttl_without_leeway() {
        let clock = Arc::new(ManualClock::starting_now());
        let codec = codec_with(SECRET, clock.clone(), 0);

        let (token, _) = issue(&codec, TokenType::Access, 1);
        clock.advance(Duration::seconds(2));

        assert_eq!(codec.decode(&token), Err(TokenError::Expired));
    }

    #[test]
    fn test_leeway_absorbs_clock_skew() {
        let clock = Arc::new(ManualClock::starting_now());
        let codec = codec_with(SECRET, clock.clone(), 30);

        let (token, _) = issue(&codec, TokenType::Access, 60);

        clock.advance(Duration::seconds(75));
        assert!(codec.decode(&token).is_ok());

        clock.advance(Duration::seconds(15));
        assert_eq!(codec.decode(&token), Err(TokenError::Expired));
    }

    #[test]
    fn test_flipped_signature_byte_is_invalid_signature() {
        let clock = Arc::new(ManualClock::starting_now());
        let codec = codec_with(SECRET, clock, 30);
        let (token, _) = issue(&codec, TokenType::Access, 900);

        let (unsigned, signature) = token.rsplit_once('.').unwrap();
        let mut raw = URL_SAFE_NO_PAD.decode(signature).unwrap();
        for i in 0..raw.len() {
            raw[i] ^= 0x01;
            let tampered = format!("{}.{}", unsigned, URL_SAFE_NO_PAD.encode(&raw));
            assert_eq!(codec.decode(&tampered), Err(TokenError::InvalidSignature));
            raw[i] ^= 0x01;
        }
    }

    #[test]
    fn test_expired_and_tampered_is_invalid_signature() {
        let clock = Arc::new(ManualClock::starting_now());
        let codec = codec_with(SECRET, clock.clone(), 0);
        let (token, _) = issue(&codec, TokenType::Access, 1);
        clock.advance(Duration::seconds(10));

        let replacement = if token.ends_with('A') { 'B' } else { 'A' };
        let tampered = format!("{}{}", &token[..token.len() - 1], replacement);
        assert_eq!(codec.decode(&tampered), Err(TokenError::InvalidSignature));
        assert_eq!(codec.decode(&token), Err(TokenError::Expired));
    }

    #[test]
    fn test_tampered_payload_is_invalid_signature() {
        let clock = Arc::new(ManualClock::starting_now());
        let codec = codec_with(SECRET, clock, 30);
        let (token, claims) = issue(&codec, TokenType::Access, 900);

        let parts: Vec<&str> = token.split('.').collect();
        let mut forged = claims.clone();
        forged.roles.push("SUPERUSER".to_string());
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&forged).unwrap());
        let tampered = format!("{}.{}.{}", parts[0], payload, parts[2]);

        assert_eq!(codec.decode(&tampered), Err(TokenError::InvalidSignature));
    }

    #[test]
    fn test_malformed_token() {
        let clock = Arc::new(ManualClock::starting_now());
        let codec = codec_with(SECRET, clock, 30);

        assert!(matches!(
            codec.decode("invalid.token.here"),
            Err(TokenError::Malformed(_))
        ));
        assert!(matches!(codec.decode(""), Err(TokenError::Malformed(_))));
        assert!(matches!(
            codec.decode("no-dots-at-all"),
            Err(TokenError::Malformed(_))
        ));
    }

    #[test]
    fn test_wrong_secret() {
        let clock = Arc::new(ManualClock::starting_now());
        let signer = codec_with(SECRET, clock.clone(), 30);
        let verifier = codec_with(b"another-secret-key-with-32-bytes-or-more", clock, 30);

        let (token, _) = issue(&signer, TokenType::Access, 900);
        assert_eq!(verifier.decode(&token), Err(TokenError::InvalidSignature));
    }

    #[test]
    fn test_retired_key_still_verifies() {
        let old_secret = b"the-previous-signing-secret-32-bytes-long";
        let clock = Arc::new(ManualClock::starting_now());
        let old = codec_with(old_secret, clock.clone(), 30);
        let (token, _) = issue(&old, TokenType::Access, 900);

        let keys = KeyMaterial::hmac(SECRET)
            .unwrap()
            .with_retired_secret(old_secret)
            .unwrap();
        let rotated = TokenCodec::new(
            Arc::new(keys),
            clock,
            "product-service",
            Duration::seconds(30),
        );

        assert!(rotated.is_token_valid(&token));
    }

    #[test]
    fn test_wrong_issuer() {
        let clock = Arc::new(ManualClock::starting_now());
        let keys = Arc::new(KeyMaterial::hmac(SECRET).unwrap());
        let ours = TokenCodec::new(keys.clone(), clock.clone(), "product-service", Duration::zero());
        let theirs = TokenCodec::new(keys, clock, "someone-else", Duration::zero());

        let (token, _) = issue(&theirs, TokenType::Access, 900);
        assert_eq!(ours.decode(&token), Err(TokenError::InvalidIssuer));
    }

    #[test]
    fn test_future_issued_at_is_malformed() {
        let clock = Arc::new(ManualClock::starting_now());
        let codec = codec_with(SECRET, clock.clone(), 30);

        let claims = Claims::for_principal(
            &create_test_principal(),
            codec.issuer(),
            TokenType::Access,
            clock.now() + Duration::minutes(10),
            Duration::seconds(900),
        )
        .unwrap();
        let token = codec.encode(&claims).unwrap();

        assert!(matches!(codec.decode(&token), Err(TokenError::Malformed(_))));
    }

    #[test]
    fn test_extract_subject() {
        let clock = Arc::new(ManualClock::starting_now());
        let codec = codec_with(SECRET, clock, 30);
        let (token, _) = issue(&codec, TokenType::Refresh, 900);

        assert_eq!(codec.extract_subject(&token).unwrap(), "alice");
        assert!(!codec.is_token_valid("garbage"));
    }

    #[test]
    fn test_unrepresentable_expiry_is_rejected_at_issue() {
        let clock = Arc::new(ManualClock::starting_now());

        let result = Claims::for_principal(
            &create_test_principal(),
            "product-service",
            TokenType::Access,
            clock.now(),
            Duration::seconds(i64::MAX / 1000),
        );

        assert!(matches!(result, Err(TokenError::EncodingFailed(_))));
    }

    #[test]
    fn test_expiry_at_calendar_limit_does_not_overflow() {
        let clock = Arc::new(ManualClock::starting_now());
        let codec = codec_with(SECRET, clock.clone(), 30);

        let (_, mut claims) = issue(&codec, TokenType::Access, 900);
        claims.exp = DateTime::<Utc>::MAX_UTC.timestamp();
        let token = codec.encode(&claims).unwrap();

        assert_eq!(codec.decode(&token).unwrap().exp, claims.exp);
    }
}
