//! Authentication service
//!
//! Core business logic for credential login, refresh rotation and logout.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use axum::http::HeaderMap;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::OnceCell;

use crate::config::AuthConfig;

use super::clock::Clock;
use super::crypto::{hash_password_blocking, verify_password_blocking, CryptoError};
use super::error::{bounded, AuthError};
use super::gate::{AuthorizationContext, Gate, RequireAnyRole};
use super::jwt::{Claims, TokenCodec, TokenType};
use super::keys::KeyMaterial;
use super::principal::{AccountStatus, Principal, PrincipalRecord, PrincipalStore};
use super::revocation::RevocationStore;

/// A freshly minted access/refresh pair
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token lifetime in seconds
    pub expires_in: i64,
    pub access_claims: Claims,
    pub refresh_claims: Claims,
}

/// Authentication service
#[derive(Clone)]
pub struct AuthService {
    principals: Arc<dyn PrincipalStore>,
    revocations: Arc<dyn RevocationStore>,
    codec: Arc<TokenCodec>,
    access_gate: Gate,
    refresh_gate: Gate,
    admin_gate: Gate,
    access_ttl: Duration,
    refresh_ttl: Duration,
    store_timeout: StdDuration,
    bcrypt_cost: u32,
    /// Placeholder hash at `bcrypt_cost`, built on first unknown-user login
    dummy_hash: Arc<OnceCell<String>>,
}

impl AuthService {
    /// Create a new AuthService
    pub fn new(
        config: &AuthConfig,
        keys: Arc<KeyMaterial>,
        principals: Arc<dyn PrincipalStore>,
        revocations: Arc<dyn RevocationStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let codec = Arc::new(TokenCodec::new(
            keys,
            clock,
            config.issuer.clone(),
            config.clock_skew_leeway,
        ));

        let access_gate = Gate::access(
            codec.clone(),
            revocations.clone(),
            config.store_timeout,
            config.access_cookie.clone(),
        );
        let admin_gate = access_gate
            .clone()
            .stage(RequireAnyRole(vec![config.admin_role.clone()]));
        let refresh_gate = Gate::refresh(codec.clone(), revocations.clone(), config.store_timeout);

        Self {
            principals,
            revocations,
            codec,
            access_gate,
            refresh_gate,
            admin_gate,
            access_ttl: config.access_token_ttl,
            refresh_ttl: config.refresh_token_ttl,
            store_timeout: config.store_timeout,
            bcrypt_cost: config.bcrypt_cost,
            dummy_hash: Arc::new(OnceCell::new()),
        }
    }

    /// Verify username and password, then issue a token pair
    pub async fn authenticate(&self, username: &str, password: &str) -> Result<TokenPair, AuthError> {
        let record = bounded(self.store_timeout, self.principals.lookup(username)).await?;

        // Unknown usernames still pay for a bcrypt comparison
        let hash = match &record {
            Some(r) => r.password_hash.clone(),
            None => self.dummy_hash().await?,
        };

        let matches = match verify_password_blocking(password.to_string(), hash).await {
            Ok(matches) => matches,
            Err(CryptoError::InvalidHash(detail)) => {
                tracing::error!(username = %username, detail = %detail, "Stored password hash is unusable");
                false
            }
            Err(e) => return Err(e.into()),
        };

        let record = match record {
            Some(record) if matches => record,
            _ => {
                tracing::warn!(username = %username, reason = "invalid_credentials", "Login rejected");
                return Err(AuthError::InvalidCredentials);
            }
        };

        ensure_usable(&record)?;

        let pair = self.issue_pair(&record.principal())?;
        tracing::info!(
            subject = %record.username,
            access_jti = %pair.access_claims.jti,
            refresh_jti = %pair.refresh_claims.jti,
            "Issued token pair"
        );
        Ok(pair)
    }

    /// Exchange a refresh token for a new pair, consuming the old refresh token
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, AuthError> {
        let claims = self.refresh_gate.verify(refresh_token).await?;

        let record = bounded(self.store_timeout, self.principals.lookup(&claims.sub))
            .await?
            .ok_or_else(|| {
                tracing::warn!(subject = %claims.sub, "Refresh for unknown principal");
                AuthError::InvalidCredentials
            })?;
        ensure_usable(&record)?;

        let newly_revoked = bounded(
            self.store_timeout,
            self.revocations
                .revoke(&claims.jti, self.revocation_expiry(claims.expires_at())),
        )
        .await?;
        if !newly_revoked {
            tracing::warn!(subject = %claims.sub, jti = %claims.jti, "Refresh token reuse detected");
            return Err(AuthError::Revoked);
        }

        let pair = self.issue_pair(&record.principal())?;
        tracing::info!(
            subject = %claims.sub,
            rotated_jti = %claims.jti,
            refresh_jti = %pair.refresh_claims.jti,
            "Rotated refresh token"
        );
        Ok(pair)
    }

    /// Revoke the current access token and, if given, its refresh token
    pub async fn logout(
        &self,
        context: &AuthorizationContext,
        refresh_token: Option<&str>,
    ) -> Result<(), AuthError> {
        let refresh_claims = match refresh_token {
            Some(token) => match self.refresh_gate.verify(token).await {
                Ok(claims) if claims.sub != context.subject => {
                    return Err(AuthError::SubjectMismatch)
                }
                Ok(claims) => Some(claims),
                // Nothing left to invalidate
                Err(AuthError::Expired) | Err(AuthError::Revoked) => None,
                Err(e) => return Err(e),
            },
            None => None,
        };

        bounded(
            self.store_timeout,
            self.revocations
                .revoke(&context.token_id, self.revocation_expiry(context.expires_at)),
        )
        .await?;

        if let Some(claims) = &refresh_claims {
            bounded(
                self.store_timeout,
                self.revocations
                    .revoke(&claims.jti, self.revocation_expiry(claims.expires_at())),
            )
            .await?;
        }

        tracing::info!(
            subject = %context.subject,
            access_jti = %context.token_id,
            refresh_jti = ?refresh_claims.as_ref().map(|c| c.jti.as_str()),
            "Logged out"
        );
        Ok(())
    }

    /// Revoke any currently valid token
    ///
    /// Returns `false` when the token was already revoked.
    pub async fn revoke_token(&self, token: &str) -> Result<bool, AuthError> {
        let claims = self.codec.decode(token)?;
        let newly_revoked = bounded(
            self.store_timeout,
            self.revocations
                .revoke(&claims.jti, self.revocation_expiry(claims.expires_at())),
        )
        .await?;

        tracing::info!(
            subject = %claims.sub,
            jti = %claims.jti,
            token_type = claims.token_type.as_str(),
            newly_revoked,
            "Token revoked"
        );
        Ok(newly_revoked)
    }

    /// Run the access gate over request headers
    pub async fn authorize(&self, headers: &HeaderMap) -> Result<AuthorizationContext, AuthError> {
        self.access_gate.authorize(headers).await
    }

    /// Run the access gate plus the admin role requirement
    pub async fn authorize_admin(
        &self,
        headers: &HeaderMap,
    ) -> Result<AuthorizationContext, AuthError> {
        self.admin_gate.authorize(headers).await
    }

    pub fn codec(&self) -> &Arc<TokenCodec> {
        &self.codec
    }

    fn issue_pair(&self, principal: &Principal) -> Result<TokenPair, AuthError> {
        let now = self.codec.clock().now();
        let issuer = self.codec.issuer();

        let access_claims =
            Claims::for_principal(principal, issuer, TokenType::Access, now, self.access_ttl)?;
        let refresh_claims =
            Claims::for_principal(principal, issuer, TokenType::Refresh, now, self.refresh_ttl)?;

        Ok(TokenPair {
            access_token: self.codec.encode(&access_claims)?,
            refresh_token: self.codec.encode(&refresh_claims)?,
            expires_in: self.access_ttl.num_seconds(),
            access_claims,
            refresh_claims,
        })
    }

    /// Revocation entries must outlive the codec's leeway window
    fn revocation_expiry(&self, expires_at: DateTime<Utc>) -> DateTime<Utc> {
        expires_at
            .checked_add_signed(self.codec.leeway())
            .unwrap_or(expires_at)
    }

    async fn dummy_hash(&self) -> Result<String, AuthError> {
        let hash = self
            .dummy_hash
            .get_or_try_init(|| {
                hash_password_blocking("placeholder-password".to_string(), self.bcrypt_cost)
            })
            .await?;
        Ok(hash.clone())
    }
}

fn ensure_usable(record: &PrincipalRecord) -> Result<(), AuthError> {
    match record.status {
        AccountStatus::Active => Ok(()),
        AccountStatus::Locked => {
            tracing::warn!(username = %record.username, reason = "account_locked", "Login rejected");
            Err(AuthError::AccountLocked)
        }
        AccountStatus::Disabled => {
            tracing::warn!(username = %record.username, reason = "account_disabled", "Login rejected");
            Err(AuthError::AccountDisabled)
        }
    }
}
