//! Request verification pipeline
//!
//! A [`Gate`] is an ordered list of [`GateStage`]s. Each stage inspects or
//! fills the shared [`GateContext`] and may short-circuit with an
//! [`AuthError`]. The access gate runs on every protected request:
//!
//! 1. [`ExtractBearer`] pulls the token out of the request
//! 2. [`VerifySignature`] decodes it through the [`TokenCodec`]
//! 3. [`RequireTokenType`] rejects refresh tokens used as access tokens
//! 4. [`CheckRevocation`] consults the [`RevocationStore`]
//!
//! Further stages such as [`RequireAnyRole`] can be appended per route.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::HeaderMap;
use axum_extra::headers::authorization::Bearer;
use axum_extra::headers::{Authorization, Cookie, HeaderMapExt};
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::error::{bounded, AuthError};
use super::jwt::{Claims, TokenCodec, TokenType};
use super::revocation::RevocationStore;

/// Who the request acts as, derived from a verified access token
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthorizationContext {
    pub subject: String,
    pub roles: Vec<String>,
    pub token_id: String,
    pub expires_at: DateTime<Utc>,
    pub claims: BTreeMap<String, String>,
}

impl AuthorizationContext {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    pub fn has_any_role<S: AsRef<str>>(&self, roles: &[S]) -> bool {
        roles.iter().any(|role| self.has_role(role.as_ref()))
    }
}

impl From<Claims> for AuthorizationContext {
    fn from(claims: Claims) -> Self {
        let expires_at = claims.expires_at();
        Self {
            subject: claims.sub,
            roles: claims.roles,
            token_id: claims.jti,
            expires_at,
            claims: claims.ext,
        }
    }
}

/// State threaded through the stages of one verification
#[derive(Debug, Default)]
pub struct GateContext<'a> {
    pub headers: Option<&'a HeaderMap>,
    pub token: Option<String>,
    pub claims: Option<Claims>,
}

impl<'a> GateContext<'a> {
    pub fn from_headers(headers: &'a HeaderMap) -> Self {
        Self {
            headers: Some(headers),
            ..Default::default()
        }
    }

    pub fn from_token(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            ..Default::default()
        }
    }

    fn claims(&self) -> Result<&Claims, AuthError> {
        self.claims
            .as_ref()
            .ok_or_else(|| AuthError::Internal("stage requires verified claims".to_string()))
    }
}

/// One step of the verification pipeline
#[async_trait]
pub trait GateStage: Send + Sync {
    fn name(&self) -> &'static str;

    async fn check(&self, ctx: &mut GateContext<'_>) -> Result<(), AuthError>;
}

/// Read the token from `Authorization: Bearer`, falling back to a cookie
pub struct ExtractBearer {
    cookie: Option<String>,
}

impl ExtractBearer {
    pub fn new(cookie: Option<String>) -> Self {
        Self { cookie }
    }
}

#[async_trait]
impl GateStage for ExtractBearer {
    fn name(&self) -> &'static str {
        "extract_bearer"
    }

    async fn check(&self, ctx: &mut GateContext<'_>) -> Result<(), AuthError> {
        if ctx.token.is_some() {
            return Ok(());
        }
        let headers = ctx.headers.ok_or(AuthError::MissingToken)?;

        let token = headers
            .typed_get::<Authorization<Bearer>>()
            .map(|Authorization(bearer)| bearer.token().to_string())
            .or_else(|| {
                self.cookie
                    .as_deref()
                    .and_then(|name| cookie_value(headers, name))
            })
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::MissingToken)?;

        ctx.token = Some(token);
        Ok(())
    }
}

/// Structural, signature, issuer and expiry checks
pub struct VerifySignature {
    codec: Arc<TokenCodec>,
}

impl VerifySignature {
    pub fn new(codec: Arc<TokenCodec>) -> Self {
        Self { codec }
    }
}

#[async_trait]
impl GateStage for VerifySignature {
    fn name(&self) -> &'static str {
        "verify_signature"
    }

    async fn check(&self, ctx: &mut GateContext<'_>) -> Result<(), AuthError> {
        let token = ctx.token.as_deref().ok_or(AuthError::MissingToken)?;
        ctx.claims = Some(self.codec.decode(token)?);
        Ok(())
    }
}

pub struct RequireTokenType(pub TokenType);

#[async_trait]
impl GateStage for RequireTokenType {
    fn name(&self) -> &'static str {
        "require_token_type"
    }

    async fn check(&self, ctx: &mut GateContext<'_>) -> Result<(), AuthError> {
        if ctx.claims()?.token_type != self.0 {
            return Err(AuthError::WrongTokenType);
        }
        Ok(())
    }
}

/// Reject revoked token ids; store failures reject too
pub struct CheckRevocation {
    store: Arc<dyn RevocationStore>,
    timeout: Duration,
}

impl CheckRevocation {
    pub fn new(store: Arc<dyn RevocationStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }
}

#[async_trait]
impl GateStage for CheckRevocation {
    fn name(&self) -> &'static str {
        "check_revocation"
    }

    async fn check(&self, ctx: &mut GateContext<'_>) -> Result<(), AuthError> {
        let jti = ctx.claims()?.jti.as_str();
        if bounded(self.timeout, self.store.is_revoked(jti)).await? {
            return Err(AuthError::Revoked);
        }
        Ok(())
    }
}

/// Require at least one of the listed roles
pub struct RequireAnyRole(pub Vec<String>);

#[async_trait]
impl GateStage for RequireAnyRole {
    fn name(&self) -> &'static str {
        "require_any_role"
    }

    async fn check(&self, ctx: &mut GateContext<'_>) -> Result<(), AuthError> {
        let claims = ctx.claims()?;
        if !self.0.iter().any(|role| claims.has_role(role)) {
            return Err(AuthError::InsufficientRole);
        }
        Ok(())
    }
}

/// Ordered verification pipeline
#[derive(Clone, Default)]
pub struct Gate {
    stages: Vec<Arc<dyn GateStage>>,
}

impl Gate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stage
    pub fn stage(mut self, stage: impl GateStage + 'static) -> Self {
        self.stages.push(Arc::new(stage));
        self
    }

    /// Access-token pipeline used for every protected request
    pub fn access(
        codec: Arc<TokenCodec>,
        revocations: Arc<dyn RevocationStore>,
        store_timeout: Duration,
        access_cookie: Option<String>,
    ) -> Self {
        Self::new()
            .stage(ExtractBearer::new(access_cookie))
            .stage(VerifySignature::new(codec))
            .stage(RequireTokenType(TokenType::Access))
            .stage(CheckRevocation::new(revocations, store_timeout))
    }

    /// Refresh-token pipeline; the token is always supplied directly
    pub fn refresh(
        codec: Arc<TokenCodec>,
        revocations: Arc<dyn RevocationStore>,
        store_timeout: Duration,
    ) -> Self {
        Self::new()
            .stage(VerifySignature::new(codec))
            .stage(RequireTokenType(TokenType::Refresh))
            .stage(CheckRevocation::new(revocations, store_timeout))
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Authorize a request from its headers
    pub async fn authorize(&self, headers: &HeaderMap) -> Result<AuthorizationContext, AuthError> {
        let mut ctx = GateContext::from_headers(headers);
        self.run(&mut ctx).await.map(AuthorizationContext::from)
    }

    /// Verify a token presented outside of the request headers
    pub async fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        let mut ctx = GateContext::from_token(token);
        self.run(&mut ctx).await
    }

    async fn run(&self, ctx: &mut GateContext<'_>) -> Result<Claims, AuthError> {
        for stage in &self.stages {
            if let Err(err) = stage.check(ctx).await {
                let subject = ctx.claims.as_ref().map(|c| c.sub.as_str());
                match err {
                    AuthError::MissingToken => {
                        tracing::debug!(stage = stage.name(), "No token presented")
                    }
                    AuthError::DependencyUnavailable(ref detail) => tracing::error!(
                        stage = stage.name(),
                        detail = %detail,
                        "Rejecting request, dependency unavailable"
                    ),
                    _ => tracing::warn!(
                        stage = stage.name(),
                        reason = err.kind(),
                        subject = ?subject,
                        "Token rejected"
                    ),
                }
                return Err(err);
            }
        }

        ctx.claims
            .take()
            .ok_or_else(|| AuthError::Internal("gate finished without verified claims".to_string()))
    }
}

/// Value of a named cookie
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .typed_get::<Cookie>()
        .and_then(|cookie| cookie.get(name).map(str::to_string))
}
