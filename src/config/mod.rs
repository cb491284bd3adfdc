//! Configuration management
//!
//! This module handles loading and validating configuration from environment variables,
//! with support for different environments (development, staging, production).

use std::env;
use std::net::IpAddr;
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration as StdDuration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::Duration;
use jsonwebtoken::Algorithm;
use thiserror::Error;

use crate::auth::{KeyMaterial, MIN_HMAC_SECRET_BYTES};

/// Development-only signing secret
const DEV_JWT_SECRET: &str = "development-secret-change-in-production";

/// Accepted access token lifetimes, in seconds
const ACCESS_TTL_SECONDS: RangeInclusive<i64> = 1..=86_400;

/// Accepted refresh token lifetimes, in days
const REFRESH_TTL_DAYS: RangeInclusive<i64> = 1..=365;

/// Accepted clock-skew leeway, in seconds
const CLOCK_SKEW_SECONDS: RangeInclusive<i64> = 0..=300;

/// Work factors the bcrypt crate accepts
const BCRYPT_COST: RangeInclusive<u32> = 4..=31;

/// Cost of the `$2a$10$` hashes Spring's `BCryptPasswordEncoder` writes
pub const DEFAULT_BCRYPT_COST: u32 = 10;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid environment value: {0}")]
    InvalidValue(String),

    #[error("Invalid port number: {0}")]
    InvalidPort(String),

    #[error("Invalid signing key: {0}")]
    InvalidKey(String),
}

/// Application environment
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl Environment {
    /// Parse environment from string
    pub fn from_str(s: &str) -> Result<Self, ConfigError> {
        match s.to_lowercase().as_str() {
            "dev" | "development" => Ok(Environment::Development),
            "staging" => Ok(Environment::Staging),
            "prod" | "production" => Ok(Environment::Production),
            _ => Err(ConfigError::InvalidValue(format!(
                "Invalid environment: '{}'. Expected: dev, staging, or prod",
                s
            ))),
        }
    }

    /// Check if this is a production environment
    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }

    /// Get the environment name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Staging => "staging",
            Environment::Production => "production",
        }
    }
}

/// Where the signing keys come from
#[derive(Clone)]
pub enum SigningConfig {
    /// Shared secret (HS256/384/512) plus verify-only retired secrets
    Hmac {
        algorithm: Algorithm,
        secret: Vec<u8>,
        retired: Vec<Vec<u8>>,
    },
    /// PEM key pair on disk (RS*, ES*, EdDSA)
    Pem {
        algorithm: Algorithm,
        private_key_path: PathBuf,
        public_key_path: PathBuf,
    },
}

impl SigningConfig {
    /// Build the process key material
    pub fn load_keys(&self) -> Result<KeyMaterial, ConfigError> {
        let key_err = |e: crate::auth::KeyError| ConfigError::InvalidKey(e.to_string());

        match self {
            SigningConfig::Hmac {
                algorithm,
                secret,
                retired,
            } => {
                let mut keys = KeyMaterial::hmac_with(*algorithm, secret).map_err(key_err)?;
                for old in retired {
                    keys = keys.with_retired_secret(old).map_err(key_err)?;
                }
                Ok(keys)
            }
            SigningConfig::Pem {
                algorithm,
                private_key_path,
                public_key_path,
            } => {
                let read = |path: &PathBuf| {
                    std::fs::read(path)
                        .map_err(|e| ConfigError::InvalidKey(format!("{}: {}", path.display(), e)))
                };
                KeyMaterial::from_pem(*algorithm, &read(private_key_path)?, &read(public_key_path)?)
                    .map_err(key_err)
            }
        }
    }
}

impl std::fmt::Debug for SigningConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SigningConfig::Hmac {
                algorithm, retired, ..
            } => f
                .debug_struct("Hmac")
                .field("algorithm", algorithm)
                .field("secret", &"****")
                .field("retired", &retired.len())
                .finish(),
            SigningConfig::Pem {
                algorithm,
                private_key_path,
                public_key_path,
            } => f
                .debug_struct("Pem")
                .field("algorithm", algorithm)
                .field("private_key_path", private_key_path)
                .field("public_key_path", public_key_path)
                .finish(),
        }
    }
}

/// Token and authentication settings
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// `iss` claim written and required on every token
    pub issuer: String,

    /// Access token TTL (default: 15 minutes)
    pub access_token_ttl: Duration,

    /// Refresh token TTL (default: 7 days)
    pub refresh_token_ttl: Duration,

    /// Tolerated clock drift past expiry (default: 30 seconds)
    pub clock_skew_leeway: Duration,

    pub signing: SigningConfig,

    /// Deadline for principal and revocation store calls
    pub store_timeout: StdDuration,

    /// How often expired revocation entries are purged
    pub sweep_interval: StdDuration,

    /// Role required by admin-only endpoints
    pub admin_role: String,

    /// Cookie carrying the refresh token
    pub refresh_cookie: String,

    /// Optional cookie accepted in place of the bearer header
    pub access_cookie: Option<String>,

    /// bcrypt cost of the placeholder hash checked for unknown usernames.
    /// Must match the cost of the stored hashes or lookups leak timing.
    pub bcrypt_cost: u32,
}

impl AuthConfig {
    /// Defaults around an HS256 secret
    pub fn with_hmac_secret(secret: Vec<u8>) -> Self {
        Self {
            issuer: "product-service".to_string(),
            access_token_ttl: Duration::seconds(900),
            refresh_token_ttl: Duration::days(7),
            clock_skew_leeway: Duration::seconds(30),
            signing: SigningConfig::Hmac {
                algorithm: Algorithm::HS256,
                secret,
                retired: Vec::new(),
            },
            store_timeout: StdDuration::from_millis(2000),
            sweep_interval: StdDuration::from_secs(60),
            admin_role: "ADMIN".to_string(),
            refresh_cookie: "refresh_token".to_string(),
            access_cookie: None,
            bcrypt_cost: DEFAULT_BCRYPT_COST,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        within(
            "JWT_ACCESS_TOKEN_TTL_SECONDS",
            self.access_token_ttl.num_seconds(),
            &ACCESS_TTL_SECONDS,
        )?;
        within(
            "JWT_REFRESH_TOKEN_TTL_DAYS",
            self.refresh_token_ttl.num_days(),
            &REFRESH_TTL_DAYS,
        )?;
        within(
            "JWT_CLOCK_SKEW_SECONDS",
            self.clock_skew_leeway.num_seconds(),
            &CLOCK_SKEW_SECONDS,
        )?;
        within("AUTH_BCRYPT_COST", self.bcrypt_cost, &BCRYPT_COST)?;
        if self.refresh_token_ttl <= self.access_token_ttl {
            return Err(ConfigError::InvalidValue(
                "refresh token TTL must exceed access token TTL".to_string(),
            ));
        }
        if let SigningConfig::Hmac {
            secret, retired, ..
        } = &self.signing
        {
            if secret.len() < MIN_HMAC_SECRET_BYTES
                || retired.iter().any(|r| r.len() < MIN_HMAC_SECRET_BYTES)
            {
                return Err(ConfigError::InvalidKey(format!(
                    "HMAC secrets must be at least {} bytes",
                    MIN_HMAC_SECRET_BYTES
                )));
            }
        }
        Ok(())
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Current environment
    pub environment: Environment,

    /// Bind address
    pub host: IpAddr,

    /// Server port
    pub port: u16,

    /// Rate limit on login/refresh: requests per second per client
    pub rate_limit_rps: u32,

    /// Reverse proxies whose forwarding headers identify the client
    pub trusted_proxies: Vec<IpAddr>,

    /// CORS allowed origins
    pub cors_allowed_origins: Option<String>,

    /// Log level (RUST_LOG)
    pub log_level: String,

    /// JSON file seeding the in-memory principal store
    pub principals_file: Option<PathBuf>,

    pub auth: AuthConfig,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors)
        dotenvy::dotenv().ok();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let environment = lookup("ENVIRONMENT")
            .map(|s| Environment::from_str(&s))
            .unwrap_or(Ok(Environment::Development))?;

        let host = lookup("HOST")
            .unwrap_or_else(|| "127.0.0.1".to_string())
            .parse::<IpAddr>()
            .map_err(|_| ConfigError::InvalidValue("HOST must be an IP address".to_string()))?;

        let port = lookup("PORT")
            .unwrap_or_else(|| "3001".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort("PORT must be a valid number".to_string()))?;

        let rate_limit_rps = parse_or("RATE_LIMIT_RPS", lookup("RATE_LIMIT_RPS"), 10u32)?;

        let trusted_proxies = lookup("TRUSTED_PROXIES")
            .map(|list| {
                list.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(|s| {
                        s.parse::<IpAddr>().map_err(|_| {
                            ConfigError::InvalidValue(format!(
                                "TRUSTED_PROXIES entry is not an IP address: {}",
                                s
                            ))
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()
            })
            .transpose()?
            .unwrap_or_default();

        let cors_allowed_origins = lookup("CORS_ALLOWED_ORIGINS");

        let log_level = lookup("RUST_LOG").unwrap_or_else(|| "info".to_string());

        let principals_file = lookup("PRINCIPALS_FILE").map(PathBuf::from);

        let algorithm = match lookup("JWT_ALGORITHM") {
            Some(name) => Algorithm::from_str(&name)
                .map_err(|_| ConfigError::InvalidValue(format!("Unknown JWT_ALGORITHM: {}", name)))?,
            None => Algorithm::HS256,
        };

        let signing = match algorithm {
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => {
                let secret = match lookup("JWT_SECRET") {
                    Some(raw) => parse_secret(&raw)?,
                    None if environment.is_production() => {
                        return Err(ConfigError::MissingEnvVar("JWT_SECRET".to_string()))
                    }
                    None => DEV_JWT_SECRET.as_bytes().to_vec(),
                };
                let retired = lookup("JWT_RETIRED_SECRETS")
                    .map(|list| {
                        list.split(',')
                            .map(str::trim)
                            .filter(|s| !s.is_empty())
                            .map(parse_secret)
                            .collect::<Result<Vec<_>, _>>()
                    })
                    .transpose()?
                    .unwrap_or_default();
                SigningConfig::Hmac {
                    algorithm,
                    secret,
                    retired,
                }
            }
            _ => SigningConfig::Pem {
                algorithm,
                private_key_path: lookup("JWT_PRIVATE_KEY_PATH")
                    .map(PathBuf::from)
                    .ok_or_else(|| ConfigError::MissingEnvVar("JWT_PRIVATE_KEY_PATH".to_string()))?,
                public_key_path: lookup("JWT_PUBLIC_KEY_PATH")
                    .map(PathBuf::from)
                    .ok_or_else(|| ConfigError::MissingEnvVar("JWT_PUBLIC_KEY_PATH".to_string()))?,
            },
        };

        let mut auth = AuthConfig::with_hmac_secret(Vec::new());
        auth.signing = signing;

        if let Some(issuer) = lookup("JWT_ISSUER") {
            auth.issuer = issuer;
        }

        // Range-check before building durations, chrono panics past its limits
        let access_secs = parse_or(
            "JWT_ACCESS_TOKEN_TTL_SECONDS",
            lookup("JWT_ACCESS_TOKEN_TTL_SECONDS"),
            900i64,
        )?;
        auth.access_token_ttl = Duration::seconds(within(
            "JWT_ACCESS_TOKEN_TTL_SECONDS",
            access_secs,
            &ACCESS_TTL_SECONDS,
        )?);

        let refresh_days = parse_or(
            "JWT_REFRESH_TOKEN_TTL_DAYS",
            lookup("JWT_REFRESH_TOKEN_TTL_DAYS"),
            7i64,
        )?;
        auth.refresh_token_ttl = Duration::days(within(
            "JWT_REFRESH_TOKEN_TTL_DAYS",
            refresh_days,
            &REFRESH_TTL_DAYS,
        )?);

        let leeway_secs = parse_or(
            "JWT_CLOCK_SKEW_SECONDS",
            lookup("JWT_CLOCK_SKEW_SECONDS"),
            30i64,
        )?;
        auth.clock_skew_leeway = Duration::seconds(within(
            "JWT_CLOCK_SKEW_SECONDS",
            leeway_secs,
            &CLOCK_SKEW_SECONDS,
        )?);

        auth.store_timeout = StdDuration::from_millis(parse_or(
            "AUTH_STORE_TIMEOUT_MS",
            lookup("AUTH_STORE_TIMEOUT_MS"),
            2000u64,
        )?);

        auth.sweep_interval = StdDuration::from_secs(
            parse_or(
                "REVOCATION_SWEEP_INTERVAL_SECONDS",
                lookup("REVOCATION_SWEEP_INTERVAL_SECONDS"),
                60u64,
            )?
            .max(1),
        );

        auth.bcrypt_cost = parse_or(
            "AUTH_BCRYPT_COST",
            lookup("AUTH_BCRYPT_COST"),
            DEFAULT_BCRYPT_COST,
        )?;

        if let Some(role) = lookup("AUTH_ADMIN_ROLE") {
            auth.admin_role = role;
        }
        if let Some(name) = lookup("AUTH_REFRESH_COOKIE") {
            auth.refresh_cookie = name;
        }
        auth.access_cookie = lookup("AUTH_ACCESS_COOKIE").filter(|s| !s.is_empty());

        auth.validate()?;

        Ok(Config {
            environment,
            host,
            port,
            rate_limit_rps,
            trusted_proxies,
            cors_allowed_origins,
            log_level,
            principals_file,
            auth,
        })
    }

    /// Cookies are only marked `Secure` outside development
    pub fn secure_cookies(&self) -> bool {
        self.environment != Environment::Development
    }
}

/// Parse a variable if set, rejecting values that do not parse
fn parse_or<T: FromStr>(key: &str, raw: Option<String>, default: T) -> Result<T, ConfigError> {
    match raw {
        Some(raw) => raw.trim().parse::<T>().map_err(|_| {
            ConfigError::InvalidValue(format!("{} is not a valid number: {}", key, raw))
        }),
        None => Ok(default),
    }
}

fn within<T>(key: &str, value: T, range: &RangeInclusive<T>) -> Result<T, ConfigError>
where
    T: PartialOrd + std::fmt::Display,
{
    if range.contains(&value) {
        Ok(value)
    } else {
        Err(ConfigError::InvalidValue(format!(
            "{} must be between {} and {}, got {}",
            key,
            range.start(),
            range.end(),
            value
        )))
    }
}

/// Raw secret bytes, or base64 after a `base64:` prefix
fn parse_secret(raw: &str) -> Result<Vec<u8>, ConfigError> {
    match raw.strip_prefix("base64:") {
        Some(encoded) => STANDARD
            .decode(encoded.trim())
            .map_err(|e| ConfigError::InvalidKey(format!("secret is not valid base64: {}", e))),
        None => Ok(raw.as_bytes().to_vec()),
    }
}
