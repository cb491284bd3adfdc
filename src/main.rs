//! Product service authentication server
//!
//! Serves credential login, token refresh, logout and revocation for the
//! product catalogue API.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::http::{header, HeaderValue, Method};
use tokio::signal;
use tower_http::cors::CorsLayer;

use product_auth::auth::{
    spawn_revocation_sweeper, AuthService, InMemoryPrincipalStore, InMemoryRevocationStore,
    PrincipalStore, RevocationStore, SystemClock,
};
use product_auth::config::Config;
use product_auth::middleware::{self, RateLimiter};
use product_auth::routes;
use product_auth::state::{AppState, CookiePolicy};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!(environment = config.environment.as_str(), "Starting product-auth");

    let keys = Arc::new(
        config
            .auth
            .signing
            .load_keys()
            .context("Failed to load signing keys")?,
    );
    tracing::info!(
        kid = keys.kid(),
        algorithm = ?keys.algorithm(),
        verification_keys = keys.verification_key_count(),
        "Signing keys loaded"
    );

    let principals = match &config.principals_file {
        Some(path) => {
            let store = InMemoryPrincipalStore::from_json_file(path)
                .with_context(|| format!("Failed to load principals from {}", path.display()))?;
            tracing::info!(count = store.len().await, path = %path.display(), "Principals loaded");
            store
        }
        None => {
            tracing::warn!("PRINCIPALS_FILE not set, no account can log in");
            InMemoryPrincipalStore::new()
        }
    };
    let principals: Arc<dyn PrincipalStore> = Arc::new(principals);
    let revocations: Arc<dyn RevocationStore> = Arc::new(InMemoryRevocationStore::new());
    let clock = Arc::new(SystemClock);

    let auth_service = Arc::new(AuthService::new(
        &config.auth,
        keys,
        principals,
        revocations.clone(),
        clock.clone(),
    ));

    spawn_revocation_sweeper(revocations, clock, config.auth.sweep_interval);

    let rate_limiter =
        RateLimiter::new(config.rate_limit_rps).with_trusted_proxies(config.trusted_proxies.clone());
    if config.trusted_proxies.is_empty() {
        tracing::info!("TRUSTED_PROXIES not set, rate limiting by peer address only");
    }
    rate_limiter.spawn_cleanup(Duration::from_secs(300));

    let cookies = CookiePolicy {
        name: config.auth.refresh_cookie.clone(),
        secure: config.secure_cookies(),
        max_age: config.auth.refresh_token_ttl,
    };

    let app_state = AppState::new(auth_service, rate_limiter, cookies);

    let mut app = routes::app_router(app_state).layer(configure_cors(&config));
    if config.environment.is_production() {
        app = app.layer(axum::middleware::from_fn(middleware::hsts_header));
    }

    let addr = SocketAddr::new(config.host, config.port);

    tracing::info!("Server listening on {}", addr);
    tracing::info!("Health check at http://{}/health", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    // Peer addresses key the rate limiter
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

fn configure_cors(config: &Config) -> CorsLayer {
    let allowed_origins_str = config.cors_allowed_origins.clone().unwrap_or_default();

    if allowed_origins_str.is_empty() {
        tracing::warn!("CORS_ALLOWED_ORIGINS not set, allowing all origins (permissive)");
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = allowed_origins_str
        .split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect();

    // Cookies need credentials, which rules out wildcard headers
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::PATCH,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}
