//! Request tracing middleware

use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;

use super::rate_limiter::{forwarded_ip, peer_ip};

/// Middleware for logging request information with timing
///
/// Only the path is logged; query strings and headers may carry tokens.
pub async fn request_tracing(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let peer = peer_ip(&request);
    let forwarded_for = forwarded_ip(request.headers());

    let start = Instant::now();

    tracing::debug!(
        method = %method,
        path = %path,
        peer = ?peer,
        forwarded_for = ?forwarded_for,
        "Request started"
    );

    let response = next.run(request).await;

    let duration_ms = start.elapsed().as_millis();
    let status = response.status().as_u16();

    if response.status().is_server_error() {
        tracing::error!(
            method = %method,
            path = %path,
            peer = ?peer,
            forwarded_for = ?forwarded_for,
            status,
            duration_ms = %duration_ms,
            "Request completed with error"
        );
    } else if response.status().is_client_error() {
        tracing::warn!(
            method = %method,
            path = %path,
            peer = ?peer,
            forwarded_for = ?forwarded_for,
            status,
            duration_ms = %duration_ms,
            "Request completed with client error"
        );
    } else {
        tracing::info!(
            method = %method,
            path = %path,
            peer = ?peer,
            forwarded_for = ?forwarded_for,
            status,
            duration_ms = %duration_ms,
            "Request completed"
        );
    }

    response
}
