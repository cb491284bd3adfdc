//! Per-client rate limiting for the credential endpoints

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderMap, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
    time::Duration,
};
use tokio::{task::JoinHandle, time::Instant};

use crate::error::ApiError;

/// Token bucket for rate limiting
#[derive(Debug, Clone)]
struct TokenBucket {
    tokens: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn new(max_tokens: f64) -> Self {
        Self {
            tokens: max_tokens,
            last_update: Instant::now(),
        }
    }

    fn try_consume(&mut self, tokens_per_second: f64, max_tokens: f64) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update).as_secs_f64();

        self.tokens = (self.tokens + elapsed * tokens_per_second).min(max_tokens);
        self.last_update = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Token-bucket limiter keyed by client address
///
/// The key is the TCP peer address. Forwarding headers only count when the
/// peer is one of the configured trusted proxies.
#[derive(Clone)]
pub struct RateLimiter {
    buckets: Arc<DashMap<String, TokenBucket>>,
    tokens_per_second: f64,
    max_tokens: f64,
    trusted_proxies: Arc<Vec<IpAddr>>,
}

impl RateLimiter {
    /// Create a new rate limiter with a burst of twice the rate
    pub fn new(requests_per_second: u32) -> Self {
        let rate = requests_per_second.max(1);
        Self {
            buckets: Arc::new(DashMap::new()),
            tokens_per_second: rate as f64,
            max_tokens: (rate * 2) as f64,
            trusted_proxies: Arc::new(Vec::new()),
        }
    }

    /// Honour forwarding headers on connections from these addresses
    pub fn with_trusted_proxies(mut self, proxies: Vec<IpAddr>) -> Self {
        self.trusted_proxies = Arc::new(proxies);
        self
    }

    fn is_trusted(&self, ip: &IpAddr) -> bool {
        self.trusted_proxies.contains(ip)
    }

    /// Bucket key for a request from `peer`
    ///
    /// Behind a trusted proxy the client is the right-most `X-Forwarded-For`
    /// hop that is not itself a trusted proxy, then `X-Real-IP`. Without a
    /// peer address every request shares one bucket.
    pub fn client_key(&self, peer: Option<IpAddr>, headers: &HeaderMap) -> String {
        let Some(peer) = peer else {
            return "unknown".to_string();
        };
        if !self.is_trusted(&peer) {
            return peer.to_string();
        }

        let forwarded = headers
            .get_all("x-forwarded-for")
            .iter()
            .filter_map(|h| h.to_str().ok())
            .flat_map(|s| s.split(','))
            .filter_map(|hop| hop.trim().parse::<IpAddr>().ok())
            .collect::<Vec<_>>();

        forwarded
            .into_iter()
            .rev()
            .find(|hop| !self.is_trusted(hop))
            .or_else(|| {
                headers
                    .get("x-real-ip")
                    .and_then(|h| h.to_str().ok())
                    .and_then(|s| s.trim().parse::<IpAddr>().ok())
            })
            .unwrap_or(peer)
            .to_string()
    }

    /// Check if a request is allowed
    pub fn check(&self, key: &str) -> bool {
        self.buckets
            .entry(key.to_string())
            .or_insert_with(|| TokenBucket::new(self.max_tokens))
            .try_consume(self.tokens_per_second, self.max_tokens)
    }

    /// Drop buckets idle for longer than `max_age`
    pub fn cleanup(&self, max_age: Duration) -> usize {
        let now = Instant::now();
        let before = self.buckets.len();
        self.buckets
            .retain(|_, bucket| now.duration_since(bucket.last_update) < max_age);
        before.saturating_sub(self.buckets.len())
    }

    /// Periodically run [`RateLimiter::cleanup`]
    pub fn spawn_cleanup(&self, every: Duration) -> JoinHandle<()> {
        let limiter = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = limiter.cleanup(every);
                if removed > 0 {
                    tracing::debug!(removed, "Pruned idle rate limit buckets");
                }
            }
        })
    }
}

/// Reject clients that exceed their budget with 429 and `Retry-After`
pub async fn rate_limit(
    State(limiter): State<RateLimiter>,
    request: Request,
    next: Next,
) -> Response {
    let client_key = limiter.client_key(peer_ip(&request), request.headers());

    if !limiter.check(&client_key) {
        tracing::warn!(client = %client_key, path = %request.uri().path(), "Rate limit exceeded");
        let mut response = ApiError::TooManyRequests.into_response();
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, HeaderValue::from_static("1"));
        return response;
    }

    next.run(request).await
}

/// TCP peer address, present when served with connect info
pub fn peer_ip(request: &Request) -> Option<IpAddr> {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
}

/// Client address claimed by `X-Forwarded-For` or `X-Real-IP`
///
/// Unverified, for logging only.
pub fn forwarded_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty())
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|h| h.to_str().ok())
                .map(|s| s.trim().to_string())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rate_limiter() {
        let limiter = RateLimiter::new(5);

        // Burst capacity is 2x the rate
        for _ in 0..10 {
            assert!(limiter.check("test-client"));
        }

        assert!(!limiter.check("test-client"));
    }

    #[tokio::test]
    async fn test_rate_limiter_different_clients() {
        let limiter = RateLimiter::new(1);

        assert!(limiter.check("client-a"));
        assert!(limiter.check("client-a"));
        assert!(!limiter.check("client-a"));
        assert!(limiter.check("client-b"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bucket_refills() {
        let limiter = RateLimiter::new(1);
        assert!(limiter.check("c"));
        assert!(limiter.check("c"));
        assert!(!limiter.check("c"));

        tokio::time::advance(Duration::from_millis(1100)).await;
        assert!(limiter.check("c"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_drops_idle_buckets() {
        let limiter = RateLimiter::new(3);
        limiter.check("idle");
        tokio::time::advance(Duration::from_secs(120)).await;
        limiter.check("busy");

        assert_eq!(limiter.cleanup(Duration::from_secs(60)), 1);
    }

    #[test]
    fn test_forwarded_ip() {
        let mut headers = HeaderMap::new();
        assert_eq!(forwarded_ip(&headers), None);

        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.9"));
        assert_eq!(forwarded_ip(&headers).as_deref(), Some("10.0.0.9"));

        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        assert_eq!(forwarded_ip(&headers).as_deref(), Some("203.0.113.7"));
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_untrusted_peer_headers_are_ignored() {
        let limiter = RateLimiter::new(1);
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.7"));
        headers.insert("x-real-ip", HeaderValue::from_static("203.0.113.8"));

        assert_eq!(
            limiter.client_key(Some(ip("198.51.100.4")), &headers),
            "198.51.100.4"
        );
        assert_eq!(limiter.client_key(None, &headers), "unknown");
    }

    #[test]
    fn test_trusted_proxy_uses_rightmost_untrusted_hop() {
        let limiter = RateLimiter::new(1).with_trusted_proxies(vec![ip("10.0.0.1"), ip("10.0.0.2")]);
        let mut headers = HeaderMap::new();

        // Nothing forwarded, the proxy itself is the client
        assert_eq!(limiter.client_key(Some(ip("10.0.0.1")), &headers), "10.0.0.1");

        headers.insert("x-real-ip", HeaderValue::from_static("203.0.113.9"));
        assert_eq!(
            limiter.client_key(Some(ip("10.0.0.1")), &headers),
            "203.0.113.9"
        );

        // Left-most entries are client-controlled
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("1.2.3.4, 203.0.113.7, 10.0.0.2"),
        );
        assert_eq!(
            limiter.client_key(Some(ip("10.0.0.1")), &headers),
            "203.0.113.7"
        );
    }
}
