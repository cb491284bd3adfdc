//! Revoked token storage
//!
//! Tracks revoked token ids until the token would have expired anyway.
//! Reads happen on every authorized request, writes only on logout,
//! refresh rotation and explicit revocation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::task::JoinHandle;

use super::clock::Clock;
use super::principal::StoreError;

/// Storage contract for revoked token ids
#[async_trait]
pub trait RevocationStore: Send + Sync {
    /// Mark a token id revoked until `expires_at`
    ///
    /// Returns `true` if this call revoked it and `false` if it was already
    /// revoked. Refresh rotation relies on this being atomic.
    async fn revoke(&self, token_id: &str, expires_at: DateTime<Utc>) -> Result<bool, StoreError>;

    async fn is_revoked(&self, token_id: &str) -> Result<bool, StoreError>;

    /// Drop entries whose expiry has passed, returning how many were removed
    async fn sweep(&self, now: DateTime<Utc>) -> Result<usize, StoreError>;
}

/// In-memory revocation store backed by a sharded concurrent map
#[derive(Debug, Default)]
pub struct InMemoryRevocationStore {
    entries: DashMap<String, DateTime<Utc>>,
}

impl InMemoryRevocationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl RevocationStore for InMemoryRevocationStore {
    async fn revoke(&self, token_id: &str, expires_at: DateTime<Utc>) -> Result<bool, StoreError> {
        match self.entries.entry(token_id.to_string()) {
            Entry::Occupied(mut entry) => {
                if *entry.get() < expires_at {
                    entry.insert(expires_at);
                }
                Ok(false)
            }
            Entry::Vacant(entry) => {
                entry.insert(expires_at);
                Ok(true)
            }
        }
    }

    async fn is_revoked(&self, token_id: &str) -> Result<bool, StoreError> {
        Ok(self.entries.contains_key(token_id))
    }

    async fn sweep(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut removed = 0;
        self.entries.retain(|_, expires_at| {
            let keep = *expires_at > now;
            if !keep {
                removed += 1;
            }
            keep
        });
        Ok(removed)
    }
}

/// Spawn the periodic revocation sweep
pub fn spawn_revocation_sweeper(
    store: Arc<dyn RevocationStore>,
    clock: Arc<dyn Clock>,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!(interval_secs = every.as_secs(), "Starting revocation sweeper");
        let mut ticker = tokio::time::interval(every);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;

            match store.sweep(clock.now()).await {
                Ok(0) => {}
                Ok(removed) => tracing::debug!(removed, "Swept expired revocation entries"),
                Err(e) => tracing::warn!(error = %e, "Revocation sweep failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::clock::ManualClock;
    use chrono::Duration as ChronoDuration;

    #[tokio::test]
    async fn test_revoke_is_insert_if_absent() {
        let store = InMemoryRevocationStore::new();
        let exp = Utc::now() + ChronoDuration::minutes(15);

        assert!(!store.is_revoked("jti-1").await.unwrap());
        assert!(store.revoke("jti-1", exp).await.unwrap());
        assert!(!store.revoke("jti-1", exp).await.unwrap());
        assert!(store.is_revoked("jti-1").await.unwrap());
        assert!(!store.is_revoked("jti-2").await.unwrap());
    }

    #[tokio::test]
    async fn test_sweep_removes_only_expired() {
        let store = InMemoryRevocationStore::new();
        let now = Utc::now();

        store.revoke("old", now - ChronoDuration::seconds(1)).await.unwrap();
        store.revoke("edge", now).await.unwrap();
        store.revoke("live", now + ChronoDuration::hours(1)).await.unwrap();

        assert_eq!(store.sweep(now).await.unwrap(), 2);
        assert_eq!(store.len(), 1);
        assert!(store.is_revoked("live").await.unwrap());
    }

    #[tokio::test]
    async fn test_revoke_keeps_latest_expiry() {
        let store = InMemoryRevocationStore::new();
        let now = Utc::now();

        store.revoke("jti", now + ChronoDuration::seconds(5)).await.unwrap();
        store.revoke("jti", now + ChronoDuration::hours(1)).await.unwrap();

        assert_eq!(store.sweep(now + ChronoDuration::minutes(1)).await.unwrap(), 0);
        assert!(store.is_revoked("jti").await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_revoke_has_single_winner() {
        let store = Arc::new(InMemoryRevocationStore::new());
        let exp = Utc::now() + ChronoDuration::minutes(5);

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.revoke("shared", exp).await.unwrap() })
            })
            .collect();

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_task_purges_entries() {
        let store = Arc::new(InMemoryRevocationStore::new());
        let clock = Arc::new(ManualClock::starting_now());
        store
            .revoke("jti", clock.now() + ChronoDuration::seconds(30))
            .await
            .unwrap();

        let handle = spawn_revocation_sweeper(store.clone(), clock.clone(), Duration::from_secs(60));

        clock.advance(ChronoDuration::minutes(2));
        tokio::time::sleep(Duration::from_secs(61)).await;

        assert!(store.is_empty());
        handle.abort();
    }
}
