//! Principals and the principal store
//!
//! The principal store is owned by another part of the system (user
//! management); this module only defines the lookup contract plus an
//! in-memory implementation that can be seeded from a JSON file.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

/// Store errors (principal and revocation stores)
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid store data: {0}")]
    InvalidData(String),
}

/// Account status as recorded by the principal store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    #[default]
    Active,
    Locked,
    Disabled,
}

/// Stored account data for a username
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrincipalRecord {
    pub username: String,
    /// bcrypt hash (`$2a$`, `$2b$` or `$2y$`)
    pub password_hash: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub status: AccountStatus,
    #[serde(default)]
    pub claims: BTreeMap<String, String>,
}

impl PrincipalRecord {
    pub fn principal(&self) -> Principal {
        Principal {
            subject: self.username.clone(),
            roles: self.roles.clone(),
            claims: self.claims.clone(),
        }
    }
}

/// The identity a token is issued for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub subject: String,
    pub roles: Vec<String>,
    pub claims: BTreeMap<String, String>,
}

/// Lookup contract of the principal store
#[async_trait]
pub trait PrincipalStore: Send + Sync {
    async fn lookup(&self, username: &str) -> Result<Option<PrincipalRecord>, StoreError>;
}

/// In-memory principal store
#[derive(Debug, Default)]
pub struct InMemoryPrincipalStore {
    records: RwLock<HashMap<String, PrincipalRecord>>,
}

impl InMemoryPrincipalStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: impl IntoIterator<Item = PrincipalRecord>) -> Self {
        let records = records
            .into_iter()
            .map(|r| (r.username.clone(), r))
            .collect();
        Self {
            records: RwLock::new(records),
        }
    }

    /// Load a JSON array of principal records
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| StoreError::Unavailable(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, StoreError> {
        let records: Vec<PrincipalRecord> =
            serde_json::from_str(raw).map_err(|e| StoreError::InvalidData(e.to_string()))?;
        Ok(Self::with_records(records))
    }

    pub async fn insert(&self, record: PrincipalRecord) {
        self.records
            .write()
            .await
            .insert(record.username.clone(), record);
    }

    pub async fn set_status(&self, username: &str, status: AccountStatus) -> bool {
        match self.records.write().await.get_mut(username) {
            Some(record) => {
                record.status = status;
                true
            }
            None => false,
        }
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }
}

#[async_trait]
impl PrincipalStore for InMemoryPrincipalStore {
    async fn lookup(&self, username: &str) -> Result<Option<PrincipalRecord>, StoreError> {
        Ok(self.records.read().await.get(username).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PRINCIPALS: &str = r#"[
        {
            "username": "alice",
            "password_hash": "$2b$04$abcdefghijklmnopqrstuu",
            "roles": ["USER", "ADMIN"],
            "claims": {"email": "alice@example.com"}
        },
        {
            "username": "bob",
            "password_hash": "$2b$04$abcdefghijklmnopqrstuu",
            "status": "locked"
        }
    ]"#;

    #[tokio::test]
    async fn test_from_json() {
        let store = InMemoryPrincipalStore::from_json(PRINCIPALS).unwrap();
        assert_eq!(store.len().await, 2);

        let alice = store.lookup("alice").await.unwrap().unwrap();
        assert_eq!(alice.status, AccountStatus::Active);
        assert_eq!(alice.roles, vec!["USER", "ADMIN"]);

        let bob = store.lookup("bob").await.unwrap().unwrap();
        assert_eq!(bob.status, AccountStatus::Locked);
        assert!(bob.roles.is_empty());

        assert!(store.lookup("carol").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_set_status() {
        let store = InMemoryPrincipalStore::from_json(PRINCIPALS).unwrap();
        assert!(store.set_status("alice", AccountStatus::Disabled).await);
        assert!(!store.set_status("nobody", AccountStatus::Disabled).await);

        let alice = store.lookup("alice").await.unwrap().unwrap();
        assert_eq!(alice.status, AccountStatus::Disabled);
    }

    #[test]
    fn test_invalid_json() {
        let result = InMemoryPrincipalStore::from_json("{not json");
        assert!(matches!(result, Err(StoreError::InvalidData(_))));
    }

    #[test]
    fn test_record_to_principal() {
        let store = InMemoryPrincipalStore::from_json(PRINCIPALS).unwrap();
        let records = store.records.try_read().unwrap();
        let principal = records["alice"].principal();

        assert_eq!(principal.subject, "alice");
        assert_eq!(principal.claims["email"], "alice@example.com");
    }
}
