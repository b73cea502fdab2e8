//! TTL-keyed set stores backing the ban registry.
//!
//! Same injection seam as the limiter's counter store: the in-memory
//! implementation serves single-process deployments and tests, while a shared
//! networked set only needs to implement [`TtlStore`].

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::BanError;

/// Key-value store with per-entry expiry.
///
/// Entries expire automatically; there is no explicit delete. Lookups must
/// garbage-collect expired entries lazily.
#[async_trait]
pub trait TtlStore: Send + Sync {
    /// Store `value` under `key` for `ttl`, overwriting any previous entry.
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<(), BanError>;

    /// Fetch the unexpired value under `key`.
    ///
    /// Returns `None` for missing or expired entries; expired entries are
    /// removed on the way out.
    async fn get(&self, key: &str) -> Result<Option<String>, BanError>;
}

/// Stored value plus its expiry deadline
#[derive(Debug, Clone)]
struct TtlEntry {
    value: String,
    expires_at: Instant,
}

/// In-process TTL store.
#[derive(Debug, Default)]
pub struct InMemoryTtlStore {
    entries: Mutex<HashMap<String, TtlEntry>>,
}

impl InMemoryTtlStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TtlStore for InMemoryTtlStore {
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<(), BanError> {
        let mut entries = self.entries.lock().await;
        entries.insert(
            key.to_string(),
            TtlEntry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, BanError> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }
}
