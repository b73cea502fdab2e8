//! Temporary exclusion of resources that the upstream has confirmed missing.
//!
//! A type id that answers with a 404-class failure is banned for a long
//! cooldown (the default is 30 days) so sync tasks stop spending rate-limit
//! budget on it. Bans expire on their own; there is no unban operation. The
//! registry is shared across all concurrent tasks through the injected
//! [`TtlStore`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

pub mod store;

pub use store::{InMemoryTtlStore, TtlStore};

/// Why a resource was banned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BanReason {
    /// The upstream reported the resource does not exist
    NotFound {
        /// HTTP status carried by the not-found signal
        status: u16,
    },
}

impl fmt::Display for BanReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BanReason::NotFound { status } => write!(f, "not-found ({status})"),
        }
    }
}

/// Registry of banned (region, type) pairs.
#[derive(Clone)]
pub struct BanRegistry {
    store: Arc<dyn TtlStore>,
}

impl BanRegistry {
    /// Create a registry over the given TTL store
    pub fn new(store: Arc<dyn TtlStore>) -> Self {
        Self { store }
    }

    fn key(region_id: u32, type_id: u32) -> String {
        format!("{region_id}:{type_id}")
    }

    /// Whether the pair is currently excluded from fetch attempts.
    ///
    /// Expired entries count as not banned and are garbage-collected by the
    /// lookup itself.
    pub async fn is_banned(&self, region_id: u32, type_id: u32) -> Result<bool, BanError> {
        let entry = self.store.get(&Self::key(region_id, type_id)).await?;
        Ok(entry.is_some())
    }

    /// Exclude the pair from fetch attempts for `duration`.
    pub async fn ban(
        &self,
        region_id: u32,
        type_id: u32,
        reason: BanReason,
        duration: Duration,
    ) -> Result<(), BanError> {
        warn!(
            region_id = region_id,
            type_id = type_id,
            reason = %reason,
            ban_days = duration.as_secs() / 86_400,
            "Banning resource from further fetch attempts"
        );
        crate::metrics::record_ban(&reason.to_string());
        self.store
            .put(&Self::key(region_id, type_id), &reason.to_string(), duration)
            .await
    }
}

/// Ban registry errors
#[derive(Debug, thiserror::Error)]
pub enum BanError {
    /// The backing TTL store could not be reached
    #[error("ttl store unavailable: {0}")]
    StoreUnavailable(String),
}
