//! Idempotent record persistence.
//!
//! Storage is a natural-key upsert: one row per (region, type), last write
//! wins. Sync jobs call `upsert` even when the upstream had nothing usable -
//! the neutral zero record makes "confirmed empty" visible to consumers, which
//! could otherwise not tell it apart from "never synchronized". No operation
//! spans more than one key, so there is nothing to coordinate transactionally.

use async_trait::async_trait;

use crate::{MarketHistoryRecord, MarketTypeListing};

pub mod sqlite;

pub use sqlite::SqliteMarketStore;

/// Store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Underlying SQLite failure
    #[error("database error: {0}")]
    Sqlite(#[from] tokio_rusqlite::Error),
}

/// Natural-key upsert store for synchronized market data.
#[async_trait]
pub trait MarketStore: Send + Sync {
    /// Insert or replace the history row for the record's (region, type) key.
    ///
    /// Idempotent: applying the same record any number of times leaves exactly
    /// one row with those fields.
    async fn upsert_history(&self, record: &MarketHistoryRecord) -> Result<(), StoreError>;

    /// Insert or replace the listing row for the entry's (region, type) key.
    async fn upsert_listing(&self, listing: &MarketTypeListing) -> Result<(), StoreError>;

    /// Fetch the history row for one (region, type) pair, if present.
    async fn history(
        &self,
        region_id: u32,
        type_id: u32,
    ) -> Result<Option<MarketHistoryRecord>, StoreError>;

    /// All listing rows for a region, ordered by type id.
    async fn listings(&self, region_id: u32) -> Result<Vec<MarketTypeListing>, StoreError>;

    /// Number of history rows stored for a region.
    async fn history_count(&self, region_id: u32) -> Result<u64, StoreError>;
}
