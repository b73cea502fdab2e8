//! SQLite implementation of the market store.
//!
//! Uses `rusqlite` behind `tokio-rusqlite` so blocking SQLite calls stay off
//! the async workers. Upserts are `INSERT OR REPLACE` on the natural key,
//! which is what makes re-running a sync convergent instead of duplicating.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::OptionalExtension;
use rust_decimal::Decimal;
use std::path::Path;
use tokio_rusqlite::Connection;

use super::{MarketStore, StoreError};
use crate::{MarketHistoryRecord, MarketTypeListing};

/// Schema for synchronized data. Decimals are stored as TEXT to keep them
/// exact; SQLite REAL would round them through f64.
const CREATE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS market_history (
    region_id INTEGER NOT NULL,
    type_id INTEGER NOT NULL,
    average TEXT NOT NULL,
    highest TEXT NOT NULL,
    lowest TEXT NOT NULL,
    order_count INTEGER NOT NULL,
    volume INTEGER NOT NULL,
    observed_at TEXT,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (region_id, type_id)
);

CREATE TABLE IF NOT EXISTS market_type_listings (
    region_id INTEGER NOT NULL,
    type_id INTEGER NOT NULL,
    last_seen TEXT NOT NULL,
    PRIMARY KEY (region_id, type_id)
);
"#;

fn decimal_from_text(idx: usize, text: String) -> rusqlite::Result<Decimal> {
    text.parse::<Decimal>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn date_from_text(idx: usize, text: String) -> rusqlite::Result<NaiveDate> {
    text.parse::<NaiveDate>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn datetime_from_text(idx: usize, text: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

/// SQLite-backed market store.
pub struct SqliteMarketStore {
    conn: Connection,
}

impl SqliteMarketStore {
    /// Open (creating if needed) the store at `path`.
    ///
    /// Use `:memory:` for an in-memory database.
    pub async fn new(path: impl AsRef<Path> + Send + 'static) -> Result<Self, StoreError> {
        let conn = Connection::open(path).await?;

        conn.call(|conn| {
            conn.execute_batch(CREATE_SCHEMA)?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }

    /// Create an in-memory store (tests and dry runs)
    pub async fn in_memory() -> Result<Self, StoreError> {
        Self::new(":memory:").await
    }
}

#[async_trait]
impl MarketStore for SqliteMarketStore {
    async fn upsert_history(&self, record: &MarketHistoryRecord) -> Result<(), StoreError> {
        let record = record.clone();

        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"
                    INSERT OR REPLACE INTO market_history
                    (region_id, type_id, average, highest, lowest, order_count, volume, observed_at, updated_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                    "#,
                    rusqlite::params![
                        record.region_id,
                        record.type_id,
                        record.average.to_string(),
                        record.highest.to_string(),
                        record.lowest.to_string(),
                        record.order_count,
                        record.volume as i64,
                        record.observed_at.map(|d| d.to_string()),
                        Utc::now().to_rfc3339(),
                    ],
                )?;
                Ok(())
            })
            .await?;

        crate::metrics::record_upsert("history");
        Ok(())
    }

    async fn upsert_listing(&self, listing: &MarketTypeListing) -> Result<(), StoreError> {
        let listing = listing.clone();

        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"
                    INSERT OR REPLACE INTO market_type_listings
                    (region_id, type_id, last_seen)
                    VALUES (?1, ?2, ?3)
                    "#,
                    rusqlite::params![
                        listing.region_id,
                        listing.type_id,
                        listing.last_seen.to_rfc3339(),
                    ],
                )?;
                Ok(())
            })
            .await?;

        crate::metrics::record_upsert("listing");
        Ok(())
    }

    async fn history(
        &self,
        region_id: u32,
        type_id: u32,
    ) -> Result<Option<MarketHistoryRecord>, StoreError> {
        let record = self
            .conn
            .call(move |conn| {
                let record = conn
                    .query_row(
                        r#"
                        SELECT region_id, type_id, average, highest, lowest, order_count, volume, observed_at
                        FROM market_history
                        WHERE region_id = ?1 AND type_id = ?2
                        "#,
                        rusqlite::params![region_id, type_id],
                        |row| {
                            Ok(MarketHistoryRecord {
                                region_id: row.get(0)?,
                                type_id: row.get(1)?,
                                average: decimal_from_text(2, row.get(2)?)?,
                                highest: decimal_from_text(3, row.get(3)?)?,
                                lowest: decimal_from_text(4, row.get(4)?)?,
                                order_count: row.get(5)?,
                                volume: row.get::<_, i64>(6)? as u64,
                                observed_at: row
                                    .get::<_, Option<String>>(7)?
                                    .map(|s| date_from_text(7, s))
                                    .transpose()?,
                            })
                        },
                    )
                    .optional()?;
                Ok(record)
            })
            .await?;

        Ok(record)
    }

    async fn listings(&self, region_id: u32) -> Result<Vec<MarketTypeListing>, StoreError> {
        let listings = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    r#"
                    SELECT region_id, type_id, last_seen
                    FROM market_type_listings
                    WHERE region_id = ?1
                    ORDER BY type_id
                    "#,
                )?;

                let listings = stmt
                    .query_map([region_id], |row| {
                        Ok(MarketTypeListing {
                            region_id: row.get(0)?,
                            type_id: row.get(1)?,
                            last_seen: datetime_from_text(2, row.get(2)?)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;

                Ok(listings)
            })
            .await?;

        Ok(listings)
    }

    async fn history_count(&self, region_id: u32) -> Result<u64, StoreError> {
        let count = self
            .conn
            .call(move |conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM market_history WHERE region_id = ?1",
                    [region_id],
                    |row| row.get(0),
                )?;
                Ok(count)
            })
            .await?;

        Ok(count as u64)
    }
}
