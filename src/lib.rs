//! # Market History Sync Library
//!
//! A library for incrementally synchronizing market history from a paginated,
//! rate-limited upstream API into local storage. Designed for downstream
//! reporting and aggregation workloads that need idempotent, resumable syncs.
//!
//! ## Features
//!
//! - **Shared Rate Limiting**: one windowed call budget enforced across every
//!   concurrent sync task, backed by a pluggable counter store
//! - **Per-Resource Bans**: confirmed-missing resources are excluded from
//!   fetching for a long cooldown instead of failing the whole task
//! - **Bounded Retries**: transient upstream outages reschedule the task with a
//!   fixed cooldown until its attempt budget is exhausted
//! - **Cooperative Cancellation**: batches can be cancelled without interrupting
//!   an in-flight fetch or corrupting stored data
//! - **Idempotent Persistence**: natural-key upserts converge to exactly one row
//!   per (region, type) no matter how often a sync repeats
//!
//! ## Quick Start
//!
//! ```no_run
//! use market_history_sync::sync::{SyncPolicy, SyncTask};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Policy with named fields only; validate before use
//! let policy = SyncPolicy::default();
//! policy.validate()?;
//!
//! // One resumable unit of work: history for three types in one region
//! let task = SyncTask::history(10000002, vec![34, 35, 36], policy.max_attempts);
//! assert_eq!(task.remaining(), 3);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! The library is organized into several core modules:
//!
//! - [`limit`] - Cross-task rate limiter over a windowed counter store
//! - [`ban`] - TTL-keyed registry of resources excluded from fetching
//! - [`fetcher`] - Upstream API client with tagged outcome classification
//! - [`persist`] - Natural-key upsert store for synchronized records
//! - [`sync`] - Task model, batch state, scheduler, and the two sweep shapes
//! - [`state`] - On-disk persistence of unfinished tasks for resume

#![warn(missing_docs)]
#![warn(clippy::all)]

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// TTL-keyed ban registry
pub mod ban;

/// CLI command implementations
pub mod cli;

/// Upstream API fetchers
pub mod fetcher;

/// Cross-task rate limiting
pub mod limit;

/// Observability metrics
pub mod metrics;

/// Record persistence
pub mod persist;

/// On-disk task state for resume
pub mod state;

/// Sync orchestration
pub mod sync;

/// One upstream datapoint: daily aggregated market activity for a type in a
/// region.
///
/// `order_count` is the sample count behind the aggregate; observations with a
/// zero sample count carry no usable price information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryObservation {
    /// Observation date (upstream publishes one datapoint per day)
    pub date: NaiveDate,
    /// Volume-weighted average price over the day
    pub average: Decimal,
    /// Highest traded price over the day
    pub highest: Decimal,
    /// Lowest traded price over the day
    pub lowest: Decimal,
    /// Number of orders behind the aggregate
    pub order_count: u32,
    /// Total units traded over the day
    pub volume: u64,
}

impl HistoryObservation {
    /// Validate observation integrity
    pub fn validate(&self) -> Result<(), String> {
        if self.average < Decimal::ZERO || self.highest < Decimal::ZERO || self.lowest < Decimal::ZERO
        {
            return Err(format!(
                "Prices must be non-negative, got average={} highest={} lowest={}",
                self.average, self.highest, self.lowest
            ));
        }

        if self.highest < self.lowest {
            return Err(format!(
                "Highest ({}) must be >= lowest ({})",
                self.highest, self.lowest
            ));
        }

        if self.average < self.lowest || self.average > self.highest {
            return Err(format!(
                "Average ({}) must lie within [{}, {}]",
                self.average, self.lowest, self.highest
            ));
        }

        Ok(())
    }

    /// Whether this observation is backed by at least one order
    pub fn has_samples(&self) -> bool {
        self.order_count > 0
    }

    /// Select the most relevant observation from an upstream response: the most
    /// recent one among those with a positive sample count.
    ///
    /// Returns `None` when no observation qualifies; callers persist the
    /// neutral record in that case rather than skipping the write.
    pub fn latest_sampled(observations: &[HistoryObservation]) -> Option<&HistoryObservation> {
        observations
            .iter()
            .filter(|obs| obs.has_samples())
            .max_by_key(|obs| obs.date)
    }
}

/// Synchronized market history, keyed by the natural (region, type) pair.
///
/// Exactly one row exists per key; later observations overwrite earlier ones.
/// A sync that finds no qualifying observation still writes the neutral record
/// from [`MarketHistoryRecord::empty`], so consumers never have to distinguish
/// "not yet synchronized" from "confirmed empty".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketHistoryRecord {
    /// Region owning the market
    pub region_id: u32,
    /// Resource type traded in the market
    pub type_id: u32,
    /// Average price of the selected observation
    pub average: Decimal,
    /// Highest price of the selected observation
    pub highest: Decimal,
    /// Lowest price of the selected observation
    pub lowest: Decimal,
    /// Order count of the selected observation
    pub order_count: u32,
    /// Volume of the selected observation
    pub volume: u64,
    /// Date of the selected observation; `None` for the neutral record
    pub observed_at: Option<NaiveDate>,
}

impl MarketHistoryRecord {
    /// Build a record from the selected upstream observation
    pub fn from_observation(region_id: u32, type_id: u32, obs: &HistoryObservation) -> Self {
        Self {
            region_id,
            type_id,
            average: obs.average,
            highest: obs.highest,
            lowest: obs.lowest,
            order_count: obs.order_count,
            volume: obs.volume,
            observed_at: Some(obs.date),
        }
    }

    /// The explicit zero-valued record written when no observation qualifies
    pub fn empty(region_id: u32, type_id: u32) -> Self {
        Self {
            region_id,
            type_id,
            average: Decimal::ZERO,
            highest: Decimal::ZERO,
            lowest: Decimal::ZERO,
            order_count: 0,
            volume: 0,
            observed_at: None,
        }
    }

    /// Whether this record carries a real observation
    pub fn has_observation(&self) -> bool {
        self.observed_at.is_some()
    }
}

/// One type id seen on a region's paginated market listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketTypeListing {
    /// Region whose listing contained the type
    pub region_id: u32,
    /// Listed resource type
    pub type_id: u32,
    /// When the listing sweep last saw this type
    pub last_seen: DateTime<Utc>,
}

impl MarketTypeListing {
    /// Create a listing entry stamped with the current time
    pub fn seen_now(region_id: u32, type_id: u32) -> Self {
        Self {
            region_id,
            type_id,
            last_seen: Utc::now(),
        }
    }
}
