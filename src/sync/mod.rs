//! Sync job orchestration
//!
//! This module provides the core sync engine: serializable tasks, batch
//! bookkeeping, a cooperative scheduler, and the executor that drives
//! rate-limited sweeps against the upstream market API.
//!
//! # Overview
//!
//! A sync run flows through these stages:
//!
//! 1. **Task Creation**: Describe the work as a [`task::SyncTask`], either a
//!    listing pagination sweep or a per-resource history sweep
//! 2. **Scheduling**: Queue tasks on the [`scheduler::InProcessScheduler`];
//!    delays and mid-task releases go through [`scheduler::TaskScheduler`]
//! 3. **Execution**: [`executor::SyncExecutor`] runs each delivery, consulting
//!    the rate limiter before every upstream call and the ban registry before
//!    every resource
//! 4. **Batch Tracking**: A shared [`batch::BatchState`] carries the
//!    cancellation flag and progress counters across tasks
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use market_history_sync::ban::{BanRegistry, InMemoryTtlStore};
//! use market_history_sync::fetcher::HttpMarketFetcher;
//! use market_history_sync::limit::{InMemoryWindowStore, RateLimiter};
//! use market_history_sync::persist::SqliteMarketStore;
//! use market_history_sync::sync::{
//!     BatchState, InProcessScheduler, SyncExecutor, SyncPolicy, SyncTask, TaskScheduler,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let policy = SyncPolicy::default();
//! policy.validate()?;
//!
//! let batch = BatchState::shared("batch-1");
//! let scheduler = InProcessScheduler::new(Arc::clone(&batch), policy.workers);
//! let executor = Arc::new(SyncExecutor::new(
//!     RateLimiter::new(Arc::new(InMemoryWindowStore::new())),
//!     BanRegistry::new(Arc::new(InMemoryTtlStore::new())),
//!     Arc::new(HttpMarketFetcher::new("https://market.example.net")),
//!     Arc::new(SqliteMarketStore::new("./market.db").await?),
//!     Arc::new(scheduler.handle()),
//!     policy.clone(),
//! ));
//!
//! let task = SyncTask::history(10000002, vec![34, 35, 36], policy.max_attempts)
//!     .with_batch(batch.id());
//! batch.register_tasks(1);
//! scheduler.handle().enqueue(task, std::time::Duration::ZERO).await?;
//!
//! let report = scheduler
//!     .run(move |task| {
//!         let executor = Arc::clone(&executor);
//!         async move { executor.run_task(task).await }
//!     })
//!     .await;
//! println!("completed {} tasks", report.completed.len());
//! # Ok(())
//! # }
//! ```
//!
//! # Components
//!
//! - [`executor`] - Sweep state machines with retry, ban, and throttle routing
//! - [`task`] - Serializable task state
//! - [`scheduler`] - In-process delayed task queue and worker pool
//! - [`batch`] - Shared cancellation flag and progress counters
//! - [`config`] - Sync policy knobs and their defaults
//! - [`progress`] - Terminal progress reporting
//!
//! # Error Handling
//!
//! Per-call upstream outcomes are values ([`crate::fetcher::FetchOutcome`]),
//! not errors. [`SyncError`] covers the failures that end a task: exhausted
//! retry budgets, broken pagination, and infrastructure errors from the
//! stores, limiter, or scheduler.
//!
//! # Related Modules
//!
//! - [`crate::limit`] - Windowed rate limiting
//! - [`crate::ban`] - Missing-resource cooldowns
//! - [`crate::fetcher`] - Upstream API access
//! - [`crate::persist`] - Local storage

pub mod batch;
pub mod config;
pub mod executor;
pub mod progress;
pub mod scheduler;
pub mod task;

pub use batch::{BatchState, SharedBatch};
pub use config::SyncPolicy;
pub use executor::{SyncExecutor, TaskRun};
pub use scheduler::{InProcessScheduler, RunReport, SchedulerError, SchedulerHandle, TaskScheduler};
pub use task::{SyncTask, TaskKind};

use crate::ban::BanError;
use crate::fetcher::FetcherError;
use crate::limit::LimitError;
use crate::persist::StoreError;

/// Failures that end a task.
///
/// [`SyncError::RetriesExhausted`] is the one expected terminal state for a
/// persistently failing resource; everything else is an unclassified hard
/// failure surfaced as-is.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Rate limiter backend failure
    #[error("rate limiter error: {0}")]
    Limit(#[from] LimitError),

    /// Ban registry backend failure
    #[error("ban registry error: {0}")]
    Ban(#[from] BanError),

    /// Unclassified upstream failure
    #[error("fetch error: {0}")]
    Fetcher(#[from] FetcherError),

    /// Local storage failure
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Task queue failure
    #[error("scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    /// Task state failed validation before execution
    #[error("invalid task: {0}")]
    InvalidTask(String),

    /// The task's transient-failure budget is spent
    #[error("retry budget exhausted after {attempts} attempts: {reason}")]
    RetriesExhausted {
        /// Attempts consumed when the budget ran out
        attempts: u32,
        /// Last transient failure reason
        reason: String,
    },

    /// The listing endpoint for a region does not exist upstream
    #[error("listing for region {region_id} not found upstream (status {status})")]
    ListingMissing {
        /// Region whose listing was requested
        region_id: u32,
        /// Upstream status code
        status: u16,
    },

    /// Upstream reported more pages than the sweep cap allows
    #[error("pagination runaway: upstream reported {total_pages} pages, cap is {cap}")]
    PaginationOverflow {
        /// Reported page count
        total_pages: u32,
        /// Configured sweep cap
        cap: u32,
    },
}
