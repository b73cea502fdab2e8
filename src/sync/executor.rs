//! Sync task execution
//!
//! One [`SyncExecutor`] drives every task delivery. A history task walks its
//! remaining id queue under the shared rate window; a listing task walks the
//! upstream pagination until the reported page count is reached. Neither shape
//! ever blocks on backpressure: a throttled or transiently failed task hands
//! itself back to the scheduler and the worker moves on.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::ban::{BanReason, BanRegistry};
use crate::fetcher::{FetchOutcome, MarketDataFetcher};
use crate::limit::{Admission, RateLimiter};
use crate::persist::MarketStore;
use crate::sync::batch::SharedBatch;
use crate::sync::config::{SyncPolicy, MARKET_HISTORY_CLASS, MAX_LISTING_PAGES};
use crate::sync::scheduler::TaskScheduler;
use crate::sync::task::{SyncTask, TaskKind};
use crate::sync::SyncError;
use crate::{HistoryObservation, MarketHistoryRecord, MarketTypeListing};

/// Terminal state of one task delivery.
#[derive(Debug)]
pub enum TaskRun {
    /// Task ran to completion; final task state enclosed
    Completed(SyncTask),
    /// Task handed itself back to the scheduler for a later delivery
    Released {
        /// Id of the released task
        task_id: String,
    },
    /// Batch cancellation ended the task; remaining work preserved inside
    Cancelled(SyncTask),
    /// Unrecoverable failure
    Failed {
        /// Task state at the point of failure
        task: SyncTask,
        /// Terminal error
        error: SyncError,
    },
}

/// How a sweep left the task.
enum SweepFlow {
    Finished,
    Released,
    Cancelled,
}

/// Executes sync tasks against the upstream API and local store.
pub struct SyncExecutor {
    limiter: RateLimiter,
    bans: BanRegistry,
    fetcher: Arc<dyn MarketDataFetcher>,
    store: Arc<dyn MarketStore>,
    scheduler: Arc<dyn TaskScheduler>,
    policy: SyncPolicy,
    batch: Option<SharedBatch>,
}

impl SyncExecutor {
    /// Create an executor over the given collaborators.
    pub fn new(
        limiter: RateLimiter,
        bans: BanRegistry,
        fetcher: Arc<dyn MarketDataFetcher>,
        store: Arc<dyn MarketStore>,
        scheduler: Arc<dyn TaskScheduler>,
        policy: SyncPolicy,
    ) -> Self {
        Self {
            limiter,
            bans,
            fetcher,
            store,
            scheduler,
            policy,
            batch: None,
        }
    }

    /// Attach a shared batch for cooperative cancellation.
    pub fn with_batch(mut self, batch: SharedBatch) -> Self {
        self.batch = Some(batch);
        self
    }

    fn cancelled(&self) -> bool {
        self.batch
            .as_ref()
            .map(|batch| batch.is_cancelled())
            .unwrap_or(false)
    }

    /// Run one task delivery to a terminal state.
    ///
    /// Cancellation is checked before any work and again at every loop
    /// iteration, never mid-fetch. All other failures are folded into
    /// [`TaskRun::Failed`] so the caller routes on one exhaustive match.
    pub async fn run_task(&self, mut task: SyncTask) -> TaskRun {
        if let Err(reason) = task.validate() {
            return TaskRun::Failed {
                task,
                error: SyncError::InvalidTask(reason),
            };
        }

        if self.cancelled() {
            info!(task_id = %task.id, "task cancelled before start");
            return TaskRun::Cancelled(task);
        }

        let flow = match task.kind {
            TaskKind::History { .. } => self.history_sweep(&mut task).await,
            TaskKind::Listing { .. } => self.listing_sweep(&mut task).await,
        };

        match flow {
            Ok(SweepFlow::Finished) => TaskRun::Completed(task),
            Ok(SweepFlow::Released) => TaskRun::Released { task_id: task.id },
            Ok(SweepFlow::Cancelled) => TaskRun::Cancelled(task),
            Err(error) => TaskRun::Failed { task, error },
        }
    }

    /// Rate-limited per-resource sweep over the task's remaining id queue.
    ///
    /// Queue discipline: an id is only removed once it is fully resolved
    /// (persisted, banned, or confirmed missing). A throttle or transient
    /// failure leaves the queue untouched, so a released task resumes with
    /// the same ids in the same order.
    async fn history_sweep(&self, task: &mut SyncTask) -> Result<SweepFlow, SyncError> {
        info!(
            task_id = %task.id,
            region_id = task.region_id,
            remaining = task.remaining(),
            attempts = task.attempts,
            "starting history sweep"
        );

        while let Some(type_id) = task.peek_id() {
            if self.cancelled() {
                info!(
                    task_id = %task.id,
                    remaining = task.remaining(),
                    "history sweep cancelled"
                );
                return Ok(SweepFlow::Cancelled);
            }

            let admission = self
                .limiter
                .try_acquire(
                    MARKET_HISTORY_CLASS,
                    self.policy.rate_ceiling,
                    self.policy.rate_window,
                )
                .await?;
            if let Admission::Throttled { retry_after } = admission {
                return self.release_throttled(task, retry_after).await;
            }

            if self.bans.is_banned(task.region_id, type_id).await? {
                debug!(task_id = %task.id, type_id, "skipping banned resource");
                task.pop_id();
                continue;
            }

            match self.fetcher.history(task.region_id, type_id).await? {
                FetchOutcome::Success(observations) => {
                    let record = select_record(task.region_id, type_id, &observations);
                    self.store.upsert_history(&record).await?;
                    debug!(
                        task_id = %task.id,
                        type_id,
                        observed = record.has_observation(),
                        "history record persisted"
                    );
                    task.pop_id();
                }
                FetchOutcome::Retryable { reason } => {
                    return self.release_retryable(task, reason).await;
                }
                FetchOutcome::NotFound { status } => {
                    self.bans
                        .ban(
                            task.region_id,
                            type_id,
                            BanReason::NotFound { status },
                            self.policy.ban_duration,
                        )
                        .await?;
                    task.pop_id();
                }
            }
        }

        info!(
            task_id = %task.id,
            region_id = task.region_id,
            attempts = task.attempts,
            "history sweep finished"
        );
        Ok(SweepFlow::Finished)
    }

    /// Full-pagination listing sweep.
    ///
    /// Requests page N+1 until the just-fetched page index equals the
    /// reported total, so a sweep over a T-page listing performs exactly T
    /// fetches. Each page's items are upserted before the page cursor
    /// advances, keeping reschedules loss-free.
    async fn listing_sweep(&self, task: &mut SyncTask) -> Result<SweepFlow, SyncError> {
        info!(
            task_id = %task.id,
            region_id = task.region_id,
            "starting listing sweep"
        );

        loop {
            if self.cancelled() {
                info!(task_id = %task.id, "listing sweep cancelled");
                return Ok(SweepFlow::Cancelled);
            }

            let TaskKind::Listing { next_page } = &task.kind else {
                return Err(SyncError::InvalidTask(
                    "listing sweep dispatched on a history task".to_string(),
                ));
            };
            let page = *next_page;

            match self.fetcher.listing_page(task.region_id, page).await? {
                FetchOutcome::Success(listing) => {
                    if listing.total_pages > MAX_LISTING_PAGES {
                        return Err(SyncError::PaginationOverflow {
                            total_pages: listing.total_pages,
                            cap: MAX_LISTING_PAGES,
                        });
                    }

                    for type_id in &listing.items {
                        self.store
                            .upsert_listing(&MarketTypeListing::seen_now(task.region_id, *type_id))
                            .await?;
                    }
                    debug!(
                        task_id = %task.id,
                        page = listing.page,
                        total_pages = listing.total_pages,
                        items = listing.items.len(),
                        "listing page persisted"
                    );

                    if listing.is_last() {
                        info!(
                            task_id = %task.id,
                            region_id = task.region_id,
                            pages = listing.total_pages,
                            "listing sweep finished"
                        );
                        return Ok(SweepFlow::Finished);
                    }
                    task.advance_page();
                }
                FetchOutcome::Retryable { reason } => {
                    return self.release_retryable(task, reason).await;
                }
                FetchOutcome::NotFound { status } => {
                    return Err(SyncError::ListingMissing {
                        region_id: task.region_id,
                        status,
                    });
                }
            }
        }
    }

    /// Release a throttled task to run again after the window boundary.
    ///
    /// The queue is untouched. Whether the wait counts against the retry
    /// budget is a policy decision, off by default.
    async fn release_throttled(
        &self,
        task: &mut SyncTask,
        retry_after: Duration,
    ) -> Result<SweepFlow, SyncError> {
        if self.policy.throttle_consumes_retry {
            task.record_attempt();
            if task.attempts_exhausted() {
                error!(
                    task_id = %task.id,
                    attempts = task.attempts,
                    "retry budget exhausted by rate window waits"
                );
                return Err(SyncError::RetriesExhausted {
                    attempts: task.attempts,
                    reason: "rate window throttled".to_string(),
                });
            }
        }

        warn!(
            task_id = %task.id,
            retry_after_ms = retry_after.as_millis() as u64,
            remaining = task.remaining(),
            "rate window full, releasing task"
        );
        self.scheduler.release(task.clone(), retry_after).await?;
        Ok(SweepFlow::Released)
    }

    /// Count a transient failure and release the task, or fail fatally once
    /// the budget is spent.
    async fn release_retryable(
        &self,
        task: &mut SyncTask,
        reason: String,
    ) -> Result<SweepFlow, SyncError> {
        task.record_attempt();
        if task.attempts_exhausted() {
            error!(
                task_id = %task.id,
                attempts = task.attempts,
                reason = %reason,
                "retry budget exhausted"
            );
            return Err(SyncError::RetriesExhausted {
                attempts: task.attempts,
                reason,
            });
        }

        warn!(
            task_id = %task.id,
            attempts = task.attempts,
            max_attempts = task.max_attempts,
            reason = %reason,
            "transient failure, releasing task"
        );
        self.scheduler
            .release(task.clone(), self.policy.retry_delay)
            .await?;
        Ok(SweepFlow::Released)
    }
}

/// Derive the record to persist from an upstream history response.
fn select_record(
    region_id: u32,
    type_id: u32,
    observations: &[HistoryObservation],
) -> MarketHistoryRecord {
    match HistoryObservation::latest_sampled(observations) {
        Some(obs) => MarketHistoryRecord::from_observation(region_id, type_id, obs),
        None => MarketHistoryRecord::empty(region_id, type_id),
    }
}
