//! Sync policy configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Resource class name under which all history fetches share one rate window.
pub const MARKET_HISTORY_CLASS: &str = "market-history";

/// Default maximum delivery attempts for one task.
/// 5 attempts with a fixed cooldown between them rides out multi-minute
/// upstream outages while still surfacing a persistent failure within the hour.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default cooldown (seconds) before a task released on a transient failure
/// runs again. 60 seconds matches the upstream's own error-budget window, so a
/// released task usually finds a recovered upstream.
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 60;

/// Default ban duration (seconds) for confirmed-missing resources: 30 days.
/// Resources the upstream 404s stay missing for a long time; re-checking
/// monthly keeps the eventual reappearance case covered without spending
/// rate-limit budget on it every sweep.
pub const DEFAULT_BAN_DURATION_SECS: u64 = 30 * 24 * 60 * 60;

/// Default call ceiling per rate window for the market-history class.
/// 300 calls per minute stays under typical upstream per-IP quotas with room
/// for other consumers on the same address.
pub const DEFAULT_RATE_CEILING: u32 = 300;

/// Default rate window duration (seconds)
pub const DEFAULT_RATE_WINDOW_SECS: u64 = 60;

/// Default number of type ids per history task.
/// 100 ids keeps a task's serialized queue small and lets cancellation land
/// between tasks quickly, while amortizing scheduling overhead.
pub const DEFAULT_TASK_CHUNK_SIZE: usize = 100;

/// Default worker count for the in-process scheduler
pub const DEFAULT_WORKERS: usize = 4;

/// Hard cap on listing pages fetched in one sweep.
/// A correct upstream never reports this many pages; hitting the cap means the
/// pagination protocol is broken and the sweep must abort instead of looping.
pub const MAX_LISTING_PAGES: u32 = 10_000;

/// Statically-shaped sync policy.
///
/// Every knob is a named field; there is no dynamic key-value configuration.
/// Call [`SyncPolicy::validate`] after construction - several fields have hard
/// lower bounds the engine relies on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncPolicy {
    /// Maximum delivery attempts per task before it fails fatally
    pub max_attempts: u32,
    /// Cooldown before a task released on a transient failure runs again
    pub retry_delay: Duration,
    /// How long a confirmed-missing resource stays banned
    pub ban_duration: Duration,
    /// Upstream call ceiling per rate window
    pub rate_ceiling: u32,
    /// Rate window duration
    pub rate_window: Duration,
    /// Whether a throttle-triggered release consumes retry budget.
    ///
    /// Off by default: a rate-limit wait is scheduled backpressure, not a
    /// failure. Turning it on makes throttles count like transient failures.
    pub throttle_consumes_retry: bool,
    /// Number of type ids per history task when chunking a region
    pub task_chunk_size: usize,
    /// Worker count for the in-process scheduler
    pub workers: usize,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay: Duration::from_secs(DEFAULT_RETRY_DELAY_SECS),
            ban_duration: Duration::from_secs(DEFAULT_BAN_DURATION_SECS),
            rate_ceiling: DEFAULT_RATE_CEILING,
            rate_window: Duration::from_secs(DEFAULT_RATE_WINDOW_SECS),
            throttle_consumes_retry: false,
            task_chunk_size: DEFAULT_TASK_CHUNK_SIZE,
            workers: DEFAULT_WORKERS,
        }
    }
}

impl SyncPolicy {
    /// Validate policy bounds.
    ///
    /// `rate_ceiling >= 1` is load-bearing: with throttles exempt from the
    /// retry budget, a zero ceiling would reschedule a task forever.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("max_attempts must be at least 1".to_string());
        }
        if self.rate_ceiling == 0 {
            return Err("rate_ceiling must be at least 1".to_string());
        }
        if self.rate_window.is_zero() {
            return Err("rate_window must be non-zero".to_string());
        }
        if self.retry_delay.is_zero() {
            return Err("retry_delay must be non-zero".to_string());
        }
        if self.task_chunk_size == 0 {
            return Err("task_chunk_size must be at least 1".to_string());
        }
        if self.workers == 0 {
            return Err("workers must be at least 1".to_string());
        }
        Ok(())
    }
}
