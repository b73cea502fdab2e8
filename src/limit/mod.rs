//! Cross-task rate limiting over a shared windowed counter.
//!
//! Every concurrent task execution that talks to the same upstream resource
//! class shares one call budget per time window. The limiter never blocks:
//! callers get an immediate [`Admission`] verdict and, when throttled, the
//! delay after which the window has room again. A throttled task releases
//! itself back to the scheduler for that long instead of tying up a worker.
//!
//! # Quick Start
//!
//! ```
//! use market_history_sync::limit::{Admission, InMemoryWindowStore, RateLimiter};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() {
//! let limiter = RateLimiter::new(Arc::new(InMemoryWindowStore::new()));
//! match limiter
//!     .try_acquire("market-history", 300, Duration::from_secs(60))
//!     .await
//!     .unwrap()
//! {
//!     Admission::Admitted => { /* perform the upstream call */ }
//!     Admission::Throttled { retry_after } => { /* release task for retry_after */ }
//! }
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub mod store;

pub use store::{InMemoryWindowStore, WindowSlot, WindowStore};

/// Verdict of a non-blocking admission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The call fits the current window; the shared counter was incremented.
    Admitted,
    /// The window ceiling is reached; retry once the window boundary passes.
    Throttled {
        /// Time remaining until the next window opens
        retry_after: Duration,
    },
}

impl Admission {
    /// Whether the call was admitted
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted)
    }
}

/// Shared rate limiter bounding upstream calls per resource class.
///
/// The counter lives in the injected [`WindowStore`], so all workers of all
/// concurrently executing tasks observe the same window.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn WindowStore>,
}

impl RateLimiter {
    /// Create a limiter over the given counter store
    pub fn new(store: Arc<dyn WindowStore>) -> Self {
        Self { store }
    }

    /// Try to admit one upstream call for `resource_class`.
    ///
    /// Admission atomically increments the shared window counter, resetting it
    /// first if the window has elapsed. Never waits; a full window yields
    /// [`Admission::Throttled`] carrying the remaining time until the boundary.
    ///
    /// # Errors
    ///
    /// Returns [`LimitError`] when the counter store itself fails; the
    /// in-memory store is infallible.
    pub async fn try_acquire(
        &self,
        resource_class: &str,
        ceiling: u32,
        window: Duration,
    ) -> Result<Admission, LimitError> {
        match self
            .store
            .try_increment(resource_class, ceiling, window)
            .await?
        {
            WindowSlot::Counted { count } => {
                debug!(
                    resource_class = %resource_class,
                    count = count,
                    ceiling = ceiling,
                    "Rate limiter admitted call"
                );
                crate::metrics::record_window_usage(resource_class, count, ceiling);
                Ok(Admission::Admitted)
            }
            WindowSlot::Full { retry_after } => {
                debug!(
                    resource_class = %resource_class,
                    ceiling = ceiling,
                    retry_after_ms = retry_after.as_millis() as u64,
                    "Rate limiter throttled call"
                );
                crate::metrics::record_throttled(resource_class, retry_after);
                Ok(Admission::Throttled { retry_after })
            }
        }
    }
}

/// Rate limiter errors
#[derive(Debug, thiserror::Error)]
pub enum LimitError {
    /// The backing counter store could not be reached
    #[error("window store unavailable: {0}")]
    StoreUnavailable(String),
}
