//! Windowed counter stores backing the rate limiter.
//!
//! The store is the injection seam: production and tests use the in-memory
//! implementation, while a networked counter (shared across processes) only
//! needs to implement [`WindowStore`].

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::LimitError;

/// Result of one atomic check-and-increment against a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowSlot {
    /// The call was counted; `count` is the window total including this call.
    Counted {
        /// Calls admitted in the current window so far
        count: u32,
    },
    /// The ceiling is reached; the counter was left untouched.
    Full {
        /// Time remaining until the window boundary
        retry_after: Duration,
    },
}

/// Key-value store supporting atomic increment-with-window-reset.
///
/// Implementations must be safe under concurrent callers from independent
/// task executions; the counter for one key is shared across every worker.
#[async_trait]
pub trait WindowStore: Send + Sync {
    /// Count one call against `key`'s current window.
    ///
    /// An elapsed window resets the count to zero before counting. The call
    /// either increments and reports the new count, or leaves the counter
    /// untouched and reports the time remaining until the window boundary.
    async fn try_increment(
        &self,
        key: &str,
        ceiling: u32,
        window: Duration,
    ) -> Result<WindowSlot, LimitError>;
}

/// Per-key window state
#[derive(Debug, Clone, Copy)]
struct WindowState {
    count: u32,
    started_at: Instant,
}

/// In-process window store.
///
/// Uses `tokio::time::Instant` so window expiry follows the runtime clock,
/// including paused clocks in tests.
#[derive(Debug, Default)]
pub struct InMemoryWindowStore {
    windows: Mutex<HashMap<String, WindowState>>,
}

impl InMemoryWindowStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WindowStore for InMemoryWindowStore {
    async fn try_increment(
        &self,
        key: &str,
        ceiling: u32,
        window: Duration,
    ) -> Result<WindowSlot, LimitError> {
        let now = Instant::now();
        let mut windows = self.windows.lock().await;
        let state = windows.entry(key.to_string()).or_insert(WindowState {
            count: 0,
            started_at: now,
        });

        if now.duration_since(state.started_at) >= window {
            state.count = 0;
            state.started_at = now;
        }

        if state.count < ceiling {
            state.count += 1;
            Ok(WindowSlot::Counted { count: state.count })
        } else {
            let boundary = state.started_at + window;
            Ok(WindowSlot::Full {
                retry_after: boundary.duration_since(now),
            })
        }
    }
}
