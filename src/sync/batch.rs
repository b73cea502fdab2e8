//! Shared batch bookkeeping
//!
//! A batch groups the tasks spawned by one sync run so they can be cancelled
//! together and report aggregate progress. Cancellation is monotonic: once the
//! flag is set it never clears.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Shared handle to a batch.
pub type SharedBatch = Arc<BatchState>;

/// Cross-task state for one sync batch.
#[derive(Debug)]
pub struct BatchState {
    id: String,
    cancelled: AtomicBool,
    total_tasks: AtomicUsize,
    completed_tasks: AtomicUsize,
    notify: Notify,
}

impl BatchState {
    /// Create a new batch.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            cancelled: AtomicBool::new(false),
            total_tasks: AtomicUsize::new(0),
            completed_tasks: AtomicUsize::new(0),
            notify: Notify::new(),
        }
    }

    /// Create a new shared batch wrapped in [`Arc`].
    pub fn shared(id: impl Into<String>) -> SharedBatch {
        Arc::new(Self::new(id))
    }

    /// Batch identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Request cancellation. Notifies all waiters exactly once; later calls
    /// are no-ops.
    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            self.notify.notify_waiters();
        }
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Wait until the batch is cancelled. Returns immediately if already set.
    pub async fn wait_cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        self.notify.notified().await;
    }

    /// Record `count` tasks as belonging to this batch.
    pub fn register_tasks(&self, count: usize) {
        self.total_tasks.fetch_add(count, Ordering::SeqCst);
    }

    /// Record one task as finished (completed, failed, or cancelled).
    pub fn task_finished(&self) {
        self.completed_tasks.fetch_add(1, Ordering::SeqCst);
    }

    /// Snapshot of (finished, total) task counts.
    pub fn progress(&self) -> (usize, usize) {
        (
            self.completed_tasks.load(Ordering::SeqCst),
            self.total_tasks.load(Ordering::SeqCst),
        )
    }
}
