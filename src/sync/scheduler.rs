//! In-process task scheduling
//!
//! Tasks enter through a [`SchedulerHandle`], optionally after a delay, and a
//! bounded worker pool drains them. Delayed deliveries short-circuit when the
//! batch is cancelled so a cancelled run settles promptly instead of sleeping
//! out its backoffs.

use async_trait::async_trait;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, warn};

use crate::sync::batch::{BatchState, SharedBatch};
use crate::sync::executor::TaskRun;
use crate::sync::task::SyncTask;
use crate::sync::SyncError;

/// Scheduler errors
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// The task queue closed before the task could be delivered
    #[error("task queue is closed")]
    QueueClosed,
}

/// Delayed task queue interface.
///
/// `enqueue` seeds new work; `release` hands a running task back for
/// redelivery. Both deliver the task value unchanged after the given delay.
#[async_trait]
pub trait TaskScheduler: Send + Sync {
    /// Queue a task for delivery after `delay`
    async fn enqueue(&self, task: SyncTask, delay: Duration) -> Result<(), SchedulerError>;

    /// Hand a running task back for redelivery after `delay`
    async fn release(&self, task: SyncTask, delay: Duration) -> Result<(), SchedulerError>;
}

/// Cloneable sending side of an [`InProcessScheduler`].
#[derive(Clone)]
pub struct SchedulerHandle {
    queue_tx: mpsc::UnboundedSender<SyncTask>,
    pending: Arc<AtomicUsize>,
    batch: SharedBatch,
}

impl SchedulerHandle {
    fn send_after(&self, task: SyncTask, delay: Duration) -> Result<(), SchedulerError> {
        self.pending.fetch_add(1, Ordering::SeqCst);

        if delay.is_zero() || self.batch.is_cancelled() {
            if self.queue_tx.send(task).is_err() {
                self.pending.fetch_sub(1, Ordering::SeqCst);
                return Err(SchedulerError::QueueClosed);
            }
            return Ok(());
        }

        let queue_tx = self.queue_tx.clone();
        let pending = Arc::clone(&self.pending);
        let batch = Arc::clone(&self.batch);
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = batch.wait_cancelled() => {}
            }
            if queue_tx.send(task).is_err() {
                pending.fetch_sub(1, Ordering::SeqCst);
                warn!("task queue closed before delayed delivery");
            }
        });
        Ok(())
    }
}

#[async_trait]
impl TaskScheduler for SchedulerHandle {
    async fn enqueue(&self, task: SyncTask, delay: Duration) -> Result<(), SchedulerError> {
        debug!(
            task_id = %task.id,
            delay_ms = delay.as_millis() as u64,
            "task enqueued"
        );
        self.send_after(task, delay)
    }

    async fn release(&self, task: SyncTask, delay: Duration) -> Result<(), SchedulerError> {
        debug!(
            task_id = %task.id,
            delay_ms = delay.as_millis() as u64,
            remaining = task.remaining(),
            "task released for redelivery"
        );
        self.send_after(task, delay)
    }
}

/// Outcome of one scheduler run.
#[derive(Debug, Default)]
pub struct RunReport {
    /// Tasks that ran to completion
    pub completed: Vec<SyncTask>,
    /// Tasks that failed fatally, with their terminal errors
    pub failed: Vec<(SyncTask, SyncError)>,
    /// Tasks ended early by batch cancellation, with their remaining work
    pub cancelled: Vec<SyncTask>,
}

impl RunReport {
    /// Whether every task completed
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.cancelled.is_empty()
    }

    /// Total tasks that reached a terminal state
    pub fn total_settled(&self) -> usize {
        self.completed.len() + self.failed.len() + self.cancelled.len()
    }
}

/// Single-process task queue with a bounded worker pool.
///
/// Every queued delivery is tracked by a pending counter: enqueues and
/// releases increment it, settled deliveries decrement it. [`Self::run`]
/// returns once the counter reaches zero, which covers tasks still sleeping
/// out a release delay.
pub struct InProcessScheduler {
    handle: SchedulerHandle,
    queue_rx: mpsc::UnboundedReceiver<SyncTask>,
    workers: usize,
}

impl InProcessScheduler {
    /// Create a scheduler draining into `workers` concurrent task slots.
    pub fn new(batch: SharedBatch, workers: usize) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        Self {
            handle: SchedulerHandle {
                queue_tx,
                pending: Arc::new(AtomicUsize::new(0)),
                batch,
            },
            queue_rx,
            workers: workers.max(1),
        }
    }

    /// Get a cloneable handle for queueing tasks.
    pub fn handle(&self) -> SchedulerHandle {
        self.handle.clone()
    }

    /// Drain the queue until every pending delivery has settled.
    ///
    /// `run_task` is invoked once per delivery; at most `workers` returned
    /// futures run concurrently. Seed the queue through [`Self::handle`]
    /// before calling, otherwise this returns immediately.
    pub async fn run<F, Fut>(self, run_task: F) -> RunReport
    where
        F: Fn(SyncTask) -> Fut,
        Fut: Future<Output = TaskRun> + Send + 'static,
    {
        let Self {
            handle,
            mut queue_rx,
            workers,
        } = self;
        let pending = Arc::clone(&handle.pending);
        let batch = Arc::clone(&handle.batch);

        let semaphore = Arc::new(Semaphore::new(workers));
        let mut running: JoinSet<TaskRun> = JoinSet::new();
        let mut report = RunReport::default();

        while pending.load(Ordering::SeqCst) > 0 {
            tokio::select! {
                maybe_task = queue_rx.recv() => {
                    let Some(task) = maybe_task else { break };
                    let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                        break;
                    };
                    let fut = run_task(task);
                    running.spawn(async move {
                        let outcome = fut.await;
                        drop(permit);
                        outcome
                    });
                }
                Some(joined) = running.join_next() => {
                    settle(joined, &pending, &batch, &mut report);
                }
            }
        }

        while let Some(joined) = running.join_next().await {
            settle(joined, &pending, &batch, &mut report);
        }

        report
    }
}

fn settle(
    joined: Result<TaskRun, JoinError>,
    pending: &AtomicUsize,
    batch: &BatchState,
    report: &mut RunReport,
) {
    match joined {
        Ok(TaskRun::Completed(task)) => {
            crate::metrics::record_task_outcome("completed");
            batch.task_finished();
            report.completed.push(task);
        }
        Ok(TaskRun::Released { task_id }) => {
            crate::metrics::record_task_outcome("released");
            debug!(task_id = %task_id, "delivery settled, task requeued");
        }
        Ok(TaskRun::Cancelled(task)) => {
            crate::metrics::record_task_outcome("cancelled");
            batch.task_finished();
            report.cancelled.push(task);
        }
        Ok(TaskRun::Failed { task, error }) => {
            crate::metrics::record_task_outcome("failed");
            error!(task_id = %task.id, error = %error, "task failed");
            batch.task_finished();
            report.failed.push((task, error));
        }
        Err(join_error) => {
            crate::metrics::record_task_outcome("panicked");
            error!(error = %join_error, "task aborted the worker");
            batch.task_finished();
        }
    }
    if pending.fetch_sub(1, Ordering::SeqCst) == 1 {
        debug!("task queue idle");
    }
}
