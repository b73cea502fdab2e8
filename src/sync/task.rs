//! Serializable sync task state

use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

static TASK_SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next_task_id(kind: &str, region_id: u32) -> String {
    let seq = TASK_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    format!("{kind}-{region_id}-{seq:06}")
}

/// Work shape of a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskKind {
    /// Per-resource history sweep over an ordered queue of type ids
    History {
        /// Remaining type ids, front first
        queue: VecDeque<u32>,
    },
    /// Full listing pagination sweep
    Listing {
        /// Next page to request (1-based)
        next_page: u32,
    },
}

/// One schedulable unit of sync work.
///
/// The entire task state is this serializable value. Releasing, requeueing,
/// and resuming from disk all round-trip through it with no hidden state, so
/// the remaining-id queue survives any number of reschedules verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncTask {
    /// Stable task identifier
    pub id: String,
    /// Work shape and its remaining state
    pub kind: TaskKind,
    /// Region this task sweeps
    pub region_id: u32,
    /// Delivery attempts consumed so far
    pub attempts: u32,
    /// Attempt budget; the task fails fatally once `attempts` reaches it
    pub max_attempts: u32,
    /// Batch this task reports to, if any
    pub batch_id: Option<String>,
}

impl SyncTask {
    /// Create a history sweep task over `type_ids`.
    ///
    /// Duplicate ids are dropped; first occurrence wins, order is preserved.
    pub fn history(region_id: u32, type_ids: Vec<u32>, max_attempts: u32) -> Self {
        let mut seen = HashSet::new();
        let queue: VecDeque<u32> = type_ids.into_iter().filter(|id| seen.insert(*id)).collect();
        Self {
            id: next_task_id("history", region_id),
            kind: TaskKind::History { queue },
            region_id,
            attempts: 0,
            max_attempts,
            batch_id: None,
        }
    }

    /// Create a listing sweep task starting at page 1
    pub fn listing(region_id: u32, max_attempts: u32) -> Self {
        Self {
            id: next_task_id("listing", region_id),
            kind: TaskKind::Listing { next_page: 1 },
            region_id,
            attempts: 0,
            max_attempts,
            batch_id: None,
        }
    }

    /// Attach a batch reference
    pub fn with_batch(mut self, batch_id: impl Into<String>) -> Self {
        self.batch_id = Some(batch_id.into());
        self
    }

    /// Validate task invariants
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("max_attempts must be at least 1".to_string());
        }
        if let TaskKind::Listing { next_page } = self.kind {
            if next_page == 0 {
                return Err("listing pages are 1-based".to_string());
            }
        }
        Ok(())
    }

    /// Number of type ids still queued. Listing tasks have no id queue and
    /// report zero.
    pub fn remaining(&self) -> usize {
        match &self.kind {
            TaskKind::History { queue } => queue.len(),
            TaskKind::Listing { .. } => 0,
        }
    }

    /// Peek the next queued type id without removing it.
    ///
    /// The id stays queued until [`SyncTask::pop_id`]; a task released while
    /// an id is merely peeked carries that id back unchanged.
    pub fn peek_id(&self) -> Option<u32> {
        match &self.kind {
            TaskKind::History { queue } => queue.front().copied(),
            TaskKind::Listing { .. } => None,
        }
    }

    /// Remove the front type id once it is fully resolved
    pub fn pop_id(&mut self) -> Option<u32> {
        match &mut self.kind {
            TaskKind::History { queue } => queue.pop_front(),
            TaskKind::Listing { .. } => None,
        }
    }

    /// Advance a listing task to the next page
    pub fn advance_page(&mut self) {
        if let TaskKind::Listing { next_page } = &mut self.kind {
            *next_page += 1;
        }
    }

    /// Count one delivery attempt against the budget
    pub fn record_attempt(&mut self) {
        self.attempts = self.attempts.saturating_add(1);
    }

    /// Whether the attempt budget is spent
    pub fn attempts_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}
