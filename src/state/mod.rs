//! Sync run state persistence
//!
//! A cancelled or failed run can save its unfinished tasks and resume them
//! later. Task values serialize verbatim, so a resumed history sweep carries
//! the same remaining ids in the same order it had when it stopped. Writes are
//! atomic (temp file + rename) and guarded by an advisory file lock.

use fd_lock::RwLock;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::sync::task::SyncTask;

/// Current run state schema version
const SCHEMA_VERSION: &str = "1.0.0";

/// Maximum allowed state file size to prevent memory exhaustion
pub const MAX_STATE_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Build the state file path for a region under `dir`.
pub fn state_path(dir: &Path, region_id: u32) -> PathBuf {
    dir.join(format!("sync_{region_id}.json"))
}

/// Unfinished tasks from an interrupted sync run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    schema_version: String,
    batch_id: String,
    region_id: u32,
    pending: Vec<SyncTask>,
    created_at: i64,
    updated_at: i64,
}

impl RunState {
    /// Create an empty run state for a batch.
    pub fn new(batch_id: impl Into<String>, region_id: u32) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            batch_id: batch_id.into(),
            region_id,
            pending: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Batch the saved tasks belonged to.
    pub fn batch_id(&self) -> &str {
        &self.batch_id
    }

    /// Region the saved tasks sweep.
    pub fn region_id(&self) -> u32 {
        self.region_id
    }

    /// Saved tasks, in the order they were recorded.
    pub fn pending(&self) -> &[SyncTask] {
        &self.pending
    }

    /// Whether there is anything to resume.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Record an unfinished task.
    pub fn push_pending(&mut self, task: SyncTask) {
        self.pending.push(task);
        self.updated_at = chrono::Utc::now().timestamp_millis();
    }

    /// Consume the state, yielding the tasks to requeue.
    pub fn into_pending(self) -> Vec<SyncTask> {
        self.pending
    }

    /// Save state to `path` with an atomic write and file locking.
    pub fn save(&self, path: &Path) -> Result<(), StateError> {
        debug!(
            path = %path.display(),
            pending = self.pending.len(),
            "saving run state"
        );

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StateError::Io(e.to_string()))?;
        }

        let json = serde_json::to_string_pretty(self)
            .map_err(|e| StateError::Serialization(e.to_string()))?;

        let lock_path = path.with_extension("lock");
        let lock_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| StateError::Lock(format!("failed to create lock file: {e}")))?;
        let mut lock = RwLock::new(lock_file);
        let _guard = lock
            .write()
            .map_err(|e| StateError::Lock(format!("failed to acquire write lock: {e}")))?;

        let parent_dir = path.parent().unwrap_or_else(|| Path::new("."));
        let mut temp_file = tempfile::NamedTempFile::new_in(parent_dir)
            .map_err(|e| StateError::Io(format!("failed to create temp file: {e}")))?;
        temp_file
            .write_all(json.as_bytes())
            .map_err(|e| StateError::Io(format!("failed to write temp file: {e}")))?;
        temp_file
            .flush()
            .map_err(|e| StateError::Io(format!("failed to flush temp file: {e}")))?;
        temp_file
            .as_file()
            .sync_all()
            .map_err(|e| StateError::Io(format!("failed to sync temp file: {e}")))?;
        temp_file
            .persist(path)
            .map_err(|e| StateError::Io(format!("failed to persist temp file: {e}")))?;

        // Fsync the parent directory so the rename survives a crash
        if let Some(parent) = path.parent() {
            if let Ok(dir) = std::fs::File::open(parent) {
                let _ = dir.sync_all();
            }
        }

        info!(
            path = %path.display(),
            pending = self.pending.len(),
            "run state saved"
        );
        Ok(())
    }

    /// Load state from `path` with file locking and a size guard.
    pub fn load(path: &Path) -> Result<Self, StateError> {
        debug!(path = %path.display(), "loading run state");

        let lock_path = path.with_extension("lock");
        let lock_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| StateError::Lock(format!("failed to create lock file: {e}")))?;
        let lock = RwLock::new(lock_file);
        let _guard = lock
            .read()
            .map_err(|e| StateError::Lock(format!("failed to acquire read lock: {e}")))?;

        let metadata = std::fs::metadata(path).map_err(|e| StateError::Io(e.to_string()))?;
        if metadata.len() > MAX_STATE_FILE_SIZE {
            return Err(StateError::StateTooLarge {
                size: metadata.len(),
                max: MAX_STATE_FILE_SIZE,
            });
        }

        let contents =
            std::fs::read_to_string(path).map_err(|e| StateError::Io(e.to_string()))?;
        let state: RunState = serde_json::from_str(&contents).map_err(|e| {
            warn!(error = %e, "failed to deserialize run state");
            StateError::Deserialization(e.to_string())
        })?;

        if state.schema_version != SCHEMA_VERSION {
            warn!(
                found_version = %state.schema_version,
                expected_version = SCHEMA_VERSION,
                "run state schema version mismatch"
            );
            return Err(StateError::SchemaVersionMismatch {
                expected: SCHEMA_VERSION.to_string(),
                found: state.schema_version,
            });
        }

        info!(
            pending = state.pending.len(),
            batch_id = %state.batch_id,
            "run state loaded"
        );
        Ok(state)
    }

    /// Remove the state file after a clean run.
    pub fn remove(path: &Path) {
        if path.exists() {
            match std::fs::remove_file(path) {
                Ok(()) => info!(path = %path.display(), "removed run state file"),
                Err(e) => warn!(error = %e, "failed to remove run state file"),
            }
        }
    }
}

/// Errors related to run state persistence
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// Schema version mismatch
    #[error("schema version mismatch: expected {expected}, found {found}")]
    SchemaVersionMismatch {
        /// Expected schema version
        expected: String,
        /// Found schema version
        found: String,
    },

    /// State file too large
    #[error("state file too large: {size} bytes (max: {max} bytes)")]
    StateTooLarge {
        /// Actual file size
        size: u64,
        /// Maximum allowed size
        max: u64,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// Lock error
    #[error("lock error: {0}")]
    Lock(String),
}
