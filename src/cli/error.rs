//! CLI error types and conversions

use crate::ban::BanError;
use crate::fetcher::FetcherError;
use crate::limit::LimitError;
use crate::persist::StoreError;
use crate::state::StateError;
use crate::sync::{SchedulerError, SyncError};

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Rate limiter error
    #[error("rate limiter error: {0}")]
    LimitError(#[from] LimitError),

    /// Ban registry error
    #[error("ban registry error: {0}")]
    BanError(#[from] BanError),

    /// Fetcher error
    #[error("fetcher error: {0}")]
    FetcherError(#[from] FetcherError),

    /// Store error
    #[error("store error: {0}")]
    StoreError(#[from] StoreError),

    /// Scheduler error
    #[error("scheduler error: {0}")]
    SchedulerError(#[from] SchedulerError),

    /// Sync error
    #[error("sync error: {0}")]
    SyncError(#[from] SyncError),

    /// Run state error
    #[error("run state error: {0}")]
    StateError(#[from] StateError),

    /// Sync cancelled before completion
    #[error("sync cancelled before completion")]
    Cancelled,

    /// Invalid argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    ConfigurationError(String),
}
