//! Error taxonomy for the tracker core

use thiserror::Error;

use crate::types::PositionId;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("max open positions reached ({max})")]
    CapacityExceeded { max: usize },

    #[error("position {0} not found")]
    NotFound(PositionId),

    #[error("position {0} is already closed")]
    AlreadyClosed(PositionId),

    #[error("position {0} has not been closed")]
    NotClosed(PositionId),

    #[error("invalid signal: {0}")]
    InvalidSignal(String),

    #[error("price feed unavailable: {0}")]
    TransientFeed(String),

    #[error("persistence failed: {0}")]
    Persistence(String),

    #[error("persistence failed {failures} times in a row, last error: {last}")]
    PersistenceFatal { failures: u32, last: String },

    #[error("tracker task failed: {0}")]
    TaskFailed(String),
}

impl TrackerError {
    pub fn persistence(err: impl std::fmt::Display) -> Self {
        TrackerError::Persistence(err.to_string())
    }

    /// Stale or duplicate requests that leave state untouched.
    pub fn is_stale(&self) -> bool {
        matches!(
            self,
            TrackerError::NotFound(_) | TrackerError::AlreadyClosed(_)
        )
    }
}

pub type TrackerResult<T> = std::result::Result<T, TrackerError>;
