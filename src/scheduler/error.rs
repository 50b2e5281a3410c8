//! Error types for the scheduler module

use std::fmt;

/// Result type for scheduler operations
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Scheduler-specific errors
#[derive(Debug)]
pub enum SchedulerError {
    /// The crawler state singleton is missing from the store
    StateMissing,

    /// Reading or writing the crawler state failed
    StateAccess {
        operation: String,
        reason: String,
    },

    /// The work pool could not be rebuilt
    SyncFailed {
        reason: String,
    },

    /// The work pool could not be read back after synchronization
    PoolUnavailable {
        reason: String,
    },
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StateMissing => {
                write!(f, "Crawler state record is missing")
            }
            Self::StateAccess { operation, reason } => {
                write!(f, "Crawler state access failed during '{}': {}", operation, reason)
            }
            Self::SyncFailed { reason } => {
                write!(f, "Work pool synchronization failed: {}", reason)
            }
            Self::PoolUnavailable { reason } => {
                write!(f, "Work pool unavailable: {}", reason)
            }
        }
    }
}

impl std::error::Error for SchedulerError {}

impl SchedulerError {
    /// Create a state access error
    pub fn state_access(operation: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::StateAccess {
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a synchronization error
    pub fn sync_failed(reason: impl fmt::Display) -> Self {
        Self::SyncFailed {
            reason: reason.to_string(),
        }
    }

    /// Check if this error is recoverable by retrying on the next poll
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::StateMissing => false,
            Self::StateAccess { .. } => true,
            Self::SyncFailed { .. } => true,
            Self::PoolUnavailable { .. } => true,
        }
    }
}
