//! Unified error handling for the tidings crate
//!
//! Domain modules keep their own error enums; this module folds them into a
//! single [`Error`] and classifies every failure into an [`ErrorCategory`]
//! that decides how the background loops react.
//!
//! # Architecture
//!
//! - [`TidingsErrorTrait`] - Common interface implemented by all error types
//! - [`ErrorCategory`] - Classification of errors for handling strategies
//! - [`Error`] - Unified error enum wrapping all domain-specific errors
//!
//! # Usage
//!
//! ```rust,ignore
//! use tidings::error::{Error, ErrorCategory, TidingsErrorTrait};
//!
//! fn handle_error(err: Error) {
//!     match err.category() {
//!         ErrorCategory::ResourceExhausted => tracing::info!("backing off: {err}"),
//!         _ if err.is_recoverable() => tracing::warn!("retrying: {err}"),
//!         _ => tracing::error!("iteration failed: {err}"),
//!     }
//! }
//! ```

use std::io;
use thiserror::Error;

pub use crate::dispatch::error::{PoolError, TransportError};
pub use crate::scheduler::error::SchedulerError;
pub use crate::utils::error::{CrawlerError, FetchError};

/// Common trait for all tidings error types
pub trait TidingsErrorTrait: std::error::Error {
    /// Check if this error is recoverable (can be retried)
    fn is_recoverable(&self) -> bool;

    /// Get the error category for handling strategies
    fn category(&self) -> ErrorCategory;
}

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Datastore or network unreachable; retry a bounded number of times
    Transient,
    /// A record the loops depend on is missing or malformed
    DataIntegrity,
    /// Every outbound account is at its daily limit
    ResourceExhausted,
    /// One work unit or one recipient failed; the rest of the batch goes on
    PartialFailure,
    /// The service is misconfigured, e.g. no outbound accounts
    Config,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::DataIntegrity => "data_integrity",
            Self::ResourceExhausted => "resource_exhausted",
            Self::PartialFailure => "partial_failure",
            Self::Config => "config",
            Self::Other => "other",
        }
    }
}

/// Unified error type for the tidings crate
#[derive(Error, Debug)]
pub enum Error {
    /// Crawler-related errors raised by a work unit
    #[error("Crawler error: {0}")]
    Crawler(#[from] CrawlerError),

    /// Fetch-specific errors
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Scheduler errors
    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    /// Account pool errors
    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),

    /// Outbound transport errors
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Repository errors, carrying the repository's context chain
    #[error("Storage error: {0:#}")]
    Storage(anyhow::Error),

    /// Template rendering errors
    #[error("Template error: {0}")]
    Template(#[from] handlebars::RenderError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{context}")]
    Other {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl TidingsErrorTrait for Error {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Crawler(CrawlerError::Fetch(e)) | Self::Fetch(e) => e.is_retryable(),
            Self::Crawler(_) => false,
            Self::Scheduler(e) => e.is_recoverable(),
            Self::Pool(PoolError::Exhausted { .. }) => true,
            Self::Pool(_) => false,
            Self::Transport(e) => e.is_session_failure(),
            Self::Storage(_) => true,
            Self::Io(_) => true,
            Self::Template(_) | Self::Json(_) => false,
            Self::Other { .. } => false,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Crawler(_) | Self::Fetch(_) | Self::Template(_) => ErrorCategory::PartialFailure,
            Self::Transport(e) if !e.is_session_failure() => ErrorCategory::PartialFailure,
            Self::Transport(_) => ErrorCategory::Transient,
            Self::Scheduler(SchedulerError::StateMissing) => ErrorCategory::DataIntegrity,
            Self::Scheduler(_) => ErrorCategory::Transient,
            Self::Pool(PoolError::Exhausted { .. }) => ErrorCategory::ResourceExhausted,
            Self::Pool(PoolError::Quota { .. }) => ErrorCategory::Transient,
            Self::Pool(_) => ErrorCategory::Config,
            Self::Storage(_) | Self::Io(_) => ErrorCategory::Transient,
            Self::Json(_) => ErrorCategory::DataIntegrity,
            Self::Other { .. } => ErrorCategory::Other,
        }
    }
}

impl Error {
    /// Create a generic error with context
    pub fn other(context: impl Into<String>) -> Self {
        Self::Other {
            context: context.into(),
            source: None,
        }
    }

    /// Create a generic error with context and source
    pub fn with_source(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Other {
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }
}

// Repositories report through anyhow
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Storage(err)
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;
