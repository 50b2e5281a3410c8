//! Error types for the dispatch side

use thiserror::Error;

/// Errors raised by [`super::pool::ResourcePool`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// Every account has reached its daily limit
    #[error("All {accounts} outbound accounts have reached their daily limit")]
    Exhausted { accounts: usize },

    /// The pool was configured without accounts
    #[error("No outbound accounts configured")]
    Empty,

    /// The account is not part of this pool
    #[error("Unknown outbound account '{0}'")]
    UnknownAccount(String),

    /// The persisted quota counter could not be read or written
    #[error("Quota bookkeeping failed for '{account}': {reason}")]
    Quota { account: String, reason: String },
}

/// Errors raised while talking to the outbound mail channel
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The session could not be established within the attempt bound
    #[error("Could not connect as '{account}' after {attempts} attempts: {reason}")]
    Connect {
        account: String,
        attempts: u32,
        reason: String,
    },

    /// The recipient address does not parse
    #[error("Invalid address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    /// The message could not be assembled
    #[error("Failed to build message: {0}")]
    Build(String),

    /// The server rejected the message or the session broke
    #[error("Send via '{account}' failed: {reason}")]
    Send { account: String, reason: String },

    /// The operation did not finish in time
    #[error("Timed out after {secs}s while {operation}")]
    Timeout { operation: String, secs: u64 },
}

impl TransportError {
    /// Whether the failure is tied to the session rather than the recipient.
    ///
    /// Session failures consume quota and force the dispatcher onto the next
    /// account; recipient failures do neither.
    pub fn is_session_failure(&self) -> bool {
        !matches!(self, Self::InvalidAddress { .. } | Self::Build(_))
    }
}
