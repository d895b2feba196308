//! Error types for share backup and recovery operations

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type alias for keyshard operations
pub type Result<T> = std::result::Result<T, Error>;

/// Classes of failure that are worth retrying against the external store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransientKind {
    /// Connection dropped, DNS failure, etc.
    Network,
    /// The backend did not answer in time
    Timeout,
    /// Write was ordered behind a conflicting write (nonce clash, stale version)
    OrderingConflict,
    /// The backend refused the write because the attached fee was too low
    FeeTooLow,
}

impl fmt::Display for TransientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransientKind::Network => write!(f, "network"),
            TransientKind::Timeout => write!(f, "timeout"),
            TransientKind::OrderingConflict => write!(f, "ordering conflict"),
            TransientKind::FeeTooLow => write!(f, "fee too low"),
        }
    }
}

/// Fieldless discriminant of [`Error`], handy for assertions and metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    Unauthorized,
    RateLimited,
    Integrity,
    Lifecycle,
    RecoveryConflict,
    Timeout,
    Transient,
    Blacklisted,
    Throttled,
    InsufficientFee,
    Inactive,
    NotFound,
    Aggregate,
    Crypto,
    Serialization,
    Store,
    Config,
}

/// A single failed index inside a multi-share retrieval
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexFailure {
    /// Share index that could not be fetched or opened
    pub index: usize,
    /// Rendered cause
    pub cause: String,
}

impl fmt::Display for IndexFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}: {}", self.index, self.cause)
    }
}

/// Errors that can occur while splitting, sealing, storing or recovering shares
#[derive(Debug, Error)]
pub enum Error {
    // ============ Terminal input errors ============
    /// Bad share count, threshold, address or wire format
    #[error("Validation error: {0}")]
    Validation(String),

    /// Caller is not allowed to perform the operation
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Caller accessed the same resource too recently
    #[error("Rate limited: retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: i64 },

    /// Address is on the registry blacklist
    #[error("Address is blacklisted: {0}")]
    Blacklisted(String),

    /// Address is locked out after repeated failures or acting too fast
    #[error("Throttled until {until}")]
    Throttled { until: DateTime<Utc> },

    /// Required fee was not attached
    #[error("Insufficient fee: required {required}, paid {paid}")]
    InsufficientFee { required: u128, paid: u128 },

    // ============ Integrity ============
    /// AEAD tag or embedded checksum mismatch
    #[error("Integrity error: {0}")]
    Integrity(String),

    // ============ State machine ============
    /// Operating with no active config, or creating one while active
    #[error("Lifecycle error: {0}")]
    Lifecycle(String),

    /// A recovery request is already active for the owner
    #[error("Recovery conflict: {0}")]
    RecoveryConflict(String),

    /// Custodian has been deactivated
    #[error("Custodian {0} is inactive")]
    InactiveCustodian(usize),

    /// Requested record does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Not enough shares could be retrieved to reach the threshold
    #[error(
        "Share retrieval failed: required {required}, got {succeeded} ({})",
        render_failures(.failures)
    )]
    AggregateRetrieval {
        required: usize,
        succeeded: usize,
        failures: Vec<IndexFailure>,
    },

    // ============ External store ============
    /// Waiting for durable confirmation exceeded its bound
    #[error("Timeout waiting for {0}")]
    Timeout(String),

    /// Retryable backend failure
    #[error("Transient {kind} failure: {message}")]
    Transient {
        kind: TransientKind,
        message: String,
    },

    /// Non-retryable backend failure
    #[error("Store error: {0}")]
    Store(String),

    // ============ Internal ============
    /// Invalid or unreadable configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Key parsing, ECDH or signature failure
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

fn render_failures(failures: &[IndexFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    /// Shorthand for a transient failure
    pub fn transient(kind: TransientKind, message: impl Into<String>) -> Self {
        Error::Transient {
            kind,
            message: message.into(),
        }
    }

    /// Get the kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) => ErrorKind::Validation,
            Error::Unauthorized(_) => ErrorKind::Unauthorized,
            Error::RateLimited { .. } => ErrorKind::RateLimited,
            Error::Blacklisted(_) => ErrorKind::Blacklisted,
            Error::Throttled { .. } => ErrorKind::Throttled,
            Error::InsufficientFee { .. } => ErrorKind::InsufficientFee,
            Error::Integrity(_) => ErrorKind::Integrity,
            Error::Lifecycle(_) => ErrorKind::Lifecycle,
            Error::RecoveryConflict(_) => ErrorKind::RecoveryConflict,
            Error::InactiveCustodian(_) => ErrorKind::Inactive,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::AggregateRetrieval { .. } => ErrorKind::Aggregate,
            Error::Timeout(_) => ErrorKind::Timeout,
            Error::Transient { .. } => ErrorKind::Transient,
            Error::Store(_) => ErrorKind::Store,
            Error::Config(_) => ErrorKind::Config,
            Error::Crypto(_) => ErrorKind::Crypto,
            Error::Serialization(_) => ErrorKind::Serialization,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transient { .. })
    }

    /// Whether this failure counts against the caller's abuse budget
    pub(crate) fn counts_as_failure(&self) -> bool {
        matches!(
            self,
            Error::Unauthorized(_) | Error::Validation(_) | Error::InsufficientFee { .. }
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<hex::FromHexError> for Error {
    fn from(e: hex::FromHexError) -> Self {
        Error::Validation(format!("invalid hex: {}", e))
    }
}
