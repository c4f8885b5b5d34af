//! Error types for the snapshot store and query engine
//!
//! [`ReplayError`] is what callers see. It separates malformed input, absent
//! hosts, backing-store failures and cancellation so a caller can decide on
//! its own retry policy; nothing in this crate retries.

use std::fmt;

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, ReplayError>;

/// Errors surfaced by store and query operations
#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    /// Malformed input such as an empty identity or unset timestamp
    #[error("validation failed: {0}")]
    Validation(String),

    /// The requested entity has no meta row
    #[error("not found: {0}")]
    NotFound(String),

    /// The backing store failed, partially persisted, or returned corrupt rows
    #[error("store operation {operation} failed for {entity}: {source}")]
    Store {
        operation: &'static str,
        entity: String,
        #[source]
        source: StoreFault,
    },

    /// The caller cancelled or the deadline elapsed
    #[error("{operation} aborted: {reason}")]
    Cancelled {
        operation: &'static str,
        reason: CancelReason,
    },
}

impl ReplayError {
    pub fn validation(message: impl Into<String>) -> Self {
        ReplayError::Validation(message.into())
    }

    pub(crate) fn store(
        operation: &'static str,
        entity: impl Into<String>,
        source: impl Into<StoreFault>,
    ) -> Self {
        ReplayError::Store {
            operation,
            entity: entity.into(),
            source: source.into(),
        }
    }

    /// Stable label for metrics and logs
    pub fn kind(&self) -> &'static str {
        match self {
            ReplayError::Validation(_) => "validation",
            ReplayError::NotFound(_) => "not_found",
            ReplayError::Store { .. } => "store",
            ReplayError::Cancelled { .. } => "cancelled",
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ReplayError::NotFound(_))
    }
}

/// Why a store operation failed
#[derive(Debug, thiserror::Error)]
pub enum StoreFault {
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// The backend acknowledged fewer rows than were submitted
    #[error("persisted count ({persisted}) != submitted count ({submitted})")]
    PartialWrite { persisted: usize, submitted: usize },

    /// A row whose kind, path or payload does not decode
    #[error("corrupt row {id}: {reason}")]
    CorruptRow { id: String, reason: String },

    /// Rows that decode individually but disagree with each other
    #[error("inconsistent read: {0}")]
    InconsistentRead(String),

    #[error("failed to encode row: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Reason a context aborted an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    Cancelled,
    DeadlineExceeded,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::Cancelled => f.write_str("cancelled by caller"),
            CancelReason::DeadlineExceeded => f.write_str("deadline exceeded"),
        }
    }
}

/// Errors returned by a [`KvBackend`](crate::store::KvBackend)
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("unknown index: {0}")]
    UnknownIndex(String),

    #[error("item ({id}, {path}) does not exist")]
    ItemNotFound { id: String, path: String },

    #[error("batch of {size} items exceeds maximum of {max}")]
    BatchTooLarge { size: usize, max: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
