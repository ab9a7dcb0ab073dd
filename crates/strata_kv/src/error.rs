//! Error types for the backend contract.

use thiserror::Error;

/// Result type for backend operations.
pub type KvResult<T> = Result<T, KvError>;

/// Errors surfaced by a transactional backend.
///
/// The retry core distinguishes retryable commit failures (conflicts,
/// staleness) from fatal usage errors via [`KvError::is_retryable`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KvError {
    /// The transaction could not commit because a read key or range was
    /// modified after the transaction's read version. Retryable.
    #[error("transaction not committed: conflicting modification detected")]
    NotCommitted,

    /// The transaction's read version is too old to commit against.
    /// Retryable.
    #[error("transaction is too old")]
    TransactionTooOld,

    /// The transaction was already committed or cancelled.
    #[error("transaction already completed")]
    TransactionCompleted,

    /// The retry budget for this transaction lineage is exhausted.
    #[error("transaction retry limit exceeded")]
    RetryLimitExceeded,

    /// The committed version or versionstamp was requested before a
    /// successful commit.
    #[error("commit version is not available before commit")]
    VersionUnavailable,

    /// A watch was cancelled before its key changed.
    #[error("watch cancelled")]
    WatchCancelled,

    /// A malformed parameter was passed to a backend operation.
    #[error("invalid backend parameter: {message}")]
    InvalidParameter {
        /// Description of the problem.
        message: String,
    },
}

impl KvError {
    /// True when the retry core may reset the transaction and re-run the
    /// caller's closure.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NotCommitted | Self::TransactionTooOld)
    }

    /// Creates an invalid-parameter error.
    pub fn invalid_parameter(message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(KvError::NotCommitted.is_retryable());
        assert!(KvError::TransactionTooOld.is_retryable());
        assert!(!KvError::TransactionCompleted.is_retryable());
        assert!(!KvError::RetryLimitExceeded.is_retryable());
        assert!(!KvError::VersionUnavailable.is_retryable());
    }
}
