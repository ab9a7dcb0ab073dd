//! Error types for the transaction core.

use strata_kv::KvError;
use strata_tuple::TupleError;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors surfaced by the transaction core.
#[derive(Debug, Error)]
pub enum CoreError {
    /// An error from the backing key-value store. Retryable when the
    /// backend marks it so.
    #[error("backend error: {0}")]
    Backend(#[from] KvError),

    /// A tuple encoding or decoding failure.
    #[error("tuple error: {0}")]
    Tuple(#[from] TupleError),

    /// An operation required an ambient transaction and none was present.
    #[error("no transaction in context")]
    NoTransaction,

    /// Two different database connections were used inside one logical
    /// transaction.
    #[error("unable to use two different connections in the same transaction")]
    MixedConnections,

    /// A write was attempted in a read-only context.
    ///
    /// In a hybrid transaction this is an internal promotion signal; in a
    /// plain read-only transaction it is a fatal usage error.
    #[error("write attempted in a read-only context")]
    WriteToReadOnlyContext,

    /// The transaction already completed.
    #[error("transaction already completed")]
    TransactionCompleted,

    /// Commit hooks are not available on read-only transactions.
    #[error("commit hooks are not available on read-only transactions")]
    ReadOnlyHooks,

    /// A versionstamp was read before the transaction committed.
    #[error("versionstamp is not available before commit")]
    VersionstampUnavailable,

    /// A versionstamp reference was resolved more than once.
    #[error("versionstamp reference already resolved")]
    VersionstampAlreadyResolved,

    /// A constraint check vetoed a mutation.
    #[error("{message}")]
    Constraint {
        /// The constraint that was violated.
        message: String,
    },

    /// A usage error: the caller invoked an operation in an invalid state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates a constraint violation.
    pub fn constraint(message: impl Into<String>) -> Self {
        Self::Constraint {
            message: message.into(),
        }
    }

    /// Creates an invalid-operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// True when the retry core may re-run the attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Backend(e) if e.is_retryable())
    }
}

/// Error types that can flow through the retry loop.
///
/// Layers above the core wrap [`CoreError`] in their own error enums; the
/// retry loop still needs to see through them to classify retryable
/// backend failures and hybrid promotion signals. Implementations return
/// the underlying core error when there is one.
pub trait TxError: From<CoreError> + Send + 'static {
    /// The wrapped core error, if this error originated in the core.
    fn as_core(&self) -> Option<&CoreError>;
}

impl TxError for CoreError {
    fn as_core(&self) -> Option<&CoreError> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(CoreError::Backend(KvError::NotCommitted).is_retryable());
        assert!(!CoreError::Backend(KvError::TransactionCompleted).is_retryable());
        assert!(!CoreError::WriteToReadOnlyContext.is_retryable());
        assert!(!CoreError::constraint("unique index constraint violation").is_retryable());
    }

    #[test]
    fn constraint_message_displays_verbatim() {
        let err = CoreError::constraint("entity already exists");
        assert_eq!(err.to_string(), "entity already exists");
    }
}
