//! Error types for the entity layer.

use strata_core::{CoreError, TxError};
use strata_tuple::TupleError;
use thiserror::Error;

/// Result type for entity operations.
pub type EntityResult<T> = Result<T, EntityError>;

/// Errors surfaced by entity lifecycle and index maintenance.
#[derive(Debug, Error)]
pub enum EntityError {
    /// An error from the transaction core or the backend.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A create targeted a primary key that is already occupied.
    #[error("entity already exists")]
    AlreadyExists,

    /// A create or update would duplicate a unique index entry.
    #[error("unique index constraint violation")]
    UniqueConstraint,

    /// A second delete of the same entity.
    #[error("entity already deleted")]
    AlreadyDeleted,

    /// The descriptor forbids deleting this entity type.
    #[error("delete is not allowed for entity {name}")]
    DeleteNotAllowed {
        /// Entity type name.
        name: String,
    },

    /// A primary key did not match the descriptor.
    #[error("invalid primary key: {message}")]
    InvalidPrimaryKey {
        /// Description of the mismatch.
        message: String,
    },

    /// A record shape did not match the descriptor.
    #[error("invalid record shape: {message}")]
    InvalidShape {
        /// Description of the mismatch.
        message: String,
    },

    /// A stored row failed to decode.
    #[error("malformed stored record: {message}")]
    MalformedRecord {
        /// Description of the decode failure.
        message: String,
    },

    /// A cursor string failed to parse.
    #[error("invalid cursor")]
    InvalidCursor,

    /// An index row referenced a primary key with no stored row.
    #[error("broken index: referenced row is missing")]
    BrokenIndex,

    /// A usage error: mutation of a deleted, completed-transaction or
    /// read-only-bound entity, or a misdirected context.
    #[error("invalid entity operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },
}

impl EntityError {
    /// Creates an invalid-primary-key error.
    pub fn invalid_primary_key(message: impl Into<String>) -> Self {
        Self::InvalidPrimaryKey {
            message: message.into(),
        }
    }

    /// Creates an invalid-shape error.
    pub fn invalid_shape(message: impl Into<String>) -> Self {
        Self::InvalidShape {
            message: message.into(),
        }
    }

    /// Creates a malformed-record error.
    pub fn malformed_record(message: impl Into<String>) -> Self {
        Self::MalformedRecord {
            message: message.into(),
        }
    }

    /// Creates an invalid-operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Lowers this error into a [`CoreError`] for commit-hook contexts.
    ///
    /// Constraint violations keep their exact messages so callers see
    /// the same text regardless of whether the failure surfaced from an
    /// explicit flush or an implicit commit-time flush.
    pub fn into_core(self) -> CoreError {
        match self {
            Self::Core(core) => core,
            Self::AlreadyExists => CoreError::constraint("entity already exists"),
            Self::UniqueConstraint => {
                CoreError::constraint("unique index constraint violation")
            }
            other => CoreError::invalid_operation(other.to_string()),
        }
    }
}

impl From<TupleError> for EntityError {
    fn from(err: TupleError) -> Self {
        Self::Core(CoreError::Tuple(err))
    }
}

impl TxError for EntityError {
    fn as_core(&self) -> Option<&CoreError> {
        match self {
            Self::Core(core) => Some(core),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constraint_messages_survive_lowering() {
        assert_eq!(
            EntityError::AlreadyExists.into_core().to_string(),
            "entity already exists"
        );
        assert_eq!(
            EntityError::UniqueConstraint.into_core().to_string(),
            "unique index constraint violation"
        );
    }

    #[test]
    fn retryable_backend_errors_visible_through_wrapper() {
        let err = EntityError::Core(CoreError::Backend(strata_kv::KvError::NotCommitted));
        assert!(err.as_core().is_some_and(CoreError::is_retryable));
        assert!(EntityError::AlreadyExists.as_core().is_none());
    }
}
