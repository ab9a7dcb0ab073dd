//! Error types for the tuple crate.

use thiserror::Error;

/// Result type for tuple operations.
pub type TupleResult<T> = Result<T, TupleError>;

/// Errors that can occur while packing or unpacking tuples.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TupleError {
    /// A double value was not finite.
    #[error("non-finite numbers cannot be encoded")]
    NonFiniteNumber,

    /// An integer was outside the 53-bit safe range.
    #[error("integer {value} is outside the safe 53-bit range")]
    UnsafeInteger {
        /// The offending value.
        value: i64,
    },

    /// Packing with a versionstamp requires exactly one placeholder.
    #[error("expected exactly one versionstamp placeholder, found {found}")]
    VersionstampCount {
        /// Number of placeholders that were present.
        found: usize,
    },

    /// An incomplete versionstamp was passed to plain `pack`.
    #[error("unresolved versionstamp cannot be packed without a placeholder split")]
    UnresolvedVersionstamp,

    /// Input ended in the middle of an item.
    #[error("unexpected end of input")]
    UnexpectedEof,

    /// An unknown type code was encountered.
    #[error("unknown type code: {code:#04x}")]
    UnknownTypeCode {
        /// The unrecognized leading byte.
        code: u8,
    },

    /// The encoded bytes are structurally invalid.
    #[error("malformed tuple encoding: {message}")]
    Malformed {
        /// Description of the structural problem.
        message: String,
    },

    /// A decoded integer was wider than the supported range.
    #[error("cannot unpack integers wider than 53 bits")]
    IntegerTooWide,

    /// A text item contained invalid UTF-8.
    #[error("invalid UTF-8 in text item")]
    InvalidUtf8,
}

impl TupleError {
    /// Creates a malformed-encoding error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed {
            message: message.into(),
        }
    }
}
