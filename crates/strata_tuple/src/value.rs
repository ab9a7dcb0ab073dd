//! Tuple item types and versionstamps.

use crate::error::{TupleError, TupleResult};
use std::fmt;

/// Largest integer magnitude that survives a round trip through every
/// peer runtime sharing the keyspace.
pub const MAX_SAFE_INTEGER: i64 = (1 << 53) - 1;

/// A single element of a tuple.
///
/// Tuples are heterogeneous ordered sequences. Their binary encoding
/// preserves the logical order of the sequence under bytewise comparison,
/// which is what makes them usable as range-scannable keys.
#[derive(Debug, Clone, PartialEq)]
pub enum TupleItem {
    /// The null value. Sorts before everything else.
    Null,
    /// A signed integer within the safe 53-bit range.
    Integer(i64),
    /// An IEEE-754 double. `-0.0` is normalized to `0.0` when packed.
    Double(f64),
    /// A boolean. `false` sorts before `true`.
    Boolean(bool),
    /// A UTF-8 text string.
    Text(String),
    /// An opaque byte string.
    Bytes(Vec<u8>),
    /// A complete 12-byte versionstamp.
    Versionstamp(Versionstamp),
    /// An unresolved versionstamp placeholder, only valid with
    /// [`pack_with_versionstamp`](crate::pack_with_versionstamp).
    Unresolved(VersionstampRef),
    /// A nested tuple.
    Tuple(Vec<TupleItem>),
}

impl TupleItem {
    /// Convenience constructor for text items.
    pub fn text(src: impl Into<String>) -> Self {
        Self::Text(src.into())
    }

    /// Convenience constructor for byte-string items.
    pub fn bytes(src: impl Into<Vec<u8>>) -> Self {
        Self::Bytes(src.into())
    }
}

impl From<i64> for TupleItem {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<bool> for TupleItem {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<&str> for TupleItem {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for TupleItem {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// A complete versionstamp: 8-byte commit version, 2-byte in-transaction
/// batch order, 2-byte caller-assigned index. Total order follows commit
/// order, then batch order, then caller index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Versionstamp([u8; 12]);

impl Versionstamp {
    /// Wraps 12 raw bytes.
    pub fn from_bytes(bytes: [u8; 12]) -> Self {
        Self(bytes)
    }

    /// Combines the backend-assigned 10-byte commit token with a 2-byte
    /// caller index.
    pub fn from_parts(transaction: [u8; 10], index: [u8; 2]) -> Self {
        let mut out = [0u8; 12];
        out[..10].copy_from_slice(&transaction);
        out[10..].copy_from_slice(&index);
        Self(out)
    }

    /// The full 12-byte value.
    pub fn as_bytes(&self) -> &[u8; 12] {
        &self.0
    }

    /// The backend-assigned 10-byte commit token.
    pub fn transaction_bytes(&self) -> &[u8] {
        &self.0[..10]
    }

    /// The 2-byte caller-assigned index.
    pub fn user_index(&self) -> u16 {
        u16::from_be_bytes([self.0[10], self.0[11]])
    }
}

impl fmt::Display for Versionstamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

/// A deferred versionstamp placeholder.
///
/// Allocated inside a transaction before the commit version is known.
/// The 2-byte index distinguishes multiple placeholders allocated within
/// one transaction. Resolution to a full [`Versionstamp`] happens exactly
/// once, after a successful commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VersionstampRef {
    index: [u8; 2],
}

impl VersionstampRef {
    /// Creates a placeholder with the given caller index.
    pub fn new(index: u16) -> Self {
        Self {
            index: index.to_be_bytes(),
        }
    }

    /// The 2-byte caller index.
    pub fn index_bytes(&self) -> [u8; 2] {
        self.index
    }

    /// Resolves this placeholder against a committed 10-byte token.
    pub fn resolve(&self, transaction: [u8; 10]) -> Versionstamp {
        Versionstamp::from_parts(transaction, self.index)
    }
}

/// Normalizes a double for encoding.
///
/// Rejects non-finite values and collapses `-0.0` to `0.0` so that packing
/// is canonical by value.
pub(crate) fn normalize_double(value: f64) -> TupleResult<f64> {
    if !value.is_finite() {
        return Err(TupleError::NonFiniteNumber);
    }
    if value == 0.0 {
        return Ok(0.0);
    }
    Ok(value)
}

/// Validates that an integer is within the safe range.
pub(crate) fn check_safe_integer(value: i64) -> TupleResult<i64> {
    if !(-MAX_SAFE_INTEGER..=MAX_SAFE_INTEGER).contains(&value) {
        return Err(TupleError::UnsafeInteger { value });
    }
    Ok(value)
}
