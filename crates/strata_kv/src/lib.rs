//! # Strata KV
//!
//! The ordered transactional key-value backend contract for Strata.
//!
//! This crate defines the interface the storage engine expects from its
//! backing store:
//! - Snapshot reads with read-your-writes inside a transaction
//! - Range scans with key selectors, limits, direction, and a
//!   more-data-available flag
//! - Buffered atomic mutations (little-endian arithmetic, bitwise ops,
//!   byte min/max, versionstamped keys and values)
//! - A commit/retry protocol distinguishing retryable conflicts from
//!   fatal usage errors
//! - Key watches and explicit conflict ranges
//!
//! [`MemoryBackend`] is the strictly-serializable in-memory reference
//! implementation used throughout the workspace tests.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod memory;

pub use backend::{
    Backend, BackendTransaction, KeySelector, KeyValue, MutationKind, RangeQuery, RangeResult,
    StreamingMode, Watch,
};
pub use error::{KvError, KvResult};
pub use memory::{MemoryBackend, MemoryTransaction, DEFAULT_MAX_RETRIES};
