//! Backend contract: traits and wire-level types.

use crate::error::{KvError, KvResult};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::oneshot;

/// A key selector, resolved against the ordered keyspace at read time.
///
/// Resolution finds the base key (the last key `<=` or `<` the anchor,
/// depending on `or_equal`), then moves `offset` keys forward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySelector {
    /// Anchor key.
    pub key: Vec<u8>,
    /// Whether the anchor itself participates in the base position.
    pub or_equal: bool,
    /// Number of keys to advance from the base position.
    pub offset: i64,
}

impl KeySelector {
    /// Selects the first key greater than or equal to `key`.
    pub fn first_greater_or_equal(key: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            or_equal: false,
            offset: 1,
        }
    }

    /// Selects the first key strictly greater than `key`.
    pub fn first_greater_than(key: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            or_equal: true,
            offset: 1,
        }
    }

    /// Selects the last key strictly less than `key`.
    pub fn last_less_than(key: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            or_equal: false,
            offset: 0,
        }
    }

    /// Selects the last key less than or equal to `key`.
    pub fn last_less_or_equal(key: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            or_equal: true,
            offset: 0,
        }
    }
}

/// How much of a range one read call should return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamingMode {
    /// Return the entire range (subject to `limit`) in one batch.
    #[default]
    WantAll,
    /// Return a backend-chosen batch; the caller iterates using the
    /// `has_more` flag.
    Iterator,
    /// The caller knows the exact limit; the backend must not return
    /// fewer rows unless the range is exhausted.
    Exact,
}

/// Options for a range read.
#[derive(Debug, Clone, Default)]
pub struct RangeQuery {
    /// Maximum number of key-value pairs to return.
    pub limit: Option<usize>,
    /// Scan from the end of the range towards the beginning.
    pub reverse: bool,
    /// Batching behavior.
    pub mode: StreamingMode,
}

/// One key-value pair from a range read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    /// The full key.
    pub key: Bytes,
    /// The value stored at the key.
    pub value: Bytes,
}

/// Result of a range read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeResult {
    /// Pairs in scan order.
    pub items: Vec<KeyValue>,
    /// True if the range contains more data past the returned pairs.
    pub has_more: bool,
}

/// Atomic mutation kinds.
///
/// Multi-byte integer operands are little-endian. Versionstamped
/// mutations carry a 4-byte little-endian offset appended to the
/// templated operand; the backend writes the 10-byte commit token at
/// that offset after the commit version is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    /// Little-endian integer addition.
    Add,
    /// Bitwise and. Stores the operand when no value exists.
    BitAnd,
    /// Bitwise or.
    BitOr,
    /// Bitwise xor.
    BitXor,
    /// Little-endian unsigned minimum.
    Min,
    /// Little-endian unsigned maximum.
    Max,
    /// Lexicographic byte-wise minimum.
    ByteMin,
    /// Lexicographic byte-wise maximum.
    ByteMax,
    /// Sets a key whose bytes contain the commit versionstamp.
    SetVersionstampedKey,
    /// Sets a value whose bytes contain the commit versionstamp.
    SetVersionstampedValue,
}

/// A pending notification for a watched key.
///
/// Resolves when a commit (from any transaction) modifies the key.
#[derive(Debug)]
pub struct Watch {
    rx: oneshot::Receiver<()>,
}

impl Watch {
    /// Creates a watch from its receiving half.
    pub fn new(rx: oneshot::Receiver<()>) -> Self {
        Self { rx }
    }

    /// Waits until the watched key changes.
    pub async fn wait(self) -> KvResult<()> {
        self.rx.await.map_err(|_| KvError::WatchCancelled)
    }
}

/// A connection to an ordered, strictly-serializable key-value store.
pub trait Backend: Send + Sync {
    /// Starts a new transaction against the current committed state.
    fn create_transaction(&self) -> KvResult<Arc<dyn BackendTransaction>>;
}

/// One backend transaction: a mutable snapshot of the database.
///
/// Reads observe the snapshot plus this transaction's own writes.
/// Mutations are buffered and apply atomically at [`commit`], which fails
/// with a retryable error when a conflicting commit landed in between.
///
/// [`commit`]: BackendTransaction::commit
#[async_trait]
pub trait BackendTransaction: Send + Sync {
    /// Reads a single key. `snapshot` reads skip conflict registration.
    async fn get(&self, key: &[u8], snapshot: bool) -> KvResult<Option<Bytes>>;

    /// Reads an ordered range between two resolved selectors.
    async fn get_range(
        &self,
        begin: KeySelector,
        end: KeySelector,
        opts: RangeQuery,
        snapshot: bool,
    ) -> KvResult<RangeResult>;

    /// Buffers a set mutation.
    fn set(&self, key: &[u8], value: &[u8]) -> KvResult<()>;

    /// Buffers a single-key clear.
    fn clear(&self, key: &[u8]) -> KvResult<()>;

    /// Buffers an atomic mutation.
    fn atomic_op(&self, kind: MutationKind, key: &[u8], param: &[u8]) -> KvResult<()>;

    /// Declares an explicit read conflict range.
    fn add_read_conflict_range(&self, begin: &[u8], end: &[u8]) -> KvResult<()>;

    /// Declares an explicit write conflict range.
    fn add_write_conflict_range(&self, begin: &[u8], end: &[u8]) -> KvResult<()>;

    /// Registers a watch that resolves when the key is modified by a
    /// committed transaction.
    fn watch(&self, key: &[u8]) -> KvResult<Watch>;

    /// Atomically applies all buffered mutations.
    async fn commit(&self) -> KvResult<()>;

    /// Classifies an error after a failed attempt. Returns `Ok(())` when
    /// the transaction was reset and the attempt may be re-run; returns
    /// the error itself when it is fatal or the retry budget is spent.
    async fn on_error(&self, error: &KvError) -> KvResult<()>;

    /// Discards buffered reads and writes and re-snapshots the read
    /// version. Used when a read-only transaction is promoted.
    fn reset(&self) -> KvResult<()>;

    /// Abandons the transaction without committing.
    fn cancel(&self);

    /// The version assigned by a successful commit.
    fn get_committed_version(&self) -> KvResult<u64>;

    /// The 10-byte commit token, available only after a successful commit
    /// of a transaction that requested versionstamped mutations or called
    /// this method.
    fn get_versionstamp(&self) -> KvResult<[u8; 10]>;

    /// Pins the read version of a fresh transaction.
    fn set_read_version(&self, version: u64) -> KvResult<()>;

    /// The read version this transaction observes.
    async fn get_read_version(&self) -> KvResult<u64>;
}
