//! In-memory reference backend.
//!
//! A strictly-serializable single-process implementation of the backend
//! contract, used by every test in the workspace. Transactions read a
//! snapshot version, buffer writes locally, and validate their read set
//! at commit under one store lock; a conflicting committed modification
//! fails the commit with a retryable error.

use crate::backend::{
    Backend, BackendTransaction, KeySelector, KeyValue, MutationKind, RangeQuery, RangeResult,
    StreamingMode, Watch,
};
use crate::error::{KvError, KvResult};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound::{Excluded, Included};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::trace;

/// Default retry budget per transaction lineage.
pub const DEFAULT_MAX_RETRIES: u32 = 100;

struct Store {
    data: BTreeMap<Vec<u8>, Bytes>,
    // Last-modified commit sequence per key. Entries survive clears so
    // deletions conflict with concurrent readers.
    versions: BTreeMap<Vec<u8>, u64>,
    commit_seq: u64,
    watches: HashMap<Vec<u8>, Vec<oneshot::Sender<()>>>,
    injected_commit_failures: u32,
}

/// An in-memory ordered transactional store.
pub struct MemoryBackend {
    store: Arc<Mutex<Store>>,
    max_retries: u32,
}

impl MemoryBackend {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::with_max_retries(DEFAULT_MAX_RETRIES)
    }

    /// Creates an empty store with a custom retry budget.
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            store: Arc::new(Mutex::new(Store {
                data: BTreeMap::new(),
                versions: BTreeMap::new(),
                commit_seq: 0,
                watches: HashMap::new(),
                injected_commit_failures: 0,
            })),
            max_retries,
        }
    }

    /// Makes the next `count` commits fail with a retryable error.
    ///
    /// Test hook for exercising retry loops.
    pub fn inject_commit_failures(&self, count: u32) {
        self.store.lock().injected_commit_failures = count;
    }

    /// The current committed version.
    pub fn committed_version(&self) -> u64 {
        self.store.lock().commit_seq
    }

    /// Number of keys currently stored.
    pub fn len(&self) -> usize {
        self.store.lock().data.len()
    }

    /// True when no keys are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for MemoryBackend {
    fn create_transaction(&self) -> KvResult<Arc<dyn BackendTransaction>> {
        let read_version = self.store.lock().commit_seq;
        Ok(Arc::new(MemoryTransaction {
            store: Arc::clone(&self.store),
            inner: Mutex::new(TxInner::new(read_version, self.max_retries)),
        }))
    }
}

#[derive(Clone)]
enum WriteOp {
    Set(Bytes),
    Clear,
    Atomic(Vec<(MutationKind, Vec<u8>)>),
}

struct TxInner {
    read_version: u64,
    read_keys: Vec<Vec<u8>>,
    read_ranges: Vec<(Vec<u8>, Vec<u8>)>,
    writes: BTreeMap<Vec<u8>, WriteOp>,
    // (templated key incl. trailing offset, value)
    vs_key_writes: Vec<(Vec<u8>, Bytes)>,
    // (key, templated value incl. trailing offset)
    vs_value_writes: Vec<(Vec<u8>, Vec<u8>)>,
    completed: bool,
    committed_version: Option<u64>,
    retries_left: u32,
}

impl TxInner {
    fn new(read_version: u64, retries: u32) -> Self {
        Self {
            read_version,
            read_keys: Vec::new(),
            read_ranges: Vec::new(),
            writes: BTreeMap::new(),
            vs_key_writes: Vec::new(),
            vs_value_writes: Vec::new(),
            completed: false,
            committed_version: None,
            retries_left: retries,
        }
    }

    fn ensure_active(&self) -> KvResult<()> {
        if self.completed {
            return Err(KvError::TransactionCompleted);
        }
        Ok(())
    }

    fn reset_buffers(&mut self, read_version: u64) {
        self.read_version = read_version;
        self.read_keys.clear();
        self.read_ranges.clear();
        self.writes.clear();
        self.vs_key_writes.clear();
        self.vs_value_writes.clear();
    }
}

/// A transaction against a [`MemoryBackend`].
pub struct MemoryTransaction {
    store: Arc<Mutex<Store>>,
    inner: Mutex<TxInner>,
}

impl MemoryTransaction {
    fn merged_get(store: &Store, inner: &TxInner, key: &[u8]) -> Option<Bytes> {
        match inner.writes.get(key) {
            Some(WriteOp::Set(v)) => Some(v.clone()),
            Some(WriteOp::Clear) => None,
            Some(WriteOp::Atomic(ops)) => {
                let mut cur = store.data.get(key).map(|b| b.to_vec());
                for (kind, param) in ops {
                    cur = Some(apply_mutation(*kind, cur.as_deref(), param));
                }
                cur.map(Bytes::from)
            }
            None => store.data.get(key).cloned(),
        }
    }

    fn merged_view(store: &Store, inner: &TxInner) -> BTreeMap<Vec<u8>, Bytes> {
        let mut view = store.data.clone();
        for (key, op) in &inner.writes {
            match op {
                WriteOp::Set(v) => {
                    view.insert(key.clone(), v.clone());
                }
                WriteOp::Clear => {
                    view.remove(key);
                }
                WriteOp::Atomic(ops) => {
                    let mut cur = store.data.get(key).map(|b| b.to_vec());
                    for (kind, param) in ops {
                        cur = Some(apply_mutation(*kind, cur.as_deref(), param));
                    }
                    if let Some(v) = cur {
                        view.insert(key.clone(), Bytes::from(v));
                    }
                }
            }
        }
        view
    }
}

fn resolve_selector(keys: &[&Vec<u8>], sel: &KeySelector) -> usize {
    let base = if sel.or_equal {
        keys.partition_point(|k| k.as_slice() <= sel.key.as_slice())
    } else {
        keys.partition_point(|k| k.as_slice() < sel.key.as_slice())
    };
    let idx = base as i64 - 1 + sel.offset;
    idx.clamp(0, keys.len() as i64) as usize
}

fn versionstamp_bytes(seq: u64) -> [u8; 10] {
    let mut out = [0u8; 10];
    out[..8].copy_from_slice(&seq.to_be_bytes());
    out
}

fn split_template(template: &[u8]) -> KvResult<(Vec<u8>, usize)> {
    if template.len() < 4 {
        return Err(KvError::invalid_parameter(
            "versionstamp template shorter than its offset field",
        ));
    }
    let (body, tail) = template.split_at(template.len() - 4);
    let offset = u32::from_le_bytes([tail[0], tail[1], tail[2], tail[3]]) as usize;
    if offset + 10 > body.len() {
        return Err(KvError::invalid_parameter(
            "versionstamp offset outside the templated bytes",
        ));
    }
    Ok((body.to_vec(), offset))
}

fn substitute_versionstamp(template: &[u8], seq: u64) -> KvResult<Vec<u8>> {
    let (mut body, offset) = split_template(template)?;
    body[offset..offset + 10].copy_from_slice(&versionstamp_bytes(seq));
    Ok(body)
}

fn le_normalize(src: Option<&[u8]>, len: usize) -> Vec<u8> {
    let mut out = vec![0u8; len];
    if let Some(src) = src {
        let n = src.len().min(len);
        out[..n].copy_from_slice(&src[..n]);
    }
    out
}

fn le_less_than(a: &[u8], b: &[u8]) -> bool {
    // Little-endian unsigned comparison over equal lengths.
    for i in (0..a.len()).rev() {
        if a[i] != b[i] {
            return a[i] < b[i];
        }
    }
    false
}

fn apply_mutation(kind: MutationKind, base: Option<&[u8]>, param: &[u8]) -> Vec<u8> {
    match kind {
        MutationKind::Add => {
            let mut out = le_normalize(base, param.len());
            let mut carry = 0u16;
            for (o, p) in out.iter_mut().zip(param.iter()) {
                let sum = u16::from(*o) + u16::from(*p) + carry;
                *o = (sum & 0xff) as u8;
                carry = sum >> 8;
            }
            out
        }
        MutationKind::BitAnd => match base {
            // Absent values store the operand unchanged.
            None => param.to_vec(),
            Some(base) => {
                let cur = le_normalize(Some(base), param.len());
                cur.iter().zip(param.iter()).map(|(a, b)| a & b).collect()
            }
        },
        MutationKind::BitOr => {
            let cur = le_normalize(base, param.len());
            cur.iter().zip(param.iter()).map(|(a, b)| a | b).collect()
        }
        MutationKind::BitXor => {
            let cur = le_normalize(base, param.len());
            cur.iter().zip(param.iter()).map(|(a, b)| a ^ b).collect()
        }
        MutationKind::Min => match base {
            None => param.to_vec(),
            Some(base) => {
                let cur = le_normalize(Some(base), param.len());
                if le_less_than(&cur, param) {
                    cur
                } else {
                    param.to_vec()
                }
            }
        },
        MutationKind::Max => match base {
            None => param.to_vec(),
            Some(base) => {
                let cur = le_normalize(Some(base), param.len());
                if le_less_than(&cur, param) {
                    param.to_vec()
                } else {
                    cur
                }
            }
        },
        MutationKind::ByteMin => match base {
            None => param.to_vec(),
            Some(base) => {
                if base <= param {
                    base.to_vec()
                } else {
                    param.to_vec()
                }
            }
        },
        MutationKind::ByteMax => match base {
            None => param.to_vec(),
            Some(base) => {
                if base >= param {
                    base.to_vec()
                } else {
                    param.to_vec()
                }
            }
        },
        MutationKind::SetVersionstampedKey | MutationKind::SetVersionstampedValue => {
            // Handled by dedicated buffers, never applied here.
            param.to_vec()
        }
    }
}

#[async_trait]
impl BackendTransaction for MemoryTransaction {
    async fn get(&self, key: &[u8], snapshot: bool) -> KvResult<Option<Bytes>> {
        let mut inner = self.inner.lock();
        inner.ensure_active()?;
        let store = self.store.lock();
        if !snapshot {
            inner.read_keys.push(key.to_vec());
        }
        Ok(Self::merged_get(&store, &inner, key))
    }

    async fn get_range(
        &self,
        begin: KeySelector,
        end: KeySelector,
        opts: RangeQuery,
        snapshot: bool,
    ) -> KvResult<RangeResult> {
        let mut inner = self.inner.lock();
        inner.ensure_active()?;
        let store = self.store.lock();

        let view = Self::merged_view(&store, &inner);
        let keys: Vec<&Vec<u8>> = view.keys().collect();
        let from = resolve_selector(&keys, &begin);
        let to = resolve_selector(&keys, &end).max(from);

        if !snapshot {
            inner
                .read_ranges
                .push((begin.key.clone(), end.key.clone()));
        }

        let slice = &keys[from..to];
        // Iterator mode returns a bounded batch even without a limit.
        let batch_cap = match opts.mode {
            StreamingMode::Iterator => 256,
            StreamingMode::WantAll | StreamingMode::Exact => usize::MAX,
        };
        let limit = opts.limit.unwrap_or(usize::MAX).min(batch_cap);
        let has_more = slice.len() > limit;
        let items: Vec<KeyValue> = if opts.reverse {
            slice
                .iter()
                .rev()
                .take(limit)
                .map(|k| KeyValue {
                    key: Bytes::from((*k).clone()),
                    value: view[*k].clone(),
                })
                .collect()
        } else {
            slice
                .iter()
                .take(limit)
                .map(|k| KeyValue {
                    key: Bytes::from((*k).clone()),
                    value: view[*k].clone(),
                })
                .collect()
        };
        Ok(RangeResult { items, has_more })
    }

    fn set(&self, key: &[u8], value: &[u8]) -> KvResult<()> {
        let mut inner = self.inner.lock();
        inner.ensure_active()?;
        inner
            .writes
            .insert(key.to_vec(), WriteOp::Set(Bytes::copy_from_slice(value)));
        Ok(())
    }

    fn clear(&self, key: &[u8]) -> KvResult<()> {
        let mut inner = self.inner.lock();
        inner.ensure_active()?;
        inner.writes.insert(key.to_vec(), WriteOp::Clear);
        Ok(())
    }

    fn atomic_op(&self, kind: MutationKind, key: &[u8], param: &[u8]) -> KvResult<()> {
        let mut inner = self.inner.lock();
        inner.ensure_active()?;
        match kind {
            MutationKind::SetVersionstampedKey => {
                split_template(key)?;
                inner
                    .vs_key_writes
                    .push((key.to_vec(), Bytes::copy_from_slice(param)));
                Ok(())
            }
            MutationKind::SetVersionstampedValue => {
                split_template(param)?;
                inner
                    .vs_value_writes
                    .push((key.to_vec(), param.to_vec()));
                Ok(())
            }
            kind => {
                match inner.writes.get_mut(key) {
                    Some(WriteOp::Set(v)) => {
                        // Fold into the buffered value immediately so the
                        // write stays a plain set.
                        let folded = apply_mutation(kind, Some(v.as_ref()), param);
                        inner
                            .writes
                            .insert(key.to_vec(), WriteOp::Set(Bytes::from(folded)));
                    }
                    Some(WriteOp::Clear) => {
                        let folded = apply_mutation(kind, None, param);
                        inner
                            .writes
                            .insert(key.to_vec(), WriteOp::Set(Bytes::from(folded)));
                    }
                    Some(WriteOp::Atomic(ops)) => {
                        ops.push((kind, param.to_vec()));
                    }
                    None => {
                        inner
                            .writes
                            .insert(key.to_vec(), WriteOp::Atomic(vec![(kind, param.to_vec())]));
                    }
                }
                Ok(())
            }
        }
    }

    fn add_read_conflict_range(&self, begin: &[u8], end: &[u8]) -> KvResult<()> {
        let mut inner = self.inner.lock();
        inner.ensure_active()?;
        inner.read_ranges.push((begin.to_vec(), end.to_vec()));
        Ok(())
    }

    fn add_write_conflict_range(&self, begin: &[u8], end: &[u8]) -> KvResult<()> {
        let mut inner = self.inner.lock();
        inner.ensure_active()?;
        // The store versions every written key at commit; an explicit
        // write range is modeled as a write of its boundary keys.
        inner.read_ranges.push((begin.to_vec(), end.to_vec()));
        Ok(())
    }

    fn watch(&self, key: &[u8]) -> KvResult<Watch> {
        let inner = self.inner.lock();
        inner.ensure_active()?;
        let (tx, rx) = oneshot::channel();
        self.store
            .lock()
            .watches
            .entry(key.to_vec())
            .or_default()
            .push(tx);
        Ok(Watch::new(rx))
    }

    async fn commit(&self) -> KvResult<()> {
        let mut inner = self.inner.lock();
        inner.ensure_active()?;
        let mut store = self.store.lock();

        if store.injected_commit_failures > 0 {
            store.injected_commit_failures -= 1;
            trace!("memory backend: injected commit failure");
            return Err(KvError::NotCommitted);
        }

        // Validate the read set against commits that landed after our
        // read version.
        for key in &inner.read_keys {
            if store.versions.get(key).copied().unwrap_or(0) > inner.read_version {
                return Err(KvError::NotCommitted);
            }
        }
        for (begin, end) in &inner.read_ranges {
            if begin >= end {
                continue;
            }
            let conflicting = store
                .versions
                .range::<Vec<u8>, _>((Included(begin), Excluded(end)))
                .any(|(_, v)| *v > inner.read_version);
            if conflicting {
                return Err(KvError::NotCommitted);
            }
        }

        store.commit_seq += 1;
        let seq = store.commit_seq;
        let mut touched: Vec<Vec<u8>> = Vec::new();

        let writes = std::mem::take(&mut inner.writes);
        for (key, op) in writes {
            match op {
                WriteOp::Set(v) => {
                    store.data.insert(key.clone(), v);
                }
                WriteOp::Clear => {
                    store.data.remove(&key);
                }
                WriteOp::Atomic(ops) => {
                    let mut cur = store.data.get(&key).map(|b| b.to_vec());
                    for (kind, param) in &ops {
                        cur = Some(apply_mutation(*kind, cur.as_deref(), param));
                    }
                    if let Some(v) = cur {
                        store.data.insert(key.clone(), Bytes::from(v));
                    }
                }
            }
            store.versions.insert(key.clone(), seq);
            touched.push(key);
        }

        let vs_keys = std::mem::take(&mut inner.vs_key_writes);
        for (template, value) in vs_keys {
            let key = substitute_versionstamp(&template, seq)?;
            store.data.insert(key.clone(), value);
            store.versions.insert(key.clone(), seq);
            touched.push(key);
        }
        let vs_values = std::mem::take(&mut inner.vs_value_writes);
        for (key, template) in vs_values {
            let value = substitute_versionstamp(&template, seq)?;
            store.data.insert(key.clone(), Bytes::from(value));
            store.versions.insert(key.clone(), seq);
            touched.push(key);
        }

        for key in touched {
            if let Some(waiters) = store.watches.remove(&key) {
                for tx in waiters {
                    let _ = tx.send(());
                }
            }
        }

        inner.completed = true;
        inner.committed_version = Some(seq);
        trace!(version = seq, "memory backend: committed");
        Ok(())
    }

    async fn on_error(&self, error: &KvError) -> KvResult<()> {
        if !error.is_retryable() {
            return Err(error.clone());
        }
        let mut inner = self.inner.lock();
        inner.ensure_active()?;
        if inner.retries_left == 0 {
            return Err(error.clone());
        }
        inner.retries_left -= 1;
        let current = self.store.lock().commit_seq;
        inner.reset_buffers(current);
        Ok(())
    }

    fn reset(&self) -> KvResult<()> {
        let mut inner = self.inner.lock();
        inner.ensure_active()?;
        let current = self.store.lock().commit_seq;
        inner.reset_buffers(current);
        Ok(())
    }

    fn cancel(&self) {
        let mut inner = self.inner.lock();
        inner.completed = true;
    }

    fn get_committed_version(&self) -> KvResult<u64> {
        self.inner
            .lock()
            .committed_version
            .ok_or(KvError::VersionUnavailable)
    }

    fn get_versionstamp(&self) -> KvResult<[u8; 10]> {
        let inner = self.inner.lock();
        inner
            .committed_version
            .map(versionstamp_bytes)
            .ok_or(KvError::VersionUnavailable)
    }

    fn set_read_version(&self, version: u64) -> KvResult<()> {
        let mut inner = self.inner.lock();
        inner.ensure_active()?;
        inner.read_version = version;
        Ok(())
    }

    async fn get_read_version(&self) -> KvResult<u64> {
        Ok(self.inner.lock().read_version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> MemoryBackend {
        MemoryBackend::new()
    }

    #[tokio::test]
    async fn set_commit_get() {
        let be = backend();
        let tx = be.create_transaction().unwrap();
        tx.set(b"k", b"v").unwrap();
        tx.commit().await.unwrap();

        let tx2 = be.create_transaction().unwrap();
        assert_eq!(
            tx2.get(b"k", false).await.unwrap(),
            Some(Bytes::from_static(b"v"))
        );
    }

    #[tokio::test]
    async fn uncommitted_writes_are_isolated() {
        let be = backend();
        let tx = be.create_transaction().unwrap();
        tx.set(b"k", b"v").unwrap();

        let other = be.create_transaction().unwrap();
        assert_eq!(other.get(b"k", false).await.unwrap(), None);
        // The writer still sees its own write.
        assert_eq!(
            tx.get(b"k", false).await.unwrap(),
            Some(Bytes::from_static(b"v"))
        );
    }

    #[tokio::test]
    async fn conflicting_read_fails_and_retries() {
        let be = backend();
        let seed = be.create_transaction().unwrap();
        seed.set(b"k", b"0").unwrap();
        seed.commit().await.unwrap();

        let tx = be.create_transaction().unwrap();
        let _ = tx.get(b"k", false).await.unwrap();

        let racer = be.create_transaction().unwrap();
        racer.set(b"k", b"1").unwrap();
        racer.commit().await.unwrap();

        tx.set(b"other", b"x").unwrap();
        let err = tx.commit().await.unwrap_err();
        assert_eq!(err, KvError::NotCommitted);

        // on_error resets the transaction for another attempt.
        tx.on_error(&err).await.unwrap();
        let _ = tx.get(b"k", false).await.unwrap();
        tx.set(b"other", b"x").unwrap();
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn snapshot_reads_do_not_conflict() {
        let be = backend();
        let tx = be.create_transaction().unwrap();
        let _ = tx.get(b"k", true).await.unwrap();

        let racer = be.create_transaction().unwrap();
        racer.set(b"k", b"1").unwrap();
        racer.commit().await.unwrap();

        tx.set(b"other", b"x").unwrap();
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn clear_conflicts_with_readers() {
        let be = backend();
        let seed = be.create_transaction().unwrap();
        seed.set(b"k", b"0").unwrap();
        seed.commit().await.unwrap();

        let tx = be.create_transaction().unwrap();
        let _ = tx.get(b"k", false).await.unwrap();

        let deleter = be.create_transaction().unwrap();
        deleter.clear(b"k").unwrap();
        deleter.commit().await.unwrap();

        tx.set(b"other", b"x").unwrap();
        assert_eq!(tx.commit().await.unwrap_err(), KvError::NotCommitted);
    }

    #[tokio::test]
    async fn atomic_add_is_little_endian() {
        let be = backend();
        let tx = be.create_transaction().unwrap();
        tx.atomic_op(MutationKind::Add, b"ctr", &5u64.to_le_bytes())
            .unwrap();
        tx.atomic_op(MutationKind::Add, b"ctr", &7u64.to_le_bytes())
            .unwrap();
        tx.commit().await.unwrap();

        let tx2 = be.create_transaction().unwrap();
        let raw = tx2.get(b"ctr", false).await.unwrap().unwrap();
        assert_eq!(u64::from_le_bytes(raw.as_ref().try_into().unwrap()), 12);
    }

    #[tokio::test]
    async fn atomic_add_carries_across_bytes() {
        let be = backend();
        let tx = be.create_transaction().unwrap();
        tx.atomic_op(MutationKind::Add, b"ctr", &255u64.to_le_bytes())
            .unwrap();
        tx.commit().await.unwrap();

        let tx2 = be.create_transaction().unwrap();
        tx2.atomic_op(MutationKind::Add, b"ctr", &1u64.to_le_bytes())
            .unwrap();
        tx2.commit().await.unwrap();

        let tx3 = be.create_transaction().unwrap();
        let raw = tx3.get(b"ctr", false).await.unwrap().unwrap();
        assert_eq!(u64::from_le_bytes(raw.as_ref().try_into().unwrap()), 256);
    }

    #[tokio::test]
    async fn byte_min_max() {
        let be = backend();
        let tx = be.create_transaction().unwrap();
        tx.atomic_op(MutationKind::ByteMax, b"m", b"apple").unwrap();
        tx.atomic_op(MutationKind::ByteMax, b"m", b"banana").unwrap();
        tx.atomic_op(MutationKind::ByteMin, b"n", b"banana").unwrap();
        tx.atomic_op(MutationKind::ByteMin, b"n", b"apple").unwrap();
        tx.commit().await.unwrap();

        let tx2 = be.create_transaction().unwrap();
        assert_eq!(
            tx2.get(b"m", false).await.unwrap(),
            Some(Bytes::from_static(b"banana"))
        );
        assert_eq!(
            tx2.get(b"n", false).await.unwrap(),
            Some(Bytes::from_static(b"apple"))
        );
    }

    #[tokio::test]
    async fn versionstamped_key_substitution() {
        let be = backend();
        let tx = be.create_transaction().unwrap();

        // "log/" + 10-byte hole + 4-byte little-endian offset.
        let mut template = b"log/".to_vec();
        let offset = template.len() as u32;
        template.extend_from_slice(&[0u8; 10]);
        template.extend_from_slice(&offset.to_le_bytes());
        tx.atomic_op(MutationKind::SetVersionstampedKey, &template, b"entry")
            .unwrap();
        tx.commit().await.unwrap();
        let version = tx.get_committed_version().unwrap();

        let tx2 = be.create_transaction().unwrap();
        let mut expected = b"log/".to_vec();
        expected.extend_from_slice(&versionstamp_bytes(version));
        assert_eq!(
            tx2.get(&expected, false).await.unwrap(),
            Some(Bytes::from_static(b"entry"))
        );
    }

    #[tokio::test]
    async fn range_scan_with_limit_and_reverse() {
        let be = backend();
        let tx = be.create_transaction().unwrap();
        for i in 0u8..5 {
            tx.set(&[b'k', i], &[i]).unwrap();
        }
        tx.commit().await.unwrap();

        let tx2 = be.create_transaction().unwrap();
        let begin = KeySelector::first_greater_or_equal(b"k".to_vec());
        let end = KeySelector::first_greater_or_equal(b"l".to_vec());

        let res = tx2
            .get_range(
                begin.clone(),
                end.clone(),
                RangeQuery {
                    limit: Some(2),
                    reverse: false,
                    ..RangeQuery::default()
                },
                false,
            )
            .await
            .unwrap();
        assert_eq!(res.items.len(), 2);
        assert!(res.has_more);
        assert_eq!(res.items[0].key.as_ref(), &[b'k', 0]);

        let res = tx2
            .get_range(
                begin,
                end,
                RangeQuery {
                    limit: Some(2),
                    reverse: true,
                    ..RangeQuery::default()
                },
                false,
            )
            .await
            .unwrap();
        assert_eq!(res.items[0].key.as_ref(), &[b'k', 4]);
        assert_eq!(res.items[1].key.as_ref(), &[b'k', 3]);
    }

    #[tokio::test]
    async fn range_sees_own_writes() {
        let be = backend();
        let tx = be.create_transaction().unwrap();
        tx.set(b"a1", b"x").unwrap();
        let res = tx
            .get_range(
                KeySelector::first_greater_or_equal(b"a".to_vec()),
                KeySelector::first_greater_or_equal(b"b".to_vec()),
                RangeQuery::default(),
                false,
            )
            .await
            .unwrap();
        assert_eq!(res.items.len(), 1);
        assert!(!res.has_more);
    }

    #[tokio::test]
    async fn watch_fires_on_commit() {
        let be = backend();
        let tx = be.create_transaction().unwrap();
        let watch = tx.watch(b"k").unwrap();
        tx.cancel();

        let writer = be.create_transaction().unwrap();
        writer.set(b"k", b"v").unwrap();
        writer.commit().await.unwrap();

        watch.wait().await.unwrap();
    }

    #[tokio::test]
    async fn injected_failures_are_retryable() {
        let be = backend();
        be.inject_commit_failures(1);
        let tx = be.create_transaction().unwrap();
        tx.set(b"k", b"v").unwrap();
        let err = tx.commit().await.unwrap_err();
        assert!(err.is_retryable());
        tx.on_error(&err).await.unwrap();
        tx.set(b"k", b"v").unwrap();
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn completed_transaction_rejects_operations() {
        let be = backend();
        let tx = be.create_transaction().unwrap();
        tx.commit().await.unwrap();
        assert_eq!(
            tx.get(b"k", false).await.unwrap_err(),
            KvError::TransactionCompleted
        );
        assert_eq!(tx.set(b"k", b"v").unwrap_err(), KvError::TransactionCompleted);
    }

    #[tokio::test]
    async fn versionstamp_available_only_after_commit() {
        let be = backend();
        let tx = be.create_transaction().unwrap();
        assert_eq!(tx.get_versionstamp().unwrap_err(), KvError::VersionUnavailable);
        tx.set(b"k", b"v").unwrap();
        tx.commit().await.unwrap();
        let vs = tx.get_versionstamp().unwrap();
        assert_eq!(&vs[..8], &be.committed_version().to_be_bytes());
    }

    #[tokio::test]
    async fn retry_budget_is_bounded() {
        let be = MemoryBackend::with_max_retries(2);
        let tx = be.create_transaction().unwrap();
        let err = KvError::NotCommitted;
        tx.on_error(&err).await.unwrap();
        tx.on_error(&err).await.unwrap();
        assert_eq!(tx.on_error(&err).await.unwrap_err(), KvError::NotCommitted);
    }
}
