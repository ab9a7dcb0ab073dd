//! Prefixed, typed views over the keyspace.

use crate::context::Context;
use crate::database::Database;
use crate::error::{CoreError, CoreResult};
use std::sync::Arc;
use strata_kv::{KeySelector, MutationKind, RangeQuery, Watch};
use strata_tuple::{pack_with_versionstamp, TupleItem};

/// Encodes typed keys to ordered bytes and back.
pub trait KeyEncoding<K>: Send + Sync {
    /// Packs a key into its byte form.
    fn pack(&self, key: &K) -> CoreResult<Vec<u8>>;
    /// Unpacks a byte form back into a key.
    fn unpack(&self, raw: &[u8]) -> CoreResult<K>;
}

/// Encodes typed values to bytes and back.
pub trait ValueEncoding<V>: Send + Sync {
    /// Packs a value into its byte form.
    fn pack(&self, value: &V) -> CoreResult<Vec<u8>>;
    /// Unpacks a byte form back into a value.
    fn unpack(&self, raw: &[u8]) -> CoreResult<V>;
}

/// Identity encoding over raw bytes.
pub struct RawEncoding;

impl KeyEncoding<Vec<u8>> for RawEncoding {
    fn pack(&self, key: &Vec<u8>) -> CoreResult<Vec<u8>> {
        Ok(key.clone())
    }
    fn unpack(&self, raw: &[u8]) -> CoreResult<Vec<u8>> {
        Ok(raw.to_vec())
    }
}

impl ValueEncoding<Vec<u8>> for RawEncoding {
    fn pack(&self, value: &Vec<u8>) -> CoreResult<Vec<u8>> {
        Ok(value.clone())
    }
    fn unpack(&self, raw: &[u8]) -> CoreResult<Vec<u8>> {
        Ok(raw.to_vec())
    }
}

/// Order-preserving tuple encoding for keys.
pub struct TupleEncoding;

impl KeyEncoding<Vec<TupleItem>> for TupleEncoding {
    fn pack(&self, key: &Vec<TupleItem>) -> CoreResult<Vec<u8>> {
        Ok(strata_tuple::pack(key)?)
    }
    fn unpack(&self, raw: &[u8]) -> CoreResult<Vec<TupleItem>> {
        Ok(strata_tuple::unpack(raw)?)
    }
}

/// Returns the smallest key strictly greater than every key prefixed by
/// `src`.
pub fn key_increment(src: &[u8]) -> CoreResult<Vec<u8>> {
    let mut out = src.to_vec();
    while let Some(last) = out.last_mut() {
        if *last == 0xff {
            out.pop();
        } else {
            *last += 1;
            return Ok(out);
        }
    }
    Err(CoreError::invalid_operation(
        "key consisting of 0xff bytes cannot be incremented",
    ))
}

/// Parameters of a range read.
pub struct RangeOptions<K> {
    /// Resume scanning exclusively past this key (exclusively before it
    /// when reversed).
    pub after: Option<K>,
    /// Stop scanning exclusively before this key (exclusively after it
    /// when reversed).
    pub before: Option<K>,
    /// Maximum number of returned pairs.
    pub limit: Option<usize>,
    /// Scan in descending key order.
    pub reverse: bool,
}

impl<K> Default for RangeOptions<K> {
    fn default() -> Self {
        Self {
            after: None,
            before: None,
            limit: None,
            reverse: false,
        }
    }
}

/// One decoded pair from a range read, keyed relative to the subspace.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyValuePair<K, V> {
    /// Key relative to the subspace the range was read from.
    pub key: K,
    /// The decoded value.
    pub value: V,
}

/// A prefixed view over the keyspace with typed keys and values.
///
/// All operations resolve the ambient transaction from the context the
/// way the retry core installed it; reads and writes are ordinary
/// backend operations under that transaction. Child subspaces extend the
/// prefix; two subspaces are the same view exactly when their effective
/// prefixes are identical.
pub struct Subspace<K = Vec<u8>, V = Vec<u8>> {
    db: Arc<Database>,
    prefix: Vec<u8>,
    key_enc: Arc<dyn KeyEncoding<K>>,
    value_enc: Arc<dyn ValueEncoding<V>>,
}

impl<K, V> Clone for Subspace<K, V> {
    fn clone(&self) -> Self {
        Self {
            db: Arc::clone(&self.db),
            prefix: self.prefix.clone(),
            key_enc: Arc::clone(&self.key_enc),
            value_enc: Arc::clone(&self.value_enc),
        }
    }
}

impl<K, V> PartialEq for Subspace<K, V> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.db, &other.db) && self.prefix == other.prefix
    }
}

impl Subspace<Vec<u8>, Vec<u8>> {
    /// A raw byte-keyed view at the given prefix.
    pub fn raw(db: Arc<Database>, prefix: impl Into<Vec<u8>>) -> Self {
        Self {
            db,
            prefix: prefix.into(),
            key_enc: Arc::new(RawEncoding),
            value_enc: Arc::new(RawEncoding),
        }
    }
}

impl Subspace<Vec<TupleItem>, Vec<u8>> {
    /// A tuple-keyed view at the given prefix.
    pub fn tuple(db: Arc<Database>, prefix: impl Into<Vec<u8>>) -> Self {
        Subspace::raw(db, prefix).with_key_encoding(Arc::new(TupleEncoding))
    }

    /// Writes a value at a key containing one versionstamp placeholder.
    ///
    /// The backend substitutes the 10-byte commit token at commit time.
    pub fn set_versionstamped_key(
        &self,
        ctx: &Context,
        key: &[TupleItem],
        value: &Vec<u8>,
    ) -> CoreResult<()> {
        let raw = ctx.require_transaction()?.raw_write(&self.db)?;
        let split = pack_with_versionstamp(key)?;
        let mut template = self.prefix.clone();
        template.extend_from_slice(&split.prefix);
        let offset = template.len() as u32;
        template.extend_from_slice(&[0u8; 10]);
        template.extend_from_slice(&split.suffix);
        template.extend_from_slice(&offset.to_le_bytes());
        raw.atomic_op(
            MutationKind::SetVersionstampedKey,
            &template,
            &self.value_enc.pack(value)?,
        )?;
        Ok(())
    }
}

impl<K, V> Subspace<K, V> {
    /// Replaces the key encoding.
    pub fn with_key_encoding<K2>(self, key_enc: Arc<dyn KeyEncoding<K2>>) -> Subspace<K2, V> {
        Subspace {
            db: self.db,
            prefix: self.prefix,
            key_enc,
            value_enc: self.value_enc,
        }
    }

    /// Replaces the value encoding.
    pub fn with_value_encoding<V2>(self, value_enc: Arc<dyn ValueEncoding<V2>>) -> Subspace<K, V2> {
        Subspace {
            db: self.db,
            prefix: self.prefix,
            key_enc: self.key_enc,
            value_enc,
        }
    }

    /// A child view whose prefix is extended by the packed key.
    pub fn subspace(&self, key: &K) -> CoreResult<Self> {
        let mut prefix = self.prefix.clone();
        prefix.extend_from_slice(&self.key_enc.pack(key)?);
        Ok(Self {
            db: Arc::clone(&self.db),
            prefix,
            key_enc: Arc::clone(&self.key_enc),
            value_enc: Arc::clone(&self.value_enc),
        })
    }

    /// The effective byte prefix of this view.
    pub fn prefix(&self) -> &[u8] {
        &self.prefix
    }

    /// The database this view reads from.
    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    fn packed_key(&self, key: &K) -> CoreResult<Vec<u8>> {
        let mut out = self.prefix.clone();
        out.extend_from_slice(&self.key_enc.pack(key)?);
        Ok(out)
    }

    /// Reads the value at a key.
    pub async fn get(&self, ctx: &Context, key: &K) -> CoreResult<Option<V>> {
        let tx = ctx.require_transaction()?;
        let raw = tx.raw_read(&self.db)?;
        let packed = self.packed_key(key)?;
        match raw.get(&packed, tx.is_read_only()).await? {
            Some(bytes) => Ok(Some(self.value_enc.unpack(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Buffers a write of `value` at `key`.
    pub fn set(&self, ctx: &Context, key: &K, value: &V) -> CoreResult<()> {
        let raw = ctx.require_transaction()?.raw_write(&self.db)?;
        raw.set(&self.packed_key(key)?, &self.value_enc.pack(value)?)?;
        Ok(())
    }

    /// Buffers a clear of `key`.
    pub fn clear(&self, ctx: &Context, key: &K) -> CoreResult<()> {
        let raw = ctx.require_transaction()?.raw_write(&self.db)?;
        raw.clear(&self.packed_key(key)?)?;
        Ok(())
    }

    fn atomic(&self, ctx: &Context, kind: MutationKind, key: &K, param: &V) -> CoreResult<()> {
        let raw = ctx.require_transaction()?.raw_write(&self.db)?;
        raw.atomic_op(kind, &self.packed_key(key)?, &self.value_enc.pack(param)?)?;
        Ok(())
    }

    /// Atomic little-endian addition.
    pub fn add(&self, ctx: &Context, key: &K, param: &V) -> CoreResult<()> {
        self.atomic(ctx, MutationKind::Add, key, param)
    }

    /// Atomic bitwise and.
    pub fn bit_and(&self, ctx: &Context, key: &K, param: &V) -> CoreResult<()> {
        self.atomic(ctx, MutationKind::BitAnd, key, param)
    }

    /// Atomic bitwise or.
    pub fn bit_or(&self, ctx: &Context, key: &K, param: &V) -> CoreResult<()> {
        self.atomic(ctx, MutationKind::BitOr, key, param)
    }

    /// Atomic bitwise xor.
    pub fn bit_xor(&self, ctx: &Context, key: &K, param: &V) -> CoreResult<()> {
        self.atomic(ctx, MutationKind::BitXor, key, param)
    }

    /// Atomic little-endian unsigned minimum.
    pub fn min(&self, ctx: &Context, key: &K, param: &V) -> CoreResult<()> {
        self.atomic(ctx, MutationKind::Min, key, param)
    }

    /// Atomic little-endian unsigned maximum.
    pub fn max(&self, ctx: &Context, key: &K, param: &V) -> CoreResult<()> {
        self.atomic(ctx, MutationKind::Max, key, param)
    }

    /// Atomic lexicographic minimum.
    pub fn byte_min(&self, ctx: &Context, key: &K, param: &V) -> CoreResult<()> {
        self.atomic(ctx, MutationKind::ByteMin, key, param)
    }

    /// Atomic lexicographic maximum.
    pub fn byte_max(&self, ctx: &Context, key: &K, param: &V) -> CoreResult<()> {
        self.atomic(ctx, MutationKind::ByteMax, key, param)
    }

    /// Registers a watch resolving when the key is modified by a
    /// committed transaction.
    pub fn watch(&self, ctx: &Context, key: &K) -> CoreResult<Watch> {
        let raw = ctx.require_transaction()?.raw_read(&self.db)?;
        Ok(raw.watch(&self.packed_key(key)?)?)
    }

    /// Reads the pairs whose keys extend `key`, ordered by key.
    ///
    /// Returned keys are relative to this subspace (they include the
    /// `key` argument items). `after`/`before` bounds must themselves
    /// extend `key`.
    pub async fn range(
        &self,
        ctx: &Context,
        key: &K,
        opts: RangeOptions<K>,
    ) -> CoreResult<Vec<KeyValuePair<K, V>>> {
        let tx = ctx.require_transaction()?;
        let raw = tx.raw_read(&self.db)?;

        let base = self.packed_key(key)?;
        let mut start = base.clone();
        let mut end = key_increment(&base)?;

        if let Some(after) = &opts.after {
            let a = self.packed_key(after)?;
            if !a.starts_with(&base) {
                return Err(CoreError::invalid_operation(
                    "range after-bound must extend the range key",
                ));
            }
            if opts.reverse {
                end = a;
            } else {
                start = key_increment(&a)?;
            }
        }
        if let Some(before) = &opts.before {
            let b = self.packed_key(before)?;
            if !b.starts_with(&base) {
                return Err(CoreError::invalid_operation(
                    "range before-bound must extend the range key",
                ));
            }
            if opts.reverse {
                start = key_increment(&b)?;
            } else {
                end = b;
            }
        }

        let result = raw
            .get_range(
                KeySelector::first_greater_or_equal(start),
                KeySelector::first_greater_or_equal(end),
                RangeQuery {
                    limit: opts.limit,
                    reverse: opts.reverse,
                    ..RangeQuery::default()
                },
                tx.is_read_only(),
            )
            .await?;

        let mut out = Vec::with_capacity(result.items.len());
        for item in result.items {
            let relative = &item.key[self.prefix.len()..];
            out.push(KeyValuePair {
                key: self.key_enc.unpack(relative)?,
                value: self.value_enc.unpack(&item.value)?,
            });
        }
        Ok(out)
    }
}

impl<K, V> std::fmt::Debug for Subspace<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subspace")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}
