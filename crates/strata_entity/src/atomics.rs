//! Atomic counters and flags.
//!
//! Thin typed wrappers over the backend's little-endian atomic
//! mutations. Unlike entities, atomics have no identity map and no
//! version metadata; concurrent transactions incrementing the same
//! counter never conflict.

use crate::error::{EntityError, EntityResult};
use std::sync::Arc;
use strata_core::{Context, Subspace};
use strata_tuple::TupleItem;

/// A keyed 64-bit counter with conflict-free increments.
pub struct AtomicCounter {
    subspace: Subspace<Vec<TupleItem>, Vec<u8>>,
}

impl AtomicCounter {
    /// Wraps a raw subspace.
    pub fn new(subspace: Subspace<Vec<TupleItem>, Vec<u8>>) -> Arc<Self> {
        Arc::new(Self { subspace })
    }

    /// Reads the counter; a missing key reads as zero.
    pub async fn get(&self, ctx: &Context, key: &[TupleItem]) -> EntityResult<i64> {
        match self.subspace.get(ctx, &key.to_vec()).await? {
            None => Ok(0),
            Some(raw) => {
                let bytes: [u8; 8] = raw.as_slice().try_into().map_err(|_| {
                    EntityError::malformed_record("counter value has unexpected width")
                })?;
                Ok(i64::from_le_bytes(bytes))
            }
        }
    }

    /// Overwrites the counter.
    pub fn set(&self, ctx: &Context, key: &[TupleItem], value: i64) -> EntityResult<()> {
        self.subspace
            .set(ctx, &key.to_vec(), &value.to_le_bytes().to_vec())?;
        Ok(())
    }

    /// Adds a signed delta without creating a conflict.
    pub fn add(&self, ctx: &Context, key: &[TupleItem], delta: i64) -> EntityResult<()> {
        self.subspace
            .add(ctx, &key.to_vec(), &delta.to_le_bytes().to_vec())?;
        Ok(())
    }

    /// Adds one.
    pub fn increment(&self, ctx: &Context, key: &[TupleItem]) -> EntityResult<()> {
        self.add(ctx, key, 1)
    }

    /// Subtracts one.
    pub fn decrement(&self, ctx: &Context, key: &[TupleItem]) -> EntityResult<()> {
        self.add(ctx, key, -1)
    }
}

/// A keyed boolean flag.
pub struct AtomicFlag {
    subspace: Subspace<Vec<TupleItem>, Vec<u8>>,
}

impl AtomicFlag {
    /// Wraps a raw subspace.
    pub fn new(subspace: Subspace<Vec<TupleItem>, Vec<u8>>) -> Arc<Self> {
        Arc::new(Self { subspace })
    }

    /// Reads the flag; a missing key reads as false.
    pub async fn get(&self, ctx: &Context, key: &[TupleItem]) -> EntityResult<bool> {
        Ok(self
            .subspace
            .get(ctx, &key.to_vec())
            .await?
            .is_some_and(|raw| raw.iter().any(|b| *b != 0)))
    }

    /// Writes the flag.
    pub fn set(&self, ctx: &Context, key: &[TupleItem], value: bool) -> EntityResult<()> {
        let encoded = u32::from(value).to_le_bytes().to_vec();
        self.subspace.set(ctx, &key.to_vec(), &encoded)?;
        Ok(())
    }
}
