//! Unique secondary index maintenance.

use crate::descriptor::{resolve_index_key, SecondaryIndexDescriptor, SecondaryIndexKind};
use crate::error::{EntityError, EntityResult};
use crate::indexes::secondary_lock_key;
use crate::record::StoredRecord;
use strata_core::Context;
use strata_tuple::{equals, TupleItem};

/// Maintains a unique secondary index.
///
/// The derived index key maps to the full stored record. Constraint
/// checks run in `before_*` phases, strictly before any mutation of the
/// record is applied; update lock keys include both the old and the new
/// derived key when they differ so concurrent writers aiming at either
/// key serialize against this mutation.
pub(crate) struct UniqueIndex {
    descriptor: SecondaryIndexDescriptor,
}

impl UniqueIndex {
    pub(crate) fn new(descriptor: SecondaryIndexDescriptor) -> Self {
        debug_assert_eq!(descriptor.kind, SecondaryIndexKind::Unique);
        Self { descriptor }
    }

    fn lock_key(&self, index_key: &[TupleItem]) -> EntityResult<String> {
        secondary_lock_key(&self.descriptor.name, index_key)
    }

    fn index_key(&self, value: &StoredRecord) -> EntityResult<Vec<TupleItem>> {
        resolve_index_key(&self.descriptor, &value.value)
    }

    //
    // Create
    //

    pub(crate) fn create_lock_keys(&self, value: &StoredRecord) -> EntityResult<Vec<String>> {
        Ok(vec![self.lock_key(&self.index_key(value)?)?])
    }

    pub(crate) async fn before_create(
        &self,
        ctx: &Context,
        value: &StoredRecord,
    ) -> EntityResult<()> {
        let key = self.index_key(value)?;
        if self.descriptor.subspace.get(ctx, &key).await?.is_some() {
            return Err(EntityError::UniqueConstraint);
        }
        Ok(())
    }

    pub(crate) fn on_create(&self, ctx: &Context, value: &StoredRecord) -> EntityResult<()> {
        let key = self.index_key(value)?;
        self.descriptor.subspace.set(ctx, &key, value)?;
        Ok(())
    }

    //
    // Update
    //

    pub(crate) fn update_lock_keys(
        &self,
        old_value: &StoredRecord,
        new_value: &StoredRecord,
    ) -> EntityResult<Vec<String>> {
        let old_key = self.index_key(old_value)?;
        let new_key = self.index_key(new_value)?;
        if equals(&old_key, &new_key) {
            Ok(vec![self.lock_key(&new_key)?])
        } else {
            Ok(vec![self.lock_key(&old_key)?, self.lock_key(&new_key)?])
        }
    }

    pub(crate) async fn before_update(
        &self,
        ctx: &Context,
        old_value: &StoredRecord,
        new_value: &StoredRecord,
    ) -> EntityResult<()> {
        let old_key = self.index_key(old_value)?;
        let new_key = self.index_key(new_value)?;
        if !equals(&old_key, &new_key)
            && self.descriptor.subspace.get(ctx, &new_key).await?.is_some()
        {
            return Err(EntityError::UniqueConstraint);
        }
        Ok(())
    }

    pub(crate) fn on_update(
        &self,
        ctx: &Context,
        old_value: &StoredRecord,
        new_value: &StoredRecord,
    ) -> EntityResult<()> {
        let old_key = self.index_key(old_value)?;
        let new_key = self.index_key(new_value)?;
        if !equals(&old_key, &new_key) {
            self.descriptor.subspace.clear(ctx, &old_key)?;
        }
        self.descriptor.subspace.set(ctx, &new_key, new_value)?;
        Ok(())
    }

    //
    // Destroy
    //

    pub(crate) fn destroy_lock_keys(&self, value: &StoredRecord) -> EntityResult<Vec<String>> {
        Ok(vec![self.lock_key(&self.index_key(value)?)?])
    }

    pub(crate) fn on_destroy(&self, ctx: &Context, value: &StoredRecord) -> EntityResult<()> {
        // Destroy clears the entry so the index key can be reused by a
        // later create.
        let key = self.index_key(value)?;
        self.descriptor.subspace.clear(ctx, &key)?;
        Ok(())
    }
}
