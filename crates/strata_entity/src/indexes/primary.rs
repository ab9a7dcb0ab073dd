//! Primary row maintenance.

use crate::error::{EntityError, EntityResult};
use crate::indexes::tuple_lock_key;
use crate::record::StoredRecord;
use strata_core::{Context, Subspace};
use strata_tuple::TupleItem;

/// Maintains the primary row of an entity.
///
/// The lock key covers the packed primary key, serializing every
/// create/update/destroy of one entity against concurrent lookups and
/// mutations of the same key.
pub(crate) struct PrimaryIndex {
    subspace: Subspace<Vec<TupleItem>, StoredRecord>,
}

impl PrimaryIndex {
    pub(crate) fn new(subspace: Subspace<Vec<TupleItem>, StoredRecord>) -> Self {
        Self { subspace }
    }

    pub(crate) fn lock_key(id: &[TupleItem]) -> EntityResult<String> {
        tuple_lock_key("primary", id)
    }

    pub(crate) fn create_lock_keys(&self, id: &[TupleItem]) -> EntityResult<Vec<String>> {
        Ok(vec![Self::lock_key(id)?])
    }

    pub(crate) fn update_lock_keys(&self, id: &[TupleItem]) -> EntityResult<Vec<String>> {
        Ok(vec![Self::lock_key(id)?])
    }

    pub(crate) fn destroy_lock_keys(&self, id: &[TupleItem]) -> EntityResult<Vec<String>> {
        Ok(vec![Self::lock_key(id)?])
    }

    pub(crate) async fn before_create(
        &self,
        ctx: &Context,
        id: &[TupleItem],
    ) -> EntityResult<()> {
        let existing = self.subspace.get(ctx, &id.to_vec()).await?;
        if existing.is_some() {
            return Err(EntityError::AlreadyExists);
        }
        Ok(())
    }

    pub(crate) fn on_create(
        &self,
        ctx: &Context,
        id: &[TupleItem],
        value: &StoredRecord,
    ) -> EntityResult<()> {
        self.subspace.set(ctx, &id.to_vec(), value)?;
        Ok(())
    }

    pub(crate) fn on_update(
        &self,
        ctx: &Context,
        id: &[TupleItem],
        new_value: &StoredRecord,
    ) -> EntityResult<()> {
        self.subspace.set(ctx, &id.to_vec(), new_value)?;
        Ok(())
    }

    pub(crate) fn on_destroy(&self, ctx: &Context, id: &[TupleItem]) -> EntityResult<()> {
        self.subspace.clear(ctx, &id.to_vec())?;
        Ok(())
    }
}
