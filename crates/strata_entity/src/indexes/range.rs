//! Range secondary index maintenance.

use crate::descriptor::{resolve_index_key, SecondaryIndexDescriptor, SecondaryIndexKind};
use crate::error::EntityResult;
use crate::record::StoredRecord;
use strata_core::Context;
use strata_tuple::{equals, TupleItem};

/// Maintains a range secondary index.
///
/// The composite index key is the field-derived prefix followed by the
/// primary key, so multiple rows can share a prefix while the index
/// stays ordered on the configured fields. No lock keys are needed:
/// the composite key embeds the primary key, so mutations of different
/// rows never target the same index entry, and same-row mutations are
/// already serialized by the primary lock key.
pub(crate) struct RangeIndex {
    descriptor: SecondaryIndexDescriptor,
}

impl RangeIndex {
    pub(crate) fn new(descriptor: SecondaryIndexDescriptor) -> Self {
        debug_assert_eq!(descriptor.kind, SecondaryIndexKind::Range);
        Self { descriptor }
    }

    fn composite_key(
        &self,
        id: &[TupleItem],
        value: &StoredRecord,
    ) -> EntityResult<Vec<TupleItem>> {
        let mut key = resolve_index_key(&self.descriptor, &value.value)?;
        key.extend_from_slice(id);
        Ok(key)
    }

    pub(crate) fn on_create(
        &self,
        ctx: &Context,
        id: &[TupleItem],
        value: &StoredRecord,
    ) -> EntityResult<()> {
        let key = self.composite_key(id, value)?;
        self.descriptor.subspace.set(ctx, &key, value)?;
        Ok(())
    }

    pub(crate) fn on_update(
        &self,
        ctx: &Context,
        id: &[TupleItem],
        old_value: &StoredRecord,
        new_value: &StoredRecord,
    ) -> EntityResult<()> {
        let old_key = self.composite_key(id, old_value)?;
        let new_key = self.composite_key(id, new_value)?;
        if !equals(&old_key, &new_key) {
            self.descriptor.subspace.clear(ctx, &old_key)?;
        }
        self.descriptor.subspace.set(ctx, &new_key, new_value)?;
        Ok(())
    }

    pub(crate) fn on_destroy(
        &self,
        ctx: &Context,
        id: &[TupleItem],
        value: &StoredRecord,
    ) -> EntityResult<()> {
        // Destroy clears the composite row; scans never observe deleted
        // entities.
        let key = self.composite_key(id, value)?;
        self.descriptor.subspace.clear(ctx, &key)?;
        Ok(())
    }
}
