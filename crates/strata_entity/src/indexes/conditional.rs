//! Conditional (partial-index) wrapper.

use crate::descriptor::IndexPredicate;
use crate::error::EntityResult;
use crate::indexes::BaseMaintainer;
use crate::record::StoredRecord;
use strata_core::Context;
use strata_tuple::TupleItem;

/// Wraps an index maintainer with a predicate over the record shape.
///
/// The index only ever contains rows currently satisfying the
/// predicate: when an update flips the predicate, the operation is
/// rewritten into the complementary create or destroy of the inner
/// index.
pub(crate) struct ConditionalMaintainer {
    condition: IndexPredicate,
    inner: BaseMaintainer,
}

impl ConditionalMaintainer {
    pub(crate) fn new(condition: IndexPredicate, inner: BaseMaintainer) -> Self {
        Self { condition, inner }
    }

    fn holds(&self, value: &StoredRecord) -> bool {
        (self.condition)(&value.value)
    }

    //
    // Create
    //

    pub(crate) fn create_lock_keys(
        &self,
        id: &[TupleItem],
        value: &StoredRecord,
    ) -> EntityResult<Vec<String>> {
        if self.holds(value) {
            self.inner.create_lock_keys(id, value)
        } else {
            Ok(Vec::new())
        }
    }

    pub(crate) async fn before_create(
        &self,
        ctx: &Context,
        id: &[TupleItem],
        value: &StoredRecord,
    ) -> EntityResult<()> {
        if self.holds(value) {
            self.inner.before_create(ctx, id, value).await
        } else {
            Ok(())
        }
    }

    pub(crate) fn on_create(
        &self,
        ctx: &Context,
        id: &[TupleItem],
        value: &StoredRecord,
    ) -> EntityResult<()> {
        if self.holds(value) {
            self.inner.on_create(ctx, id, value)
        } else {
            Ok(())
        }
    }

    //
    // Update
    //

    pub(crate) fn update_lock_keys(
        &self,
        id: &[TupleItem],
        old_value: &StoredRecord,
        new_value: &StoredRecord,
    ) -> EntityResult<Vec<String>> {
        match (self.holds(old_value), self.holds(new_value)) {
            (true, true) => self.inner.update_lock_keys(id, old_value, new_value),
            (true, false) => self.inner.destroy_lock_keys(id, old_value),
            (false, true) => self.inner.create_lock_keys(id, new_value),
            (false, false) => Ok(Vec::new()),
        }
    }

    pub(crate) async fn before_update(
        &self,
        ctx: &Context,
        id: &[TupleItem],
        old_value: &StoredRecord,
        new_value: &StoredRecord,
    ) -> EntityResult<()> {
        match (self.holds(old_value), self.holds(new_value)) {
            (true, true) => self.inner.before_update(ctx, id, old_value, new_value).await,
            (true, false) => Ok(()),
            (false, true) => self.inner.before_create(ctx, id, new_value).await,
            (false, false) => Ok(()),
        }
    }

    pub(crate) fn on_update(
        &self,
        ctx: &Context,
        id: &[TupleItem],
        old_value: &StoredRecord,
        new_value: &StoredRecord,
    ) -> EntityResult<()> {
        match (self.holds(old_value), self.holds(new_value)) {
            (true, true) => self.inner.on_update(ctx, id, old_value, new_value),
            (true, false) => self.inner.on_destroy(ctx, id, old_value),
            (false, true) => self.inner.on_create(ctx, id, new_value),
            (false, false) => Ok(()),
        }
    }

    //
    // Destroy
    //

    pub(crate) fn destroy_lock_keys(
        &self,
        id: &[TupleItem],
        value: &StoredRecord,
    ) -> EntityResult<Vec<String>> {
        if self.holds(value) {
            self.inner.destroy_lock_keys(id, value)
        } else {
            Ok(Vec::new())
        }
    }

    pub(crate) fn on_destroy(
        &self,
        ctx: &Context,
        id: &[TupleItem],
        value: &StoredRecord,
    ) -> EntityResult<()> {
        if self.holds(value) {
            self.inner.on_destroy(ctx, id, value)
        } else {
            Ok(())
        }
    }
}
