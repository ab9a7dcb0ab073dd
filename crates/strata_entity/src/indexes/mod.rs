//! Secondary index maintenance.
//!
//! Every entity mutation flows through a fixed set of index maintainers,
//! each implementing the four-phase protocol:
//! lock keys (pure, synchronous derivation) → `before` (async
//! validation, may veto) → `on` (application of the mutation) → `after`
//! (async side effects). Lock keys from all maintainers are merged and
//! acquired atomically before any `before` hook runs, which closes the
//! time-of-check/time-of-use race between concurrent flushes that would
//! otherwise validate against each other's not-yet-applied index writes.

mod conditional;
mod primary;
mod range;
mod unique;

use crate::descriptor::{EntityDescriptor, SecondaryIndexKind};
use crate::error::{EntityError, EntityResult};
use crate::record::StoredRecord;
use conditional::ConditionalMaintainer;
use primary::PrimaryIndex;
use range::RangeIndex;
use strata_core::{in_tx, Context, Database};
use strata_tuple::TupleItem;
use strata_util::MultiMutex;
use std::sync::Arc;
use tracing::trace;
use unique::UniqueIndex;

pub(crate) use primary::PrimaryIndex as Primary;

/// Derives a string lock key from a tuple.
pub(crate) fn tuple_lock_key(prefix: &str, items: &[TupleItem]) -> EntityResult<String> {
    let packed = strata_tuple::pack(items)?;
    Ok(format!("{prefix}-{}", strata_util::hex::encode(&packed)))
}

/// Lock key of one secondary-index entry.
pub(crate) fn secondary_lock_key(index_name: &str, items: &[TupleItem]) -> EntityResult<String> {
    tuple_lock_key(&format!("secondary-{index_name}"), items)
}

/// A non-conditional secondary index maintainer.
pub(crate) enum BaseMaintainer {
    Unique(UniqueIndex),
    Range(RangeIndex),
}

impl BaseMaintainer {
    fn create_lock_keys(
        &self,
        _id: &[TupleItem],
        value: &StoredRecord,
    ) -> EntityResult<Vec<String>> {
        match self {
            Self::Unique(ix) => ix.create_lock_keys(value),
            Self::Range(_) => Ok(Vec::new()),
        }
    }

    async fn before_create(
        &self,
        ctx: &Context,
        _id: &[TupleItem],
        value: &StoredRecord,
    ) -> EntityResult<()> {
        match self {
            Self::Unique(ix) => ix.before_create(ctx, value).await,
            Self::Range(_) => Ok(()),
        }
    }

    fn on_create(
        &self,
        ctx: &Context,
        id: &[TupleItem],
        value: &StoredRecord,
    ) -> EntityResult<()> {
        match self {
            Self::Unique(ix) => ix.on_create(ctx, value),
            Self::Range(ix) => ix.on_create(ctx, id, value),
        }
    }

    fn update_lock_keys(
        &self,
        _id: &[TupleItem],
        old_value: &StoredRecord,
        new_value: &StoredRecord,
    ) -> EntityResult<Vec<String>> {
        match self {
            Self::Unique(ix) => ix.update_lock_keys(old_value, new_value),
            Self::Range(_) => Ok(Vec::new()),
        }
    }

    async fn before_update(
        &self,
        ctx: &Context,
        _id: &[TupleItem],
        old_value: &StoredRecord,
        new_value: &StoredRecord,
    ) -> EntityResult<()> {
        match self {
            Self::Unique(ix) => ix.before_update(ctx, old_value, new_value).await,
            Self::Range(_) => Ok(()),
        }
    }

    fn on_update(
        &self,
        ctx: &Context,
        id: &[TupleItem],
        old_value: &StoredRecord,
        new_value: &StoredRecord,
    ) -> EntityResult<()> {
        match self {
            Self::Unique(ix) => ix.on_update(ctx, old_value, new_value),
            Self::Range(ix) => ix.on_update(ctx, id, old_value, new_value),
        }
    }

    fn destroy_lock_keys(
        &self,
        _id: &[TupleItem],
        value: &StoredRecord,
    ) -> EntityResult<Vec<String>> {
        match self {
            Self::Unique(ix) => ix.destroy_lock_keys(value),
            Self::Range(_) => Ok(Vec::new()),
        }
    }

    fn on_destroy(
        &self,
        ctx: &Context,
        id: &[TupleItem],
        value: &StoredRecord,
    ) -> EntityResult<()> {
        match self {
            Self::Unique(ix) => ix.on_destroy(ctx, value),
            Self::Range(ix) => ix.on_destroy(ctx, id, value),
        }
    }
}

/// One maintainer attached to an entity type.
///
/// The set of kinds is closed: the primary row, plain unique/range
/// indexes, and the conditional wrapper around either of those.
pub(crate) enum IndexMaintainer {
    Primary(PrimaryIndex),
    Base(BaseMaintainer),
    Conditional(ConditionalMaintainer),
}

impl IndexMaintainer {
    fn create_lock_keys(
        &self,
        id: &[TupleItem],
        value: &StoredRecord,
    ) -> EntityResult<Vec<String>> {
        match self {
            Self::Primary(ix) => ix.create_lock_keys(id),
            Self::Base(ix) => ix.create_lock_keys(id, value),
            Self::Conditional(ix) => ix.create_lock_keys(id, value),
        }
    }

    async fn before_create(
        &self,
        ctx: &Context,
        id: &[TupleItem],
        value: &StoredRecord,
    ) -> EntityResult<()> {
        match self {
            Self::Primary(ix) => ix.before_create(ctx, id).await,
            Self::Base(ix) => ix.before_create(ctx, id, value).await,
            Self::Conditional(ix) => ix.before_create(ctx, id, value).await,
        }
    }

    fn on_create(
        &self,
        ctx: &Context,
        id: &[TupleItem],
        value: &StoredRecord,
    ) -> EntityResult<()> {
        match self {
            Self::Primary(ix) => ix.on_create(ctx, id, value),
            Self::Base(ix) => ix.on_create(ctx, id, value),
            Self::Conditional(ix) => ix.on_create(ctx, id, value),
        }
    }

    fn update_lock_keys(
        &self,
        id: &[TupleItem],
        old_value: &StoredRecord,
        new_value: &StoredRecord,
    ) -> EntityResult<Vec<String>> {
        match self {
            Self::Primary(ix) => ix.update_lock_keys(id),
            Self::Base(ix) => ix.update_lock_keys(id, old_value, new_value),
            Self::Conditional(ix) => ix.update_lock_keys(id, old_value, new_value),
        }
    }

    async fn before_update(
        &self,
        ctx: &Context,
        id: &[TupleItem],
        old_value: &StoredRecord,
        new_value: &StoredRecord,
    ) -> EntityResult<()> {
        match self {
            Self::Primary(_) => Ok(()),
            Self::Base(ix) => ix.before_update(ctx, id, old_value, new_value).await,
            Self::Conditional(ix) => ix.before_update(ctx, id, old_value, new_value).await,
        }
    }

    fn on_update(
        &self,
        ctx: &Context,
        id: &[TupleItem],
        old_value: &StoredRecord,
        new_value: &StoredRecord,
    ) -> EntityResult<()> {
        match self {
            Self::Primary(ix) => ix.on_update(ctx, id, new_value),
            Self::Base(ix) => ix.on_update(ctx, id, old_value, new_value),
            Self::Conditional(ix) => ix.on_update(ctx, id, old_value, new_value),
        }
    }

    fn destroy_lock_keys(
        &self,
        id: &[TupleItem],
        value: &StoredRecord,
    ) -> EntityResult<Vec<String>> {
        match self {
            Self::Primary(ix) => ix.destroy_lock_keys(id),
            Self::Base(ix) => ix.destroy_lock_keys(id, value),
            Self::Conditional(ix) => ix.destroy_lock_keys(id, value),
        }
    }

    fn on_destroy(
        &self,
        ctx: &Context,
        id: &[TupleItem],
        value: &StoredRecord,
    ) -> EntityResult<()> {
        match self {
            Self::Primary(ix) => ix.on_destroy(ctx, id),
            Self::Base(ix) => ix.on_destroy(ctx, id, value),
            Self::Conditional(ix) => ix.on_destroy(ctx, id, value),
        }
    }

    // The after-* phase carries post-mutation side effects such as
    // notifications. None of the built-in maintainers use it.

    async fn after_create(
        &self,
        _ctx: &Context,
        _id: &[TupleItem],
        _value: &StoredRecord,
    ) -> EntityResult<()> {
        Ok(())
    }

    async fn after_update(
        &self,
        _ctx: &Context,
        _id: &[TupleItem],
        _old_value: &StoredRecord,
        _new_value: &StoredRecord,
    ) -> EntityResult<()> {
        Ok(())
    }

    async fn after_destroy(
        &self,
        _ctx: &Context,
        _id: &[TupleItem],
        _value: &StoredRecord,
    ) -> EntityResult<()> {
        Ok(())
    }
}

/// Executes the staged index protocol for entity mutations.
///
/// The lock table is owned by the pipeline (one per opened factory) and
/// shared by all transactions, since it must serialize index-key access
/// across concurrent, unrelated transactions.
pub(crate) struct IndexPipeline {
    db: Arc<Database>,
    maintainers: Vec<IndexMaintainer>,
    locks: MultiMutex,
}

impl IndexPipeline {
    pub(crate) fn new(descriptor: &EntityDescriptor) -> Self {
        let mut maintainers = vec![IndexMaintainer::Primary(PrimaryIndex::new(
            descriptor.subspace.clone(),
        ))];
        for index in &descriptor.secondary_indexes {
            let base = match index.kind {
                SecondaryIndexKind::Unique => BaseMaintainer::Unique(UniqueIndex::new(index.clone())),
                SecondaryIndexKind::Range => BaseMaintainer::Range(RangeIndex::new(index.clone())),
            };
            maintainers.push(match &index.condition {
                Some(condition) => IndexMaintainer::Conditional(ConditionalMaintainer::new(
                    Arc::clone(condition),
                    base,
                )),
                None => IndexMaintainer::Base(base),
            });
        }
        Self {
            db: Arc::clone(descriptor.subspace.database()),
            maintainers,
            locks: MultiMutex::new(),
        }
    }

    pub(crate) async fn lock(&self, keys: &[String]) -> strata_util::MultiMutexGuard {
        self.locks.acquire(keys).await
    }

    pub(crate) async fn run_create(
        &self,
        ctx: &Context,
        id: &[TupleItem],
        value: &StoredRecord,
    ) -> EntityResult<()> {
        let mut keys = Vec::new();
        for m in &self.maintainers {
            keys.extend(m.create_lock_keys(id, value)?);
        }
        trace!(locks = keys.len(), "index pipeline: create");
        let _guard = self.locks.acquire(&keys).await;
        let maintainers = &self.maintainers;
        in_tx::<_, EntityError, _, _>(&self.db, ctx, |ctx| async move {
            for m in maintainers {
                m.before_create(&ctx, id, value).await?;
            }
            for m in maintainers {
                m.on_create(&ctx, id, value)?;
            }
            for m in maintainers {
                m.after_create(&ctx, id, value).await?;
            }
            Ok(())
        })
        .await
    }

    pub(crate) async fn run_update(
        &self,
        ctx: &Context,
        id: &[TupleItem],
        old_value: &StoredRecord,
        new_value: &StoredRecord,
    ) -> EntityResult<()> {
        let mut keys = Vec::new();
        for m in &self.maintainers {
            keys.extend(m.update_lock_keys(id, old_value, new_value)?);
        }
        trace!(locks = keys.len(), "index pipeline: update");
        let _guard = self.locks.acquire(&keys).await;
        let maintainers = &self.maintainers;
        in_tx::<_, EntityError, _, _>(&self.db, ctx, |ctx| async move {
            for m in maintainers {
                m.before_update(&ctx, id, old_value, new_value).await?;
            }
            for m in maintainers {
                m.on_update(&ctx, id, old_value, new_value)?;
            }
            for m in maintainers {
                m.after_update(&ctx, id, old_value, new_value).await?;
            }
            Ok(())
        })
        .await
    }

    pub(crate) async fn run_destroy(
        &self,
        ctx: &Context,
        id: &[TupleItem],
        value: &StoredRecord,
    ) -> EntityResult<()> {
        let mut keys = Vec::new();
        for m in &self.maintainers {
            keys.extend(m.destroy_lock_keys(id, value)?);
        }
        trace!(locks = keys.len(), "index pipeline: destroy");
        let _guard = self.locks.acquire(&keys).await;
        let maintainers = &self.maintainers;
        in_tx::<_, EntityError, _, _>(&self.db, ctx, |ctx| async move {
            for m in maintainers {
                m.on_destroy(&ctx, id, value)?;
            }
            for m in maintainers {
                m.after_destroy(&ctx, id, value).await?;
            }
            Ok(())
        })
        .await
    }
}
