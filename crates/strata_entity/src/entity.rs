//! Live entity instances.

use crate::descriptor::EntityDescriptor;
use crate::error::{EntityError, EntityResult};
use crate::indexes::IndexPipeline;
use crate::record::{now_millis, FieldValue, Metadata, Record, StoredRecord};
use parking_lot::Mutex as PlMutex;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use strata_core::{Context, Transaction};
use strata_tuple::TupleItem;
use strata_util::Mutex as FlushMutex;
use tracing::trace;

struct EntityState {
    snapshot: StoredRecord,
    dirty: BTreeMap<String, FieldValue>,
    flush_scheduled: bool,
    deleted: bool,
}

/// One logical record, alive inside one transaction attempt.
///
/// Instances are created by their factory (on `create` or on first read)
/// and cached in the transaction's identity map, so repeated lookups of
/// the same primary key yield the same instance. Field setters populate
/// a dirty buffer and schedule an implicit flush before commit; `flush`
/// persists the accumulated changes through the index pipeline.
pub struct Entity {
    // Self-reference handed to commit hooks registered by setters.
    weak: Weak<Entity>,
    descriptor: Arc<EntityDescriptor>,
    pipeline: Arc<IndexPipeline>,
    id: Vec<TupleItem>,
    tx_id: u64,
    read_only: bool,
    state: PlMutex<EntityState>,
    flush_lock: FlushMutex,
}

impl Entity {
    pub(crate) fn new(
        descriptor: Arc<EntityDescriptor>,
        pipeline: Arc<IndexPipeline>,
        id: Vec<TupleItem>,
        snapshot: StoredRecord,
        tx: &Transaction,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            weak: weak.clone(),
            descriptor,
            pipeline,
            id,
            tx_id: tx.id(),
            read_only: tx.is_read_only(),
            state: PlMutex::new(EntityState {
                snapshot,
                dirty: BTreeMap::new(),
                flush_scheduled: false,
                deleted: false,
            }),
            flush_lock: FlushMutex::new(),
        })
    }

    /// The immutable primary key.
    pub fn id(&self) -> &[TupleItem] {
        &self.id
    }

    /// The record version, bumped on each flushed update.
    pub fn version(&self) -> u64 {
        self.state.lock().snapshot.metadata.version
    }

    /// Creation timestamp in milliseconds.
    pub fn created_at(&self) -> i64 {
        self.state.lock().snapshot.metadata.created_at
    }

    /// Last-flush timestamp in milliseconds.
    pub fn updated_at(&self) -> i64 {
        self.state.lock().snapshot.metadata.updated_at
    }

    /// True once `delete` succeeded.
    pub fn is_deleted(&self) -> bool {
        self.state.lock().deleted
    }

    /// Reads a field, preferring unflushed local changes.
    pub fn get(&self, name: &str) -> EntityResult<FieldValue> {
        let st = self.state.lock();
        st.dirty
            .get(name)
            .or_else(|| st.snapshot.value.get(name))
            .cloned()
            .ok_or_else(|| EntityError::invalid_shape(format!("unknown field {name}")))
    }

    /// The current effective record: the last persisted snapshot plus
    /// unflushed changes.
    pub fn current_record(&self) -> Record {
        let st = self.state.lock();
        let mut out = st.snapshot.value.clone();
        for (name, value) in &st.dirty {
            out.set(name.clone(), value.clone());
        }
        out
    }

    fn check_mutable(&self, ctx: &Context) -> EntityResult<Arc<Transaction>> {
        let tx = ctx.require_transaction().map_err(EntityError::Core)?;
        if tx.id() != self.tx_id {
            return Err(EntityError::invalid_operation(
                "entity is bound to a different transaction",
            ));
        }
        if tx.is_completed() {
            return Err(EntityError::invalid_operation(
                "entity transaction already completed",
            ));
        }
        if self.read_only {
            return Err(EntityError::invalid_operation(
                "entity is bound to a read-only transaction",
            ));
        }
        Ok(Arc::clone(tx))
    }

    /// Sets a field, marking it dirty and scheduling an implicit flush
    /// before commit. Setting a field to its current value is a no-op.
    pub fn set(&self, ctx: &Context, name: &str, value: FieldValue) -> EntityResult<()> {
        let tx = self.check_mutable(ctx)?;
        self.descriptor.check_field(name, &value)?;

        let mut st = self.state.lock();
        if st.deleted {
            return Err(EntityError::invalid_operation(
                "cannot mutate a deleted entity",
            ));
        }
        let current = st.dirty.get(name).or_else(|| st.snapshot.value.get(name));
        if current == Some(&value) {
            return Ok(());
        }
        st.dirty.insert(name.to_owned(), value);

        if !st.flush_scheduled {
            st.flush_scheduled = true;
            let entity = self
                .weak
                .upgrade()
                .ok_or_else(|| EntityError::invalid_operation("entity instance dropped"))?;
            tx.before_commit(move |hook_ctx| async move {
                entity.flush(&hook_ctx).await.map_err(EntityError::into_core)
            })
            .map_err(EntityError::Core)?;
        }
        Ok(())
    }

    /// Persists accumulated dirty fields through the index pipeline.
    ///
    /// A flush with no pending changes is a no-op: no version bump, no
    /// write. Overlapping flushes are serialized by a per-entity lock.
    /// On failure the dirty buffer is restored (merged under any fields
    /// dirtied while the flush was in flight) so no mutation is lost.
    pub async fn flush(&self, ctx: &Context) -> EntityResult<()> {
        let _guard = self.flush_lock.acquire().await;

        {
            let st = self.state.lock();
            if st.deleted || st.dirty.is_empty() {
                return Ok(());
            }
        }
        self.check_mutable(ctx)?;

        let (old, dirty) = {
            let mut st = self.state.lock();
            // Fields dirtied from here on schedule a fresh flush.
            st.flush_scheduled = false;
            (st.snapshot.clone(), std::mem::take(&mut st.dirty))
        };

        let mut new_value = old.value.clone();
        for (name, value) in &dirty {
            new_value.set(name.clone(), value.clone());
        }
        let new_stored = StoredRecord {
            value: new_value,
            metadata: Metadata {
                version: old.metadata.version + 1,
                created_at: old.metadata.created_at,
                updated_at: now_millis(),
            },
        };

        match self
            .pipeline
            .run_update(ctx, &self.id, &old, &new_stored)
            .await
        {
            Ok(()) => {
                trace!(entity = %self.descriptor.name, version = new_stored.metadata.version, "flushed");
                self.state.lock().snapshot = new_stored;
                Ok(())
            }
            Err(err) => {
                let mut st = self.state.lock();
                for (name, value) in dirty {
                    st.dirty.entry(name).or_insert(value);
                }
                Err(err)
            }
        }
    }

    /// Deletes the entity: clears the primary row and every index entry.
    ///
    /// One-shot: a second delete fails. Only permitted inside the
    /// writable transaction the entity is bound to, and only when the
    /// descriptor allows deletion.
    pub async fn delete(&self, ctx: &Context) -> EntityResult<()> {
        self.check_mutable(ctx)?;
        if !self.descriptor.allow_delete {
            return Err(EntityError::DeleteNotAllowed {
                name: self.descriptor.name.clone(),
            });
        }

        let _guard = self.flush_lock.acquire().await;
        let snapshot = {
            let st = self.state.lock();
            if st.deleted {
                return Err(EntityError::AlreadyDeleted);
            }
            st.snapshot.clone()
        };

        self.pipeline.run_destroy(ctx, &self.id, &snapshot).await?;

        let mut st = self.state.lock();
        st.deleted = true;
        st.dirty.clear();
        Ok(())
    }
}

impl std::fmt::Debug for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entity")
            .field("type", &self.descriptor.name)
            .field("id", &self.id)
            .field("version", &self.version())
            .field("deleted", &self.is_deleted())
            .finish_non_exhaustive()
    }
}
