//! Entity factories: identity-mapped lookup, creation and queries.

use crate::descriptor::{EntityDescriptor, SecondaryIndexKind};
use crate::entity::Entity;
use crate::error::{EntityError, EntityResult};
use crate::indexes::{secondary_lock_key, IndexPipeline, Primary};
use crate::record::{now_millis, Metadata, Record, StoredRecord};
use crate::stream::{cursor_to_tuple, tuple_to_cursor};
use std::sync::Arc;
use strata_core::{in_read_only_tx, Context, RangeOptions, TransactionCache};
use strata_kv::Watch;
use strata_tuple::TupleItem;
use strata_util::MultiMutex;
use tracing::debug;

/// Options of a range-index query.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Maximum number of returned entities.
    pub limit: Option<usize>,
    /// Scan in descending index order.
    pub reverse: bool,
    /// Opaque cursor from a previous page; resumes exclusively past it.
    pub after: Option<String>,
}

/// One page of a range-index query.
#[derive(Debug)]
pub struct QueryResult {
    /// Entities in scan order.
    pub items: Vec<Arc<Entity>>,
    /// Cursor positioned after the last returned row, if any rows were
    /// returned.
    pub cursor: Option<String>,
}

/// Creates, finds and queries entities of one type.
///
/// The factory owns the per-type index pipeline (including its
/// process-wide multi-key lock table) and two transaction-scoped
/// caches: the identity map and the per-primary-key lock table that
/// serializes logically concurrent lookups inside one transaction.
pub struct EntityFactory {
    descriptor: Arc<EntityDescriptor>,
    pipeline: Arc<IndexPipeline>,
    cache: TransactionCache<Entity>,
    key_locks: TransactionCache<MultiMutex>,
}

impl EntityFactory {
    /// Builds a factory from a frozen descriptor.
    pub fn new(descriptor: EntityDescriptor) -> Arc<Self> {
        let descriptor = Arc::new(descriptor);
        let pipeline = Arc::new(IndexPipeline::new(&descriptor));
        Arc::new(Self {
            cache: TransactionCache::new(format!("entity:{}", descriptor.storage_key)),
            key_locks: TransactionCache::new(format!("entity-locks:{}", descriptor.storage_key)),
            descriptor,
            pipeline,
        })
    }

    /// The frozen descriptor of this entity type.
    pub fn descriptor(&self) -> &Arc<EntityDescriptor> {
        &self.descriptor
    }

    fn cache_key(id: &[TupleItem]) -> EntityResult<String> {
        Ok(strata_util::hex::encode(&strata_tuple::pack(id)?))
    }

    fn tx_locks(&self, ctx: &Context) -> EntityResult<Arc<MultiMutex>> {
        self.key_locks
            .get_or_insert_with(ctx, "locks", || Arc::new(MultiMutex::new()))
            .map_err(EntityError::Core)
    }

    fn instance(
        &self,
        ctx: &Context,
        id: Vec<TupleItem>,
        stored: StoredRecord,
    ) -> EntityResult<Arc<Entity>> {
        let tx = ctx.require_transaction().map_err(EntityError::Core)?;
        Ok(Entity::new(
            Arc::clone(&self.descriptor),
            Arc::clone(&self.pipeline),
            id,
            stored,
            tx,
        ))
    }

    /// Finds an entity by primary key.
    ///
    /// Within one transaction attempt, repeated lookups of the same key
    /// return the same instance, including lookups racing a concurrent
    /// `create` of that key. Requires an ambient transaction.
    pub async fn find_by_id(
        &self,
        ctx: &Context,
        id: &[TupleItem],
    ) -> EntityResult<Option<Arc<Entity>>> {
        let id = self.descriptor.resolve_primary_key(id)?;
        let cache_key = Self::cache_key(&id)?;
        let locks = self.tx_locks(ctx)?;
        let _guard = locks.acquire(&[Primary::lock_key(&id)?]).await;

        // The ordering below is load-bearing for read-your-writes:
        // check the identity map, read the row, then check the map
        // again before populating it.
        if let Some(cached) = self.cache.get(ctx, &cache_key)? {
            return Ok(Some(cached));
        }
        let stored = self.descriptor.subspace.get(ctx, &id).await?;
        if let Some(cached) = self.cache.get(ctx, &cache_key)? {
            return Ok(Some(cached));
        }
        match stored {
            Some(stored) => {
                let entity = self.instance(ctx, id, stored)?;
                self.cache.set(ctx, &cache_key, Arc::clone(&entity))?;
                Ok(Some(entity))
            }
            None => Ok(None),
        }
    }

    /// Creates an entity at the given primary key.
    ///
    /// Fails with "entity already exists" when the identity map already
    /// holds the key or a row is present at it; the existence check and
    /// the index writes run atomically under the merged index lock set.
    pub async fn create(
        &self,
        ctx: &Context,
        id: &[TupleItem],
        value: Record,
    ) -> EntityResult<Arc<Entity>> {
        let id = self.descriptor.resolve_primary_key(id)?;
        let normalized = self.descriptor.normalize(&id, value)?;
        let now = now_millis();
        let stored = StoredRecord {
            value: normalized,
            metadata: Metadata {
                version: 0,
                created_at: now,
                updated_at: now,
            },
        };
        let cache_key = Self::cache_key(&id)?;

        // Serialize against concurrent find/create of the same key
        // inside this transaction.
        let locks = self.tx_locks(ctx)?;
        let _guard = locks.acquire(&[Primary::lock_key(&id)?]).await;

        if self.cache.get(ctx, &cache_key)?.is_some() {
            return Err(EntityError::AlreadyExists);
        }

        self.pipeline.run_create(ctx, &id, &stored).await?;

        if self.cache.get(ctx, &cache_key)?.is_some() {
            return Err(EntityError::AlreadyExists);
        }
        debug!(entity = %self.descriptor.name, "created");
        let entity = self.instance(ctx, id, stored)?;
        self.cache.set(ctx, &cache_key, Arc::clone(&entity))?;
        Ok(entity)
    }

    /// Returns every entity of this type, in primary-key order.
    pub async fn find_all(&self, ctx: &Context) -> EntityResult<Vec<Arc<Entity>>> {
        let db = self.descriptor.subspace.database().clone();
        in_read_only_tx::<_, EntityError, _, _>(&db, ctx, |ctx| async move {
            let rows = self
                .descriptor
                .subspace
                .range(&ctx, &Vec::new(), RangeOptions::default())
                .await?;
            let mut out = Vec::with_capacity(rows.len());
            for row in rows {
                out.push(self.cached_instance(&ctx, row.key, row.value)?);
            }
            Ok(out)
        })
        .await
    }

    fn cached_instance(
        &self,
        ctx: &Context,
        id: Vec<TupleItem>,
        stored: StoredRecord,
    ) -> EntityResult<Arc<Entity>> {
        let cache_key = Self::cache_key(&id)?;
        if let Some(cached) = self.cache.get(ctx, &cache_key)? {
            return Ok(cached);
        }
        let entity = self.instance(ctx, id, stored)?;
        self.cache.set(ctx, &cache_key, Arc::clone(&entity))?;
        Ok(entity)
    }

    /// Finds an entity through a unique secondary index.
    pub async fn find_from_unique_index(
        &self,
        ctx: &Context,
        index_name: &str,
        key: &[TupleItem],
    ) -> EntityResult<Option<Arc<Entity>>> {
        let index = self.descriptor.secondary_index(index_name)?.clone();
        if index.kind != SecondaryIndexKind::Unique {
            return Err(EntityError::invalid_operation(format!(
                "index {index_name} is not unique"
            )));
        }
        let db = self.descriptor.subspace.database().clone();
        in_read_only_tx::<_, EntityError, _, _>(&db, ctx, |ctx| {
            let index = index.clone();
            let key = key.to_vec();
            async move {
                let row = {
                    let lock_key = secondary_lock_key(&index.name, &key)?;
                    let _guard = self.pipeline.lock(&[lock_key]).await;
                    index.subspace.get(&ctx, &key).await?
                };
                match row {
                    None => Ok(None),
                    Some(stored) => {
                        let pk = self.descriptor.primary_key_from_record(&stored.value)?;
                        self.find_by_id(&ctx, &pk).await
                    }
                }
            }
        })
        .await
    }

    /// Queries a range index below the given field prefix.
    ///
    /// The returned cursor is an opaque token; passing it back as
    /// `after` resumes the scan at the next unseen row, in either
    /// direction, independent of process restarts.
    pub async fn query(
        &self,
        ctx: &Context,
        index_name: &str,
        prefix: &[TupleItem],
        opts: QueryOptions,
    ) -> EntityResult<QueryResult> {
        let index = self.descriptor.secondary_index(index_name)?;
        if index.kind != SecondaryIndexKind::Range {
            return Err(EntityError::invalid_operation(format!(
                "index {index_name} is not a range index"
            )));
        }
        let child = index
            .subspace
            .subspace(&prefix.to_vec())
            .map_err(EntityError::Core)?;
        let after = opts.after.as_deref().map(cursor_to_tuple).transpose()?;
        let limit = opts.limit;
        let reverse = opts.reverse;

        let db = self.descriptor.subspace.database().clone();
        in_read_only_tx::<_, EntityError, _, _>(&db, ctx, |ctx| {
            let child = child.clone();
            let after = after.clone();
            async move {
                let rows = child
                    .range(
                        &ctx,
                        &Vec::new(),
                        RangeOptions {
                            after,
                            before: None,
                            limit,
                            reverse,
                        },
                    )
                    .await?;

                let cursor = match rows.last() {
                    Some(last) => Some(tuple_to_cursor(&last.key)?),
                    None => None,
                };
                let mut items = Vec::with_capacity(rows.len());
                for row in rows {
                    let pk = self.descriptor.primary_key_from_record(&row.value.value)?;
                    let entity = self
                        .find_by_id(&ctx, &pk)
                        .await?
                        .ok_or(EntityError::BrokenIndex)?;
                    items.push(entity);
                }
                Ok(QueryResult { items, cursor })
            }
        })
        .await
    }

    /// Registers a watch on an entity's primary row.
    pub fn watch(&self, ctx: &Context, id: &[TupleItem]) -> EntityResult<Watch> {
        let id = self.descriptor.resolve_primary_key(id)?;
        self.descriptor
            .subspace
            .watch(ctx, &id)
            .map_err(EntityError::Core)
    }
}

impl std::fmt::Debug for EntityFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityFactory")
            .field("entity", &self.descriptor.name)
            .finish_non_exhaustive()
    }
}
