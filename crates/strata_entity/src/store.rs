//! Store-level wiring: directory resolution for entity and index
//! subspaces.

use crate::error::{EntityError, EntityResult};
use crate::record::{RecordCodec, StoredRecord};
use std::sync::Arc;
use strata_core::{Context, Database, DirectoryLayer, SimpleDirectory, Subspace};
use strata_tuple::TupleItem;

/// Resolves the storage layout of an entity store.
///
/// One `EntityStore` wraps one database plus a directory layer and
/// hands out the subspaces that descriptors are built from. Generated
/// code calls these resolvers once at open time.
pub struct EntityStore {
    db: Arc<Database>,
    directory: Arc<dyn DirectoryLayer>,
}

impl EntityStore {
    /// Opens a store with the built-in directory allocator.
    pub fn new(db: Arc<Database>) -> Self {
        let directory = Arc::new(SimpleDirectory::new(Arc::clone(&db)));
        Self { db, directory }
    }

    /// Opens a store over a caller-provided directory layer.
    pub fn with_directory(db: Arc<Database>, directory: Arc<dyn DirectoryLayer>) -> Self {
        Self { db, directory }
    }

    /// The underlying database.
    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    /// Resolves the primary subspace of an entity type.
    pub async fn resolve_entity_subspace(
        &self,
        ctx: &Context,
        storage_key: &str,
    ) -> EntityResult<Subspace<Vec<TupleItem>, StoredRecord>> {
        let prefix = self
            .directory
            .resolve(ctx, &["entity", storage_key])
            .await
            .map_err(EntityError::Core)?;
        Ok(Subspace::tuple(Arc::clone(&self.db), prefix).with_value_encoding(Arc::new(RecordCodec)))
    }

    /// Resolves the subspace of one secondary index.
    pub async fn resolve_index_subspace(
        &self,
        ctx: &Context,
        storage_key: &str,
        index_key: &str,
    ) -> EntityResult<Subspace<Vec<TupleItem>, StoredRecord>> {
        let prefix = self
            .directory
            .resolve(ctx, &["entity", storage_key, "idx", index_key])
            .await
            .map_err(EntityError::Core)?;
        Ok(Subspace::tuple(Arc::clone(&self.db), prefix).with_value_encoding(Arc::new(RecordCodec)))
    }

    /// Resolves a raw subspace for atomic counters and flags.
    pub async fn resolve_atomic_subspace(
        &self,
        ctx: &Context,
        storage_key: &str,
    ) -> EntityResult<Subspace<Vec<TupleItem>, Vec<u8>>> {
        let prefix = self
            .directory
            .resolve(ctx, &["atomic", storage_key])
            .await
            .map_err(EntityError::Core)?;
        Ok(Subspace::tuple(Arc::clone(&self.db), prefix))
    }
}

impl std::fmt::Debug for EntityStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityStore").finish_non_exhaustive()
    }
}
