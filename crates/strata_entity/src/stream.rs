//! Batched, resumable range-index streams and cursor helpers.

use crate::entity::Entity;
use crate::error::{EntityError, EntityResult};
use crate::factory::{EntityFactory, QueryOptions};
use parking_lot::Mutex;
use std::sync::Arc;
use strata_core::Context;
use strata_tuple::TupleItem;

/// Encodes a composite index key as an opaque cursor.
pub fn tuple_to_cursor(items: &[TupleItem]) -> EntityResult<String> {
    Ok(strata_util::hex::encode(&strata_tuple::pack(items)?))
}

/// Decodes a cursor back into its composite index key.
pub fn cursor_to_tuple(cursor: &str) -> EntityResult<Vec<TupleItem>> {
    let raw = strata_util::hex::decode(cursor).ok_or(EntityError::InvalidCursor)?;
    strata_tuple::unpack(&raw).map_err(|_| EntityError::InvalidCursor)
}

/// Options of an index stream.
#[derive(Debug, Clone)]
pub struct StreamOptions {
    /// Rows fetched per `next` call.
    pub batch_size: usize,
    /// Scan in descending index order.
    pub reverse: bool,
    /// Start exclusively past this cursor.
    pub after: Option<String>,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            batch_size: 5000,
            reverse: false,
            after: None,
        }
    }
}

/// A resumable batched scan over one range index.
///
/// Each `next` call fetches the following batch and advances the
/// internal cursor; the cursor survives process restarts when persisted
/// by the caller and re-installed with [`IndexStream::seek`].
pub struct IndexStream {
    factory: Arc<EntityFactory>,
    index_name: String,
    prefix: Vec<TupleItem>,
    batch_size: usize,
    reverse: bool,
    cursor: Mutex<Option<String>>,
}

impl IndexStream {
    /// Opens a stream over one of the factory's range indexes.
    pub fn open(
        factory: &Arc<EntityFactory>,
        index_name: impl Into<String>,
        prefix: Vec<TupleItem>,
        opts: StreamOptions,
    ) -> Self {
        Self {
            factory: Arc::clone(factory),
            index_name: index_name.into(),
            prefix,
            batch_size: opts.batch_size.max(1),
            reverse: opts.reverse,
            cursor: Mutex::new(opts.after),
        }
    }

    /// The cursor after the last returned batch.
    pub fn cursor(&self) -> Option<String> {
        self.cursor.lock().clone()
    }

    /// Repositions the stream at a previously-returned cursor, or at
    /// the start when `None`.
    pub fn seek(&self, cursor: Option<String>) {
        *self.cursor.lock() = cursor;
    }

    /// Restarts the stream from the beginning.
    pub fn reset(&self) {
        self.seek(None);
    }

    /// Fetches the next batch. An empty batch means the scan is done.
    pub async fn next(&self, ctx: &Context) -> EntityResult<Vec<Arc<Entity>>> {
        let after = self.cursor.lock().clone();
        let page = self
            .factory
            .query(
                ctx,
                &self.index_name,
                &self.prefix,
                QueryOptions {
                    limit: Some(self.batch_size),
                    reverse: self.reverse,
                    after,
                },
            )
            .await?;
        if let Some(cursor) = &page.cursor {
            *self.cursor.lock() = Some(cursor.clone());
        }
        Ok(page.items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_roundtrip() {
        let items = vec![TupleItem::Integer(1), TupleItem::text("a")];
        let cursor = tuple_to_cursor(&items).unwrap();
        assert_eq!(cursor_to_tuple(&cursor).unwrap(), items);
    }

    #[test]
    fn bad_cursor_rejected() {
        assert!(matches!(
            cursor_to_tuple("zz"),
            Err(EntityError::InvalidCursor)
        ));
        assert!(matches!(
            cursor_to_tuple("7f"),
            Err(EntityError::InvalidCursor)
        ));
    }
}
