//! Directory layer contract and a minimal transactional allocator.

use crate::context::Context;
use crate::database::Database;
use crate::error::{CoreError, CoreResult};
use crate::retry::in_tx;
use crate::subspace::Subspace;
use async_trait::async_trait;
use std::sync::Arc;
use strata_tuple::TupleItem;

/// Maps named paths to opaque, non-overlapping byte prefixes.
///
/// Distinct paths resolve to non-overlapping prefixes; resolving the
/// same path repeatedly is idempotent and returns the same prefix,
/// across transactions and process restarts.
#[async_trait]
pub trait DirectoryLayer: Send + Sync {
    /// Resolves a path of string segments to its byte prefix, allocating
    /// one on first use.
    async fn resolve(&self, ctx: &Context, path: &[&str]) -> CoreResult<Vec<u8>>;
}

const MAPPING_KEY: &str = "m";
const COUNTER_KEY: &str = "c";

/// A counter-based directory allocator stored in a reserved system
/// subspace.
///
/// Prefixes are tuple-packed allocation ids, which are mutually
/// prefix-free, so distinct paths can never overlap.
pub struct SimpleDirectory {
    db: Arc<Database>,
    root: Subspace<Vec<TupleItem>, Vec<u8>>,
}

impl SimpleDirectory {
    /// Creates a directory rooted at the `0xFE` system prefix.
    pub fn new(db: Arc<Database>) -> Self {
        let root = Subspace::tuple(Arc::clone(&db), vec![0xfe]);
        Self { db, root }
    }

    fn mapping_key(path: &[&str]) -> Vec<TupleItem> {
        let mut key = vec![TupleItem::text(MAPPING_KEY)];
        key.extend(path.iter().map(|s| TupleItem::text(*s)));
        key
    }
}

#[async_trait]
impl DirectoryLayer for SimpleDirectory {
    async fn resolve(&self, ctx: &Context, path: &[&str]) -> CoreResult<Vec<u8>> {
        if path.is_empty() {
            return Err(CoreError::invalid_operation(
                "directory path must not be empty",
            ));
        }
        let key = Self::mapping_key(path);
        let root = self.root.clone();
        in_tx::<_, CoreError, _, _>(&self.db, ctx, move |ctx| {
            let root = root.clone();
            let key = key.clone();
            async move {
                if let Some(existing) = root.get(&ctx, &key).await? {
                    return Ok(existing);
                }
                let counter_key = vec![TupleItem::text(COUNTER_KEY)];
                root.add(&ctx, &counter_key, &1u64.to_le_bytes().to_vec())?;
                let raw = root
                    .get(&ctx, &counter_key)
                    .await?
                    .ok_or_else(|| CoreError::invalid_operation("directory counter missing"))?;
                let bytes: [u8; 8] = raw.as_slice().try_into().map_err(|_| {
                    CoreError::invalid_operation("directory counter has unexpected width")
                })?;
                let id = u64::from_le_bytes(bytes);
                let prefix = strata_tuple::pack(&[TupleItem::Integer(id as i64)])?;
                root.set(&ctx, &key, &prefix)?;
                Ok(prefix)
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_path_resolves_to_same_prefix() {
        let db = Database::open_test();
        let dir = SimpleDirectory::new(db.clone());
        let ctx = Context::background();
        let a = dir.resolve(&ctx, &["app", "users"]).await.unwrap();
        let b = dir.resolve(&ctx, &["app", "users"]).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn distinct_paths_do_not_overlap() {
        let db = Database::open_test();
        let dir = SimpleDirectory::new(db.clone());
        let ctx = Context::background();
        let a = dir.resolve(&ctx, &["app", "users"]).await.unwrap();
        let b = dir.resolve(&ctx, &["app", "posts"]).await.unwrap();
        assert_ne!(a, b);
        assert!(!a.starts_with(&b));
        assert!(!b.starts_with(&a));
    }

    #[tokio::test]
    async fn resolve_participates_in_ambient_transaction() {
        let db = Database::open_test();
        let dir = Arc::new(SimpleDirectory::new(db.clone()));

        let d = dir.clone();
        let db2 = db.clone();
        let prefix = in_tx::<_, CoreError, _, _>(&db, &Context::background(), move |ctx| {
            let dir = d.clone();
            let _db = db2.clone();
            async move { dir.resolve(&ctx, &["inside"]).await }
        })
        .await
        .unwrap();

        let again = dir.resolve(&Context::background(), &["inside"]).await.unwrap();
        assert_eq!(prefix, again);
    }
}
