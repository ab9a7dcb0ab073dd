//! Transaction-scoped cache.

use crate::context::Context;
use crate::error::CoreResult;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

type Slot<T> = Mutex<HashMap<String, Arc<T>>>;

/// A keyed store of values whose lifetime is exactly one transaction
/// attempt.
///
/// Each `TransactionCache` owns a globally unique namespace inside the
/// transaction's user-data map. Values are dropped when the attempt ends
/// and never leak across retries, which makes the cache safe to use for
/// object identity maps and per-key lock bookkeeping.
pub struct TransactionCache<T: Send + Sync + 'static> {
    namespace: String,
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> TransactionCache<T> {
    /// Creates a cache with the given namespace.
    ///
    /// Namespaces must be unique per logical cache; callers derive them
    /// from an owned name (e.g. an entity storage key), not from process
    /// globals.
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            _marker: std::marker::PhantomData,
        }
    }

    fn slot(&self, ctx: &Context) -> CoreResult<Arc<Slot<T>>> {
        let tx = ctx.require_transaction()?;
        let any = tx.user_data(&self.namespace, || {
            Arc::new(Mutex::new(HashMap::<String, Arc<T>>::new())) as Arc<dyn Any + Send + Sync>
        });
        // The namespace is owned by this cache, so the slot type is fixed.
        Ok(any
            .downcast::<Slot<T>>()
            .unwrap_or_else(|_| panic!("transaction cache namespace collision")))
    }

    /// Reads a cached value.
    pub fn get(&self, ctx: &Context, key: &str) -> CoreResult<Option<Arc<T>>> {
        let slot = self.slot(ctx)?;
        let map = slot.lock();
        Ok(map.get(key).cloned())
    }

    /// Stores a value, replacing any previous entry under the key.
    pub fn set(&self, ctx: &Context, key: &str, value: Arc<T>) -> CoreResult<()> {
        let slot = self.slot(ctx)?;
        slot.lock().insert(key.to_owned(), value);
        Ok(())
    }

    /// Fetches a value, inserting the result of `init` on a miss.
    pub fn get_or_insert_with(
        &self,
        ctx: &Context,
        key: &str,
        init: impl FnOnce() -> Arc<T>,
    ) -> CoreResult<Arc<T>> {
        let slot = self.slot(ctx)?;
        let mut map = slot.lock();
        if let Some(existing) = map.get(key) {
            return Ok(Arc::clone(existing));
        }
        let value = init();
        map.insert(key.to_owned(), Arc::clone(&value));
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use crate::error::CoreError;
    use crate::retry::in_tx;

    #[tokio::test]
    async fn values_live_for_one_transaction() {
        let db = Database::open_test();
        let cache: Arc<TransactionCache<u32>> = Arc::new(TransactionCache::new("test-cache"));

        let c1 = cache.clone();
        in_tx::<_, CoreError, _, _>(&db, &Context::background(), move |ctx| {
            let cache = c1.clone();
            async move {
                assert!(cache.get(&ctx, "k")?.is_none());
                cache.set(&ctx, "k", Arc::new(42))?;
                assert_eq!(cache.get(&ctx, "k")?.as_deref(), Some(&42));
                Ok(())
            }
        })
        .await
        .unwrap();

        // A new transaction starts with an empty cache.
        let c2 = cache.clone();
        in_tx::<_, CoreError, _, _>(&db, &Context::background(), move |ctx| {
            let cache = c2.clone();
            async move {
                assert!(cache.get(&ctx, "k")?.is_none());
                Ok(())
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn nested_transactions_share_the_cache() {
        let db = Database::open_test();
        let cache: Arc<TransactionCache<String>> = Arc::new(TransactionCache::new("shared"));

        let c1 = cache.clone();
        let db2 = db.clone();
        in_tx::<_, CoreError, _, _>(&db, &Context::background(), move |ctx| {
            let cache = c1.clone();
            let db = db2.clone();
            async move {
                cache.set(&ctx, "k", Arc::new("outer".to_owned()))?;
                let c = cache.clone();
                in_tx::<_, CoreError, _, _>(&db, &ctx, move |inner| {
                    let cache = c.clone();
                    async move {
                        assert_eq!(cache.get(&inner, "k")?.as_deref().map(String::as_str), Some("outer"));
                        Ok(())
                    }
                })
                .await
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn get_or_insert_returns_same_instance() {
        let db = Database::open_test();
        let cache: Arc<TransactionCache<u32>> = Arc::new(TransactionCache::new("identity"));

        let c = cache.clone();
        in_tx::<_, CoreError, _, _>(&db, &Context::background(), move |ctx| {
            let cache = c.clone();
            async move {
                let a = cache.get_or_insert_with(&ctx, "k", || Arc::new(1))?;
                let b = cache.get_or_insert_with(&ctx, "k", || Arc::new(2))?;
                assert!(Arc::ptr_eq(&a, &b));
                Ok(())
            }
        })
        .await
        .unwrap();
    }
}
