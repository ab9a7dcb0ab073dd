//! The transaction retry combinators.
//!
//! `in_tx`, `in_read_only_tx` and `in_hybrid_tx` turn a user closure
//! into a causally-consistent, automatically-retried unit of work. The
//! closure must be re-runnable: on a retryable backend error it is
//! invoked again from scratch against a derived transaction. Side
//! effects outside registered hooks are the caller's responsibility.

use crate::context::Context;
use crate::database::Database;
use crate::error::{CoreError, TxError};
use crate::transaction::Transaction;
use std::future::Future;
use std::sync::Arc;
use strata_kv::KvError;
use tracing::debug;

/// Runs a closure inside a read-write transaction.
///
/// Nested calls reuse the ambient transaction: pending before-commit
/// hooks are flushed at both nesting boundaries and the final commit is
/// deferred to the outermost call.
pub async fn in_tx<T, E, F, Fut>(db: &Arc<Database>, ctx: &Context, body: F) -> Result<T, E>
where
    E: TxError,
    F: Fn(Context) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    if let Some(tx) = ctx.transaction() {
        tx.flush_pending(ctx).await.map_err(E::from)?;
        let result = body(ctx.clone()).await?;
        tx.flush_pending(ctx).await.map_err(E::from)?;
        return Ok(result);
    }
    retry_loop(db, false, false, body).await
}

/// Runs a closure inside a read-only (snapshot) transaction.
///
/// Reads do not register conflicts and the transaction is never
/// committed. Registering commit hooks or writing fails immediately.
pub async fn in_read_only_tx<T, E, F, Fut>(
    db: &Arc<Database>,
    ctx: &Context,
    body: F,
) -> Result<T, E>
where
    E: TxError,
    F: Fn(Context) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    if ctx.transaction().is_some() {
        return body(ctx.clone()).await;
    }
    retry_loop(db, true, false, body).await
}

/// Runs a closure in hybrid mode: optimistically read-only, transparently
/// promoted to read-write on the first write attempt.
///
/// Promotion discards all completed reads and restarts the closure from
/// the top against a writable transaction.
pub async fn in_hybrid_tx<T, E, F, Fut>(db: &Arc<Database>, ctx: &Context, body: F) -> Result<T, E>
where
    E: TxError,
    F: Fn(Context) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    if let Some(tx) = ctx.transaction() {
        tx.flush_pending(ctx).await.map_err(E::from)?;
        let result = body(ctx.clone()).await?;
        tx.flush_pending(ctx).await.map_err(E::from)?;
        return Ok(result);
    }
    retry_loop(db, true, true, body).await
}

enum Action {
    Promote,
    Retry(KvError),
    Fatal,
}

async fn retry_loop<T, E, F, Fut>(
    db: &Arc<Database>,
    read_only: bool,
    hybrid: bool,
    body: F,
) -> Result<T, E>
where
    E: TxError,
    F: Fn(Context) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut tx = Transaction::create(db.allocate_tx_id(), read_only, hybrid);
    loop {
        let ctx = Context::with_transaction(Arc::clone(&tx));
        let outcome: Result<T, E> = async {
            let value = body(ctx.clone()).await?;
            tx.commit(&ctx).await.map_err(E::from)?;
            Ok(value)
        }
        .await;

        let err = match outcome {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        let action = if tx.is_completed() {
            // The backend commit already landed; whatever failed after it
            // (an after-commit hook) must not re-run the closure.
            Action::Fatal
        } else {
            match err.as_core() {
                Some(CoreError::WriteToReadOnlyContext)
                    if tx.is_hybrid() && tx.is_read_only() =>
                {
                    Action::Promote
                }
                Some(CoreError::Backend(kv)) if kv.is_retryable() => Action::Retry(kv.clone()),
                _ => Action::Fatal,
            }
        };

        match action {
            Action::Fatal => {
                tx.cancel();
                return Err(err);
            }
            Action::Promote => {
                debug!(id = tx.id(), "promoting hybrid transaction to read-write");
                tx = tx.derive(false, true).map_err(E::from)?;
            }
            Action::Retry(kv) => {
                debug!(
                    id = tx.id(),
                    attempt = tx.attempt(),
                    error = %kv,
                    "retrying transaction"
                );
                if let Some(raw) = tx.raw_handle() {
                    if let Err(fatal) = raw.on_error(&kv).await {
                        tx.cancel();
                        return Err(E::from(CoreError::Backend(fatal)));
                    }
                }
                tx = tx.derive(tx.is_read_only(), tx.is_hybrid()).map_err(E::from)?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreResult;
    use std::sync::atomic::{AtomicU32, Ordering};
    use strata_kv::MemoryBackend;

    fn test_db() -> (Arc<Database>, Arc<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::new());
        let db = Database::new(backend.clone());
        (db, backend)
    }

    async fn read_key(ctx: &Context, db: &Arc<Database>, key: &[u8]) -> CoreResult<Option<Vec<u8>>> {
        let tx = ctx.require_transaction()?;
        let raw = tx.raw_read(db)?;
        Ok(raw
            .get(key, tx.is_read_only())
            .await?
            .map(|b| b.to_vec()))
    }

    fn write_key(ctx: &Context, db: &Arc<Database>, key: &[u8], value: &[u8]) -> CoreResult<()> {
        let raw = ctx.require_transaction()?.raw_write(db)?;
        raw.set(key, value)?;
        Ok(())
    }

    #[tokio::test]
    async fn commit_applies_writes() {
        let (db, _) = test_db();
        in_tx::<_, CoreError, _, _>(&db, &Context::background(), |ctx| {
            let db = db.clone();
            async move { write_key(&ctx, &db, b"k", b"v") }
        })
        .await
        .unwrap();

        let got = in_read_only_tx::<_, CoreError, _, _>(&db, &Context::background(), |ctx| {
            let db = db.clone();
            async move { read_key(&ctx, &db, b"k").await }
        })
        .await
        .unwrap();
        assert_eq!(got, Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn retry_is_transparent_and_commits_once() {
        let (db, backend) = test_db();
        backend.inject_commit_failures(1);

        let runs = Arc::new(AtomicU32::new(0));
        let after_commits = Arc::new(AtomicU32::new(0));

        let runs2 = runs.clone();
        let after2 = after_commits.clone();
        let db2 = db.clone();
        in_tx::<_, CoreError, _, _>(&db, &Context::background(), move |ctx| {
            let db = db2.clone();
            let runs = runs2.clone();
            let after = after2.clone();
            async move {
                runs.fetch_add(1, Ordering::SeqCst);
                write_key(&ctx, &db, b"k", b"v")?;
                let after = after.clone();
                ctx.require_transaction()?.after_commit(move |_| {
                    let after = after.clone();
                    async move {
                        after.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                })?;
                Ok(())
            }
        })
        .await
        .unwrap();

        // The closure ran twice, its effects committed once, the
        // after-commit hook fired once.
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(after_commits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn nested_in_tx_reuses_ambient_transaction() {
        let (db, _) = test_db();
        let ids = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let ids2 = ids.clone();
        let db2 = db.clone();
        in_tx::<_, CoreError, _, _>(&db, &Context::background(), move |ctx| {
            let db = db2.clone();
            let ids = ids2.clone();
            async move {
                ids.lock().push(ctx.require_transaction()?.id());
                write_key(&ctx, &db, b"outer", b"1")?;
                let db3 = db.clone();
                let ids3 = ids.clone();
                in_tx::<_, CoreError, _, _>(&db, &ctx, move |inner| {
                    let db = db3.clone();
                    let ids = ids3.clone();
                    async move {
                        ids.lock().push(inner.require_transaction()?.id());
                        write_key(&inner, &db, b"inner", b"2")
                    }
                })
                .await?;
                Ok(())
            }
        })
        .await
        .unwrap();

        let seen = ids.lock().clone();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], seen[1]);
    }

    #[tokio::test]
    async fn nested_boundary_flushes_pending_hooks() {
        let (db, _) = test_db();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let order2 = order.clone();
        let db2 = db.clone();
        in_tx::<_, CoreError, _, _>(&db, &Context::background(), move |ctx| {
            let order = order2.clone();
            let db = db2.clone();
            async move {
                let tx = ctx.require_transaction()?;
                let o = order.clone();
                tx.before_commit(move |_| {
                    let o = o.clone();
                    async move {
                        o.lock().push("hook");
                        Ok(())
                    }
                })?;

                let o = order.clone();
                in_tx::<_, CoreError, _, _>(&db, &ctx, move |_| {
                    let o = o.clone();
                    async move {
                        o.lock().push("inner");
                        Ok(())
                    }
                })
                .await?;
                order.lock().push("outer-after");
                Ok(())
            }
        })
        .await
        .unwrap();

        assert_eq!(order.lock().clone(), vec!["hook", "inner", "outer-after"]);
    }

    #[tokio::test]
    async fn before_commit_hooks_run_fifo_and_drain_recursively() {
        let (db, _) = test_db();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let order2 = order.clone();
        in_tx::<_, CoreError, _, _>(&db, &Context::background(), move |ctx| {
            let order = order2.clone();
            async move {
                let tx = ctx.require_transaction()?;
                let o1 = order.clone();
                tx.before_commit(move |hook_ctx| {
                    let o = o1.clone();
                    async move {
                        o.lock().push(1);
                        // A hook registered by a hook still runs in the
                        // same before-commit phase.
                        let o2 = o.clone();
                        hook_ctx.require_transaction()?.before_commit(move |_| {
                            let o = o2.clone();
                            async move {
                                o.lock().push(3);
                                Ok(())
                            }
                        })?;
                        Ok(())
                    }
                })?;
                let o = order.clone();
                tx.before_commit(move |_| {
                    let o = o.clone();
                    async move {
                        o.lock().push(2);
                        Ok(())
                    }
                })?;
                Ok(())
            }
        })
        .await
        .unwrap();

        assert_eq!(order.lock().clone(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn write_in_read_only_context_is_fatal() {
        let (db, _) = test_db();
        let db2 = db.clone();
        let err = in_read_only_tx::<(), CoreError, _, _>(&db, &Context::background(), move |ctx| {
            let db = db2.clone();
            async move { write_key(&ctx, &db, b"k", b"v") }
        })
        .await
        .unwrap_err();
        assert!(matches!(err, CoreError::WriteToReadOnlyContext));
    }

    #[tokio::test]
    async fn hybrid_promotes_on_first_write() {
        let (db, _) = test_db();
        let runs = Arc::new(AtomicU32::new(0));

        let runs2 = runs.clone();
        let db2 = db.clone();
        in_hybrid_tx::<_, CoreError, _, _>(&db, &Context::background(), move |ctx| {
            let db = db2.clone();
            let runs = runs2.clone();
            async move {
                runs.fetch_add(1, Ordering::SeqCst);
                let existing = read_key(&ctx, &db, b"k").await?;
                if existing.is_none() {
                    write_key(&ctx, &db, b"k", b"v")?;
                }
                Ok(())
            }
        })
        .await
        .unwrap();

        // First pass read-only, second pass writable.
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        let db3 = db.clone();
        let got = in_read_only_tx::<_, CoreError, _, _>(&db, &Context::background(), move |ctx| {
            let db = db3.clone();
            async move { read_key(&ctx, &db, b"k").await }
        })
        .await
        .unwrap();
        assert_eq!(got, Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn hybrid_stays_read_only_without_writes() {
        let (db, _) = test_db();
        let runs = Arc::new(AtomicU32::new(0));
        let runs2 = runs.clone();
        let db2 = db.clone();
        in_hybrid_tx::<_, CoreError, _, _>(&db, &Context::background(), move |ctx| {
            let db = db2.clone();
            let runs = runs2.clone();
            async move {
                runs.fetch_add(1, Ordering::SeqCst);
                read_key(&ctx, &db, b"missing").await.map(|_| ())
            }
        })
        .await
        .unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn constraint_errors_are_not_retried() {
        let (db, _) = test_db();
        let runs = Arc::new(AtomicU32::new(0));
        let runs2 = runs.clone();
        let err = in_tx::<(), CoreError, _, _>(&db, &Context::background(), move |_| {
            let runs = runs2.clone();
            async move {
                runs.fetch_add(1, Ordering::SeqCst);
                Err(CoreError::constraint("entity already exists"))
            }
        })
        .await
        .unwrap_err();
        assert!(matches!(err, CoreError::Constraint { .. }));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn mixed_connections_fail_fast() {
        let (db_a, _) = test_db();
        let (db_b, _) = test_db();
        let db_a2 = db_a.clone();
        let err = in_tx::<(), CoreError, _, _>(&db_a, &Context::background(), move |ctx| {
            let db_a = db_a2.clone();
            let db_b = db_b.clone();
            async move {
                write_key(&ctx, &db_a, b"k", b"v")?;
                write_key(&ctx, &db_b, b"k", b"v")?;
                Ok(())
            }
        })
        .await
        .unwrap_err();
        assert!(matches!(err, CoreError::MixedConnections));
    }

    #[tokio::test]
    async fn versionstamp_resolves_exactly_once_after_commit() {
        let (db, backend) = test_db();
        let captured: Arc<parking_lot::Mutex<Option<(Arc<Transaction>, strata_tuple::VersionstampRef)>>> =
            Arc::new(parking_lot::Mutex::new(None));

        let captured2 = captured.clone();
        let db2 = db.clone();
        in_tx::<_, CoreError, _, _>(&db, &Context::background(), move |ctx| {
            let db = db2.clone();
            let captured = captured2.clone();
            async move {
                let tx = ctx.require_transaction()?.clone();
                let r = tx.allocate_versionstamp_ref()?;
                // Resolving before commit is an error.
                assert!(matches!(
                    tx.resolve_versionstamp_ref(&r),
                    Err(CoreError::VersionstampUnavailable)
                ));
                write_key(&ctx, &db, b"k", b"v")?;
                *captured.lock() = Some((tx, r));
                Ok(())
            }
        })
        .await
        .unwrap();

        let (tx, r) = captured.lock().take().unwrap();
        let vs = tx.resolve_versionstamp_ref(&r).unwrap();
        assert_eq!(&vs.transaction_bytes()[..8], &backend.committed_version().to_be_bytes());
        assert!(matches!(
            tx.resolve_versionstamp_ref(&r),
            Err(CoreError::VersionstampAlreadyResolved)
        ));
    }
}
