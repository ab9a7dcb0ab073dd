//! Logical transactions: hooks, user data, raw handle management and
//! versionstamp plumbing.

use crate::context::Context;
use crate::database::Database;
use crate::error::{CoreError, CoreResult};
use parking_lot::Mutex;
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use strata_kv::BackendTransaction;
use strata_tuple::{Versionstamp, VersionstampRef};
use tracing::trace;

type HookFuture = Pin<Box<dyn Future<Output = CoreResult<()>> + Send>>;
type Hook = Box<dyn FnOnce(Context) -> HookFuture + Send>;

struct Binding {
    db: Option<Arc<Database>>,
    raw: Option<Arc<dyn BackendTransaction>>,
    read_version: Option<u64>,
}

struct Hooks {
    before: Vec<Hook>,
    after: Vec<Hook>,
}

struct Versionstamps {
    next_index: u16,
    resolved: HashSet<u16>,
}

/// One logical transaction.
///
/// A logical transaction survives as long as one attempt of an `in_tx`
/// call: a retry derives a fresh `Transaction` of the same id lineage,
/// reusing the backend handle but dropping hooks, user data and caches.
/// The backend handle is created lazily on the first read or write.
pub struct Transaction {
    id: u64,
    attempt: u32,
    read_only: bool,
    hybrid: bool,
    completed: AtomicBool,
    binding: Mutex<Binding>,
    hooks: Mutex<Hooks>,
    user_data: Mutex<HashMap<String, Arc<dyn Any + Send + Sync>>>,
    versionstamps: Mutex<Versionstamps>,
}

impl Transaction {
    pub(crate) fn create(id: u64, read_only: bool, hybrid: bool) -> Arc<Self> {
        Arc::new(Self {
            id,
            attempt: 0,
            read_only,
            hybrid,
            completed: AtomicBool::new(false),
            binding: Mutex::new(Binding {
                db: None,
                raw: None,
                read_version: None,
            }),
            hooks: Mutex::new(Hooks {
                before: Vec::new(),
                after: Vec::new(),
            }),
            user_data: Mutex::new(HashMap::new()),
            versionstamps: Mutex::new(Versionstamps {
                next_index: 0,
                resolved: HashSet::new(),
            }),
        })
    }

    /// Produces the next attempt of this transaction lineage.
    ///
    /// The backend connection and handle are carried over when present;
    /// hooks, user data and versionstamp state start fresh. Promoting a
    /// hybrid transaction from read-only to writable resets the backend
    /// handle so stale snapshot reads are discarded.
    pub(crate) fn derive(&self, read_only: bool, hybrid: bool) -> CoreResult<Arc<Self>> {
        let binding = self.binding.lock();
        if let Some(raw) = &binding.raw {
            if self.read_only && !read_only {
                raw.reset()?;
            }
        }
        Ok(Arc::new(Self {
            id: self.id,
            attempt: self.attempt + 1,
            read_only,
            hybrid,
            completed: AtomicBool::new(false),
            binding: Mutex::new(Binding {
                db: binding.db.clone(),
                raw: binding.raw.clone(),
                read_version: binding.read_version,
            }),
            hooks: Mutex::new(Hooks {
                before: Vec::new(),
                after: Vec::new(),
            }),
            user_data: Mutex::new(HashMap::new()),
            versionstamps: Mutex::new(Versionstamps {
                next_index: 0,
                resolved: HashSet::new(),
            }),
        }))
    }

    /// Application-local transaction id, stable across retries.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Zero-based attempt number within this lineage.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// True for read-only (and not yet promoted hybrid) transactions.
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// True for transactions started in hybrid mode.
    pub fn is_hybrid(&self) -> bool {
        self.hybrid
    }

    /// True once the transaction committed or was cancelled.
    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::SeqCst)
    }

    fn ensure_active(&self) -> CoreResult<()> {
        if self.is_completed() {
            return Err(CoreError::TransactionCompleted);
        }
        Ok(())
    }

    /// The backend handle for reading, creating it on first use.
    ///
    /// Using handles from two different databases inside one logical
    /// transaction is a programming error and fails fast.
    pub fn raw_read(&self, db: &Arc<Database>) -> CoreResult<Arc<dyn BackendTransaction>> {
        self.ensure_active()?;
        let mut binding = self.binding.lock();
        match &binding.db {
            Some(bound) if !Arc::ptr_eq(bound, db) => return Err(CoreError::MixedConnections),
            Some(_) => {}
            None => binding.db = Some(Arc::clone(db)),
        }
        if binding.raw.is_none() {
            let raw = db.backend().create_transaction()?;
            if let Some(version) = binding.read_version {
                raw.set_read_version(version)?;
            }
            binding.raw = Some(raw);
        }
        Ok(Arc::clone(binding.raw.as_ref().unwrap()))
    }

    /// The backend handle for writing.
    ///
    /// Fails with [`CoreError::WriteToReadOnlyContext`] on read-only
    /// transactions; in hybrid mode the retry core converts that failure
    /// into a transparent promotion.
    pub fn raw_write(&self, db: &Arc<Database>) -> CoreResult<Arc<dyn BackendTransaction>> {
        if self.read_only {
            return Err(CoreError::WriteToReadOnlyContext);
        }
        self.raw_read(db)
    }

    pub(crate) fn raw_handle(&self) -> Option<Arc<dyn BackendTransaction>> {
        self.binding.lock().raw.clone()
    }

    /// Pins the read version used when the backend handle is created.
    pub fn set_read_version(&self, version: u64) {
        self.binding.lock().read_version = Some(version);
    }

    /// The version assigned by a successful commit.
    pub fn get_committed_version(&self) -> CoreResult<u64> {
        let raw = self
            .raw_handle()
            .ok_or(CoreError::VersionstampUnavailable)?;
        Ok(raw.get_committed_version()?)
    }

    //
    // Hooks
    //

    /// Registers a hook that runs in FIFO order right before the backend
    /// commit of the current attempt. Hooks may read, write and register
    /// further hooks; the queue is drained repeatedly until empty.
    pub fn before_commit<F, Fut>(&self, hook: F) -> CoreResult<()>
    where
        F: FnOnce(Context) -> Fut + Send + 'static,
        Fut: Future<Output = CoreResult<()>> + Send + 'static,
    {
        if self.read_only {
            return Err(CoreError::ReadOnlyHooks);
        }
        self.ensure_active()?;
        self.hooks
            .lock()
            .before
            .push(Box::new(move |ctx| Box::pin(hook(ctx))));
        Ok(())
    }

    /// Registers a hook that runs in FIFO order strictly after a
    /// successful commit. Never re-run on retry.
    pub fn after_commit<F, Fut>(&self, hook: F) -> CoreResult<()>
    where
        F: FnOnce(Context) -> Fut + Send + 'static,
        Fut: Future<Output = CoreResult<()>> + Send + 'static,
    {
        if self.read_only {
            return Err(CoreError::ReadOnlyHooks);
        }
        self.ensure_active()?;
        self.hooks
            .lock()
            .after
            .push(Box::new(move |ctx| Box::pin(hook(ctx))));
        Ok(())
    }

    async fn drain_before(&self, ctx: &Context) -> CoreResult<()> {
        loop {
            let pending = std::mem::take(&mut self.hooks.lock().before);
            if pending.is_empty() {
                return Ok(());
            }
            for hook in pending {
                hook(ctx.clone()).await?;
            }
        }
    }

    /// Runs queued before-commit hooks without committing.
    ///
    /// Called at nested-transaction boundaries so composed transactions
    /// observe each other's pending writes.
    pub async fn flush_pending(&self, ctx: &Context) -> CoreResult<()> {
        if self.is_completed() {
            return Ok(());
        }
        self.drain_before(ctx).await
    }

    /// Drains before-commit hooks, commits the backend transaction and
    /// runs after-commit hooks.
    pub(crate) async fn commit(&self, ctx: &Context) -> CoreResult<()> {
        if self.is_completed() {
            return Ok(());
        }

        self.drain_before(ctx).await?;

        let raw = self.raw_handle();
        if let Some(raw) = raw {
            if self.read_only {
                raw.cancel();
            } else {
                raw.commit().await?;
            }
        }
        self.completed.store(true, Ordering::SeqCst);
        trace!(id = self.id, attempt = self.attempt, "transaction committed");

        let after = std::mem::take(&mut self.hooks.lock().after);
        for hook in after {
            hook(ctx.clone()).await?;
        }
        Ok(())
    }

    /// Abandons the transaction, cancelling the backend handle.
    pub(crate) fn cancel(&self) {
        if !self.completed.swap(true, Ordering::SeqCst) {
            if let Some(raw) = self.raw_handle() {
                raw.cancel();
            }
        }
    }

    //
    // User data
    //

    /// Fetches or initializes a keyed user-data slot.
    ///
    /// Slots live exactly as long as this transaction attempt; a retry
    /// starts with an empty map.
    pub fn user_data(
        &self,
        key: &str,
        init: impl FnOnce() -> Arc<dyn Any + Send + Sync>,
    ) -> Arc<dyn Any + Send + Sync> {
        let mut data = self.user_data.lock();
        if let Some(existing) = data.get(key) {
            return Arc::clone(existing);
        }
        let value = init();
        data.insert(key.to_owned(), Arc::clone(&value));
        value
    }

    //
    // Versionstamps
    //

    /// Allocates a deferred versionstamp placeholder.
    ///
    /// The returned reference carries a 2-byte index that is unique
    /// within this attempt. Resolution is only possible after commit.
    pub fn allocate_versionstamp_ref(&self) -> CoreResult<VersionstampRef> {
        if self.read_only {
            return Err(CoreError::WriteToReadOnlyContext);
        }
        self.ensure_active()?;
        let mut vs = self.versionstamps.lock();
        let index = vs.next_index;
        vs.next_index += 1;
        Ok(VersionstampRef::new(index))
    }

    /// Resolves a placeholder into a full versionstamp.
    ///
    /// Errors before commit and on a second resolution of the same
    /// reference.
    pub fn resolve_versionstamp_ref(&self, r: &VersionstampRef) -> CoreResult<Versionstamp> {
        if self.read_only {
            return Err(CoreError::WriteToReadOnlyContext);
        }
        if !self.is_completed() {
            return Err(CoreError::VersionstampUnavailable);
        }
        let index = u16::from_be_bytes(r.index_bytes());
        if !self.versionstamps.lock().resolved.insert(index) {
            return Err(CoreError::VersionstampAlreadyResolved);
        }
        let raw = self
            .raw_handle()
            .ok_or(CoreError::VersionstampUnavailable)?;
        let token = raw.get_versionstamp()?;
        Ok(r.resolve(token))
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("attempt", &self.attempt)
            .field("read_only", &self.read_only)
            .field("hybrid", &self.hybrid)
            .field("completed", &self.is_completed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hooks_rejected_on_read_only() {
        let tx = Transaction::create(1, true, false);
        assert!(matches!(
            tx.before_commit(|_| async { Ok(()) }),
            Err(CoreError::ReadOnlyHooks)
        ));
        assert!(matches!(
            tx.after_commit(|_| async { Ok(()) }),
            Err(CoreError::ReadOnlyHooks)
        ));
    }

    #[test]
    fn versionstamp_refs_rejected_on_read_only() {
        let tx = Transaction::create(1, true, false);
        assert!(matches!(
            tx.allocate_versionstamp_ref(),
            Err(CoreError::WriteToReadOnlyContext)
        ));
    }

    #[test]
    fn versionstamp_indexes_are_sequential() {
        let tx = Transaction::create(1, false, false);
        let a = tx.allocate_versionstamp_ref().unwrap();
        let b = tx.allocate_versionstamp_ref().unwrap();
        assert_eq!(a.index_bytes(), [0, 0]);
        assert_eq!(b.index_bytes(), [0, 1]);
    }

    #[test]
    fn resolve_before_commit_fails() {
        let tx = Transaction::create(1, false, false);
        let r = tx.allocate_versionstamp_ref().unwrap();
        assert!(matches!(
            tx.resolve_versionstamp_ref(&r),
            Err(CoreError::VersionstampUnavailable)
        ));
    }

    #[test]
    fn derive_keeps_id_and_bumps_attempt() {
        let tx = Transaction::create(7, false, false);
        let next = tx.derive(false, false).unwrap();
        assert_eq!(next.id(), 7);
        assert_eq!(next.attempt(), 1);
        assert!(!next.is_completed());
    }

    #[test]
    fn user_data_slots_are_keyed() {
        let tx = Transaction::create(1, false, false);
        let a = tx.user_data("slot", || Arc::new(42u32));
        let b = tx.user_data("slot", || Arc::new(7u32));
        assert!(Arc::ptr_eq(&a, &b));
    }
}
