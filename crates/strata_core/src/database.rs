//! Database handle.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use strata_kv::{Backend, MemoryBackend};

/// A handle to one backing key-value store.
///
/// The database owns the backend connection and allocates transaction
/// identifiers. All state is explicit and instance-owned; opening two
/// databases yields two fully independent engines.
pub struct Database {
    backend: Arc<dyn Backend>,
    next_tx_id: AtomicU64,
}

impl Database {
    /// Wraps an existing backend connection.
    pub fn new(backend: Arc<dyn Backend>) -> Arc<Self> {
        Arc::new(Self {
            backend,
            next_tx_id: AtomicU64::new(1),
        })
    }

    /// Opens a database over a fresh in-memory backend.
    ///
    /// Intended for tests and examples.
    pub fn open_test() -> Arc<Self> {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    /// The backing store.
    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub(crate) fn allocate_tx_id(&self) -> u64 {
        self.next_tx_id.fetch_add(1, Ordering::Relaxed)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("next_tx_id", &self.next_tx_id.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
