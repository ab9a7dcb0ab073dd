//! A simple async-aware mutual exclusion primitive.

use parking_lot::Mutex as PlMutex;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::oneshot;

struct State {
    locked: bool,
    waiters: VecDeque<oneshot::Sender<()>>,
}

/// An async mutex without an owned value.
///
/// Unlike a data-carrying mutex this guards a critical section, not a
/// datum; callers acquire it around arbitrary async work. Waiters are
/// woken in arrival order.
pub struct Mutex {
    state: Arc<PlMutex<State>>,
}

impl Mutex {
    /// Creates an unlocked mutex.
    pub fn new() -> Self {
        Self {
            state: Arc::new(PlMutex::new(State {
                locked: false,
                waiters: VecDeque::new(),
            })),
        }
    }

    /// Returns true if the mutex is currently held.
    pub fn is_locked(&self) -> bool {
        self.state.lock().locked
    }

    /// Acquires the mutex, waiting if it is held.
    pub async fn acquire(&self) -> MutexGuard {
        loop {
            let rx = {
                let mut st = self.state.lock();
                if !st.locked {
                    st.locked = true;
                    return MutexGuard {
                        state: Arc::clone(&self.state),
                    };
                }
                let (tx, rx) = oneshot::channel();
                st.waiters.push_back(tx);
                rx
            };
            // A dropped sender means the holder released without handing
            // off; loop and retry.
            let _ = rx.await;
        }
    }

    /// Runs a closure while holding the mutex.
    pub async fn run_exclusive<T, F, Fut>(&self, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _guard = self.acquire().await;
        f().await
    }
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Mutex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mutex")
            .field("locked", &self.is_locked())
            .finish()
    }
}

/// Releases the owning [`Mutex`] on drop.
pub struct MutexGuard {
    state: Arc<PlMutex<State>>,
}

impl Drop for MutexGuard {
    fn drop(&mut self) {
        let mut st = self.state.lock();
        st.locked = false;
        while let Some(tx) = st.waiters.pop_front() {
            // Wake the first waiter that is still listening.
            if tx.send(()).is_ok() {
                break;
            }
        }
    }
}
