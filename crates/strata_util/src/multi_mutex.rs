//! Multi-key mutual exclusion.

use parking_lot::Mutex as PlMutex;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::oneshot;

struct Waiter {
    keys: Vec<String>,
    tx: oneshot::Sender<()>,
}

struct State {
    locked: HashSet<String>,
    queue: Vec<Waiter>,
}

impl State {
    fn is_locked(&self, keys: &[String]) -> bool {
        if keys.is_empty() || self.locked.is_empty() {
            return false;
        }
        keys.iter().any(|k| self.locked.contains(k))
    }
}

/// A lock over sets of string keys.
///
/// A set of keys is acquired as one unit: either every requested key is
/// free and all of them are locked together, or the caller waits until
/// they are all simultaneously free. There is no partial acquisition, so
/// two callers whose key sets overlap can never interleave.
pub struct MultiMutex {
    state: Arc<PlMutex<State>>,
}

impl MultiMutex {
    /// Creates an empty lock table.
    pub fn new() -> Self {
        Self {
            state: Arc::new(PlMutex::new(State {
                locked: HashSet::new(),
                queue: Vec::new(),
            })),
        }
    }

    /// Returns true if any of the given keys is currently held.
    pub fn is_locked(&self, keys: &[String]) -> bool {
        self.state.lock().is_locked(keys)
    }

    /// Acquires every key in the set, waiting until all are free at once.
    ///
    /// Duplicate keys in the input are collapsed. The returned guard
    /// releases the whole set on drop.
    pub async fn acquire(&self, keys: &[String]) -> MultiMutexGuard {
        let mut keys: Vec<String> = keys.to_vec();
        keys.sort();
        keys.dedup();

        loop {
            let rx = {
                let mut st = self.state.lock();
                if !st.is_locked(&keys) {
                    for k in &keys {
                        st.locked.insert(k.clone());
                    }
                    return MultiMutexGuard {
                        state: Arc::clone(&self.state),
                        keys,
                    };
                }
                let (tx, rx) = oneshot::channel();
                st.queue.push(Waiter {
                    keys: keys.clone(),
                    tx,
                });
                rx
            };
            let _ = rx.await;
        }
    }

    /// Runs a closure while holding the whole key set.
    pub async fn run_exclusive<T, F, Fut>(&self, keys: &[String], f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _guard = self.acquire(keys).await;
        f().await
    }
}

impl Default for MultiMutex {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MultiMutex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let st = self.state.lock();
        f.debug_struct("MultiMutex")
            .field("locked", &st.locked.len())
            .field("queued", &st.queue.len())
            .finish()
    }
}

/// Releases the owning key set on drop and wakes an unblocked waiter.
pub struct MultiMutexGuard {
    state: Arc<PlMutex<State>>,
    keys: Vec<String>,
}

impl Drop for MultiMutexGuard {
    fn drop(&mut self) {
        let mut st = self.state.lock();
        for k in &self.keys {
            st.locked.remove(k);
        }
        // Wake the first queued waiter whose full key set is now free;
        // it re-checks under the lock before taking ownership. A waiter
        // that went away is skipped in favor of the next eligible one.
        loop {
            let pos = {
                let st = &*st;
                st.queue.iter().position(|w| !st.is_locked(&w.keys))
            };
            let Some(pos) = pos else { break };
            let waiter = st.queue.remove(pos);
            if waiter.tx.send(()).is_ok() {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn keys(src: &[&str]) -> Vec<String> {
        src.iter().map(|s| (*s).to_owned()).collect()
    }

    #[tokio::test]
    async fn acquires_disjoint_sets_concurrently() {
        let m = MultiMutex::new();
        let a = m.acquire(&keys(&["a", "b"])).await;
        let b = m.acquire(&keys(&["c"])).await;
        assert!(m.is_locked(&keys(&["a"])));
        assert!(m.is_locked(&keys(&["c"])));
        drop(a);
        drop(b);
        assert!(!m.is_locked(&keys(&["a", "b", "c"])));
    }

    #[tokio::test]
    async fn overlapping_sets_wait() {
        let m = Arc::new(MultiMutex::new());
        let guard = m.acquire(&keys(&["a", "b"])).await;

        let m2 = Arc::clone(&m);
        let entered = Arc::new(AtomicUsize::new(0));
        let entered2 = Arc::clone(&entered);
        let waiter = tokio::spawn(async move {
            let _g = m2.acquire(&keys(&["b", "c"])).await;
            entered2.store(1, Ordering::SeqCst);
        });

        tokio::task::yield_now().await;
        assert_eq!(entered.load(Ordering::SeqCst), 0);

        drop(guard);
        waiter.await.unwrap();
        assert_eq!(entered.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn no_partial_acquisition() {
        let m = Arc::new(MultiMutex::new());
        let guard = m.acquire(&keys(&["b"])).await;

        // Waits on the full set even though "a" is free.
        let m2 = Arc::clone(&m);
        let waiter = tokio::spawn(async move {
            let _g = m2.acquire(&keys(&["a", "b"])).await;
        });
        tokio::task::yield_now().await;
        // "a" must not be held while the waiter is blocked on "b".
        assert!(!m.is_locked(&keys(&["a"])));

        drop(guard);
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn duplicate_keys_collapse() {
        let m = MultiMutex::new();
        let g = m.acquire(&keys(&["a", "a", "a"])).await;
        assert!(m.is_locked(&keys(&["a"])));
        drop(g);
        assert!(!m.is_locked(&keys(&["a"])));
    }

    #[tokio::test]
    async fn empty_key_set_never_blocks() {
        let m = MultiMutex::new();
        let _g1 = m.acquire(&[]).await;
        let _g2 = m.acquire(&[]).await;
    }

    #[tokio::test]
    async fn run_exclusive_serializes_overlaps() {
        let m = Arc::new(MultiMutex::new());
        let running = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for i in 0..6 {
            let m = Arc::clone(&m);
            let running = Arc::clone(&running);
            let max_seen = Arc::clone(&max_seen);
            handles.push(tokio::spawn(async move {
                let set = if i % 2 == 0 {
                    keys(&["shared", "even"])
                } else {
                    keys(&["shared", "odd"])
                };
                m.run_exclusive(&set, || async {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    tokio::task::yield_now().await;
                    running.fetch_sub(1, Ordering::SeqCst);
                })
                .await;
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }
}
