//! Serializes async critical sections per key.
//!
//! Every key maps to its own `tokio::sync::Mutex`, so sections for the same key
//! run one at a time while different keys proceed in parallel. The guard may be
//! held across `.await`.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

#[derive(Clone)]
pub struct AsyncTransaction<K: Eq + Hash + Clone> {
    locks: Arc<RwLock<HashMap<K, Arc<Mutex<()>>>>>,
}

impl<K: Eq + Hash + Clone> Default for AsyncTransaction<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash + Clone> AsyncTransaction<K> {
    pub fn new() -> Self {
        Self {
            locks: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    async fn lock_for(&self, key: &K) -> Arc<Mutex<()>> {
        if let Some(lock) = self.locks.read().await.get(key) {
            return lock.clone();
        }

        self.locks
            .write()
            .await
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Run `f` with exclusive access for `key`
    pub async fn run<F, Fut, T>(&self, key: K, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let lock = self.lock_for(&key).await;
        let _guard = lock.lock().await;
        f().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn peak_concurrency(exe: AsyncTransaction<&'static str>, keys: Vec<&'static str>) -> usize {
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..10 {
            for key in keys.clone() {
                let exe = exe.clone();
                let current = current.clone();
                let peak = peak.clone();
                handles.push(tokio::spawn(async move {
                    exe.run(key, || async move {
                        let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
                        current.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await;
                }));
            }
        }

        futures::future::join_all(handles).await;
        peak.load(Ordering::SeqCst)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn same_key_is_serialized() {
        assert_eq!(peak_concurrency(AsyncTransaction::new(), vec!["agg"]).await, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn distinct_keys_overlap() {
        let peak =
            peak_concurrency(AsyncTransaction::new(), vec!["agg_1", "agg_2", "agg_3"]).await;
        assert!(peak > 1 && peak <= 3);
    }
}
