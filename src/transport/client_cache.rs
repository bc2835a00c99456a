use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::OnceCell;

/// A generic single-flight cache keyed by `K`: concurrent misses for the
/// same key coalesce into one factory invocation, the rest await its
/// result. Eviction is by key only — no implicit TTL, matching spec §5
/// ("Streaming vs non-streaming requests bucket into distinct keys").
pub struct ClientCache<K, V> {
    entries: Mutex<HashMap<K, Arc<OnceCell<V>>>>,
}

impl<K, V> ClientCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    #[must_use]
    pub fn new() -> Self {
        Self { entries: Mutex::new(HashMap::new()) }
    }

    /// Returns the cached value for `key`, building it via `factory` on
    /// first access. Concurrent callers for the same key share one
    /// in-flight build.
    pub async fn get_or_init<F, Fut>(&self, key: K, factory: F) -> V
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = V>,
    {
        let cell = {
            let mut entries = self.entries.lock();
            Arc::clone(entries.entry(key).or_insert_with(|| Arc::new(OnceCell::new())))
        };
        cell.get_or_init(factory).await.clone()
    }

    pub fn remove(&self, key: &K) {
        self.entries.lock().remove(key);
    }
}

impl<K, V> Default for ClientCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn concurrent_misses_coalesce_into_one_build() {
        let cache: ClientCache<u64, Arc<str>> = ClientCache::new();
        let builds = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = &cache;
            let builds = Arc::clone(&builds);
            handles.push(async move {
                cache
                    .get_or_init(1, || async move {
                        builds.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                        Arc::<str>::from("built")
                    })
                    .await
            });
        }
        let results = futures_util::future::join_all(handles).await;
        assert!(results.iter().all(|r| r.as_ref() == "built"));
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn distinct_keys_build_independently() {
        let cache: ClientCache<(u64, bool), u64> = ClientCache::new();
        let a = cache.get_or_init((1, false), || async { 10 }).await;
        let b = cache.get_or_init((1, true), || async { 20 }).await;
        assert_eq!(a, 10);
        assert_eq!(b, 20);
    }
}
