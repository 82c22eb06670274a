use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::Result;
use crate::util::lock_unpoisoned;

struct CacheEntry<T> {
    value: T,
    cached_at: Instant,
    ttl: Duration,
}

impl<T> CacheEntry<T> {
    fn is_fresh(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.cached_at) < self.ttl
    }
}

/// Time-boxed values keyed by caller-chosen strings.
///
/// Expired entries are dropped lazily, on the next read of their key.
/// Failed fetches are never stored.
pub struct ResponseCache<T> {
    entries: Mutex<HashMap<String, CacheEntry<T>>>,
}

impl<T> Default for ResponseCache<T> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<T> ResponseCache<T>
where
    T: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<T> {
        let now = Instant::now();
        let mut entries = lock_unpoisoned(&self.entries);
        match entries.get(key) {
            Some(entry) if entry.is_fresh(now) => Some(entry.value.clone()),
            Some(_) => {
                debug!(key, "cache entry expired");
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, key: impl Into<String>, value: T, ttl: Duration) {
        lock_unpoisoned(&self.entries).insert(
            key.into(),
            CacheEntry {
                value,
                cached_at: Instant::now(),
                ttl,
            },
        );
    }

    /// Returns the cached value while it is younger than its TTL, otherwise
    /// runs `fetcher` and caches a successful result under a fresh timestamp.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        key: impl Into<String>,
        ttl: Duration,
        fetcher: F,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let key = key.into();
        if let Some(value) = self.get(&key) {
            debug!(key = %key, "cache hit");
            return Ok(value);
        }

        debug!(key = %key, "cache miss");
        let value = fetcher().await?;
        self.insert(key, value.clone(), ttl);
        Ok(value)
    }

    pub fn invalidate(&self, key: &str) -> bool {
        lock_unpoisoned(&self.entries).remove(key).is_some()
    }

    pub fn clear(&self) {
        lock_unpoisoned(&self.entries).clear();
    }

    /// Stored entries, expired ones not yet evicted included.
    pub fn len(&self) -> usize {
        lock_unpoisoned(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::error::Error;

    async fn fetch_counted(cache: &ResponseCache<usize>, calls: &AtomicUsize) -> usize {
        cache
            .get_or_fetch("users", Duration::from_millis(1000), || async {
                Ok(calls.fetch_add(1, Ordering::SeqCst) + 1)
            })
            .await
            .expect("fetch should succeed")
    }

    #[tokio::test(start_paused = true)]
    async fn value_is_reused_until_ttl_elapses() {
        let cache = ResponseCache::new();
        let calls = AtomicUsize::new(0);

        assert_eq!(fetch_counted(&cache, &calls).await, 1);
        tokio::time::advance(Duration::from_millis(999)).await;
        assert_eq!(fetch_counted(&cache, &calls).await, 1);
        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(fetch_counted(&cache, &calls).await, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let cache = ResponseCache::<usize>::new();
        let error = cache
            .get_or_fetch("k", Duration::from_secs(60), || async {
                Err(Error::interceptor("down"))
            })
            .await
            .expect_err("failure propagates");
        assert!(matches!(error, Error::Interceptor { .. }));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn invalidate_and_clear_drop_entries() {
        let cache = ResponseCache::new();
        cache.insert("a", 1, Duration::from_secs(60));
        cache.insert("b", 2, Duration::from_secs(60));

        assert!(cache.invalidate("a"));
        assert!(!cache.invalidate("a"));
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b"), Some(2));

        cache.clear();
        assert!(cache.is_empty());
    }
}
