//! ABOUTME: In-memory read-through cache for frequently accessed database rows
//! ABOUTME: LRU eviction with TTL, driven explicitly by get_or_compute, put and evict

use linked_hash_map::LinkedHashMap;
use std::collections::HashMap;
use std::future::Future;
use std::sync::RwLock;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Cache entry with TTL support
#[derive(Debug, Clone)]
struct CacheEntry<T> {
    value: T,
    expires_at: Instant,
}

impl<T> CacheEntry<T> {
    fn new(value: T, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() > self.expires_at
    }
}

/// LRU bookkeeping, always accessed under the outer lock
#[derive(Debug)]
struct LruCache<T: Clone> {
    data: HashMap<String, CacheEntry<T>>,
    access_order: LinkedHashMap<String, ()>,
    max_size: usize,
    ttl: Duration,
    /// Bumped by every write or eviction so read-through fills can detect them
    generation: u64,
}

impl<T: Clone> LruCache<T> {
    fn new(max_size: usize, ttl: Duration) -> Self {
        Self {
            data: HashMap::new(),
            access_order: LinkedHashMap::new(),
            max_size: max_size.max(1),
            ttl,
            generation: 0,
        }
    }

    fn get(&mut self, key: &str) -> Option<T> {
        if let Some(entry) = self.data.get(key) {
            if !entry.is_expired() {
                // Move to back (most recently used)
                self.access_order.remove(key);
                self.access_order.insert(key.to_string(), ());
                return Some(entry.value.clone());
            }
            self.data.remove(key);
            self.access_order.remove(key);
            debug!("Cache entry expired for key: {}", key);
        }
        None
    }

    fn put(&mut self, key: String, value: T) {
        self.generation += 1;
        self.insert(key, value);
    }

    fn insert(&mut self, key: String, value: T) {
        if self.data.remove(&key).is_some() {
            self.access_order.remove(&key);
        }

        while self.data.len() >= self.max_size {
            match self.access_order.pop_front() {
                Some((lru_key, _)) => {
                    self.data.remove(&lru_key);
                    debug!("Evicted LRU key: {}", lru_key);
                }
                None => break,
            }
        }

        self.data.insert(key.clone(), CacheEntry::new(value, self.ttl));
        self.access_order.insert(key, ());
    }

    fn invalidate(&mut self, key: &str) -> bool {
        self.generation += 1;
        if self.data.remove(key).is_some() {
            self.access_order.remove(key);
            return true;
        }
        false
    }

    fn clear(&mut self) {
        self.data.clear();
        self.access_order.clear();
    }

    fn size(&self) -> usize {
        self.data.len()
    }
}

/// Named, thread-safe read-through cache.
///
/// Lock poisoning degrades to a cache miss; the cache never fails a request.
#[derive(Debug)]
pub struct Cache<T: Clone> {
    name: &'static str,
    inner: RwLock<LruCache<T>>,
}

impl<T: Clone> Cache<T> {
    pub fn new(name: &'static str, max_entries: usize, ttl: Duration) -> Self {
        Self {
            name,
            inner: RwLock::new(LruCache::new(max_entries, ttl)),
        }
    }

    /// Look up a live entry
    pub fn get(&self, key: &str) -> Option<T> {
        match self.inner.write() {
            Ok(mut cache) => {
                let hit = cache.get(key);
                debug!(cache = self.name, key, hit = hit.is_some(), "Cache lookup");
                hit
            }
            Err(e) => {
                warn!(cache = self.name, "Failed to acquire cache lock: {}", e);
                None
            }
        }
    }

    /// Insert or replace an entry
    pub fn put(&self, key: impl Into<String>, value: T) {
        match self.inner.write() {
            Ok(mut cache) => cache.put(key.into(), value),
            Err(e) => warn!(cache = self.name, "Failed to acquire cache lock for put: {}", e),
        }
    }

    /// Drop an entry; returns whether it was present
    pub fn evict(&self, key: &str) -> bool {
        match self.inner.write() {
            Ok(mut cache) => {
                let removed = cache.invalidate(key);
                debug!(cache = self.name, key, removed, "Cache evict");
                removed
            }
            Err(e) => {
                warn!(cache = self.name, "Failed to acquire cache lock for evict: {}", e);
                false
            }
        }
    }

    /// Return the cached value or run `compute` and cache a `Some` result.
    ///
    /// The lock is not held while `compute` runs. Misses (`None`) and errors
    /// are not cached, and neither is a result computed while a `put` or
    /// `evict` happened, since it may predate that write.
    pub async fn get_or_compute<F, Fut, E>(&self, key: &str, compute: F) -> Result<Option<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
    {
        if let Some(value) = self.get(key) {
            return Ok(Some(value));
        }

        let started = self.generation();
        let computed = compute().await?;
        if let (Some(value), Some(started)) = (computed.as_ref(), started) {
            self.fill(key, value.clone(), started);
        }
        Ok(computed)
    }

    fn generation(&self) -> Option<u64> {
        self.inner.read().ok().map(|cache| cache.generation)
    }

    /// Insert a read-through result unless a write or eviction raced it
    fn fill(&self, key: &str, value: T, started: u64) {
        match self.inner.write() {
            Ok(mut cache) => {
                if cache.generation == started {
                    cache.insert(key.to_string(), value);
                } else {
                    debug!(cache = self.name, key, "Skipped stale read-through fill");
                }
            }
            Err(e) => warn!(cache = self.name, "Failed to acquire cache lock for fill: {}", e),
        }
    }

    pub fn clear(&self) {
        if let Ok(mut cache) = self.inner.write() {
            cache.clear();
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            name: self.name,
            entries: self.inner.read().map(|c| c.size()).unwrap_or(0),
        }
    }
}

/// Cache statistics for monitoring
#[derive(Debug, Clone)]
pub struct CacheStats {
    pub name: &'static str,
    pub entries: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn lru_eviction_order() {
        let mut cache = LruCache::new(3, Duration::from_secs(60));
        cache.put("a".to_string(), 1);
        cache.put("b".to_string(), 2);
        cache.put("c".to_string(), 3);

        // Access 'a' to refresh its position
        assert_eq!(cache.get("a"), Some(1));

        // Adding a fourth entry should evict 'b'
        cache.put("d".to_string(), 4);

        assert!(cache.get("b").is_none());
        assert_eq!(cache.get("a"), Some(1));
        assert_eq!(cache.get("c"), Some(3));
        assert_eq!(cache.get("d"), Some(4));
    }

    #[test]
    fn expired_entries_are_misses() {
        let cache = Cache::new("test", 10, Duration::from_millis(0));
        cache.put("k", 1);
        std::thread::sleep(Duration::from_millis(2));
        assert_eq!(cache.get("k"), None);
        assert_eq!(cache.stats().entries, 0);
    }

    #[test]
    fn evict_is_idempotent() {
        let cache = Cache::new("test", 10, Duration::from_secs(60));
        cache.put("k", 1);
        assert!(cache.evict("k"));
        assert!(!cache.evict("k"));
        assert_eq!(cache.get("k"), None);
    }

    #[tokio::test]
    async fn get_or_compute_reads_through_once() {
        let cache = Cache::new("test", 10, Duration::from_secs(60));
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let value: Result<Option<u32>, ()> = cache
                .get_or_compute("k", || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(Some(7))
                })
                .await;
            assert_eq!(value, Ok(Some(7)));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn get_or_compute_does_not_cache_misses_or_errors() {
        let cache: Cache<u32> = Cache::new("test", 10, Duration::from_secs(60));

        let miss: Result<Option<u32>, ()> = cache.get_or_compute("k", || async { Ok(None) }).await;
        assert_eq!(miss, Ok(None));

        let err: Result<Option<u32>, &str> =
            cache.get_or_compute("k", || async { Err("db down") }).await;
        assert_eq!(err, Err("db down"));

        assert_eq!(cache.stats().entries, 0);
    }

    #[tokio::test]
    async fn fill_racing_an_eviction_is_discarded() {
        let cache = Cache::new("test", 10, Duration::from_secs(60));

        // A writer evicts the key while the read is still loading the old row
        let stale: Result<Option<u32>, ()> = cache
            .get_or_compute("k", || async {
                cache.evict("k");
                Ok(Some(1))
            })
            .await;
        assert_eq!(stale, Ok(Some(1)));
        assert_eq!(cache.get("k"), None);

        // An undisturbed read fills as usual
        let fresh: Result<Option<u32>, ()> =
            cache.get_or_compute("k", || async { Ok(Some(2)) }).await;
        assert_eq!(fresh, Ok(Some(2)));
        assert_eq!(cache.get("k"), Some(2));
    }
}
