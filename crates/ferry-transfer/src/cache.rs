//! Local status cache.
//!
//! The receive loop stores file status reports here, keyed by the
//! announced file hash. The tracker purges stale entries on every sweep.

use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Key/value cache for peer status reports.
pub trait StatusCache: Send + Sync {
    /// Returns the value stored under `key`.
    fn get(&self, key: &str) -> Option<Vec<u8>>;

    /// Stores `value` under `key`, replacing any previous value.
    fn put(&self, key: &str, value: Vec<u8>);

    /// Removes entries stored at least `age` ago and returns how many.
    fn purge_older_than(&self, age: Duration) -> usize;
}

struct Entry {
    value: Vec<u8>,
    stored_at: Instant,
}

/// In-memory LRU implementation of [`StatusCache`].
pub struct MemoryCache {
    entries: Mutex<LruCache<String, Entry>>,
    evictions: AtomicU64,
}

impl MemoryCache {
    /// Creates a cache holding at most `max_entries` reports.
    pub fn new(max_entries: usize) -> Self {
        let max_entries = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(max_entries)),
            evictions: AtomicU64::new(0),
        }
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Number of entries pushed out by capacity pressure.
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(10_000)
    }
}

impl StatusCache for MemoryCache {
    fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.entries.lock().get(key).map(|e| e.value.clone())
    }

    fn put(&self, key: &str, value: Vec<u8>) {
        let entry = Entry {
            value,
            stored_at: Instant::now(),
        };
        let mut entries = self.entries.lock();
        if let Some((evicted, _)) = entries.push(key.to_string(), entry) {
            if evicted != key {
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn purge_older_than(&self, age: Duration) -> usize {
        let mut entries = self.entries.lock();
        let stale: Vec<String> = entries
            .iter()
            .filter(|(_, e)| e.stored_at.elapsed() >= age)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &stale {
            entries.pop(key);
        }
        stale.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get() {
        let cache = MemoryCache::new(4);
        assert!(cache.get("a").is_none());
        cache.put("a", b"report".to_vec());
        assert_eq!(cache.get("a").unwrap(), b"report");

        cache.put("a", b"newer".to_vec());
        assert_eq!(cache.get("a").unwrap(), b"newer");
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.evictions(), 0);
    }

    #[test]
    fn test_capacity_evicts_least_recent() {
        let cache = MemoryCache::new(2);
        cache.put("a", vec![1]);
        cache.put("b", vec![2]);
        cache.get("a");
        cache.put("c", vec![3]);

        assert!(cache.get("b").is_none());
        assert!(cache.get("a").is_some());
        assert_eq!(cache.evictions(), 1);
    }

    #[test]
    fn test_purge_by_age() {
        let cache = MemoryCache::new(8);
        cache.put("a", vec![1]);
        cache.put("b", vec![2]);

        assert_eq!(cache.purge_older_than(Duration::from_secs(3600)), 0);
        assert_eq!(cache.len(), 2);

        assert_eq!(cache.purge_older_than(Duration::ZERO), 2);
        assert!(cache.is_empty());
    }
}
