use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use castellan_types::Embedding;
use sha2::{Digest, Sha256};

/// Default maximum number of cached entries.
pub const DEFAULT_CAPACITY: usize = 50_000;
/// Default time-to-live for a cached entry.
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Hit/miss counters for an [`EmbeddingCache`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    /// Number of lookups that found a live entry.
    pub hits: u64,
    /// Number of lookups that found nothing or an expired entry.
    pub misses: u64,
}

struct Entry {
    value: Embedding,
    inserted_at: Instant,
}

struct Inner {
    entries: HashMap<String, Entry>,
    order: VecDeque<String>,
    capacity: usize,
    ttl: Duration,
}

/// Content-addressed cache keyed by `(provider, model, sha256(text))`, with
/// an LRU bound (default [`DEFAULT_CAPACITY`]) and a TTL (default
/// [`DEFAULT_TTL`]). Hit/miss statistics are exposed via [`CacheStats`].
///
/// Persistence to disk for warm restart is optional and left to callers
/// (e.g. serialize [`EmbeddingCache::snapshot`] to a file); the cache itself
/// only holds the in-memory structure.
pub struct EmbeddingCache {
    inner: Mutex<Inner>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl EmbeddingCache {
    /// Construct a cache with the given `capacity` and `ttl`.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                order: VecDeque::new(),
                capacity: capacity.max(1),
                ttl,
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Derive the content-addressed key for `(provider, model, text)`.
    pub fn key(&self, provider: &str, model: &str, text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        let digest = hex::encode(hasher.finalize());
        format!("{provider}\0{model}\0{digest}")
    }

    /// Look up `key`, returning `None` on a miss or an expired entry.
    pub fn get(&self, key: &str) -> Option<Embedding> {
        let mut inner = self.inner.lock().unwrap();
        let expired = inner
            .entries
            .get(key)
            .map(|e| e.inserted_at.elapsed() > inner.ttl)
            .unwrap_or(false);
        if expired {
            inner.entries.remove(key);
        }
        let found = inner.entries.get(key).map(|e| e.value.clone());
        drop(inner);

        if found.is_some() {
            self.touch(key);
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        found
    }

    /// Insert `value` for `key`, evicting the least-recently-used entry if
    /// at capacity.
    pub fn put(&self, key: String, value: Embedding) {
        let mut inner = self.inner.lock().unwrap();
        if inner.entries.contains_key(&key) {
            inner.order.retain(|k| k != &key);
        } else if inner.entries.len() >= inner.capacity {
            if let Some(oldest) = inner.order.pop_front() {
                inner.entries.remove(&oldest);
            }
        }
        inner.entries.insert(
            key.clone(),
            Entry {
                value,
                inserted_at: Instant::now(),
            },
        );
        inner.order.push_back(key);
    }

    fn touch(&self, key: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.order.retain(|k| k != key);
        inner.order.push_back(key.to_string());
    }

    /// Current hit/miss counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

impl Default for EmbeddingCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_after_put() {
        let cache = EmbeddingCache::default();
        let key = cache.key("local-model-server", "llama3", "hello");
        assert!(cache.get(&key).is_none());
        cache.put(key.clone(), vec![0.1, 0.2]);
        assert_eq!(cache.get(&key), Some(vec![0.1, 0.2]));
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn evicts_least_recently_used_at_capacity() {
        let cache = EmbeddingCache::new(2, DEFAULT_TTL);
        cache.put("a".into(), vec![1.0]);
        cache.put("b".into(), vec![2.0]);
        cache.get("a"); // touch a, making b the LRU
        cache.put("c".into(), vec![3.0]);
        assert!(cache.get("b").is_none());
        assert!(cache.get("a").is_some());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn expired_entry_is_a_miss() {
        let cache = EmbeddingCache::new(10, Duration::from_millis(1));
        cache.put("k".into(), vec![1.0]);
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get("k").is_none());
    }
}
