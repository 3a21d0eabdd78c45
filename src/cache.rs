//! Generic TTL + size-bounded cache with LRU-by-access-count eviction.
//!
//! Shared shape used by both the discovery cache and the schema cache
//!: insertion records an expiry, reads bump an access counter,
//! and eviction under pressure removes the entry with the lowest access
//! count, breaking ties by oldest insertion.

use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::time_provider::SharedTimeProvider;

struct Entry<V> {
    value: V,
    inserted_at: SystemTime,
    expires_at: SystemTime,
    access_count: AtomicU64,
}

impl<V: Clone> Entry<V> {
    fn is_expired(&self, now: SystemTime) -> bool {
        now > self.expires_at
    }
}

/// A generic TTL-bound, size-bound cache with LRU-by-access eviction.
pub struct Cache<K, V> {
    entries: DashMap<K, Entry<V>>,
    max_size: usize,
    default_ttl: Duration,
    time: SharedTimeProvider,
    inflight: Mutex<()>,
}

impl<K, V> fmt::Debug for Cache<K, V>
where
    K: Eq + Hash,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("len", &self.entries.len())
            .field("max_size", &self.max_size)
            .finish()
    }
}

impl<K, V> Cache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Creates a new cache bound by `max_size` entries and a `default_ttl`
    /// applied when `set` is called with `ttl == None`.
    #[must_use]
    pub fn new(max_size: usize, default_ttl: Duration, time: SharedTimeProvider) -> Self {
        Self {
            entries: DashMap::new(),
            max_size,
            default_ttl,
            time,
            inflight: Mutex::new(()),
        }
    }

    /// Reads a value, bumping its access counter. Returns `None` on miss or
    /// expiry (an expired entry is removed lazily).
    #[must_use]
    pub fn get(&self, key: &K) -> Option<V> {
        let now = self.time.now();
        if let Some(entry) = self.entries.get(key) {
            if entry.is_expired(now) {
                drop(entry);
                self.entries.remove(key);
                return None;
            }
            entry.access_count.fetch_add(1, Ordering::Relaxed);
            return Some(entry.value.clone());
        }
        None
    }

    /// Inserts or overwrites a value. `ttl == None` uses the configured
    /// default. Evicts the lowest-access entry first if the cache would
    /// exceed `max_size`.
    pub fn set(&self, key: K, value: V, ttl: Option<Duration>) {
        let now = self.time.now();
        let ttl = ttl.unwrap_or(self.default_ttl);
        if !self.entries.contains_key(&key) && self.entries.len() >= self.max_size {
            self.evict_one();
        }
        self.entries.insert(
            key,
            Entry {
                value,
                inserted_at: now,
                expires_at: now + ttl,
                access_count: AtomicU64::new(0),
            },
        );
    }

    /// Removes a single entry, if present.
    pub fn invalidate(&self, key: &K) {
        self.entries.remove(key);
    }

    /// Removes all entries.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Current number of (possibly expired) entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict_one(&self) {
        let mut victim: Option<(K, u64, SystemTime)> = None;
        for item in &self.entries {
            let count = item.access_count.load(Ordering::Relaxed);
            let inserted_at = item.inserted_at;
            let is_worse = match &victim {
                None => true,
                Some((_, vc, vt)) => count < *vc || (count == *vc && inserted_at < *vt),
            };
            if is_worse {
                victim = Some((item.key().clone(), count, inserted_at));
            }
        }
        if let Some((key, _, _)) = victim {
            self.entries.remove(&key);
        }
    }

    /// Removes every entry whose expiry has passed. Intended to be driven
    /// by a periodic background task at a configured cleanup interval.
    pub fn sweep_expired(&self) {
        let now = self.time.now();
        self.entries.retain(|_, entry| !entry.is_expired(now));
    }

    /// Guards a miss-then-populate sequence so concurrent misses for the
    /// same logical resource coalesce into a single caller doing the work
    /// (single-flight). Callers should acquire this guard, re-check `get`,
    /// and only do the expensive fetch if still missing.
    pub async fn single_flight_guard(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.inflight.lock().await
    }
}

/// Spawns a background task that periodically sweeps expired entries from
/// `cache` until `cache` is dropped (detected via the weak `Arc`).
pub fn spawn_cleanup_task<K, V>(cache: Arc<Cache<K, V>>, interval: Duration) -> tokio::task::JoinHandle<()>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    let weak = Arc::downgrade(&cache);
    drop(cache);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            match weak.upgrade() {
                Some(cache) => cache.sweep_expired(),
                None => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time_provider::test_time_provider;

    #[test]
    fn set_then_get_within_ttl_returns_value() {
        let cache = Cache::new(10, Duration::from_secs(60), test_time_provider());
        cache.set("a", 1, None);
        assert_eq!(cache.get(&"a"), Some(1));
    }

    #[test]
    fn eviction_removes_lowest_access_count() {
        let cache = Cache::new(2, Duration::from_secs(60), test_time_provider());
        cache.set("a", 1, None);
        cache.set("b", 2, None);
        // bump a's access count above b's
        let _ = cache.get(&"a");
        let _ = cache.get(&"a");
        cache.set("c", 3, None);
        assert_eq!(cache.get(&"a"), Some(1));
        assert_eq!(cache.get(&"b"), None);
        assert_eq!(cache.get(&"c"), Some(3));
    }

    #[test]
    fn ties_break_by_oldest_insertion() {
        let cache = Cache::new(2, Duration::from_secs(60), test_time_provider());
        cache.set("a", 1, None);
        cache.set("b", 2, None);
        cache.set("c", 3, None);
        assert_eq!(cache.get(&"a"), None);
        assert_eq!(cache.get(&"b"), Some(2));
    }
}
