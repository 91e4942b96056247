//! In-process cache objects.
//!
//! Each cache is owned by the component that uses it and injected
//! through its constructor. None of them lock internally; owners wrap
//! them in a mutex and keep the read-check-write sequence under one
//! guard.

use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

// ---------------------------------------------------------------------------
// TTL cache
// ---------------------------------------------------------------------------

/// Time-based cache: entries expire `ttl` after insertion and are
/// recomputed by the owner on the next miss.
#[derive(Debug)]
pub struct TtlCache<K, V> {
    entries: HashMap<K, CacheEntry<V>>,
    ttl: Duration,
}

#[derive(Debug)]
struct CacheEntry<V> {
    value: V,
    inserted_at: DateTime<Utc>,
    ttl: Duration,
}

impl<K: Eq + Hash, V: Clone> TtlCache<K, V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
        }
    }

    /// Build from a TTL in seconds (config-friendly).
    pub fn with_ttl_secs(secs: u64) -> Self {
        Self::new(Duration::seconds(secs as i64))
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Fresh value for `key`, if any.
    pub fn get(&self, key: &K) -> Option<V> {
        self.get_at(key, Utc::now())
    }

    /// Fresh value for `key` as seen at `now`.
    pub fn get_at(&self, key: &K, now: DateTime<Utc>) -> Option<V> {
        self.entries.get(key).and_then(|entry| {
            if now - entry.inserted_at < entry.ttl {
                Some(entry.value.clone())
            } else {
                None
            }
        })
    }

    pub fn insert(&mut self, key: K, value: V) {
        let ttl = self.ttl;
        self.insert_with_ttl(key, value, ttl);
    }

    pub fn insert_with_ttl(&mut self, key: K, value: V, ttl: Duration) {
        self.insert_at(key, value, ttl, Utc::now());
    }

    fn insert_at(&mut self, key: K, value: V, ttl: Duration, now: DateTime<Utc>) {
        self.entries.insert(
            key,
            CacheEntry {
                value,
                inserted_at: now,
                ttl,
            },
        );
    }

    /// Remove expired entries.
    pub fn evict_expired(&mut self) {
        let now = Utc::now();
        self.entries.retain(|_, entry| now - entry.inserted_at < entry.ttl);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ---------------------------------------------------------------------------
// FIFO cache
// ---------------------------------------------------------------------------

/// Bounded cache evicting the oldest insertion once at capacity.
///
/// Re-inserting an existing key replaces the value but keeps its
/// original position in the eviction order.
#[derive(Debug)]
pub struct FifoCache<K, V> {
    entries: HashMap<K, V>,
    order: VecDeque<K>,
    capacity: usize,
}

impl<K: Eq + Hash + Clone, V: Clone> FifoCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.entries.get(key).cloned()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Insert, returning the evicted key if the cache was full.
    pub fn insert(&mut self, key: K, value: V) -> Option<K> {
        if self.entries.contains_key(&key) {
            self.entries.insert(key, value);
            return None;
        }

        let evicted = if self.entries.len() >= self.capacity {
            self.order.pop_front().map(|oldest| {
                self.entries.remove(&oldest);
                oldest
            })
        } else {
            None
        };

        self.order.push_back(key.clone());
        self.entries.insert(key, value);
        evicted
    }

    /// Keys from oldest to newest insertion.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.order.iter()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_cache_hit_before_expiry() {
        let mut cache = TtlCache::with_ttl_secs(60);
        cache.insert("regime", 1);
        assert_eq!(cache.get(&"regime"), Some(1));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_ttl_cache_miss_after_expiry() {
        let mut cache: TtlCache<&str, i32> = TtlCache::with_ttl_secs(60);
        cache.insert("regime", 1);
        let later = Utc::now() + Duration::seconds(61);
        assert_eq!(cache.get_at(&"regime", later), None);
    }

    #[test]
    fn test_ttl_cache_zero_ttl_never_hits() {
        let mut cache = TtlCache::new(Duration::zero());
        cache.insert(1, "x");
        assert_eq!(cache.get(&1), None);
        cache.evict_expired();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_ttl_cache_per_entry_ttl() {
        let mut cache = TtlCache::with_ttl_secs(1);
        cache.insert_with_ttl("long", 2, Duration::hours(1));
        let later = Utc::now() + Duration::minutes(5);
        assert_eq!(cache.get_at(&"long", later), Some(2));
    }

    #[test]
    fn test_ttl_cache_clear() {
        let mut cache = TtlCache::with_ttl_secs(60);
        cache.insert("a", 1);
        cache.insert("b", 2);
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.get(&"a"), None);
    }

    #[test]
    fn test_fifo_evicts_first_of_eleven() {
        let mut cache = FifoCache::new(10);
        let mut evicted = Vec::new();
        for i in 0..11 {
            if let Some(k) = cache.insert(format!("model-{i}"), i) {
                evicted.push(k);
            }
        }
        assert_eq!(cache.len(), 10);
        assert_eq!(evicted, vec!["model-0".to_string()]);
        assert!(!cache.contains(&"model-0".to_string()));
        for i in 1..11 {
            assert_eq!(cache.get(&format!("model-{i}")), Some(i));
        }
    }

    #[test]
    fn test_fifo_reinsert_keeps_position() {
        let mut cache = FifoCache::new(2);
        cache.insert("a", 1);
        cache.insert("b", 2);
        assert_eq!(cache.insert("a", 10), None);
        assert_eq!(cache.get(&"a"), Some(10));
        // "a" is still the oldest insertion.
        assert_eq!(cache.insert("c", 3), Some("a"));
        let keys: Vec<_> = cache.keys().copied().collect();
        assert_eq!(keys, vec!["b", "c"]);
    }

    #[test]
    fn test_fifo_clear() {
        let mut cache = FifoCache::new(3);
        cache.insert(1, 1);
        cache.insert(2, 2);
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.keys().count(), 0);
    }

    #[test]
    fn test_fifo_zero_capacity_is_one() {
        let mut cache = FifoCache::new(0);
        assert_eq!(cache.capacity(), 1);
        cache.insert(1, "a");
        assert_eq!(cache.insert(2, "b"), Some(1));
    }
}
