use crate::clock::SharedClock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

pub const DEFAULT_MAX_ENTRIES: usize = 500;
pub const DEFAULT_TARGET_EVICTION_RATIO: f64 = 0.2;

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    expires_at_ms: i64,
    seq: u64,
}

impl<V> CacheEntry<V> {
    fn is_expired_at(&self, now_ms: i64) -> bool {
        now_ms >= self.expires_at_ms
    }
}

struct Inner<V> {
    entries: HashMap<String, CacheEntry<V>>,
    /// Insertion order: seq -> key. Oldest first.
    order: BTreeMap<u64, String>,
    next_seq: u64,
}

impl<V> Inner<V> {
    fn remove(&mut self, key: &str) -> Option<CacheEntry<V>> {
        let entry = self.entries.remove(key)?;
        self.order.remove(&entry.seq);
        Some(entry)
    }
}

/// Storage occupancy snapshot. `keys` may include expired entries that
/// have not been swept yet.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub keys: Vec<String>,
}

/// Bounded key/value store with per-entry TTL.
///
/// When an insert pushes the entry count over `max_entries`, a single
/// eviction pass drops `ceil(len * target_eviction_ratio)` entries in
/// insertion order (oldest first). Expired entries are never returned by
/// [`get`](Self::get); they are dropped lazily on lookup or by
/// [`cleanup`](Self::cleanup).
pub struct BoundedTtlCache<V> {
    inner: Mutex<Inner<V>>,
    max_entries: usize,
    target_eviction_ratio: f64,
    clock: SharedClock,
}

impl<V: Clone> BoundedTtlCache<V> {
    pub fn new(max_entries: usize, target_eviction_ratio: f64, clock: SharedClock) -> Self {
        let ratio = if target_eviction_ratio.is_finite() {
            target_eviction_ratio.clamp(f64::MIN_POSITIVE, 1.0)
        } else {
            DEFAULT_TARGET_EVICTION_RATIO
        };
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                order: BTreeMap::new(),
                next_seq: 0,
            }),
            max_entries: max_entries.max(1),
            target_eviction_ratio: ratio,
            clock,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner<V>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Insert or replace `key`. A non-positive `ttl_ms` stores an entry that
    /// is already expired.
    pub fn set(&self, key: impl Into<String>, value: V, ttl_ms: i64) {
        let key = key.into();
        let expires_at_ms = self.clock.now_ms().saturating_add(ttl_ms);

        let mut inner = self.lock();
        inner.remove(&key);

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.order.insert(seq, key.clone());
        inner.entries.insert(
            key,
            CacheEntry {
                value,
                expires_at_ms,
                seq,
            },
        );

        let size = inner.entries.len();
        if size > self.max_entries {
            let by_ratio = (size as f64 * self.target_eviction_ratio).ceil() as usize;
            let to_evict = by_ratio.max(size - self.max_entries).min(size);
            let victims: Vec<String> = inner.order.values().take(to_evict).cloned().collect();
            for victim in &victims {
                inner.remove(victim);
            }
            tracing::debug!(
                evicted = victims.len(),
                remaining = inner.entries.len(),
                "cache eviction pass"
            );
        }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let now_ms = self.clock.now_ms();
        let mut inner = self.lock();
        let expired = match inner.entries.get(key) {
            Some(entry) if !entry.is_expired_at(now_ms) => return Some(entry.value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            inner.remove(key);
        }
        None
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        CacheStats {
            size: inner.entries.len(),
            keys: inner.order.values().cloned().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn cleanup(&self) -> usize {
        let now_ms = self.clock.now_ms();
        let mut inner = self.lock();
        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired_at(now_ms))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            inner.remove(key);
        }
        expired.len()
    }

    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.order.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::Arc;

    fn cache_with(max: usize, ratio: f64) -> (BoundedTtlCache<String>, ManualClock) {
        let clock = ManualClock::new(1_000_000);
        let cache = BoundedTtlCache::new(max, ratio, Arc::new(clock.clone()));
        (cache, clock)
    }

    #[test]
    fn test_size_bound_with_full_ratio() {
        let (cache, _) = cache_with(3, 1.0);
        for key in ["a", "b", "c", "d"] {
            cache.set(key, key.to_string(), 60_000);
            assert!(cache.len() <= 3, "size exceeded bound after set({key})");
        }
        // ratio 1.0 evicts ceil(4 * 1.0) = 4 entries
        assert!(cache.is_empty());
    }

    #[test]
    fn test_size_bound_holds_for_long_sequences() {
        let (cache, _) = cache_with(10, 0.25);
        for i in 0..500 {
            cache.set(format!("k{i}"), i.to_string(), 60_000);
            assert!(cache.len() <= 10);
        }
    }

    #[test]
    fn test_eviction_is_oldest_inserted_first() {
        let (cache, _) = cache_with(4, 0.5);
        for key in ["a", "b", "c", "d", "e"] {
            cache.set(key, key.to_string(), 60_000);
        }
        // 5 entries over a cap of 4: ceil(5 * 0.5) = 3 oldest go
        assert_eq!(cache.stats().keys, vec!["d".to_string(), "e".to_string()]);
        assert!(cache.get("a").is_none());
        assert_eq!(cache.get("e").as_deref(), Some("e"));
    }

    #[test]
    fn test_replaced_key_moves_to_back_of_insertion_order() {
        let (cache, _) = cache_with(3, 0.1);
        cache.set("a", "1".to_string(), 60_000);
        cache.set("b", "2".to_string(), 60_000);
        cache.set("a", "3".to_string(), 60_000);
        cache.set("c", "4".to_string(), 60_000);
        cache.set("d", "5".to_string(), 60_000);
        // "b" is now the oldest insertion
        assert!(cache.get("b").is_none());
        assert_eq!(cache.get("a").as_deref(), Some("3"));
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn test_ttl_expiry_with_simulated_clock() {
        let (cache, clock) = cache_with(10, 0.5);
        cache.set("k", "v".to_string(), 500);
        assert_eq!(cache.get("k").as_deref(), Some("v"));

        clock.advance(2_000);
        assert!(cache.get("k").is_none());
    }

    #[test]
    fn test_expires_exactly_at_deadline() {
        let (cache, clock) = cache_with(10, 0.5);
        cache.set("k", "v".to_string(), 500);
        clock.advance(499);
        assert!(cache.get("k").is_some());
        clock.advance(1);
        assert!(cache.get("k").is_none());
    }

    #[test]
    fn test_cleanup_removes_expired_from_storage() {
        let (cache, clock) = cache_with(10, 0.5);
        cache.set("short", "v".to_string(), 500);
        cache.set("long", "v".to_string(), 60_000);
        clock.advance(2_000);

        // Not yet swept: stats still report the stale key
        assert_eq!(cache.stats().size, 2);

        assert_eq!(cache.cleanup(), 1);
        let stats = cache.stats();
        assert_eq!(stats.size, 1);
        assert_eq!(stats.keys, vec!["long".to_string()]);
    }

    #[test]
    fn test_cleanup_is_idempotent() {
        let (cache, clock) = cache_with(10, 0.5);
        cache.set("a", "1".to_string(), 100);
        cache.set("b", "2".to_string(), 10_000);
        cache.set("c", "3".to_string(), 200);
        clock.advance(1_000);

        cache.cleanup();
        let first = cache.stats();
        assert_eq!(cache.cleanup(), 0);
        assert_eq!(cache.stats(), first);
    }

    #[test]
    fn test_non_positive_ttl_is_immediately_expired() {
        let (cache, _) = cache_with(10, 0.5);
        cache.set("zero", "v".to_string(), 0);
        cache.set("negative", "v".to_string(), -5);
        assert!(cache.get("zero").is_none());
        assert_eq!(cache.cleanup(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_last_write_wins() {
        let (cache, _) = cache_with(10, 0.5);
        cache.set("k", "v1".to_string(), 60_000);
        cache.set("k", "v2".to_string(), 60_000);
        assert_eq!(cache.get("k").as_deref(), Some("v2"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_clear_removes_everything() {
        let (cache, _) = cache_with(10, 0.5);
        cache.set("a", "1".to_string(), 60_000);
        cache.set("b", "2".to_string(), 60_000);
        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.stats().keys.is_empty());
    }

    #[test]
    fn test_out_of_range_config_is_clamped() {
        let clock: SharedClock = Arc::new(ManualClock::new(0));
        let cache: BoundedTtlCache<u8> = BoundedTtlCache::new(0, f64::NAN, clock);
        assert_eq!(cache.max_entries(), 1);
        cache.set("a", 1, 1_000);
        cache.set("b", 2, 1_000);
        assert!(cache.len() <= 1);
    }

    #[test]
    fn test_concurrent_sets_respect_bound() {
        let clock: SharedClock = Arc::new(ManualClock::new(0));
        let cache = Arc::new(BoundedTtlCache::new(16, 0.5, clock));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for i in 0..200 {
                        cache.set(format!("{t}-{i}"), i, 60_000);
                        let _ = cache.get(&format!("{t}-{}", i / 2));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(cache.len() <= 16);
    }
}
