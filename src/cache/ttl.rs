use super::CacheStats;
use crate::clock::Clock;
use lru::LruCache;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime};
use tracing::{debug, trace};

struct Entry<V> {
    value: V,
    inserted: SystemTime,
}

/// A named, size-bounded key/value store whose entries expire after a fixed
/// time-to-live.
///
/// Entries are kept in insertion order (the `LruCache` is only ever read with
/// `peek`, and existing keys are never overwritten while live), so the least
/// recently used end is always the oldest entry. That makes both the size
/// bound and the background sweep O(1) per removed entry.
///
/// Expiry is enforced logically on every read: an entry older than the TTL is
/// never returned, whether or not the sweeper has reached it yet.
pub struct TtlCache<K, V> {
    name: String,
    ttl: Duration,
    max_size: usize,
    clock: Arc<dyn Clock>,
    // One lock per cache instance; unrelated caches never contend.
    entries: Mutex<LruCache<K, Entry<V>>>,
    // Serialises loaders in `get_or_try_insert_with`; never held with `entries`.
    loading: Mutex<()>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl<K, V> TtlCache<K, V>
where
    K: Hash + Eq,
    V: Clone,
{
    /// Create a cache. A `ttl` of zero makes every entry expire immediately;
    /// a `max_size` of zero makes the cache retain nothing.
    pub fn new(name: impl Into<String>, ttl: Duration, max_size: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: name.into(),
            ttl,
            max_size,
            clock,
            entries: Mutex::new(LruCache::unbounded()),
            loading: Mutex::new(()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    /// Cache name, used in logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configured time-to-live.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<K, Entry<V>>> {
        // A panic while holding the lock cannot leave an entry half-written,
        // so the map is still consistent.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_expired(&self, entry: &Entry<V>, now: SystemTime) -> bool {
        let age = now.duration_since(entry.inserted).unwrap_or(Duration::ZERO);
        age >= self.ttl
    }

    /// Look up a live value.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = self.clock.now();
        let mut guard = self.lock();
        let expired = match guard.peek(key) {
            Some(entry) if !self.is_expired(entry, now) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            guard.pop(key);
            self.expirations.fetch_add(1, Ordering::Relaxed);
            trace!(cache = %self.name, "expired entry dropped on read");
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Insert `value` unless a live value is already stored for `key`.
    ///
    /// Returns the existing live value when one is present (and leaves it in
    /// place), otherwise `None`. Inserting into a full cache evicts the oldest
    /// entries first.
    pub fn put_if_absent(&self, key: K, value: V) -> Option<V> {
        let now = self.clock.now();
        let mut guard = self.lock();

        let expired = match guard.peek(&key) {
            Some(entry) if !self.is_expired(entry, now) => return Some(entry.value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            guard.pop(&key);
            self.expirations.fetch_add(1, Ordering::Relaxed);
        }

        if self.max_size == 0 {
            return None;
        }
        while guard.len() >= self.max_size {
            if guard.pop_lru().is_none() {
                break;
            }
            self.evictions.fetch_add(1, Ordering::Relaxed);
            debug!(cache = %self.name, max_size = self.max_size, "evicted oldest entry");
        }
        guard.put(
            key,
            Entry {
                value,
                inserted: now,
            },
        );
        None
    }

    /// Return the live value for `key`, loading and inserting it on a miss.
    ///
    /// Loads are single-flight per cache: concurrent misses queue behind the
    /// first loader and re-check the cache once it finishes, so a burst of
    /// requests triggers one fetch. Readers using [`TtlCache::get`] are never
    /// blocked by a load. A failed load is not cached; the next waiter tries
    /// again. The loaded value is returned even when the cache is configured
    /// to retain nothing.
    pub fn get_or_try_insert_with<E, F>(&self, key: K, load: F) -> Result<V, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        if let Some(v) = self.get(&key) {
            return Ok(v);
        }
        let _loading = self.loading.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(v) = self.peek_live(&key) {
            trace!(cache = %self.name, "value loaded by another caller");
            return Ok(v);
        }
        let loaded = load()?;
        match self.put_if_absent(key, loaded.clone()) {
            Some(existing) => Ok(existing),
            None => Ok(loaded),
        }
    }

    // Live value without touching the hit/miss counters.
    fn peek_live(&self, key: &K) -> Option<V> {
        let now = self.clock.now();
        let guard = self.lock();
        guard
            .peek(key)
            .filter(|entry| !self.is_expired(entry, now))
            .map(|entry| entry.value.clone())
    }

    /// Remove `key` regardless of age.
    pub fn invalidate(&self, key: &K) -> Option<V> {
        self.lock().pop(key).map(|e| e.value)
    }

    /// Remove everything.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Number of physically stored entries (including expired ones the
    /// sweeper has not reached yet).
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove expired entries from the oldest end, stopping at the first
    /// live entry. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        let mut guard = self.lock();
        let mut removed = 0;
        loop {
            let expired = match guard.peek_lru() {
                Some((_, oldest)) => self.is_expired(oldest, now),
                None => false,
            };
            if !expired {
                break;
            }
            guard.pop_lru();
            removed += 1;
        }
        if removed > 0 {
            self.expirations.fetch_add(removed as u64, Ordering::Relaxed);
            debug!(cache = %self.name, removed, "swept expired entries");
        }
        removed
    }

    /// Hit/miss/eviction counters and current size.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            size: self.len(),
            capacity: self.max_size,
        }
    }
}

/// Object-safe view of a cache used by the shared sweeper.
pub(crate) trait Sweep: Send + Sync {
    fn cache_name(&self) -> &str;
    fn sweep(&self) -> usize;
}

impl<K, V> Sweep for TtlCache<K, V>
where
    K: Hash + Eq + Send,
    V: Clone + Send,
{
    fn cache_name(&self) -> &str {
        self.name()
    }

    fn sweep(&self) -> usize {
        self.sweep_expired()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn cache(ttl_secs: u64, max: usize) -> (Arc<ManualClock>, TtlCache<String, u32>) {
        let clock = Arc::new(ManualClock::starting_now());
        let c = TtlCache::new(
            "test",
            Duration::from_secs(ttl_secs),
            max,
            Arc::clone(&clock) as Arc<dyn Clock>,
        );
        (clock, c)
    }

    #[test]
    fn test_put_if_absent_keeps_first_value() {
        let (_clock, c) = cache(60, 10);
        assert_eq!(c.put_if_absent("a".into(), 1), None);
        assert_eq!(c.put_if_absent("a".into(), 2), Some(1));
        assert_eq!(c.get(&"a".to_string()), Some(1));
    }

    #[test]
    fn test_expired_entry_unreachable_before_sweep() {
        let (clock, c) = cache(60, 10);
        c.put_if_absent("a".into(), 1);
        clock.advance(Duration::from_secs(59));
        assert_eq!(c.get(&"a".to_string()), Some(1));
        clock.advance(Duration::from_secs(2));
        assert_eq!(c.get(&"a".to_string()), None);
    }

    #[test]
    fn test_expired_entry_can_be_replaced() {
        let (clock, c) = cache(60, 10);
        c.put_if_absent("a".into(), 1);
        clock.advance(Duration::from_secs(120));
        assert_eq!(c.put_if_absent("a".into(), 2), None);
        assert_eq!(c.get(&"a".to_string()), Some(2));
    }

    #[test]
    fn test_size_bound_evicts_oldest() {
        let (clock, c) = cache(60, 3);
        for (i, k) in ["a", "b", "c", "d"].iter().enumerate() {
            c.put_if_absent(k.to_string(), i as u32);
            clock.advance(Duration::from_secs(1));
        }
        assert_eq!(c.len(), 3);
        assert_eq!(c.get(&"a".to_string()), None);
        assert_eq!(c.get(&"b".to_string()), Some(1));
        assert_eq!(c.get(&"d".to_string()), Some(3));
        assert_eq!(c.stats().evictions, 1);
    }

    #[test]
    fn test_reads_do_not_change_eviction_order() {
        let (_clock, c) = cache(60, 2);
        c.put_if_absent("a".into(), 1);
        c.put_if_absent("b".into(), 2);
        assert_eq!(c.get(&"a".to_string()), Some(1));
        c.put_if_absent("c".into(), 3);
        assert_eq!(c.get(&"a".to_string()), None);
        assert_eq!(c.get(&"b".to_string()), Some(2));
    }

    #[test]
    fn test_zero_size_retains_nothing() {
        let (_clock, c) = cache(60, 0);
        assert_eq!(c.put_if_absent("a".into(), 1), None);
        assert!(c.is_empty());
        let v: Result<u32, ()> = c.get_or_try_insert_with("a".into(), || Ok(7));
        assert_eq!(v, Ok(7));
        assert_eq!(c.sweep_expired(), 0);
    }

    #[test]
    fn test_zero_ttl_expires_immediately() {
        let (_clock, c) = cache(0, 10);
        c.put_if_absent("a".into(), 1);
        assert_eq!(c.get(&"a".to_string()), None);
        assert_eq!(c.sweep_expired(), 0);
    }

    #[test]
    fn test_sweep_stops_at_first_live_entry() {
        let (clock, c) = cache(60, 10);
        c.put_if_absent("old1".into(), 1);
        c.put_if_absent("old2".into(), 2);
        clock.advance(Duration::from_secs(30));
        c.put_if_absent("young".into(), 3);
        clock.advance(Duration::from_secs(31));
        assert_eq!(c.sweep_expired(), 2);
        assert_eq!(c.len(), 1);
        assert_eq!(c.get(&"young".to_string()), Some(3));
    }

    #[test]
    fn test_get_or_try_insert_with_propagates_error() {
        let (_clock, c) = cache(60, 10);
        let r: Result<u32, &str> = c.get_or_try_insert_with("a".into(), || Err("boom"));
        assert_eq!(r, Err("boom"));
        assert!(c.is_empty());
        let r: Result<u32, &str> = c.get_or_try_insert_with("a".into(), || Ok(5));
        assert_eq!(r, Ok(5));
        let r: Result<u32, &str> = c.get_or_try_insert_with("a".into(), || Ok(6));
        assert_eq!(r, Ok(5));
    }

    #[test]
    fn test_concurrent_misses_load_once() {
        use std::sync::atomic::AtomicUsize;

        let (_clock, c) = cache(60, 10);
        let c = Arc::new(c);
        let loads = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let c = Arc::clone(&c);
                let loads = Arc::clone(&loads);
                std::thread::spawn(move || {
                    let r: Result<u32, ()> = c.get_or_try_insert_with("config".into(), || {
                        loads.fetch_add(1, Ordering::SeqCst);
                        std::thread::sleep(Duration::from_millis(50));
                        Ok(42)
                    });
                    r
                })
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap(), Ok(42));
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stats_hit_rate() {
        let (_clock, c) = cache(60, 10);
        c.put_if_absent("a".into(), 1);
        c.get(&"a".to_string());
        c.get(&"b".to_string());
        let stats = c.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate() - 50.0).abs() < f64::EPSILON);
    }
}
