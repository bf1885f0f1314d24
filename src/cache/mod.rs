//! # Cache Module
//!
//! Time-bounded caches for remote material the filter must not refetch on
//! every request: the discovery document, the signing key set, and verified
//! principals.
//!
//! ## Overview
//!
//! - [`TtlCache`] is a named key/value store with a time-to-live and a
//!   maximum entry count. Reads re-check age, so an expired entry is never
//!   returned even if it is still physically present.
//! - [`CacheService`] creates caches and owns a single background sweeper
//!   thread that periodically removes expired entries from all of them.
//!
//! Each cache has its own lock. A sweep of one cache never blocks readers of
//! another, and there is no ordering guarantee between caches.
//!
//! ## Example
//!
//! ```rust
//! use aadgate::cache::CacheService;
//! use aadgate::clock::SystemClock;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let service = CacheService::new(Duration::from_secs(60), Arc::new(SystemClock));
//! let cache = service.create::<String, Arc<str>>("configurationCache", 60, 1);
//! cache.put_if_absent("current".to_string(), Arc::from("value"));
//! assert!(cache.get(&"current".to_string()).is_some());
//! service.shutdown();
//! ```

mod sweeper;
mod ttl;

pub use ttl::TtlCache;

use crate::clock::Clock;
use std::hash::Hash;
use std::sync::{Arc, Weak};
use std::time::Duration;
use sweeper::Sweeper;
use tracing::info;

/// Counters exposed by every [`TtlCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Reads that found a live entry
    pub hits: u64,
    /// Reads that found nothing live
    pub misses: u64,
    /// Entries removed to respect the size bound
    pub evictions: u64,
    /// Entries removed because they outlived the TTL
    pub expirations: u64,
    /// Entries currently stored
    pub size: usize,
    /// Maximum entries
    pub capacity: usize,
}

impl CacheStats {
    /// Cache hit rate as a percentage.
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

/// Factory and lifecycle owner for [`TtlCache`] instances.
///
/// Created at filter `init`, shut down at filter `destroy`.
pub struct CacheService {
    clock: Arc<dyn Clock>,
    sweeper: Sweeper,
}

impl CacheService {
    /// Start the service with the given sweep period.
    pub fn new(sweep_interval: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            sweeper: Sweeper::start(sweep_interval),
        }
    }

    /// Create and register a cache whose entries live for `ttl_minutes`.
    pub fn create<K, V>(&self, name: &str, ttl_minutes: u64, max_size: usize) -> Arc<TtlCache<K, V>>
    where
        K: Hash + Eq + Send + 'static,
        V: Clone + Send + 'static,
    {
        self.create_with_ttl(name, Duration::from_secs(ttl_minutes.saturating_mul(60)), max_size)
    }

    /// Create and register a cache with an arbitrary TTL.
    pub fn create_with_ttl<K, V>(&self, name: &str, ttl: Duration, max_size: usize) -> Arc<TtlCache<K, V>>
    where
        K: Hash + Eq + Send + 'static,
        V: Clone + Send + 'static,
    {
        let cache = Arc::new(TtlCache::new(name, ttl, max_size, Arc::clone(&self.clock)));
        let weak: Weak<TtlCache<K, V>> = Arc::downgrade(&cache);
        self.sweeper.register(weak);
        info!(cache = %name, ttl_secs = ttl.as_secs(), max_size, "cache created");
        cache
    }

    /// Run one sweep cycle over every live cache right now.
    pub fn sweep_now(&self) -> usize {
        self.sweeper.sweep_now()
    }

    /// Stop the background sweeper. Caches remain usable afterwards; they
    /// just rely on read-time expiry.
    pub fn shutdown(&self) {
        self.sweeper.shutdown();
    }
}

impl Drop for CacheService {
    fn drop(&mut self) {
        self.sweeper.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[test]
    fn test_sweep_now_covers_all_caches() {
        let clock = Arc::new(ManualClock::starting_now());
        let service = CacheService::new(Duration::ZERO, Arc::clone(&clock) as Arc<dyn Clock>);
        let roles = service.create::<String, u32>("roleCache", 30, 10);
        let config = service.create::<String, u32>("configurationCache", 60, 1);
        roles.put_if_absent("r".into(), 1);
        config.put_if_absent("c".into(), 2);

        clock.advance(Duration::from_secs(31 * 60));
        assert_eq!(service.sweep_now(), 1);
        assert_eq!(roles.len(), 0);
        assert_eq!(config.len(), 1);
    }

    #[test]
    fn test_dropped_cache_is_unregistered() {
        let clock = Arc::new(ManualClock::starting_now());
        let service = CacheService::new(Duration::ZERO, clock);
        let c = service.create::<String, u32>("short-lived", 1, 1);
        drop(c);
        assert_eq!(service.sweep_now(), 0);
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let service = CacheService::new(
            Duration::from_millis(5),
            Arc::new(crate::clock::SystemClock),
        );
        service.shutdown();
        service.shutdown();
    }
}
