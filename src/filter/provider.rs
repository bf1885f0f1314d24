use crate::cache::TtlCache;
use crate::clock::Clock;
use crate::discovery::{Configuration, KeyStore, KeyStoreLoader, WellKnownLoader};
use crate::error::SecurityResult;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, info, warn};

const CURRENT_CONFIGURATION: &str = "current";

/// Minimum time between two key set fetches triggered by an unknown `kid`.
pub const KEY_RELOAD_MIN_INTERVAL: Duration = Duration::from_secs(30);

// How long a caller waits for another thread's forced reload.
const RELOAD_WAIT: Duration = Duration::from_secs(2);

/// Cached view of the identity provider's metadata.
///
/// The configuration and the key set live in separate caches. The key set is
/// keyed by the endpoint it was fetched from, so a configuration that moves
/// `jwks_uri` never reads keys fetched from the old location. A failed fetch
/// is returned as an error and never replaced by an older snapshot.
///
/// A token naming a key the cached set does not contain triggers
/// [`IdentityProvider::reload_key_store`], at most once per
/// [`KEY_RELOAD_MIN_INTERVAL`], so keys rotated at the provider are picked up
/// without waiting for the cache TTL.
pub struct IdentityProvider {
    well_known: WellKnownLoader,
    key_loader: KeyStoreLoader,
    configuration_cache: Arc<TtlCache<String, Arc<Configuration>>>,
    key_store_cache: Arc<TtlCache<String, Arc<KeyStore>>>,
    clock: Arc<dyn Clock>,
    last_key_fetch: Mutex<Option<SystemTime>>,
    reload_in_progress: AtomicBool,
}

impl IdentityProvider {
    pub fn new(
        well_known: WellKnownLoader,
        key_loader: KeyStoreLoader,
        configuration_cache: Arc<TtlCache<String, Arc<Configuration>>>,
        key_store_cache: Arc<TtlCache<String, Arc<KeyStore>>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            well_known,
            key_loader,
            configuration_cache,
            key_store_cache,
            clock,
            last_key_fetch: Mutex::new(None),
            reload_in_progress: AtomicBool::new(false),
        }
    }

    pub fn discovery_url(&self) -> &str {
        self.well_known.url()
    }

    /// Current configuration, fetched on a cache miss.
    pub fn configuration(&self) -> SecurityResult<Arc<Configuration>> {
        self.configuration_cache
            .get_or_try_insert_with(CURRENT_CONFIGURATION.to_string(), || {
                debug!(url = %self.well_known.url(), "configuration cache miss");
                self.well_known.load().map(Arc::new)
            })
    }

    /// Key set published at `configuration`'s key-store endpoint.
    pub fn key_store(&self, configuration: &Configuration) -> SecurityResult<Arc<KeyStore>> {
        let endpoint = configuration.key_store_endpoint.clone();
        self.key_store_cache.get_or_try_insert_with(endpoint, || {
            debug!(url = %configuration.key_store_endpoint, "key set cache miss");
            *self.last_key_fetch.lock().unwrap_or_else(|e| e.into_inner()) = Some(self.clock.now());
            self.key_loader
                .load_key_store(&configuration.key_store_endpoint)
                .map(Arc::new)
        })
    }

    /// Refetch the key set because a token named a key it does not contain.
    ///
    /// Returns `Ok(None)` without fetching when the key set was fetched less
    /// than [`KEY_RELOAD_MIN_INTERVAL`] ago. When another thread is already
    /// reloading, waits for it and returns what it stored.
    pub fn reload_key_store(&self, configuration: &Configuration) -> SecurityResult<Option<Arc<KeyStore>>> {
        let now = self.clock.now();
        let last_fetch = *self.last_key_fetch.lock().unwrap_or_else(|e| e.into_inner());
        let recent = last_fetch
            .and_then(|last| now.duration_since(last).ok())
            .is_some_and(|age| age < KEY_RELOAD_MIN_INTERVAL);
        if recent {
            debug!(url = %configuration.key_store_endpoint, "key set fetched recently; not reloading");
            return Ok(None);
        }

        if self
            .reload_in_progress
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            let started = Instant::now();
            let mut wait_ms = 10;
            while self.reload_in_progress.load(Ordering::Acquire) {
                if started.elapsed() >= RELOAD_WAIT {
                    warn!("timed out waiting for key set reload; using cached keys");
                    return Ok(None);
                }
                std::thread::sleep(Duration::from_millis(wait_ms));
                wait_ms = (wait_ms * 2).min(100);
            }
            return self.key_store(configuration).map(Some);
        }

        info!(url = %configuration.key_store_endpoint, "unknown signing key; reloading key set");
        self.key_store_cache
            .invalidate(&configuration.key_store_endpoint);
        let result = self.key_store(configuration);
        self.reload_in_progress.store(false, Ordering::Release);
        result.map(Some)
    }

    /// Forget cached metadata so the next request refetches it.
    pub fn refresh(&self) {
        self.configuration_cache.clear();
        self.key_store_cache.clear();
        info!("identity provider metadata cache cleared");
    }

    pub fn configuration_cache(&self) -> &TtlCache<String, Arc<Configuration>> {
        &self.configuration_cache
    }

    pub fn key_store_cache(&self) -> &TtlCache<String, Arc<KeyStore>> {
        &self.key_store_cache
    }
}
