use super::ttl::Sweep;
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info};

struct Shared {
    caches: Mutex<Vec<Weak<dyn Sweep>>>,
    stopped: Mutex<bool>,
    wake: Condvar,
}

impl Shared {
    fn run_cycle(&self) -> usize {
        // Collect strong references first so no sweep runs under the registry lock.
        let live: Vec<Arc<dyn Sweep>> = {
            let mut caches = self.caches.lock().unwrap_or_else(|e| e.into_inner());
            caches.retain(|w| w.strong_count() > 0);
            caches.iter().filter_map(Weak::upgrade).collect()
        };
        let mut removed = 0;
        for cache in &live {
            let n = cache.sweep();
            if n > 0 {
                debug!(cache = %cache.cache_name(), removed = n, "sweeper pass");
            }
            removed += n;
        }
        removed
    }
}

/// One background thread that periodically sweeps every registered cache.
///
/// Caches are held weakly: dropping the last handle to a cache unregisters it
/// on the next cycle.
pub(crate) struct Sweeper {
    shared: Arc<Shared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Sweeper {
    /// Start sweeping every `interval`. A zero interval disables the
    /// background thread; caches still expire logically on read and
    /// [`Sweeper::sweep_now`] still works.
    pub(crate) fn start(interval: Duration) -> Self {
        let shared = Arc::new(Shared {
            caches: Mutex::new(Vec::new()),
            stopped: Mutex::new(false),
            wake: Condvar::new(),
        });

        let handle = if interval.is_zero() {
            info!("cache sweeper disabled (zero interval)");
            None
        } else {
            let worker = Arc::clone(&shared);
            let spawned = std::thread::Builder::new()
                .name("aadgate-cache-sweeper".to_string())
                .spawn(move || sweep_loop(worker, interval));
            match spawned {
                Ok(h) => Some(h),
                Err(e) => {
                    error!(error = %e, "failed to spawn cache sweeper; relying on read-time expiry");
                    None
                }
            }
        };

        Self {
            shared,
            handle: Mutex::new(handle),
        }
    }

    pub(crate) fn register(&self, cache: Weak<dyn Sweep>) {
        self.shared
            .caches
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(cache);
    }

    pub(crate) fn sweep_now(&self) -> usize {
        self.shared.run_cycle()
    }

    /// Stop the thread and wait for it. Safe to call more than once.
    pub(crate) fn shutdown(&self) {
        {
            let mut stopped = self.shared.stopped.lock().unwrap_or_else(|e| e.into_inner());
            *stopped = true;
        }
        self.shared.wake.notify_all();
        let handle = self.handle.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(h) = handle {
            if h.join().is_err() {
                error!("cache sweeper thread panicked");
            } else {
                debug!("cache sweeper stopped");
            }
        }
    }
}

fn sweep_loop(shared: Arc<Shared>, interval: Duration) {
    debug!(interval_ms = interval.as_millis() as u64, "cache sweeper started");
    let mut stopped = shared.stopped.lock().unwrap_or_else(|e| e.into_inner());
    loop {
        if *stopped {
            break;
        }
        let (guard, _timeout) = shared
            .wake
            .wait_timeout(stopped, interval)
            .unwrap_or_else(|e| e.into_inner());
        stopped = guard;
        if *stopped {
            break;
        }
        drop(stopped);
        shared.run_cycle();
        stopped = shared.stopped.lock().unwrap_or_else(|e| e.into_inner());
    }
}
