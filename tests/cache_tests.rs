use aadgate::cache::CacheService;
use aadgate::clock::{Clock, ManualClock, SystemClock};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn manual_service() -> (Arc<ManualClock>, CacheService) {
    let clock = Arc::new(ManualClock::starting_now());
    let service = CacheService::new(Duration::ZERO, Arc::clone(&clock) as Arc<dyn Clock>);
    (clock, service)
}

#[test]
fn test_entries_expire_on_read_without_sweeper() {
    let (clock, service) = manual_service();
    let cache = service.create::<String, u32>("roleCache", 30, 10);
    cache.put_if_absent("a".to_string(), 1);

    clock.advance(Duration::from_secs(29 * 60));
    assert_eq!(cache.get(&"a".to_string()), Some(1));

    clock.advance(Duration::from_secs(60));
    assert_eq!(cache.get(&"a".to_string()), None);
    assert!(cache.is_empty());
    assert_eq!(cache.stats().expirations, 1);
}

#[test]
fn test_size_bound_keeps_most_recent() {
    let (clock, service) = manual_service();
    let cache = service.create::<u32, u32>("bounded", 30, 3);
    for i in 0..4 {
        cache.put_if_absent(i, i * 10);
        clock.advance(Duration::from_secs(1));
    }
    assert_eq!(cache.len(), 3);
    assert_eq!(cache.get(&0), None);
    for i in 1..4 {
        assert_eq!(cache.get(&i), Some(i * 10));
    }
    assert_eq!(cache.stats().evictions, 1);
}

#[test]
fn test_put_if_absent_keeps_first_value() {
    let (_clock, service) = manual_service();
    let cache = service.create::<&str, &str>("first", 30, 10);
    assert_eq!(cache.put_if_absent("k", "one"), None);
    assert_eq!(cache.put_if_absent("k", "two"), Some("one"));
    assert_eq!(cache.get(&"k"), Some("one"));
}

#[test]
fn test_manual_sweep_removes_expired_entries() {
    let (clock, service) = manual_service();
    let short = service.create::<u32, u32>("short", 1, 10);
    let long = service.create::<u32, u32>("long", 60, 10);
    for i in 0..5 {
        short.put_if_absent(i, i);
        long.put_if_absent(i, i);
    }
    clock.advance(Duration::from_secs(2 * 60));

    assert_eq!(service.sweep_now(), 5);
    assert!(short.is_empty());
    assert_eq!(long.len(), 5);
}

#[test]
fn test_background_sweeper_empties_cache() {
    let service = CacheService::new(Duration::from_millis(20), Arc::new(SystemClock));
    let cache = service.create_with_ttl::<u32, u32>("sweep", Duration::from_millis(30), 100);
    for i in 0..10 {
        cache.put_if_absent(i, i);
    }
    assert_eq!(cache.len(), 10);

    // len() does not expire anything itself; only the sweeper can empty it.
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cache.is_empty() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    assert!(cache.is_empty());
    service.shutdown();
}

#[test]
fn test_concurrent_inserts_agree_on_one_value() {
    let (_clock, service) = manual_service();
    let cache = service.create::<String, usize>("contended", 30, 100);

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let cache = Arc::clone(&cache);
            thread::spawn(move || match cache.put_if_absent("shared".to_string(), t) {
                Some(existing) => existing,
                None => t,
            })
        })
        .collect();
    let seen: Vec<usize> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let winner = cache.get(&"shared".to_string()).unwrap();
    assert!(seen.iter().all(|&v| v == winner));
    assert_eq!(cache.len(), 1);
}

#[test]
fn test_dropped_cache_is_unregistered() {
    let (clock, service) = manual_service();
    let cache = service.create::<u32, u32>("temporary", 1, 10);
    cache.put_if_absent(1, 1);
    drop(cache);
    clock.advance(Duration::from_secs(120));
    assert_eq!(service.sweep_now(), 0);
}

#[test]
fn test_sweep_concurrent_with_inserts_keeps_fresh_entries() {
    let (clock, service) = manual_service();
    let service = Arc::new(service);
    let cache = service.create::<u32, u32>("roleCache", 30, 10_000);
    for i in 0..100 {
        cache.put_if_absent(i, i);
    }
    clock.advance(Duration::from_secs(31 * 60));

    let inserting = Arc::new(AtomicBool::new(true));
    let swept = Arc::new(AtomicUsize::new(0));
    let sweepers: Vec<_> = (0..2)
        .map(|n| {
            let service = Arc::clone(&service);
            let cache = Arc::clone(&cache);
            let inserting = Arc::clone(&inserting);
            let swept = Arc::clone(&swept);
            thread::spawn(move || {
                while inserting.load(Ordering::Acquire) {
                    let removed = if n == 0 { service.sweep_now() } else { cache.sweep_expired() };
                    swept.fetch_add(removed, Ordering::Relaxed);
                }
            })
        })
        .collect();
    let inserters: Vec<_> = (0..4u32)
        .map(|t| {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                for i in 0..250 {
                    let key = 1_000 + t * 250 + i;
                    assert_eq!(cache.put_if_absent(key, key), None);
                }
            })
        })
        .collect();

    for handle in inserters {
        handle.join().unwrap();
    }
    inserting.store(false, Ordering::Release);
    for handle in sweepers {
        handle.join().unwrap();
    }
    swept.fetch_add(cache.sweep_expired(), Ordering::Relaxed);

    assert_eq!(swept.load(Ordering::Relaxed), 100);
    assert_eq!(cache.len(), 1_000);
    for key in 1_000..2_000 {
        assert_eq!(cache.get(&key), Some(key));
    }
    for key in 0..100 {
        assert_eq!(cache.get(&key), None);
    }
}
