use aadgate::cache::{CacheService, TtlCache};
use aadgate::clock::SystemClock;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;

fn service() -> CacheService {
    // No background sweeper; expiry is exercised through reads.
    CacheService::new(Duration::ZERO, Arc::new(SystemClock))
}

fn filled(service: &CacheService, size: usize) -> Arc<TtlCache<String, Arc<str>>> {
    let cache = service.create::<String, Arc<str>>("bench", 30, size);
    for i in 0..size {
        cache.put_if_absent(format!("key-{}", i), Arc::from("principal"));
    }
    cache
}

/// Benchmark a read that finds a live entry
fn bench_get_hit(c: &mut Criterion) {
    let service = service();
    let cache = filled(&service, 1000);
    let key = "key-500".to_string();
    c.bench_function("ttl_cache_get_hit", |b| b.iter(|| black_box(cache.get(black_box(&key)))));
}

/// Benchmark a read that misses
fn bench_get_miss(c: &mut Criterion) {
    let service = service();
    let cache = filled(&service, 1000);
    let key = "absent".to_string();
    c.bench_function("ttl_cache_get_miss", |b| b.iter(|| black_box(cache.get(black_box(&key)))));
}

/// Benchmark inserts into a cache at capacity (every insert evicts)
fn bench_put_at_capacity(c: &mut Criterion) {
    let mut group = c.benchmark_group("ttl_cache_put_evicting");
    for size in [10usize, 100, 1000] {
        let service = service();
        let cache = filled(&service, size);
        let mut n = 0u64;
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                n += 1;
                black_box(cache.put_if_absent(format!("new-{}", n), Arc::from("principal")))
            })
        });
    }
    group.finish();
}

/// Benchmark lock contention between reader threads
fn bench_concurrent_get(c: &mut Criterion) {
    let service = service();
    let cache = filled(&service, 1000);
    let mut group = c.benchmark_group("ttl_cache_concurrent_get");
    for threads in [1usize, 2, 4, 8] {
        group.bench_with_input(BenchmarkId::from_parameter(threads), &threads, |b, &threads| {
            b.iter(|| {
                let handles: Vec<_> = (0..threads)
                    .map(|t| {
                        let cache = Arc::clone(&cache);
                        std::thread::spawn(move || {
                            for i in 0..100 {
                                black_box(cache.get(&format!("key-{}", (t * 100 + i) % 1000)));
                            }
                        })
                    })
                    .collect();
                for handle in handles {
                    handle.join().unwrap();
                }
            })
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_get_hit,
    bench_get_miss,
    bench_put_at_capacity,
    bench_concurrent_get
);
criterion_main!(benches);
