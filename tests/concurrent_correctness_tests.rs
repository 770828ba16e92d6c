//! Concurrent Memoizing Cache Correctness Tests
//!
//! These tests validate the at-most-once compute guarantee while a cache is
//! accessed from many threads.
//!
//! ## Test Strategy
//!
//! Unlike stress tests that focus on throughput and lack of panics, these tests:
//! - Line threads up on a `Barrier` so they miss on the same key together
//! - Use a slow compute function to widen the race window
//! - Return `Arc` values so identity, not just equality, can be checked
//!
//! ## Segments
//!
//! 1. **Exactly Once**: One compute per key regardless of contention
//! 2. **Blocking Behavior**: Callers wait for an in-flight compute and reuse its value
//! 3. **Failures Under Contention**: A failed compute leaves the key computable

use memo_cache::config::{
    AtomicMapCacheConfig, Fairness, MissPath, MutexCacheConfig, RwLockCacheConfig,
    UpgradeCacheConfig,
};
use memo_cache::metrics::CacheMetrics;
use memo_cache::{AtomicMapCache, CoarseMutexCache, LockUpgradeCache, MemoCache, RwLockCache};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const NUM_THREADS: usize = 8;

trait SharedCache<V, E>: MemoCache<u32, V, Error = E> + CacheMetrics + Send + Sync {}

impl<T, V, E> SharedCache<V, E> for T where
    T: MemoCache<u32, V, Error = E> + CacheMetrics + Send + Sync
{
}

fn every_variant<V, E, F>(compute: F) -> Vec<(&'static str, Arc<dyn SharedCache<V, E>>)>
where
    F: Fn(&u32) -> Result<Option<V>, E> + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    E: 'static,
{
    let mut caches: Vec<(&'static str, Arc<dyn SharedCache<V, E>>)> = Vec::new();
    caches.push((
        "lock-upgrade",
        Arc::new(LockUpgradeCache::init(UpgradeCacheConfig::default(), compute.clone())),
    ));
    caches.push((
        "rwlock",
        Arc::new(RwLockCache::init(RwLockCacheConfig::default(), compute.clone())),
    ));
    caches.push((
        "rwlock-fair",
        Arc::new(RwLockCache::init(
            RwLockCacheConfig {
                fairness: Fairness::Fair,
                ..Default::default()
            },
            compute.clone(),
        )),
    ));
    caches.push((
        "mutex-entry",
        Arc::new(CoarseMutexCache::init(
            MutexCacheConfig {
                miss_path: MissPath::Entry,
                ..Default::default()
            },
            compute.clone(),
        )),
    ));
    caches.push((
        "mutex-lookup-then-insert",
        Arc::new(CoarseMutexCache::init(
            MutexCacheConfig {
                miss_path: MissPath::LookupThenInsert,
                ..Default::default()
            },
            compute.clone(),
        )),
    ));
    caches.push((
        "atomic-map",
        Arc::new(AtomicMapCache::init(
            AtomicMapCacheConfig {
                shards: Some(4),
                ..Default::default()
            },
            compute,
        )),
    ));
    caches
}

/// Routes cache events to the test output; filter with `RUST_LOG`.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Runs `f` on `NUM_THREADS` threads released together, collecting results in spawn order.
fn run_together<T, F>(f: F) -> Vec<T>
where
    T: Send + 'static,
    F: Fn(usize) -> T + Send + Sync + 'static,
{
    let barrier = Arc::new(Barrier::new(NUM_THREADS));
    let f = Arc::new(f);
    let handles: Vec<_> = (0..NUM_THREADS)
        .map(|thread_id| {
            let barrier = Arc::clone(&barrier);
            let f = Arc::clone(&f);
            thread::spawn(move || {
                barrier.wait();
                f(thread_id)
            })
        })
        .collect();
    handles.into_iter().map(|h| h.join().unwrap()).collect()
}

// ============================================================================
// SEGMENT 1: EXACTLY ONCE
// ============================================================================

#[test]
fn test_same_missing_key_computed_once() {
    init_tracing();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let compute = move |key: &u32| {
        counter.fetch_add(1, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(50));
        Ok::<_, Infallible>(Some(Arc::new(format!("value-{key}"))))
    };

    for (name, cache) in every_variant(compute) {
        calls.store(0, Ordering::SeqCst);

        let worker = Arc::clone(&cache);
        let results = run_together(move |_| worker.get(42).unwrap());

        assert_eq!(calls.load(Ordering::SeqCst), 1, "{name}");
        assert_eq!(results.len(), NUM_THREADS);
        for value in &results {
            assert!(Arc::ptr_eq(value, &results[0]), "{name}: every caller sees the stored value");
        }
        assert_eq!(*results[0], "value-42");

        let metrics = cache.metrics();
        assert_eq!(metrics["requests"], NUM_THREADS as f64, "{name}");
        assert_eq!(metrics["computes"], 1.0, "{name}");
        assert_eq!(metrics["cache_hits"], (NUM_THREADS - 1) as f64, "{name}");
    }
}

#[test]
fn test_two_callers_share_one_token() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let compute = move |key: &u32| {
        counter.fetch_add(1, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(100));
        Ok::<_, Infallible>(Some(Arc::new(format!("token-{key}"))))
    };

    for (name, cache) in every_variant(compute) {
        calls.store(0, Ordering::SeqCst);
        let barrier = Arc::new(Barrier::new(2));

        let spawn_caller = |cache: Arc<dyn SharedCache<Arc<String>, Infallible>>| {
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                cache.get(1).unwrap()
            })
        };
        let a = spawn_caller(Arc::clone(&cache));
        let b = spawn_caller(Arc::clone(&cache));
        let (a, b) = (a.join().unwrap(), b.join().unwrap());

        assert!(Arc::ptr_eq(&a, &b), "{name}: A and B must receive the same allocation");
        assert_eq!(calls.load(Ordering::SeqCst), 1, "{name}");
    }
}

#[test]
fn test_variants_agree_after_concurrent_fill() {
    let compute = |key: &u32| Ok::<_, Infallible>(Some(format!("{key:04x}")));
    let mut mappings = Vec::new();

    for (name, cache) in every_variant(compute) {
        let worker = Arc::clone(&cache);
        run_together(move |thread_id| {
            for step in 0..300u32 {
                let key = (step * 7 + thread_id as u32 * 13) % 300;
                worker.get(key).unwrap();
            }
        });
        assert_eq!(cache.metrics()["computes"], 300.0, "{name}");

        let mapping: Vec<String> = (0..300).map(|key| cache.get(key).unwrap()).collect();
        assert_eq!(cache.metrics()["computes"], 300.0, "{name}: reading back must not compute");
        mappings.push((name, mapping));
    }

    let (_, reference) = &mappings[0];
    for (name, mapping) in &mappings[1..] {
        assert_eq!(mapping, reference, "{name} disagrees with {}", mappings[0].0);
    }
}

#[test]
fn test_overlapping_keys_each_computed_once() {
    let per_key = Arc::new(Mutex::new(HashMap::<u32, usize>::new()));
    let counter = Arc::clone(&per_key);
    let compute = move |key: &u32| {
        *counter.lock().entry(*key).or_insert(0) += 1;
        Ok::<_, Infallible>(Some(u64::from(*key) * 3))
    };

    for (name, cache) in every_variant(compute) {
        per_key.lock().clear();

        let worker = Arc::clone(&cache);
        run_together(move |thread_id| {
            // Each thread walks the key space from a different starting point.
            for step in 0..200u32 {
                let key = (step + thread_id as u32 * 25) % 200;
                assert_eq!(worker.get(key).unwrap(), u64::from(key) * 3);
            }
        });

        let per_key = per_key.lock();
        assert_eq!(per_key.len(), 200, "{name}");
        assert!(
            per_key.values().all(|&count| count == 1),
            "{name}: some key was computed more than once"
        );
    }
}

#[test]
fn test_upgrade_cache_reports_contention() {
    let cache = Arc::new(LockUpgradeCache::new(|key: &u32| {
        thread::sleep(Duration::from_millis(30));
        Ok::<_, Infallible>(Some(*key))
    }));

    let worker = Arc::clone(&cache);
    run_together(move |_| worker.get(5).unwrap());

    let stats = cache.stats().snapshot();
    assert_eq!(stats.computes, 1);
    assert_eq!(stats.requests, NUM_THREADS as u64);
    // Whoever did not compute got the value on the first or second look.
    assert_eq!(stats.cache_hits, NUM_THREADS as u64 - 1);
    assert!(stats.recheck_hits <= stats.contended_upgrades);
}

// ============================================================================
// SEGMENT 2: BLOCKING BEHAVIOR
// ============================================================================

#[test]
fn test_caller_waits_for_in_flight_compute() {
    let (started_tx, started_rx) = mpsc::channel::<()>();
    let started_tx = Arc::new(Mutex::new(started_tx));
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let compute = move |_: &u32| {
        counter.fetch_add(1, Ordering::SeqCst);
        let _ = started_tx.lock().send(());
        thread::sleep(Duration::from_millis(200));
        let name = thread::current().name().unwrap_or("unnamed").to_string();
        Ok::<_, Infallible>(Some(name))
    };

    for (name, cache) in every_variant(compute) {
        calls.store(0, Ordering::SeqCst);

        let first = Arc::clone(&cache);
        let writer = thread::Builder::new()
            .name("writer".into())
            .spawn(move || first.get(1234).unwrap())
            .unwrap();

        // The compute function is now running under exclusive access.
        started_rx.recv_timeout(Duration::from_secs(10)).unwrap();

        let second = Arc::clone(&cache);
        let reader = thread::Builder::new()
            .name("reader".into())
            .spawn(move || second.get(1234).unwrap())
            .unwrap();

        assert_eq!(writer.join().unwrap(), "writer", "{name}");
        assert_eq!(reader.join().unwrap(), "writer", "{name}: reader must reuse the value");
        assert_eq!(calls.load(Ordering::SeqCst), 1, "{name}");
    }
}

// ============================================================================
// SEGMENT 3: FAILURES UNDER CONTENTION
// ============================================================================

#[test]
fn test_failed_compute_under_contention_leaves_key_computable() {
    init_tracing();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    // Only the very first call fails.
    let compute = move |key: &u32| {
        let call = counter.fetch_add(1, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(20));
        if call == 0 {
            Err("transient")
        } else {
            Ok(Some(*key + 1))
        }
    };

    for (name, cache) in every_variant(compute) {
        calls.store(0, Ordering::SeqCst);

        let worker = Arc::clone(&cache);
        let results = run_together(move |_| worker.get(9));

        let failures = results.iter().filter(|r| r.is_err()).count();
        let successes: Vec<u32> = results.into_iter().filter_map(Result::ok).collect();
        assert_eq!(failures, 1, "{name}");
        assert_eq!(successes.len(), NUM_THREADS - 1, "{name}");
        assert!(successes.iter().all(|&v| v == 10), "{name}");
        // One failing call plus exactly one successful compute.
        assert_eq!(calls.load(Ordering::SeqCst), 2, "{name}");

        let metrics = cache.metrics();
        assert_eq!(metrics["compute_failures"], 1.0, "{name}");
        assert_eq!(metrics["computes"], 1.0, "{name}");
    }
}
