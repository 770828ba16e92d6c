//! Lock-Upgrade Memoizing Cache
//!
//! The most efficient of the lock-based caches. A lookup starts under a shared
//! stamp, so concurrent hits never wait on each other. On a miss the caller
//! tries to convert its shared stamp to an exclusive one in place; that only
//! succeeds when nobody else holds the lock. If it fails, the caller drops to
//! the blocking path: release the shared stamp, wait for an exclusive one, and
//! look again, because another caller may have inserted the value in between.
//!
//! The protocol is an explicit two-state machine, `Attempt::Optimistic` and
//! `Attempt::Exclusive`. The second state runs with an exclusive stamp that
//! no other caller can take away, so its conversion always succeeds and the
//! loop ends. A third iteration can only happen with a lock strategy that
//! breaks its contract; it is reported as [`CacheError::IllegalState`].
//!
//! # Example
//!
//! ```
//! use memo_cache::LockUpgradeCache;
//! use std::sync::Arc;
//! use std::thread;
//!
//! let cache = Arc::new(LockUpgradeCache::new(|key: &u32| {
//!     Ok::<_, std::convert::Infallible>(Some(format!("value-{key}")))
//! }));
//!
//! let handles: Vec<_> = (0..4)
//!     .map(|_| {
//!         let cache = Arc::clone(&cache);
//!         thread::spawn(move || cache.get(7).unwrap())
//!     })
//!     .collect();
//!
//! for handle in handles {
//!     assert_eq!(handle.join().unwrap(), "value-7");
//! }
//! assert_eq!(cache.len(), 1);
//! ```

use crate::compute::NonNullCompute;
use crate::config::UpgradeCacheConfig;
use crate::error::{CacheError, CacheResult};
use crate::lock::{StampGuard, StampedLock, StampedLockStrategy};
use crate::memo::MemoCache;
use crate::metrics::{CacheMetrics, MemoMetrics};
use core::cell::UnsafeCell;
use core::fmt;
use core::hash::Hash;
use tracing::{debug, error, trace};

#[cfg(feature = "hashbrown")]
use hashbrown::HashMap;

#[cfg(not(feature = "hashbrown"))]
use std::collections::HashMap;

/// Iterations of the upgrade protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    /// Holding the shared stamp taken on entry.
    Optimistic,
    /// Holding an exclusive stamp taken through the blocking path.
    Exclusive,
}

impl Attempt {
    fn index(self) -> usize {
        match self {
            Attempt::Optimistic => 0,
            Attempt::Exclusive => 1,
        }
    }

    /// The only transition is `Optimistic -> Exclusive`.
    fn next(self) -> Option<Attempt> {
        match self {
            Attempt::Optimistic => Some(Attempt::Exclusive),
            Attempt::Exclusive => None,
        }
    }
}

/// A memoizing cache guarded by a single stamped lock with in-place upgrade.
///
/// # Type Parameters
///
/// - `K`: Key type. Must implement `Hash + Eq + Debug`.
/// - `V`: Value type. Must implement `Clone`; `get` returns clones of the stored value.
/// - `E`: Error type of the compute function.
/// - `L`: Lock strategy. Defaults to [`StampedLock`]; tests may inject an
///   instrumented strategy with [`with_lock`](Self::with_lock).
pub struct LockUpgradeCache<K, V, E, L = StampedLock> {
    compute: NonNullCompute<K, V, E>,
    lock: L,
    map: UnsafeCell<HashMap<K, V>>,
    metrics: MemoMetrics,
}

// SAFETY: the map is only read while a stamp from `lock` is held and only mutated
// while a write stamp is held, which `StampedLockStrategy` guarantees is exclusive.
// Readers share `&K`/`&V` across threads (needs `Sync`); writers move keys and values
// in from, and clones out to, other threads (needs `Send`).
unsafe impl<K, V, E, L> Sync for LockUpgradeCache<K, V, E, L>
where
    K: Send + Sync,
    V: Send + Sync,
    L: StampedLockStrategy,
{
}

impl<K, V, E> LockUpgradeCache<K, V, E, StampedLock>
where
    K: Hash + Eq,
{
    /// Creates a cache around `compute` with the default configuration.
    pub fn new<F>(compute: F) -> Self
    where
        F: Fn(&K) -> Result<Option<V>, E> + Send + Sync + 'static,
    {
        Self::init(UpgradeCacheConfig::default(), compute)
    }

    /// Creates a cache around `compute` from a configuration.
    pub fn init<F>(config: UpgradeCacheConfig, compute: F) -> Self
    where
        F: Fn(&K) -> Result<Option<V>, E> + Send + Sync + 'static,
    {
        Self::with_parts(config, StampedLock::new(), NonNullCompute::new(compute))
    }
}

impl<K, V, E, L> LockUpgradeCache<K, V, E, L>
where
    K: Hash + Eq,
    L: StampedLockStrategy,
{
    /// Creates a cache that synchronizes through `lock` instead of a fresh
    /// [`StampedLock`].
    pub fn with_lock<F>(lock: L, compute: F) -> Self
    where
        F: Fn(&K) -> Result<Option<V>, E> + Send + Sync + 'static,
    {
        Self::init_with_lock(UpgradeCacheConfig::default(), lock, compute)
    }

    /// Creates a cache from a configuration and an injected lock strategy.
    pub fn init_with_lock<F>(config: UpgradeCacheConfig, lock: L, compute: F) -> Self
    where
        F: Fn(&K) -> Result<Option<V>, E> + Send + Sync + 'static,
    {
        Self::with_parts(config, lock, NonNullCompute::new(compute))
    }

    /// Creates a cache from an already wrapped compute function.
    pub fn with_parts(config: UpgradeCacheConfig, lock: L, compute: NonNullCompute<K, V, E>) -> Self {
        Self {
            compute,
            lock,
            map: UnsafeCell::new(HashMap::with_capacity(config.initial_capacity)),
            metrics: MemoMetrics::new(),
        }
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        let guard = StampGuard::read(&self.lock);
        self.map_ref(&guard).len()
    }

    /// Returns `true` if nothing has been stored yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` if `key` already has a value. Never computes.
    pub fn contains_key(&self, key: &K) -> bool {
        let guard = StampGuard::read(&self.lock);
        self.map_ref(&guard).contains_key(key)
    }

    fn map_ref<'g>(&'g self, _guard: &'g StampGuard<'_, L>) -> &'g HashMap<K, V> {
        // SAFETY: `_guard` holds a stamp from `self.lock`, so no write stamp is
        // outstanding elsewhere and the map is not being mutated.
        unsafe { &*self.map.get() }
    }
}

impl<K, V, E, L> LockUpgradeCache<K, V, E, L>
where
    K: Hash + Eq + fmt::Debug,
    V: Clone,
    L: StampedLockStrategy,
{
    /// Returns the value for `key`, computing and storing it on first use.
    ///
    /// # Errors
    ///
    /// - [`CacheError::ComputeFailure`] / [`CacheError::InvariantViolation`] from
    ///   the compute function; nothing is stored.
    /// - [`CacheError::IllegalState`] if the lock strategy refuses to convert a
    ///   stamp it issued in exclusive mode.
    pub fn get(&self, key: K) -> CacheResult<V, E> {
        self.metrics.record_request();

        let mut guard = StampGuard::read(&self.lock);
        let mut attempt = Attempt::Optimistic;
        loop {
            if let Some(value) = self.map_ref(&guard).get(&key) {
                match attempt {
                    Attempt::Optimistic => {
                        trace!(?key, "cache hit");
                        self.metrics.record_hit();
                    }
                    Attempt::Exclusive => {
                        debug!(?key, "value inserted by another caller while waiting");
                        self.metrics.record_recheck_hit();
                    }
                }
                return Ok(value.clone());
            }

            if guard.try_upgrade() {
                trace!(?key, attempt = attempt.index(), "cache miss, computing");
                return self.compute_and_insert(&guard, key);
            }

            match attempt.next() {
                Some(next) => {
                    debug!(?key, "upgrade contended, waiting for exclusive access");
                    self.metrics.record_contended_upgrade();
                    guard.relock_exclusive();
                    attempt = next;
                }
                None => {
                    error!(?key, "exclusive stamp failed to convert to itself");
                    return Err(CacheError::IllegalState {
                        attempt: attempt.index() + 1,
                    });
                }
            }
        }
    }

    fn compute_and_insert(&self, guard: &StampGuard<'_, L>, key: K) -> CacheResult<V, E> {
        debug_assert!(guard.holds_write());
        match self.compute.call(&key) {
            Ok(value) => {
                // SAFETY: `guard` holds the write stamp, so no other stamp is outstanding
                // and no reference into the map is alive.
                let map = unsafe { &mut *self.map.get() };
                map.insert(key, value.clone());
                self.metrics.record_compute();
                Ok(value)
            }
            Err(err) => {
                self.metrics.record_failure(&err);
                Err(err)
            }
        }
    }
}

impl<K, V, E, L> MemoCache<K, V> for LockUpgradeCache<K, V, E, L>
where
    K: Hash + Eq + fmt::Debug,
    V: Clone,
    L: StampedLockStrategy,
{
    type Error = E;

    fn get(&self, key: K) -> CacheResult<V, E> {
        LockUpgradeCache::get(self, key)
    }
}

impl<K, V, E, L> CacheMetrics for LockUpgradeCache<K, V, E, L> {
    fn stats(&self) -> &MemoMetrics {
        &self.metrics
    }

    fn algorithm_name(&self) -> &'static str {
        "LockUpgrade"
    }
}

impl<K, V, E, L> fmt::Debug for LockUpgradeCache<K, V, E, L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockUpgradeCache")
            .field("metrics", &self.metrics.snapshot())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::Stamp;
    use scoped_threadpool::Pool;
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    /// Delegates to a real lock but refuses every conversion.
    #[derive(Default)]
    struct NeverConverts {
        inner: StampedLock,
    }

    // SAFETY: every acquisition and release delegates to `inner`; refusing a
    // conversion hands back the caller's original stamp.
    unsafe impl StampedLockStrategy for NeverConverts {
        fn read_lock(&self) -> Stamp {
            self.inner.read_lock()
        }

        fn try_convert_to_write_lock(&self, stamp: Stamp) -> Result<Stamp, Stamp> {
            Err(stamp)
        }

        fn unlock_read(&self, stamp: Stamp) {
            self.inner.unlock_read(stamp)
        }

        fn write_lock(&self) -> Stamp {
            self.inner.write_lock()
        }

        fn unlock(&self, stamp: Stamp) {
            self.inner.unlock(stamp)
        }
    }

    #[test]
    fn test_attempt_transitions() {
        assert_eq!(Attempt::Optimistic.next(), Some(Attempt::Exclusive));
        assert_eq!(Attempt::Exclusive.next(), None);
        assert_eq!(Attempt::Exclusive.index(), 1);
    }

    #[test]
    fn test_upgrade_get_computes_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let cache = LockUpgradeCache::new(move |key: &u32| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, Infallible>(Some(key.to_string()))
        });

        assert_eq!(cache.get(1).unwrap(), "1");
        assert_eq!(cache.get(1).unwrap(), "1");
        assert_eq!(cache.get(2).unwrap(), "2");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.len(), 2);
        assert!(cache.contains_key(&1));
        assert!(!cache.contains_key(&3));

        let stats = cache.stats().snapshot();
        assert_eq!(stats.requests, 3);
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.computes, 2);
        assert_eq!(stats.contended_upgrades, 0);
    }

    #[test]
    fn test_upgrade_third_iteration_is_illegal_state() {
        let cache = LockUpgradeCache::with_lock(NeverConverts::default(), |key: &u32| {
            Ok::<_, Infallible>(Some(*key))
        });

        match cache.get(5) {
            Err(CacheError::IllegalState { attempt }) => assert_eq!(attempt, 2),
            other => panic!("expected illegal state, got {other:?}"),
        }
        assert!(cache.is_empty());
        // The exclusive stamp was released on the way out.
        assert!(!cache.lock.inner.is_write_locked());
        assert_eq!(cache.lock.inner.reader_count(), 0);
        assert_eq!(cache.stats().snapshot().contended_upgrades, 1);
    }

    #[test]
    fn test_upgrade_failure_releases_lock() {
        let cache = LockUpgradeCache::new(|key: &u32| {
            if *key == 0 {
                Err("zero")
            } else {
                Ok(Some(*key))
            }
        });

        assert!(matches!(cache.get(0), Err(CacheError::ComputeFailure("zero"))));
        assert!(!cache.lock.is_write_locked());
        assert_eq!(cache.get(4).unwrap(), 4);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_upgrade_panic_in_compute_releases_lock() {
        let cache = Arc::new(LockUpgradeCache::new(|key: &u32| {
            if *key == 13 {
                panic!("unlucky");
            }
            Ok::<_, Infallible>(Some(*key))
        }));

        let worker = Arc::clone(&cache);
        assert!(thread::spawn(move || worker.get(13)).join().is_err());
        assert!(!cache.lock.is_write_locked());
        assert_eq!(cache.get(12).unwrap(), 12);
        assert!(!cache.contains_key(&13));
    }

    #[test]
    fn test_upgrade_contention_single_compute() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let cache = LockUpgradeCache::new(move |key: &u64| {
            counter.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(20));
            Ok::<_, Infallible>(Some(Arc::new(key * 3)))
        });

        let results = parking_lot::Mutex::new(Vec::new());
        let mut pool = Pool::new(8);
        pool.scoped(|scope| {
            for _ in 0..8 {
                scope.execute(|| {
                    let value = cache.get(11).unwrap();
                    results.lock().push(value);
                });
            }
        });

        let results = results.into_inner();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(results.len(), 8);
        assert!(results.iter().all(|value| Arc::ptr_eq(value, &results[0])));
        assert_eq!(*results[0], 33);
    }

    #[test]
    fn test_shared_lock_rejects_foreign_release_during_compute() {
        let shared = Arc::new(StampedLock::new());
        let outside = Arc::clone(&shared);
        let cache = LockUpgradeCache::with_lock(Arc::clone(&shared), move |key: &u32| {
            assert!(outside.is_write_locked());
            // Another lock's stamp cannot release the write access held here.
            outside.unlock(StampedLock::new().write_lock());
            Ok::<_, Infallible>(Some(*key))
        });

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| cache.get(5)));

        assert!(outcome.is_err());
        assert!(!shared.is_write_locked());
        assert_eq!(shared.reader_count(), 0);
        assert!(cache.is_empty());
    }
}
