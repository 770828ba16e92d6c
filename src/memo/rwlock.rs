//! Read/Write-Lock Memoizing Cache
//!
//! Uses a conventional `parking_lot::RwLock`, which cannot upgrade a shared
//! guard to an exclusive one. A miss therefore has to release the shared guard
//! before taking the exclusive one, and in that gap another caller can take the
//! exclusive guard first and insert the value. The second lookup under the
//! exclusive guard catches that case; without it the compute function would run
//! twice for the same key under contention.
//!
//! Compared to [`LockUpgradeCache`](crate::LockUpgradeCache), every miss pays
//! for a release and a second acquisition even when nobody else is around.

use crate::compute::NonNullCompute;
use crate::config::{Fairness, RwLockCacheConfig};
use crate::error::CacheResult;
use crate::memo::MemoCache;
use crate::metrics::{CacheMetrics, MemoMetrics};
use core::fmt;
use core::hash::Hash;
use parking_lot::{RwLock, RwLockWriteGuard};
use tracing::{debug, trace};

#[cfg(feature = "hashbrown")]
use hashbrown::HashMap;

#[cfg(not(feature = "hashbrown"))]
use std::collections::HashMap;

/// A memoizing cache guarded by a single read/write lock with an explicit
/// double-check on misses.
pub struct RwLockCache<K, V, E> {
    compute: NonNullCompute<K, V, E>,
    map: RwLock<HashMap<K, V>>,
    fairness: Fairness,
    metrics: MemoMetrics,
}

impl<K, V, E> RwLockCache<K, V, E>
where
    K: Hash + Eq,
{
    /// Creates a cache around `compute` with the default configuration.
    pub fn new<F>(compute: F) -> Self
    where
        F: Fn(&K) -> Result<Option<V>, E> + Send + Sync + 'static,
    {
        Self::init(RwLockCacheConfig::default(), compute)
    }

    /// Creates a cache around `compute` from a configuration.
    pub fn init<F>(config: RwLockCacheConfig, compute: F) -> Self
    where
        F: Fn(&K) -> Result<Option<V>, E> + Send + Sync + 'static,
    {
        Self::with_compute(config, NonNullCompute::new(compute))
    }

    /// Creates a cache from an already wrapped compute function.
    pub fn with_compute(config: RwLockCacheConfig, compute: NonNullCompute<K, V, E>) -> Self {
        Self {
            compute,
            map: RwLock::new(HashMap::with_capacity(config.initial_capacity)),
            fairness: config.fairness,
            metrics: MemoMetrics::new(),
        }
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    /// Returns `true` if nothing has been stored yet.
    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }

    /// Returns `true` if `key` already has a value. Never computes.
    pub fn contains_key(&self, key: &K) -> bool {
        self.map.read().contains_key(key)
    }

    fn release(&self, guard: RwLockWriteGuard<'_, HashMap<K, V>>) {
        if self.fairness.is_fair() {
            RwLockWriteGuard::unlock_fair(guard);
        } else {
            drop(guard);
        }
    }
}

impl<K, V, E> RwLockCache<K, V, E>
where
    K: Hash + Eq + fmt::Debug,
    V: Clone,
{
    /// Returns the value for `key`, computing and storing it on first use.
    ///
    /// # Errors
    ///
    /// [`CacheError::ComputeFailure`](crate::CacheError::ComputeFailure) or
    /// [`CacheError::InvariantViolation`](crate::CacheError::InvariantViolation)
    /// from the compute function; nothing is stored.
    pub fn get(&self, key: K) -> CacheResult<V, E> {
        self.metrics.record_request();

        // The shared guard is a temporary of this statement and is released at its end.
        let hit = self.map.read().get(&key).cloned();
        if let Some(value) = hit {
            trace!(?key, "cache hit");
            self.metrics.record_hit();
            return Ok(value);
        }

        let mut map = self.map.write();
        // Another caller may have taken the exclusive guard between our two acquisitions.
        let hit = map.get(&key).cloned();
        if let Some(value) = hit {
            debug!(?key, "value inserted by another caller while waiting");
            self.metrics.record_recheck_hit();
            self.release(map);
            return Ok(value);
        }

        trace!(?key, "cache miss, computing");
        let result = match self.compute.call(&key) {
            Ok(value) => {
                map.insert(key, value.clone());
                self.metrics.record_compute();
                Ok(value)
            }
            Err(err) => {
                self.metrics.record_failure(&err);
                Err(err)
            }
        };
        self.release(map);
        result
    }
}

impl<K, V, E> MemoCache<K, V> for RwLockCache<K, V, E>
where
    K: Hash + Eq + fmt::Debug,
    V: Clone,
{
    type Error = E;

    fn get(&self, key: K) -> CacheResult<V, E> {
        RwLockCache::get(self, key)
    }
}

impl<K, V, E> CacheMetrics for RwLockCache<K, V, E> {
    fn stats(&self) -> &MemoMetrics {
        &self.metrics
    }

    fn algorithm_name(&self) -> &'static str {
        "RwLock"
    }
}

impl<K, V, E> fmt::Debug for RwLockCache<K, V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RwLockCache")
            .field("fairness", &self.fairness)
            .field("metrics", &self.metrics.snapshot())
            .finish_non_exhaustive()
    }
}
