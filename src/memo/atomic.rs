//! Atomic-Map Memoizing Cache
//!
//! Hands the whole at-most-once guarantee to `DashMap`'s entry API. The cache
//! owns no lock of its own: `entry(key)` takes the write lock of the shard that
//! `key` hashes to and holds it until the vacant slot is filled or dropped, so
//! two callers can never compute the same key at once. Misses on keys in other
//! shards proceed in parallel.
//!
//! Hits take the cheaper shared path first (`DashMap::get`) and only fall
//! through to the entry API on a miss.
//!
//! Unlike the other caches, a slow compute only blocks the keys that share its
//! shard, not the whole cache.
//!
//! The shard lock is not re-entrant. A compute function that calls `get` on the
//! same cache for a key in its own shard, including its own key, deadlocks.

use crate::compute::NonNullCompute;
use crate::config::AtomicMapCacheConfig;
use crate::error::CacheResult;
use crate::memo::MemoCache;
use crate::metrics::{CacheMetrics, MemoMetrics};
use core::fmt;
use core::hash::Hash;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, trace};

/// A memoizing cache backed by a sharded concurrent map.
pub struct AtomicMapCache<K, V, E> {
    compute: NonNullCompute<K, V, E>,
    map: DashMap<K, V>,
    metrics: MemoMetrics,
}

impl<K, V, E> AtomicMapCache<K, V, E>
where
    K: Hash + Eq,
{
    /// Creates a cache around `compute` with the default configuration.
    pub fn new<F>(compute: F) -> Self
    where
        F: Fn(&K) -> Result<Option<V>, E> + Send + Sync + 'static,
    {
        Self::init(AtomicMapCacheConfig::default(), compute)
    }

    /// Creates a cache around `compute` from a configuration.
    pub fn init<F>(config: AtomicMapCacheConfig, compute: F) -> Self
    where
        F: Fn(&K) -> Result<Option<V>, E> + Send + Sync + 'static,
    {
        Self::with_compute(config, NonNullCompute::new(compute))
    }

    /// Creates a cache from an already wrapped compute function.
    pub fn with_compute(config: AtomicMapCacheConfig, compute: NonNullCompute<K, V, E>) -> Self {
        let map = match config.shard_amount() {
            Some(shards) => DashMap::with_capacity_and_shard_amount(config.initial_capacity, shards),
            None => DashMap::with_capacity(config.initial_capacity),
        };
        Self {
            compute,
            map,
            metrics: MemoMetrics::new(),
        }
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns `true` if nothing has been stored yet.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Returns `true` if `key` already has a value. Never computes.
    pub fn contains_key(&self, key: &K) -> bool {
        self.map.contains_key(key)
    }
}

impl<K, V, E> AtomicMapCache<K, V, E>
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

        // The shard read guard must be gone before `entry` takes the write guard.
        let hit = self.map.get(&key).map(|entry| entry.value().clone());
        if let Some(value) = hit {
            trace!(?key, "cache hit");
            self.metrics.record_hit();
            return Ok(value);
        }

        match self.map.entry(key) {
            Entry::Occupied(entry) => {
                debug!(key = ?entry.key(), "value inserted by another caller while waiting");
                self.metrics.record_recheck_hit();
                Ok(entry.get().clone())
            }
            Entry::Vacant(entry) => {
                trace!(key = ?entry.key(), "cache miss, computing");
                match self.compute.call(entry.key()) {
                    Ok(value) => {
                        self.metrics.record_compute();
                        Ok(entry.insert(value).value().clone())
                    }
                    Err(err) => {
                        self.metrics.record_failure(&err);
                        Err(err)
                    }
                }
            }
        }
    }
}

impl<K, V, E> MemoCache<K, V> for AtomicMapCache<K, V, E>
where
    K: Hash + Eq + fmt::Debug,
    V: Clone,
{
    type Error = E;

    fn get(&self, key: K) -> CacheResult<V, E> {
        AtomicMapCache::get(self, key)
    }
}

impl<K, V, E> CacheMetrics for AtomicMapCache<K, V, E> {
    fn stats(&self) -> &MemoMetrics {
        &self.metrics
    }

    fn algorithm_name(&self) -> &'static str {
        "AtomicMap"
    }
}

impl<K, V, E> fmt::Debug for AtomicMapCache<K, V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AtomicMapCache")
            .field("metrics", &self.metrics.snapshot())
            .finish_non_exhaustive()
    }
}
