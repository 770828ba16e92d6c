//! Coarse-Mutex Memoizing Cache
//!
//! One `parking_lot::Mutex` wraps the whole check-then-insert sequence. It is
//! the easiest cache to reason about and the slowest under load: hits on
//! unrelated keys queue behind each other and behind any running compute.
//!
//! Two lookup forms are available through [`MissPath`]:
//!
//! - [`MissPath::Entry`] resolves hit or miss with one hash lookup through the
//!   map's entry API, computing into the vacant slot.
//! - [`MissPath::LookupThenInsert`] performs a plain lookup, and on a miss
//!   computes and inserts as a separate step.

use crate::compute::NonNullCompute;
use crate::config::{MissPath, MutexCacheConfig};
use crate::error::CacheResult;
use crate::memo::MemoCache;
use crate::metrics::{CacheMetrics, MemoMetrics};
use core::fmt;
use core::hash::Hash;
use parking_lot::Mutex;
use tracing::trace;

#[cfg(feature = "hashbrown")]
use hashbrown::{hash_map::Entry, HashMap};

#[cfg(not(feature = "hashbrown"))]
use std::collections::{hash_map::Entry, HashMap};

/// A memoizing cache that serializes every `get` behind one mutex.
pub struct CoarseMutexCache<K, V, E> {
    compute: NonNullCompute<K, V, E>,
    map: Mutex<HashMap<K, V>>,
    miss_path: MissPath,
    metrics: MemoMetrics,
}

impl<K, V, E> CoarseMutexCache<K, V, E>
where
    K: Hash + Eq,
{
    /// Creates a cache around `compute` with the default configuration.
    pub fn new<F>(compute: F) -> Self
    where
        F: Fn(&K) -> Result<Option<V>, E> + Send + Sync + 'static,
    {
        Self::init(MutexCacheConfig::default(), compute)
    }

    /// Creates a cache around `compute` from a configuration.
    pub fn init<F>(config: MutexCacheConfig, compute: F) -> Self
    where
        F: Fn(&K) -> Result<Option<V>, E> + Send + Sync + 'static,
    {
        Self::with_compute(config, NonNullCompute::new(compute))
    }

    /// Creates a cache from an already wrapped compute function.
    pub fn with_compute(config: MutexCacheConfig, compute: NonNullCompute<K, V, E>) -> Self {
        Self {
            compute,
            map: Mutex::new(HashMap::with_capacity(config.initial_capacity)),
            miss_path: config.miss_path,
            metrics: MemoMetrics::new(),
        }
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.map.lock().len()
    }

    /// Returns `true` if nothing has been stored yet.
    pub fn is_empty(&self) -> bool {
        self.map.lock().is_empty()
    }

    /// Returns `true` if `key` already has a value. Never computes.
    pub fn contains_key(&self, key: &K) -> bool {
        self.map.lock().contains_key(key)
    }

    /// The lookup form this cache was configured with.
    pub fn miss_path(&self) -> MissPath {
        self.miss_path
    }
}

impl<K, V, E> CoarseMutexCache<K, V, E>
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

        let mut map = self.map.lock();
        match self.miss_path {
            MissPath::Entry => match map.entry(key) {
                Entry::Occupied(entry) => {
                    self.metrics.record_hit();
                    Ok(entry.get().clone())
                }
                Entry::Vacant(entry) => {
                    let value = self.compute_value(entry.key())?;
                    Ok(entry.insert(value).clone())
                }
            },
            MissPath::LookupThenInsert => {
                if let Some(value) = map.get(&key) {
                    self.metrics.record_hit();
                    return Ok(value.clone());
                }
                let value = self.compute_value(&key)?;
                map.insert(key, value.clone());
                Ok(value)
            }
        }
    }

    fn compute_value(&self, key: &K) -> CacheResult<V, E> {
        trace!(?key, "cache miss, computing");
        self.compute
            .call(key)
            .map(|value| {
                self.metrics.record_compute();
                value
            })
            .map_err(|err| {
                self.metrics.record_failure(&err);
                err
            })
    }
}

impl<K, V, E> MemoCache<K, V> for CoarseMutexCache<K, V, E>
where
    K: Hash + Eq + fmt::Debug,
    V: Clone,
{
    type Error = E;

    fn get(&self, key: K) -> CacheResult<V, E> {
        CoarseMutexCache::get(self, key)
    }
}

impl<K, V, E> CacheMetrics for CoarseMutexCache<K, V, E> {
    fn stats(&self) -> &MemoMetrics {
        &self.metrics
    }

    fn algorithm_name(&self) -> &'static str {
        "CoarseMutex"
    }
}

impl<K, V, E> fmt::Debug for CoarseMutexCache<K, V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoarseMutexCache")
            .field("miss_path", &self.miss_path)
            .field("metrics", &self.metrics.snapshot())
            .finish_non_exhaustive()
    }
}
