//! Cache Metrics System
//!
//! Every memoizing cache owns a [`MemoMetrics`] block of atomic counters that
//! `get` bumps on its way through the hit, miss and failure paths. Counters use
//! relaxed atomics: they are observations, not synchronization, and never
//! influence which caller computes a value.
//!
//! Reporting goes through the [`CacheMetrics`] trait, which renders the counters
//! into a `BTreeMap` so metric names always come out in the same order.
//!
//! # Example
//!
//! ```
//! use memo_cache::metrics::CacheMetrics;
//! use memo_cache::RwLockCache;
//!
//! let cache = RwLockCache::new(|key: &u32| Ok::<_, ()>(Some(*key)));
//! cache.get(1).unwrap();
//! cache.get(1).unwrap();
//!
//! let metrics = cache.metrics();
//! assert_eq!(metrics["requests"], 2.0);
//! assert_eq!(metrics["cache_hits"], 1.0);
//! assert_eq!(metrics["computes"], 1.0);
//! assert_eq!(cache.algorithm_name(), "RwLock");
//! ```

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters shared by all callers of one cache instance.
#[derive(Debug, Default)]
pub struct MemoMetrics {
    requests: AtomicU64,
    cache_hits: AtomicU64,
    computes: AtomicU64,
    compute_failures: AtomicU64,
    absent_results: AtomicU64,
    contended_upgrades: AtomicU64,
    recheck_hits: AtomicU64,
}

impl MemoMetrics {
    /// Creates a zeroed set of counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// A `get` call entered the cache.
    pub(crate) fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    /// A `get` call was answered from the map, on either the first or second look.
    pub(crate) fn record_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// A value was found only on the second look, after exclusive access was taken.
    pub(crate) fn record_recheck_hit(&self) {
        self.recheck_hits.fetch_add(1, Ordering::Relaxed);
        self.record_hit();
    }

    /// The compute function produced a value that was stored.
    pub(crate) fn record_compute(&self) {
        self.computes.fetch_add(1, Ordering::Relaxed);
    }

    /// The non-blocking upgrade failed and the caller fell back to blocking.
    pub(crate) fn record_contended_upgrade(&self) {
        self.contended_upgrades.fetch_add(1, Ordering::Relaxed);
    }

    /// Records the outcome of a compute call that did not store a value.
    pub(crate) fn record_failure<E>(&self, err: &crate::CacheError<E>) {
        match err {
            crate::CacheError::InvariantViolation { .. } => {
                self.absent_results.fetch_add(1, Ordering::Relaxed);
            }
            crate::CacheError::ComputeFailure(_) => {
                self.compute_failures.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
    }

    /// Copies the current counter values.
    pub fn snapshot(&self) -> MemoMetricsSnapshot {
        MemoMetricsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            computes: self.computes.load(Ordering::Relaxed),
            compute_failures: self.compute_failures.load(Ordering::Relaxed),
            absent_results: self.absent_results.load(Ordering::Relaxed),
            contended_upgrades: self.contended_upgrades.load(Ordering::Relaxed),
            recheck_hits: self.recheck_hits.load(Ordering::Relaxed),
        }
    }

    /// Renders the counters as a sorted map for reporting.
    pub fn to_btreemap(&self) -> BTreeMap<String, f64> {
        self.snapshot().to_btreemap()
    }
}

/// Point-in-time copy of a cache's [`MemoMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoMetricsSnapshot {
    /// Total `get` calls that reached the cache with a key.
    pub requests: u64,
    /// Calls answered with an existing value.
    pub cache_hits: u64,
    /// Values computed and stored.
    pub computes: u64,
    /// Compute calls that returned an error.
    pub compute_failures: u64,
    /// Compute calls that returned no value.
    pub absent_results: u64,
    /// Lock upgrades that had to fall back to a blocking exclusive acquire.
    pub contended_upgrades: u64,
    /// Hits found only after exclusive access was acquired.
    pub recheck_hits: u64,
}

impl MemoMetricsSnapshot {
    /// Fraction of requests answered from the map, or 0.0 with no requests.
    pub fn hit_rate(&self) -> f64 {
        if self.requests > 0 {
            self.cache_hits as f64 / self.requests as f64
        } else {
            0.0
        }
    }

    /// Convert to a BTreeMap for reporting.
    pub fn to_btreemap(&self) -> BTreeMap<String, f64> {
        let mut metrics = BTreeMap::new();

        metrics.insert("absent_results".to_string(), self.absent_results as f64);
        metrics.insert("cache_hits".to_string(), self.cache_hits as f64);
        metrics.insert("compute_failures".to_string(), self.compute_failures as f64);
        metrics.insert("computes".to_string(), self.computes as f64);
        metrics.insert(
            "contended_upgrades".to_string(),
            self.contended_upgrades as f64,
        );
        metrics.insert("recheck_hits".to_string(), self.recheck_hits as f64);
        metrics.insert("requests".to_string(), self.requests as f64);

        metrics.insert(
            "cache_misses".to_string(),
            self.requests.saturating_sub(self.cache_hits) as f64,
        );
        metrics.insert("hit_rate".to_string(), self.hit_rate());

        metrics
    }
}

/// Trait that every memoizing cache implements for metrics reporting.
///
/// Lets callers collect and compare counters across cache variants without
/// knowing which variant they hold.
pub trait CacheMetrics {
    /// Live counters for this cache.
    fn stats(&self) -> &MemoMetrics;

    /// Returns all metrics as key-value pairs in deterministic order.
    fn metrics(&self) -> BTreeMap<String, f64> {
        self.stats().to_btreemap()
    }

    /// Variant name for identification (e.g. "LockUpgrade", "AtomicMap").
    fn algorithm_name(&self) -> &'static str;
}
