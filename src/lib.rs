//! # memo-cache
//!
//! Thread-safe memoizing caches. Each cache wraps a compute function and
//! guarantees that, for any key, the function runs at most once successfully no
//! matter how many threads ask for that key at the same time. Values are never
//! evicted.
//!
//! ## Cache Selection Guide
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                Which Memoizing Cache Should I Use?                   │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │                                                                      │
//! │  Many threads, many distinct keys, slow compute?                     │
//! │        │                                                             │
//! │       Yes ──▶ ┌────────────────┐                                     │
//! │        │      │ AtomicMapCache │  (locks one shard per miss)          │
//! │       No      └────────────────┘                                     │
//! │        ▼                                                             │
//! │  Mostly hits, occasional misses?                                     │
//! │        │                                                             │
//! │       Yes ──▶ ┌──────────────────┐                                   │
//! │        │      │ LockUpgradeCache │  (shared hits, in-place upgrade)  │
//! │       No      └──────────────────┘                                   │
//! │        ▼                                                             │
//! │  ┌─────────────┐        ┌──────────────────┐                         │
//! │  │ RwLockCache │   or   │ CoarseMutexCache │                         │
//! │  └─────────────┘        └──────────────────┘                         │
//! │                                                                      │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Reference
//!
//! | Cache | Synchronization | Concurrent Hits | Config |
//! |-------|-----------------|-----------------|--------|
//! | [`LockUpgradeCache`] | [`StampedLock`] with upgrade | Yes | [`UpgradeCacheConfig`](config::UpgradeCacheConfig) |
//! | [`RwLockCache`] | `parking_lot::RwLock` + re-check | Yes | [`RwLockCacheConfig`](config::RwLockCacheConfig) |
//! | [`CoarseMutexCache`] | `parking_lot::Mutex` | No | [`MutexCacheConfig`](config::MutexCacheConfig) |
//! | [`AtomicMapCache`] | `DashMap` entry API | Yes | [`AtomicMapCacheConfig`](config::AtomicMapCacheConfig) |
//!
//! ## Code Example
//!
//! ```rust
//! use memo_cache::{CacheError, LockUpgradeCache, MemoCache};
//!
//! #[derive(Debug, PartialEq)]
//! struct ParseFailed;
//!
//! let cache = LockUpgradeCache::new(|text: &String| {
//!     text.parse::<i64>().map(Some).map_err(|_| ParseFailed)
//! });
//!
//! assert_eq!(cache.get("42".to_string()).unwrap(), 42);
//! assert!(matches!(
//!     cache.get("forty-two".to_string()),
//!     Err(CacheError::ComputeFailure(ParseFailed))
//! ));
//! assert!(matches!(cache.get_checked(None), Err(CacheError::InvalidArgument)));
//! ```
//!
//! ## Compute Contract
//!
//! A compute function returns `Result<Option<V>, E>`:
//!
//! - `Ok(Some(v))` stores `v` and returns a clone of it.
//! - `Ok(None)` stores nothing and fails with [`CacheError::InvariantViolation`].
//! - `Err(e)` stores nothing and fails with [`CacheError::ComputeFailure`].
//!
//! Failures are never cached; the next `get` for the same key calls the
//! compute function again.
//!
//! ## Logging
//!
//! The caches emit [`tracing`] events: `trace` for hits and misses, `debug` for
//! contended upgrades and re-check hits, `warn` for absent results and `error`
//! for a lock strategy that breaks its contract. Install any `tracing`
//! subscriber to see them.
//!
//! ## Modules
//!
//! - [`memo`]: the four cache implementations and the [`MemoCache`] trait
//! - [`lock`]: the stamped lock and its strategy trait
//! - [`compute`]: the compute function wrapper
//! - [`config`]: per-cache configuration
//! - [`metrics`]: hit, miss and compute counters
//! - [`error`]: the error type

/// Compute function wrapper.
///
/// Turns an absent result into an error so no cache can store one.
pub mod compute;

/// Cache configuration structures.
///
/// Provides configuration structures for all memoizing cache implementations.
pub mod config;

/// Error type shared by every cache.
pub mod error;

/// Stamped lock with in-place read-to-write conversion.
///
/// Provides the [`StampedLockStrategy`] seam the lock-upgrade cache is generic
/// over, and the default [`StampedLock`] implementation.
pub mod lock;

/// Memoizing cache implementations.
pub mod memo;

/// Cache metrics system.
///
/// Provides counters common to every cache and the [`CacheMetrics`](metrics::CacheMetrics)
/// reporting interface.
pub mod metrics;

// Re-export cache types
pub use memo::{AtomicMapCache, CoarseMutexCache, LockUpgradeCache, MemoCache, RwLockCache};

pub use compute::NonNullCompute;
pub use error::{CacheError, CacheResult};
pub use lock::{Stamp, StampMode, StampedLock, StampedLockStrategy};
