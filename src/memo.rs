//! Memoizing Cache Implementations
//!
//! Four interchangeable caches that share one contract: `get(key)` returns the
//! value for `key`, computing it first if the key has never been seen. For any
//! key the compute function runs at most once successfully, even when many
//! threads ask for the same missing key at the same moment.
//!
//! # Available Caches
//!
//! | Type | Synchronization | Hits | Misses |
//! |------|-----------------|------|--------|
//! | [`LockUpgradeCache`] | one stamped lock | shared | upgrade in place, else block |
//! | [`RwLockCache`] | one `parking_lot::RwLock` | shared | release, re-lock exclusive, re-check |
//! | [`CoarseMutexCache`] | one `parking_lot::Mutex` | serialized | serialized |
//! | [`AtomicMapCache`] | `DashMap` shards | shared per shard | exclusive per shard |
//!
//! ## Why One Lock Per Cache?
//!
//! The first three caches hold a single lock for the whole instance and keep it
//! exclusive while the compute function runs. A slow compute for one key
//! therefore delays misses and hits on every other key. This is the intended
//! trade-off: it makes the ordering guarantee simple (the first caller to get
//! exclusive access with the key absent computes it, everyone else sees that
//! value) and keeps the lock count independent of the key count.
//! [`AtomicMapCache`] is the scalable alternative; its map shards its own locks
//! internally and the cache does not see them.
//!
//! ## Lock Upgrade
//!
//! ```text
//!  Optimistic: read stamp ──▶ lookup ──hit──▶ return
//!                               │ miss
//!                               ▼
//!                    try_convert_to_write_lock
//!                     │ ok                 │ contended
//!                     ▼                    ▼
//!             compute, insert     unlock_read, write_lock (blocks)
//!                     │                    │
//!                     ▼                    ▼
//!                   return     Exclusive: lookup ──hit──▶ return
//!                                          │ miss
//!                                          ▼
//!                          convert (no-op) ─▶ compute, insert, return
//! ```
//!
//! The second iteration runs under a lock that cannot be contended away, so the
//! loop always ends within two iterations.
//!
//! # Errors
//!
//! Every `get` returns [`CacheResult`]. A compute error or an absent result is
//! returned to the caller and nothing is stored, so the next `get` for that key
//! computes again. Locks are released on every exit path, including a panic in
//! the compute function.
//!
//! # Re-entrancy
//!
//! A compute function must not call back into the cache it belongs to. The
//! three single-lock caches deadlock on any key: the nested `get` waits on the
//! exclusive access its own caller holds. [`AtomicMapCache`] deadlocks when the
//! nested key hashes to the shard being filled, which always includes the key
//! being computed.
//!
//! # Example
//!
//! ```
//! use memo_cache::{AtomicMapCache, CoarseMutexCache, LockUpgradeCache, MemoCache, RwLockCache};
//! use std::convert::Infallible;
//! use std::sync::Arc;
//!
//! fn square(key: &u64) -> Result<Option<u64>, Infallible> {
//!     Ok(Some(key * key))
//! }
//!
//! let caches: Vec<Arc<dyn MemoCache<u64, u64, Error = Infallible> + Send + Sync>> = vec![
//!     Arc::new(LockUpgradeCache::new(square)),
//!     Arc::new(RwLockCache::new(square)),
//!     Arc::new(CoarseMutexCache::new(square)),
//!     Arc::new(AtomicMapCache::new(square)),
//! ];
//!
//! for cache in &caches {
//!     assert_eq!(cache.get(9).unwrap(), 81);
//! }
//! ```

mod atomic;
mod mutex;
mod rwlock;
mod upgrade;

pub use self::atomic::AtomicMapCache;
pub use self::mutex::CoarseMutexCache;
pub use self::rwlock::RwLockCache;
pub use self::upgrade::LockUpgradeCache;

use crate::error::{CacheError, CacheResult};

/// The memoizing cache contract shared by every variant.
pub trait MemoCache<K, V> {
    /// Error type of the compute function.
    type Error;

    /// Returns the value for `key`, computing and storing it on first use.
    ///
    /// # Errors
    ///
    /// - [`CacheError::ComputeFailure`] if the compute function failed.
    /// - [`CacheError::InvariantViolation`] if it produced no value.
    ///
    /// In both cases nothing is stored.
    fn get(&self, key: K) -> CacheResult<V, Self::Error>;

    /// Like [`get`](Self::get), for callers whose key may be absent.
    ///
    /// # Errors
    ///
    /// [`CacheError::InvalidArgument`] for `None`, without touching any lock or
    /// the compute function. Otherwise as [`get`](Self::get).
    fn get_checked(&self, key: Option<K>) -> CacheResult<V, Self::Error> {
        match key {
            Some(key) => self.get(key),
            None => Err(CacheError::InvalidArgument),
        }
    }
}
