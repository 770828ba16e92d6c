//! Cache Configuration Module
//!
//! One configuration struct per cache variant, each with public fields and a
//! `Default` impl, so a cache can be built with `init(config, compute)` or with
//! `new(compute)` for the defaults.
//!
//! # Design Philosophy
//!
//! - **Simple**: Just create the struct with all fields set
//! - **Defaults**: `..Default::default()` fills whatever you don't care about
//! - **No boilerplate**: No builder methods needed
//!
//! None of the configs bound the number of entries. Memoizing caches never evict,
//! so `initial_capacity` is only a pre-allocation hint.
//!
//! | Config | Cache |
//! |--------|-------|
//! | `UpgradeCacheConfig` | [`LockUpgradeCache`](crate::LockUpgradeCache) |
//! | `RwLockCacheConfig` | [`RwLockCache`](crate::RwLockCache) |
//! | `MutexCacheConfig` | [`CoarseMutexCache`](crate::CoarseMutexCache) |
//! | `AtomicMapCacheConfig` | [`AtomicMapCache`](crate::AtomicMapCache) |
//!
//! # Examples
//!
//! ```
//! use memo_cache::config::{MissPath, MutexCacheConfig};
//! use memo_cache::CoarseMutexCache;
//!
//! let config = MutexCacheConfig {
//!     miss_path: MissPath::LookupThenInsert,
//!     ..Default::default()
//! };
//! let cache = CoarseMutexCache::init(config, |key: &u64| Ok::<_, ()>(Some(key * key)));
//! assert_eq!(cache.get(12).unwrap(), 144);
//! ```

pub mod atomic;
pub mod mutex;
pub mod rwlock;
pub mod upgrade;

pub use atomic::AtomicMapCacheConfig;
pub use mutex::{MissPath, MutexCacheConfig};
pub use rwlock::{Fairness, RwLockCacheConfig};
pub use upgrade::UpgradeCacheConfig;
