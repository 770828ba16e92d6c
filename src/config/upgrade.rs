//! Configuration for the lock-upgrade cache.

/// Configuration for a [`LockUpgradeCache`](crate::LockUpgradeCache).
///
/// The lock strategy is not part of the config: production caches always use
/// [`StampedLock`](crate::lock::StampedLock), and tests inject a strategy
/// through `init_with_lock`.
#[derive(Debug, Clone, Copy, Default)]
pub struct UpgradeCacheConfig {
    /// Number of entries to pre-allocate room for.
    pub initial_capacity: usize,
}
