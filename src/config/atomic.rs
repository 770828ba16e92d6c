//! Configuration for the atomic-map cache.

/// Configuration for an [`AtomicMapCache`](crate::AtomicMapCache).
#[derive(Debug, Clone, Copy, Default)]
pub struct AtomicMapCacheConfig {
    /// Number of entries to pre-allocate room for.
    pub initial_capacity: usize,
    /// Number of internal shards. `None` lets the map pick from the CPU count.
    ///
    /// The map requires a power of two greater than one, so other values are
    /// rounded up (see [`shard_amount`](Self::shard_amount)).
    pub shards: Option<usize>,
}

impl AtomicMapCacheConfig {
    /// The shard count actually passed to the map, if one was requested.
    pub fn shard_amount(&self) -> Option<usize> {
        self.shards.map(|shards| shards.max(2).next_power_of_two())
    }
}
