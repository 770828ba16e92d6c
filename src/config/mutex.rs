//! Configuration for the coarse-mutex cache.

/// How a [`CoarseMutexCache`](crate::CoarseMutexCache) resolves a lookup while
/// holding its mutex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissPath {
    /// Single hash lookup through the map's entry API.
    #[default]
    Entry,
    /// Look the key up, and on a miss compute and insert in a second step.
    ///
    /// Costs a second hash lookup per miss. Useful when each map access should
    /// be observable on its own.
    LookupThenInsert,
}

/// Configuration for a [`CoarseMutexCache`](crate::CoarseMutexCache).
#[derive(Debug, Clone, Copy, Default)]
pub struct MutexCacheConfig {
    /// Number of entries to pre-allocate room for.
    pub initial_capacity: usize,
    /// Lookup strategy used under the mutex.
    pub miss_path: MissPath,
}
