//! Configuration for the read/write-lock cache.

/// How the exclusive guard is released after a miss.
///
/// `parking_lot`'s lock is eventually fair by default. `Fair` hands the lock
/// directly to the next queued waiter on every exclusive release, which bounds
/// waiting time at some cost in throughput.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Fairness {
    /// Release normally; a newly arriving thread may barge ahead of waiters.
    #[default]
    Unfair,
    /// Release with a direct hand-off to a waiting thread.
    Fair,
}

impl Fairness {
    /// Returns `true` for [`Fairness::Fair`].
    pub fn is_fair(self) -> bool {
        self == Fairness::Fair
    }
}

/// Configuration for a [`RwLockCache`](crate::RwLockCache).
#[derive(Debug, Clone, Copy, Default)]
pub struct RwLockCacheConfig {
    /// Number of entries to pre-allocate room for.
    pub initial_capacity: usize,
    /// Release policy for the exclusive guard.
    pub fairness: Fairness,
}
