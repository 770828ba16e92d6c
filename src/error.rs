//! Error types for memoizing caches.
//!
//! Every cache variant reports failures through [`CacheError`], which is generic
//! over the error type `E` of the caller-supplied compute function. The compute
//! function's own error is carried unmodified in [`CacheError::ComputeFailure`],
//! so callers can match on it exactly as if they had called the function
//! themselves.
//!
//! # Example
//!
//! ```
//! use memo_cache::{CacheError, LockUpgradeCache, MemoCache};
//!
//! let cache = LockUpgradeCache::new(|key: &u32| {
//!     if *key == 0 {
//!         Err("zero is not allowed")
//!     } else {
//!         Ok(Some(key * 2))
//!     }
//! });
//!
//! assert_eq!(cache.get(21).unwrap(), 42);
//! assert!(matches!(cache.get(0), Err(CacheError::ComputeFailure("zero is not allowed"))));
//! assert!(matches!(cache.get_checked(None), Err(CacheError::InvalidArgument)));
//! ```

use thiserror::Error;

/// Result type returned by every cache `get`.
pub type CacheResult<V, E> = core::result::Result<V, CacheError<E>>;

/// Errors surfaced synchronously from a cache `get`.
///
/// None of these are retried internally. Because a failed `get` never commits an
/// entry, calling `get` again for the same key is the retry mechanism.
#[derive(Debug, Error)]
pub enum CacheError<E> {
    /// The caller passed an absent key. Detected before any lock is touched.
    #[error("key must not be absent")]
    InvalidArgument,

    /// The compute function returned no value for `key`. Nothing was stored.
    #[error("Key [{key}] maps to an absent value")]
    InvariantViolation {
        /// `Debug` rendering of the offending key.
        key: String,
    },

    /// The compute function failed. Nothing was stored.
    #[error(transparent)]
    ComputeFailure(E),

    /// The lock-upgrade protocol entered an iteration that cannot be reached
    /// with a conforming lock strategy.
    #[error("lock upgrade reached iteration {attempt}; at most two iterations are possible")]
    IllegalState {
        /// Zero-based index of the iteration that was refused.
        attempt: usize,
    },
}

impl<E> CacheError<E> {
    /// Returns `true` when a later `get` for the same key may succeed.
    ///
    /// Compute failures and absent results leave no residue in the cache, so the
    /// next `get` re-invokes the compute function.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CacheError::ComputeFailure(_) | CacheError::InvariantViolation { .. }
        )
    }

    /// Returns the compute function's error, if this is a compute failure.
    pub fn into_compute_failure(self) -> Option<E> {
        match self {
            CacheError::ComputeFailure(e) => Some(e),
            _ => None,
        }
    }
}
