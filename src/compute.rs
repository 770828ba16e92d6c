//! Compute-function wrapper.
//!
//! Every cache stores its compute function as a [`NonNullCompute`]. The wrapper
//! rejects an absent result before it can reach the map, naming the offending
//! key in the error so the failure can be traced back to its input.

use crate::error::CacheError;
use core::convert::Infallible;
use core::fmt;
use tracing::warn;

type ComputeFn<K, V, E> = dyn Fn(&K) -> Result<Option<V>, E> + Send + Sync;

/// A caller-supplied `key -> value` function that is never allowed to yield an
/// absent value.
///
/// The inner function returns `Ok(Some(value))` on success, `Ok(None)` when it
/// has no value for the key (an invariant violation), or `Err(e)` when it fails.
pub struct NonNullCompute<K, V, E> {
    func: Box<ComputeFn<K, V, E>>,
}

impl<K, V, E> NonNullCompute<K, V, E> {
    /// Wraps a fallible compute function.
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(&K) -> Result<Option<V>, E> + Send + Sync + 'static,
    {
        Self {
            func: Box::new(func),
        }
    }
}

impl<K, V> NonNullCompute<K, V, Infallible> {
    /// Wraps a compute function that always produces a value.
    pub fn infallible<F>(func: F) -> Self
    where
        F: Fn(&K) -> V + Send + Sync + 'static,
    {
        Self::new(move |key: &K| Ok(Some(func(key))))
    }
}

impl<K: fmt::Debug, V, E> NonNullCompute<K, V, E> {
    /// Invokes the wrapped function for `key`.
    ///
    /// # Errors
    ///
    /// - [`CacheError::ComputeFailure`] carrying the function's own error.
    /// - [`CacheError::InvariantViolation`] if the function produced no value.
    pub fn call(&self, key: &K) -> Result<V, CacheError<E>> {
        match (self.func)(key) {
            Ok(Some(value)) => Ok(value),
            Ok(None) => {
                // The key goes into the error so the bad input is visible to the caller.
                let key = format!("{key:?}");
                warn!(key = %key, "compute function produced an absent value");
                Err(CacheError::InvariantViolation { key })
            }
            Err(e) => Err(CacheError::ComputeFailure(e)),
        }
    }
}

impl<K, V, E> fmt::Debug for NonNullCompute<K, V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NonNullCompute").finish_non_exhaustive()
    }
}
