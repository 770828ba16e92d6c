//! Stamped lock primitives used by the lock-upgrade cache.
//!
//! The cache needs five operations from its synchronization primitive: take a
//! shared stamp, try to convert a held stamp to exclusive without blocking,
//! release a shared stamp, block for an exclusive stamp, and release a stamp of
//! either mode. [`StampedLockStrategy`] names exactly those five so a test can
//! substitute an instrumented implementation and force specific interleavings.
//!
//! ```text
//!                read_lock()                try_convert_to_write_lock()
//!   (unlocked) ─────────────▶ [Read stamp] ───────────────────────────▶ [Write stamp]
//!        ▲                        │   │  Err(read stamp) when contended       │
//!        │          unlock_read() │   │                                       │
//!        └────────────────────────┘   │                                       │
//!        ▲                                                                    │
//!        └──────────────────────────────── unlock() ──────────────────────────┘
//! ```
//!
//! Stamps are move-only tokens minted by this module. A stamp is consumed when
//! it is released or converted, so it cannot be released twice. Each stamp also
//! records the lock that issued it, and a [`StampedLock`] panics when handed a
//! stamp from any other lock.

use core::fmt;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_LOCK_ID: AtomicU64 = AtomicU64::new(1);

/// Access mode carried by a [`Stamp`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StampMode {
    /// Shared access; any number of holders.
    Read,
    /// Exclusive access; a single holder.
    Write,
}

/// Proof of a held lock mode.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a stamp must be released through the lock that issued it"]
pub struct Stamp {
    mode: StampMode,
    issuer: u64,
}

impl Stamp {
    fn new(mode: StampMode, issuer: u64) -> Self {
        Self { mode, issuer }
    }

    /// The mode this stamp grants.
    pub fn mode(&self) -> StampMode {
        self.mode
    }

    /// Returns `true` for an exclusive stamp.
    pub fn is_write(&self) -> bool {
        self.mode == StampMode::Write
    }
}

/// The primitive lock operations a memoizing cache needs.
///
/// # Safety
///
/// Caches hand out references into unsynchronized storage based on the stamps
/// returned here. Implementors must guarantee that:
///
/// - while any [`StampMode::Write`] stamp is outstanding, no other stamp of
///   either mode is outstanding;
/// - [`try_convert_to_write_lock`](Self::try_convert_to_write_lock) returns
///   `Ok` only with a write stamp, and returns `Err` with the caller's original
///   stamp still held;
/// - releasing a stamp happens-before any later acquisition that it unblocks;
/// - a stamp issued by a different lock is never accepted.
///
/// Wrapping a conforming implementation and delegating every call to it
/// satisfies these requirements.
pub unsafe trait StampedLockStrategy: Send + Sync {
    /// Blocks until shared access is granted.
    fn read_lock(&self) -> Stamp;

    /// Converts `stamp` to exclusive access without blocking.
    ///
    /// A write stamp converts to itself. A read stamp converts only when its
    /// holder is the sole reader and no writer holds the lock.
    fn try_convert_to_write_lock(&self, stamp: Stamp) -> Result<Stamp, Stamp>;

    /// Releases a shared stamp.
    fn unlock_read(&self, stamp: Stamp);

    /// Blocks until exclusive access is granted.
    fn write_lock(&self) -> Stamp;

    /// Releases a stamp of either mode.
    fn unlock(&self, stamp: Stamp);
}

// SAFETY: every operation delegates to the wrapped strategy, which upholds the contract.
unsafe impl<T: StampedLockStrategy + ?Sized> StampedLockStrategy for Arc<T> {
    fn read_lock(&self) -> Stamp {
        (**self).read_lock()
    }

    fn try_convert_to_write_lock(&self, stamp: Stamp) -> Result<Stamp, Stamp> {
        (**self).try_convert_to_write_lock(stamp)
    }

    fn unlock_read(&self, stamp: Stamp) {
        (**self).unlock_read(stamp)
    }

    fn write_lock(&self) -> Stamp {
        (**self).write_lock()
    }

    fn unlock(&self, stamp: Stamp) {
        (**self).unlock(stamp)
    }
}

#[derive(Debug, Default)]
struct LockState {
    readers: usize,
    writer: bool,
    waiting_writers: usize,
}

/// Production stamped lock.
///
/// Readers share the lock; a writer excludes everyone. New readers wait while a
/// writer is queued so a steady stream of hits cannot starve a miss. A sole
/// reader may convert its stamp to exclusive without releasing it.
pub struct StampedLock {
    id: u64,
    state: Mutex<LockState>,
    readers_cv: Condvar,
    writers_cv: Condvar,
}

impl StampedLock {
    /// Creates an unlocked stamped lock.
    pub fn new() -> Self {
        Self {
            id: NEXT_LOCK_ID.fetch_add(1, Ordering::Relaxed),
            state: Mutex::new(LockState::default()),
            readers_cv: Condvar::new(),
            writers_cv: Condvar::new(),
        }
    }

    /// Number of outstanding read stamps.
    pub fn reader_count(&self) -> usize {
        self.state.lock().readers
    }

    /// Returns `true` while a write stamp is outstanding.
    pub fn is_write_locked(&self) -> bool {
        self.state.lock().writer
    }

    fn stamp(&self, mode: StampMode) -> Stamp {
        Stamp::new(mode, self.id)
    }

    /// Panics on a stamp this lock did not issue. Accepting one would let a
    /// caller release access that somebody else holds.
    fn check_issuer(&self, stamp: &Stamp) {
        assert_eq!(stamp.issuer, self.id, "stamp was issued by a different lock");
    }

    fn release_write(&self, state: &mut LockState) {
        assert!(state.writer, "unlock of a write stamp while not write-locked");
        state.writer = false;
        self.writers_cv.notify_one();
        self.readers_cv.notify_all();
    }

    fn release_read(&self, state: &mut LockState) {
        assert!(state.readers > 0, "unlock_read without an outstanding read stamp");
        state.readers -= 1;
        if state.readers == 0 {
            self.writers_cv.notify_one();
        }
    }
}

impl Default for StampedLock {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StampedLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("StampedLock")
            .field("id", &self.id)
            .field("readers", &state.readers)
            .field("writer", &state.writer)
            .field("waiting_writers", &state.waiting_writers)
            .finish()
    }
}

// SAFETY: `writer` is set only when `readers == 0`, readers are admitted only while
// `writer` is clear, and conversion requires the caller to be the sole reader. Every
// release and conversion first checks that the stamp carries this lock's id. All
// state changes happen under `state`, whose lock/unlock provide the ordering.
unsafe impl StampedLockStrategy for StampedLock {
    fn read_lock(&self) -> Stamp {
        let mut state = self.state.lock();
        while state.writer || state.waiting_writers > 0 {
            self.readers_cv.wait(&mut state);
        }
        state.readers += 1;
        self.stamp(StampMode::Read)
    }

    fn try_convert_to_write_lock(&self, stamp: Stamp) -> Result<Stamp, Stamp> {
        self.check_issuer(&stamp);
        if stamp.is_write() {
            return Ok(stamp);
        }
        let mut state = self.state.lock();
        if state.readers == 1 && !state.writer {
            state.readers = 0;
            state.writer = true;
            Ok(self.stamp(StampMode::Write))
        } else {
            Err(stamp)
        }
    }

    fn unlock_read(&self, stamp: Stamp) {
        self.check_issuer(&stamp);
        assert_eq!(stamp.mode, StampMode::Read, "unlock_read called with a write stamp");
        let mut state = self.state.lock();
        self.release_read(&mut state);
    }

    fn write_lock(&self) -> Stamp {
        let mut state = self.state.lock();
        state.waiting_writers += 1;
        while state.writer || state.readers > 0 {
            self.writers_cv.wait(&mut state);
        }
        state.waiting_writers -= 1;
        state.writer = true;
        self.stamp(StampMode::Write)
    }

    fn unlock(&self, stamp: Stamp) {
        self.check_issuer(&stamp);
        let mut state = self.state.lock();
        match stamp.mode {
            StampMode::Read => self.release_read(&mut state),
            StampMode::Write => self.release_write(&mut state),
        }
    }
}

/// Holds whichever stamp is current and releases it on drop.
///
/// Every exit from a cache `get` (return, error, or unwinding out of the compute
/// function) passes through this guard's `Drop`.
pub(crate) struct StampGuard<'a, L: StampedLockStrategy + ?Sized> {
    lock: &'a L,
    stamp: Option<Stamp>,
}

impl<'a, L: StampedLockStrategy + ?Sized> StampGuard<'a, L> {
    /// Blocks for a shared stamp.
    pub(crate) fn read(lock: &'a L) -> Self {
        let stamp = lock.read_lock();
        Self {
            lock,
            stamp: Some(stamp),
        }
    }

    /// Attempts the non-blocking conversion to exclusive access.
    ///
    /// On failure the guard still holds its original stamp.
    pub(crate) fn try_upgrade(&mut self) -> bool {
        match self.stamp.take() {
            Some(stamp) => match self.lock.try_convert_to_write_lock(stamp) {
                Ok(write) => {
                    self.stamp = Some(write);
                    true
                }
                Err(original) => {
                    self.stamp = Some(original);
                    false
                }
            },
            None => false,
        }
    }

    /// Releases the held shared stamp and blocks for an exclusive one.
    pub(crate) fn relock_exclusive(&mut self) {
        if let Some(stamp) = self.stamp.take() {
            self.lock.unlock_read(stamp);
        }
        self.stamp = Some(self.lock.write_lock());
    }

    pub(crate) fn holds_write(&self) -> bool {
        self.stamp.as_ref().is_some_and(Stamp::is_write)
    }
}

impl<L: StampedLockStrategy + ?Sized> Drop for StampGuard<'_, L> {
    fn drop(&mut self) {
        if let Some(stamp) = self.stamp.take() {
            self.lock.unlock(stamp);
        }
    }
}
