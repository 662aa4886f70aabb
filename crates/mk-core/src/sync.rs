//! Host locks shared by signals and properties.
//!
//! A [`Lockable`] guards no data of its own. Components that live on the same
//! host share one `Arc<Lockable>` and keep their state in interior mutexes,
//! taking the host lock only for short, non-reentrant sections. Calling out to
//! user code with the host lock held is never permitted: either copy what is
//! needed first or release the lock with [`ScopeUnlock`].

use core::cell::Cell;
use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, MutexGuard};

thread_local! {
    static THREAD_TOKEN: Cell<u64> = const { Cell::new(0) };
}

fn current_thread_token() -> u64 {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    THREAD_TOKEN.with(|token| {
        if token.get() == 0 {
            token.set(NEXT.fetch_add(1, Ordering::Relaxed));
        }
        token.get()
    })
}

/// Data-less, non-reentrant lock with owner tracking.
pub struct Lockable {
    mutex: Mutex<()>,
    owner: AtomicU64,
    acquisitions: AtomicU64,
}

impl Default for Lockable {
    fn default() -> Self {
        Self::new()
    }
}

impl Lockable {
    pub fn new() -> Self {
        Self {
            mutex: Mutex::new(()),
            owner: AtomicU64::new(0),
            acquisitions: AtomicU64::new(0),
        }
    }

    /// Acquires the lock.
    ///
    /// # Panics
    ///
    /// Panics when the calling thread already holds this lock.
    pub fn lock(&self) -> LockGuard<'_> {
        LockGuard {
            lockable: self,
            guard: Some(self.acquire()),
        }
    }

    pub fn try_lock(&self) -> Option<LockGuard<'_>> {
        let guard = self.mutex.try_lock()?;
        self.mark_owned();
        Some(LockGuard {
            lockable: self,
            guard: Some(guard),
        })
    }

    pub fn is_locked(&self) -> bool {
        self.mutex.is_locked()
    }

    pub fn is_held_by_current_thread(&self) -> bool {
        self.owner.load(Ordering::Acquire) == current_thread_token()
    }

    /// Total number of acquisitions since creation.
    pub fn acquisitions(&self) -> u64 {
        self.acquisitions.load(Ordering::Relaxed)
    }

    fn acquire(&self) -> MutexGuard<'_, ()> {
        assert!(
            !self.is_held_by_current_thread(),
            "Lockable must not be locked twice by the same thread"
        );
        let guard = self.mutex.lock();
        self.mark_owned();
        guard
    }

    fn mark_owned(&self) {
        self.owner.store(current_thread_token(), Ordering::Release);
        self.acquisitions.fetch_add(1, Ordering::Relaxed);
    }

    fn release(&self, guard: MutexGuard<'_, ()>) {
        self.owner.store(0, Ordering::Release);
        drop(guard);
    }

    fn address(&self) -> usize {
        self as *const Self as usize
    }
}

impl fmt::Debug for Lockable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lockable")
            .field("locked", &self.is_locked())
            .field("acquisitions", &self.acquisitions())
            .finish()
    }
}

/// RAII guard returned by [`Lockable::lock`].
pub struct LockGuard<'a> {
    lockable: &'a Lockable,
    guard: Option<MutexGuard<'a, ()>>,
}

impl<'a> LockGuard<'a> {
    pub fn lockable(&self) -> &'a Lockable {
        self.lockable
    }

    /// Runs `f` with the lock released, re-acquiring it afterwards.
    pub fn unlocked<R>(&mut self, f: impl FnOnce() -> R) -> R {
        let _unlocked = ScopeUnlock::new(self);
        f()
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if let Some(guard) = self.guard.take() {
            self.lockable.release(guard);
        }
    }
}

/// Releases a held [`LockGuard`] for the current scope and re-acquires it on
/// drop, including during unwinding.
pub struct ScopeUnlock<'g, 'a> {
    guard: &'g mut LockGuard<'a>,
}

impl<'g, 'a> ScopeUnlock<'g, 'a> {
    pub fn new(guard: &'g mut LockGuard<'a>) -> Self {
        if let Some(inner) = guard.guard.take() {
            guard.lockable.release(inner);
        }
        Self { guard }
    }
}

impl Drop for ScopeUnlock<'_, '_> {
    fn drop(&mut self) {
        let lockable = self.guard.lockable;
        self.guard.guard = Some(lockable.acquire());
    }
}

/// Guards for several lockables acquired in address order.
pub struct MultiLockGuard<'a> {
    guards: Vec<LockGuard<'a>>,
}

impl MultiLockGuard<'_> {
    /// Number of distinct lockables held.
    pub fn len(&self) -> usize {
        self.guards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }
}

impl Drop for MultiLockGuard<'_> {
    fn drop(&mut self) {
        while let Some(guard) = self.guards.pop() {
            drop(guard);
        }
    }
}

/// Locks every lockable in `lockables` in ascending address order. Duplicates
/// are locked once, so two threads locking overlapping sets cannot deadlock.
pub fn lock_all<'a>(lockables: &[&'a Lockable]) -> MultiLockGuard<'a> {
    let mut ordered: Vec<&'a Lockable> = lockables.to_vec();
    ordered.sort_by_key(|lockable| lockable.address());
    ordered.dedup_by_key(|lockable| lockable.address());
    MultiLockGuard {
        guards: ordered.into_iter().map(Lockable::lock).collect(),
    }
}
