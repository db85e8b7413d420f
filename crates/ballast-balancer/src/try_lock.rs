//! Acquire-or-skip guard for single-flight background work.

use std::sync::atomic::{AtomicBool, Ordering};

/// A non-blocking busy flag.
///
/// Periodic cycles (ping, recovery, list refresh) must never stack: if the
/// previous run is still going when the next tick fires, the tick is
/// skipped. [`TryLock::acquire`] either claims the flag and returns a guard
/// that releases it on drop, or returns `None` without waiting.
#[derive(Debug, Default)]
pub struct TryLock {
    busy: AtomicBool,
}

impl TryLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the flag, or return `None` if another holder has it.
    pub fn acquire(&self) -> Option<TryLockGuard<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| TryLockGuard { lock: self })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Releases the owning [`TryLock`] when dropped.
#[derive(Debug)]
pub struct TryLockGuard<'a> {
    lock: &'a TryLock,
}

impl Drop for TryLockGuard<'_> {
    fn drop(&mut self) {
        self.lock.busy.store(false, Ordering::Release);
    }
}
