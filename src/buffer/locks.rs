//! Scoped acquisition locks for the buffer
//!
//! One write lock guards the data file tail and metadata; one read lock
//! per consumer guards that consumer's cursor against a concurrent
//! truncation. Lock ordering: the write lock is always taken before any
//! read lock, and read locks are taken in registry order.
//!
//! Guards release on drop, so every exit path (including panics in the
//! critical section) releases the lock.

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct LockState {
    held: Mutex<bool>,
    released: Condvar,
}

/// A flag lock with blocking, timeout-bounded, and non-blocking
/// acquisition. Clones share the same underlying lock.
#[derive(Debug, Clone, Default)]
pub struct HeldLock {
    state: Arc<LockState>,
}

impl HeldLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until the lock is acquired.
    pub fn acquire(&self) -> LockGuard {
        let mut held = self
            .state
            .held
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        while *held {
            held = self
                .state
                .released
                .wait(held)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        *held = true;
        LockGuard {
            state: Arc::clone(&self.state),
        }
    }

    /// Acquire with a deadline; `None` when the timeout elapses first.
    pub fn acquire_timeout(&self, timeout: Duration) -> Option<LockGuard> {
        let deadline = Instant::now() + timeout;
        let mut held = self
            .state
            .held
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        while *held {
            let remaining = deadline.checked_duration_since(Instant::now())?;
            let (guard, result) = self
                .state
                .released
                .wait_timeout(held, remaining)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            held = guard;
            if result.timed_out() && *held {
                return None;
            }
        }
        *held = true;
        Some(LockGuard {
            state: Arc::clone(&self.state),
        })
    }

    /// Acquire without blocking; `None` when the lock is already held.
    pub fn try_acquire(&self) -> Option<LockGuard> {
        let mut held = self
            .state
            .held
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if *held {
            return None;
        }
        *held = true;
        Some(LockGuard {
            state: Arc::clone(&self.state),
        })
    }
}

/// Releases its lock on drop.
#[derive(Debug)]
pub struct LockGuard {
    state: Arc<LockState>,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let mut held = self
            .state
            .held
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *held = false;
        self.state.released.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_acquire_and_release() {
        let lock = HeldLock::new();
        {
            let _guard = lock.acquire();
            assert!(lock.try_acquire().is_none());
        }
        assert!(lock.try_acquire().is_some());
    }

    #[test]
    fn test_try_acquire_is_non_blocking() {
        let lock = HeldLock::new();
        let _guard = lock.try_acquire().unwrap();
        assert!(lock.try_acquire().is_none());
    }

    #[test]
    fn test_acquire_timeout_expires() {
        let lock = HeldLock::new();
        let _guard = lock.acquire();
        assert!(lock
            .acquire_timeout(Duration::from_millis(20))
            .is_none());
    }

    #[test]
    fn test_acquire_timeout_succeeds_when_free() {
        let lock = HeldLock::new();
        assert!(lock
            .acquire_timeout(Duration::from_millis(20))
            .is_some());
    }

    #[test]
    fn test_blocked_acquire_wakes_on_release() {
        let lock = HeldLock::new();
        let guard = lock.acquire();

        let lock2 = lock.clone();
        let handle = thread::spawn(move || {
            let _guard = lock2.acquire();
        });

        thread::sleep(Duration::from_millis(10));
        drop(guard);
        handle.join().unwrap();
    }

    #[test]
    fn test_clones_share_one_lock() {
        let lock = HeldLock::new();
        let clone = lock.clone();
        let _guard = lock.acquire();
        assert!(clone.try_acquire().is_none());
    }

    #[test]
    fn test_exactly_one_concurrent_winner() {
        use std::sync::Barrier;

        let lock = HeldLock::new();
        let barrier = Arc::new(Barrier::new(8));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let lock = lock.clone();
            let barrier = Arc::clone(&barrier);
            handles.push(thread::spawn(move || {
                barrier.wait();
                let won = lock.try_acquire();
                // Hold any acquired guard until every thread has attempted.
                barrier.wait();
                won.is_some()
            }));
        }

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }
}
