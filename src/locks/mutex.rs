/*!
 * Non-Reentrant Mutex
 *
 * State 0 is unlocked, 1 is locked. Only the owner may unlock; a second
 * `lock` from the owner deadlocks, as with any non-reentrant lock.
 */

use crate::core::errors::{SyncError, SyncResult};
use crate::core::sync::{Condition, Policy, SyncConfig, SyncMetricsSnapshot, Synchronizer, Waiter};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Exclusive policy over a 0/1 state word
#[derive(Debug, Default)]
pub struct MutexPolicy;

impl Policy for MutexPolicy {
    type Word = i32;

    fn try_acquire(&self, sync: &Synchronizer<Self>, _arg: i32) -> SyncResult<bool> {
        if sync.compare_and_set_state(0, 1) {
            sync.set_exclusive_owner_to_current();
            return Ok(true);
        }
        Ok(false)
    }

    fn try_release(&self, sync: &Synchronizer<Self>, _arg: i32) -> SyncResult<bool> {
        if sync.state() == 0 || !sync.is_owned_by_current_thread() {
            return Err(SyncError::not_owner());
        }
        sync.set_exclusive_owner(None);
        sync.set_state(0);
        Ok(true)
    }

    fn is_held_exclusively(&self, sync: &Synchronizer<Self>) -> SyncResult<bool> {
        Ok(sync.state() == 1 && sync.is_owned_by_current_thread())
    }
}

/// Non-reentrant mutual exclusion lock
pub struct Mutex {
    sync: Arc<Synchronizer<MutexPolicy>>,
}

impl Mutex {
    pub fn new() -> Self {
        Self::with_config(SyncConfig::default())
    }

    pub fn with_config(config: SyncConfig) -> Self {
        Self {
            sync: Arc::new(Synchronizer::with_config(MutexPolicy, 0, config)),
        }
    }

    /// Block until the lock is acquired
    pub fn lock(&self) -> SyncResult<()> {
        self.sync.acquire(1)
    }

    pub fn lock_interruptibly(&self) -> SyncResult<()> {
        self.sync.acquire_interruptibly(1)
    }

    /// Acquire only if free right now; never queues
    pub fn try_lock(&self) -> bool {
        if self.sync.compare_and_set_state(0, 1) {
            self.sync.set_exclusive_owner_to_current();
            return true;
        }
        false
    }

    pub fn try_lock_for(&self, timeout: Duration) -> SyncResult<bool> {
        self.sync.try_acquire_timeout(1, timeout)
    }

    /// Release; fails with `IllegalMonitorState` unless the caller owns the lock
    pub fn unlock(&self) -> SyncResult<()> {
        self.sync.release(1).map(|_| ())
    }

    /// Lock and return a guard that unlocks on drop
    pub fn guard(&self) -> SyncResult<MutexGuard<'_>> {
        self.lock()?;
        Ok(MutexGuard {
            mutex: self,
            _not_send: PhantomData,
        })
    }

    pub fn is_locked(&self) -> bool {
        self.sync.state() != 0
    }

    pub fn is_held_by_current_thread(&self) -> bool {
        self.sync.state() == 1 && self.sync.is_owned_by_current_thread()
    }

    pub fn has_queued_threads(&self) -> bool {
        self.sync.has_queued_threads()
    }

    pub fn queue_length(&self) -> usize {
        self.sync.queue_length()
    }

    pub fn queued_waiters(&self) -> Vec<Arc<Waiter>> {
        self.sync.queued_waiters()
    }

    pub fn new_condition(&self) -> Condition<MutexPolicy> {
        self.sync.new_condition()
    }

    pub fn metrics(&self) -> SyncMetricsSnapshot {
        self.sync.metrics()
    }
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Mutex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutex")
            .field("locked", &self.is_locked())
            .field("queued", &self.queue_length())
            .finish()
    }
}

/// RAII guard for `Mutex`; must be dropped on the locking thread
#[must_use = "if unused the Mutex will immediately unlock"]
pub struct MutexGuard<'a> {
    mutex: &'a Mutex,
    _not_send: PhantomData<*const ()>,
}

impl Drop for MutexGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.mutex.unlock() {
            warn!(error = %e, "mutex guard release failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_lock_unlock() {
        let mutex = Mutex::new();
        mutex.lock().unwrap();
        assert!(mutex.is_locked());
        assert!(mutex.is_held_by_current_thread());
        assert!(!mutex.try_lock());
        mutex.unlock().unwrap();
        assert!(!mutex.is_locked());
    }

    #[test]
    fn test_unlock_by_non_owner_fails() {
        let mutex = Arc::new(Mutex::new());
        mutex.lock().unwrap();

        let other = mutex.clone();
        let result = thread::spawn(move || other.unlock()).join().unwrap();
        assert!(matches!(result, Err(SyncError::IllegalMonitorState(_))));
        assert!(mutex.is_locked());
        mutex.unlock().unwrap();
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let mutex = Mutex::new();
        {
            let _guard = mutex.guard().unwrap();
            assert!(mutex.is_locked());
        }
        assert!(!mutex.is_locked());
    }

    #[test]
    fn test_hand_off_to_waiter() {
        let mutex = Arc::new(Mutex::new());
        mutex.lock().unwrap();

        let m = mutex.clone();
        let waiter = thread::spawn(move || {
            m.lock().unwrap();
            let held = m.is_held_by_current_thread();
            m.unlock().unwrap();
            held
        });

        let start = Instant::now();
        while !mutex.has_queued_threads() {
            assert!(start.elapsed() < Duration::from_secs(5));
            thread::yield_now();
        }
        mutex.unlock().unwrap();
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_condition_requires_lock() {
        let mutex = Mutex::new();
        let cond = mutex.new_condition();
        assert!(matches!(cond.signal(), Err(SyncError::IllegalMonitorState(_))));

        mutex.lock().unwrap();
        let result = cond.wait_timeout(Duration::from_millis(10)).unwrap();
        assert!(result.timed_out());
        assert!(mutex.is_held_by_current_thread());
        mutex.unlock().unwrap();
    }
}
