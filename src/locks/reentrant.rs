/*!
 * Reentrant Lock
 *
 * Exclusive lock that its owner may re-enter. The state word is the hold
 * count; the lock is free when it drops back to zero.
 *
 * # Fairness
 *
 * - Barging (default): a newcomer may grab a free lock ahead of queued
 *   threads. Higher throughput, no ordering guarantee
 * - Fair: a newcomer queues whenever another thread has waited longer
 *
 * `try_lock` always barges, whatever the fairness setting.
 */

use crate::core::errors::{SyncError, SyncResult};
use crate::core::sync::{Condition, Policy, SyncConfig, SyncMetricsSnapshot, Synchronizer, Waiter};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Hold-count policy shared by fair and barging locks
#[derive(Debug)]
pub struct ReentrantPolicy {
    fair: bool,
}

impl ReentrantPolicy {
    /// Acquire ignoring fairness
    fn barge(&self, sync: &Synchronizer<Self>, acquires: i32) -> SyncResult<bool> {
        self.acquire_with(sync, acquires, false)
    }

    fn acquire_with(&self, sync: &Synchronizer<Self>, acquires: i32, fair: bool) -> SyncResult<bool> {
        let c = sync.state();
        if c == 0 {
            if (!fair || !sync.has_queued_predecessors()) && sync.compare_and_set_state(0, acquires) {
                sync.set_exclusive_owner_to_current();
                return Ok(true);
            }
        } else if sync.is_owned_by_current_thread() {
            let next = c
                .checked_add(acquires)
                .ok_or_else(|| SyncError::Overflow("maximum lock count exceeded".to_string()))?;
            sync.set_state(next);
            return Ok(true);
        }
        Ok(false)
    }
}

impl Policy for ReentrantPolicy {
    type Word = i32;

    fn try_acquire(&self, sync: &Synchronizer<Self>, acquires: i32) -> SyncResult<bool> {
        self.acquire_with(sync, acquires, self.fair)
    }

    fn try_release(&self, sync: &Synchronizer<Self>, releases: i32) -> SyncResult<bool> {
        if !sync.is_owned_by_current_thread() {
            return Err(SyncError::not_owner());
        }
        let c = sync.state() - releases;
        let free = c == 0;
        if free {
            sync.set_exclusive_owner(None);
        }
        sync.set_state(c);
        Ok(free)
    }

    fn is_held_exclusively(&self, sync: &Synchronizer<Self>) -> SyncResult<bool> {
        Ok(sync.is_owned_by_current_thread())
    }
}

/// Reentrant mutual exclusion lock with optional fairness
pub struct ReentrantLock {
    sync: Arc<Synchronizer<ReentrantPolicy>>,
}

impl ReentrantLock {
    /// Barging lock with the default configuration
    pub fn new() -> Self {
        Self::with_fairness(false)
    }

    pub fn with_fairness(fair: bool) -> Self {
        Self::with_config(fair, SyncConfig::default())
    }

    pub fn with_config(fair: bool, config: SyncConfig) -> Self {
        Self {
            sync: Arc::new(Synchronizer::with_config(ReentrantPolicy { fair }, 0, config)),
        }
    }

    pub fn lock(&self) -> SyncResult<()> {
        self.sync.acquire(1)
    }

    pub fn lock_interruptibly(&self) -> SyncResult<()> {
        self.sync.acquire_interruptibly(1)
    }

    /// Acquire if free (or already owned) right now, even on a fair lock
    pub fn try_lock(&self) -> SyncResult<bool> {
        self.sync.policy().barge(&self.sync, 1)
    }

    /// Acquire within `timeout`, honoring fairness
    pub fn try_lock_for(&self, timeout: Duration) -> SyncResult<bool> {
        self.sync.try_acquire_timeout(1, timeout)
    }

    /// Drop one hold; the lock is free once the count reaches zero
    pub fn unlock(&self) -> SyncResult<()> {
        self.sync.release(1).map(|_| ())
    }

    pub fn guard(&self) -> SyncResult<ReentrantLockGuard<'_>> {
        self.lock()?;
        Ok(ReentrantLockGuard {
            lock: self,
            _not_send: PhantomData,
        })
    }

    /// Holds by the calling thread, zero if it does not own the lock
    pub fn hold_count(&self) -> u32 {
        if self.sync.is_owned_by_current_thread() {
            self.sync.state().max(0) as u32
        } else {
            0
        }
    }

    pub fn is_held_by_current_thread(&self) -> bool {
        self.sync.is_owned_by_current_thread()
    }

    pub fn is_locked(&self) -> bool {
        self.sync.state() != 0
    }

    pub fn is_fair(&self) -> bool {
        self.sync.policy().fair
    }

    /// Waiter id of the current owner
    pub fn owner(&self) -> Option<u64> {
        self.sync.exclusive_owner()
    }

    pub fn has_queued_threads(&self) -> bool {
        self.sync.has_queued_threads()
    }

    pub fn has_queued_thread(&self, waiter: &Waiter) -> bool {
        self.sync.is_queued(waiter)
    }

    pub fn queue_length(&self) -> usize {
        self.sync.queue_length()
    }

    pub fn queued_waiters(&self) -> Vec<Arc<Waiter>> {
        self.sync.queued_waiters()
    }

    pub fn new_condition(&self) -> Condition<ReentrantPolicy> {
        self.sync.new_condition()
    }

    pub fn has_waiters(&self, condition: &Condition<ReentrantPolicy>) -> SyncResult<bool> {
        self.sync.has_waiters(condition)
    }

    pub fn wait_queue_length(&self, condition: &Condition<ReentrantPolicy>) -> SyncResult<usize> {
        self.sync.wait_queue_length(condition)
    }

    pub fn waiting_waiters(
        &self,
        condition: &Condition<ReentrantPolicy>,
    ) -> SyncResult<Vec<Arc<Waiter>>> {
        self.sync.waiting_waiters(condition)
    }

    pub fn metrics(&self) -> SyncMetricsSnapshot {
        self.sync.metrics()
    }
}

impl Default for ReentrantLock {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ReentrantLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReentrantLock")
            .field("fair", &self.is_fair())
            .field("holds", &self.sync.state())
            .field("owner", &self.owner())
            .finish()
    }
}

/// RAII guard for `ReentrantLock`; must be dropped on the locking thread
#[must_use = "if unused the lock will immediately unlock"]
pub struct ReentrantLockGuard<'a> {
    lock: &'a ReentrantLock,
    _not_send: PhantomData<*const ()>,
}

impl Drop for ReentrantLockGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.lock.unlock() {
            warn!(error = %e, "reentrant lock guard release failed");
        }
    }
}
