/*!
 * Counting Semaphore
 *
 * The state word is the number of available permits. It may go negative
 * through `reduce_permits` or a negative initial count; acquirers then wait
 * until enough releases bring it back up.
 *
 * Acquisitions are shared: a release wakes the head waiter, and each waiter
 * that succeeds with permits to spare wakes the next one, so releasing `k`
 * permits admits waiters in queue order until their demand exceeds `k`.
 */

use crate::core::errors::{SyncError, SyncResult};
use crate::core::sync::{Policy, SharedAcquire, SyncConfig, SyncMetricsSnapshot, Synchronizer, Waiter};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Permit-counting policy
#[derive(Debug)]
pub struct SemaphorePolicy {
    fair: bool,
}

impl SemaphorePolicy {
    fn acquire_with(
        &self,
        sync: &Synchronizer<Self>,
        acquires: i32,
        fair: bool,
    ) -> SharedAcquire {
        loop {
            if fair && sync.has_queued_predecessors() {
                return SharedAcquire::Failed;
            }
            let available = sync.state();
            let remaining = i64::from(available) - i64::from(acquires);
            if remaining < 0 {
                return SharedAcquire::Failed;
            }
            // remaining lies in [0, available], so it fits
            if sync.compare_and_set_state(available, remaining as i32) {
                return SharedAcquire::from_remaining(remaining);
            }
        }
    }
}

impl Policy for SemaphorePolicy {
    type Word = i32;

    fn try_acquire_shared(&self, sync: &Synchronizer<Self>, acquires: i32) -> SyncResult<SharedAcquire> {
        Ok(self.acquire_with(sync, acquires, self.fair))
    }

    fn try_release_shared(&self, sync: &Synchronizer<Self>, releases: i32) -> SyncResult<bool> {
        loop {
            let current = sync.state();
            let next = current
                .checked_add(releases)
                .ok_or_else(|| SyncError::Overflow("maximum permit count exceeded".to_string()))?;
            if sync.compare_and_set_state(current, next) {
                return Ok(true);
            }
        }
    }
}

fn check_permits(permits: i32) -> SyncResult<()> {
    if permits < 0 {
        return Err(SyncError::InvalidArgument(format!(
            "permit count must be non-negative, got {}",
            permits
        )));
    }
    Ok(())
}

/// Counting semaphore with optional fairness
pub struct Semaphore {
    sync: Arc<Synchronizer<SemaphorePolicy>>,
}

impl Semaphore {
    /// Barging semaphore; `permits` may be negative
    pub fn new(permits: i32) -> Self {
        Self::with_fairness(permits, false)
    }

    pub fn with_fairness(permits: i32, fair: bool) -> Self {
        Self::with_config(permits, fair, SyncConfig::default())
    }

    pub fn with_config(permits: i32, fair: bool, config: SyncConfig) -> Self {
        Self {
            sync: Arc::new(Synchronizer::with_config(SemaphorePolicy { fair }, permits, config)),
        }
    }

    // =========================================================================
    // Acquire
    // =========================================================================

    /// Take one permit, blocking interruptibly
    pub fn acquire(&self) -> SyncResult<()> {
        self.sync.acquire_shared_interruptibly(1)
    }

    pub fn acquire_many(&self, permits: i32) -> SyncResult<()> {
        check_permits(permits)?;
        self.sync.acquire_shared_interruptibly(permits)
    }

    pub fn acquire_uninterruptibly(&self) -> SyncResult<()> {
        self.sync.acquire_shared(1)
    }

    pub fn acquire_uninterruptibly_many(&self, permits: i32) -> SyncResult<()> {
        check_permits(permits)?;
        self.sync.acquire_shared(permits)
    }

    /// Take a permit if one is available right now, even on a fair semaphore
    pub fn try_acquire(&self) -> bool {
        self.sync.policy().acquire_with(&self.sync, 1, false).is_acquired()
    }

    pub fn try_acquire_many(&self, permits: i32) -> SyncResult<bool> {
        check_permits(permits)?;
        Ok(self
            .sync
            .policy()
            .acquire_with(&self.sync, permits, false)
            .is_acquired())
    }

    pub fn try_acquire_timeout(&self, timeout: Duration) -> SyncResult<bool> {
        self.sync.try_acquire_shared_timeout(1, timeout)
    }

    pub fn try_acquire_many_timeout(&self, permits: i32, timeout: Duration) -> SyncResult<bool> {
        check_permits(permits)?;
        self.sync.try_acquire_shared_timeout(permits, timeout)
    }

    // =========================================================================
    // Release
    // =========================================================================

    /// Return one permit; the caller need not have acquired it
    pub fn release(&self) -> SyncResult<()> {
        self.sync.release_shared(1).map(|_| ())
    }

    pub fn release_many(&self, permits: i32) -> SyncResult<()> {
        check_permits(permits)?;
        self.sync.release_shared(permits).map(|_| ())
    }

    // =========================================================================
    // Permit accounting
    // =========================================================================

    pub fn available_permits(&self) -> i32 {
        self.sync.state()
    }

    /// Take every available permit; returns how many were taken
    pub fn drain_permits(&self) -> i32 {
        loop {
            let current = self.sync.state();
            if current <= 0 || self.sync.compare_and_set_state(current, 0) {
                return current.max(0);
            }
        }
    }

    /// Shrink the permit count without blocking; may go negative
    pub fn reduce_permits(&self, reduction: i32) -> SyncResult<()> {
        check_permits(reduction)?;
        loop {
            let current = self.sync.state();
            let next = current
                .checked_sub(reduction)
                .ok_or_else(|| SyncError::Overflow("permit count underflow".to_string()))?;
            if self.sync.compare_and_set_state(current, next) {
                return Ok(());
            }
        }
    }

    pub fn is_fair(&self) -> bool {
        self.sync.policy().fair
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

    pub fn metrics(&self) -> SyncMetricsSnapshot {
        self.sync.metrics()
    }
}

impl fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Semaphore")
            .field("permits", &self.available_permits())
            .field("fair", &self.is_fair())
            .finish()
    }
}
