/*!
 * Reentrant Read-Write Lock
 *
 * One state word, split in two:
 *
 * ```text
 *  31              16 15               0
 * +------------------+------------------+
 * |   read holds     |   write holds    |
 * +------------------+------------------+
 * ```
 *
 * # Design
 *
 * - The writer is exclusive and reentrant; the reader side is shared
 * - Per-thread read hold counts live in a `DashMap` keyed by waiter id, so a
 *   thread can re-enter the read lock and release only what it holds
 * - A writer may take the read lock (downgrading); a reader can never
 *   upgrade
 * - Barging readers yield to a writer queued at the head, so a stream of
 *   readers cannot starve writers; fair mode queues behind anyone older
 */

use crate::core::errors::{SyncError, SyncResult};
use crate::core::limits::{RW_EXCLUSIVE_MASK, RW_MAX_COUNT, RW_SHARED_SHIFT, RW_SHARED_UNIT};
use crate::core::sync::{
    park, Condition, Policy, SharedAcquire, SyncConfig, SyncMetricsSnapshot, Synchronizer, Waiter,
};
use dashmap::DashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

#[inline(always)]
fn shared_count(c: i32) -> i32 {
    ((c as u32) >> RW_SHARED_SHIFT) as i32
}

#[inline(always)]
fn exclusive_count(c: i32) -> i32 {
    c & RW_EXCLUSIVE_MASK
}

/// Read-write policy with per-thread read holds
pub struct RwPolicy {
    fair: bool,
    read_holds: DashMap<u64, u32>,
}

impl RwPolicy {
    fn writer_should_block(&self, sync: &Synchronizer<Self>) -> bool {
        self.fair && sync.has_queued_predecessors()
    }

    fn reader_should_block(&self, sync: &Synchronizer<Self>) -> bool {
        if self.fair {
            sync.has_queued_predecessors()
        } else {
            sync.apparently_first_queued_is_exclusive()
        }
    }

    fn read_holds_of(&self, id: u64) -> u32 {
        self.read_holds.get(&id).map_or(0, |h| *h)
    }

    fn add_read_hold(&self, id: u64) {
        *self.read_holds.entry(id).or_insert(0) += 1;
    }

    /// Write acquire; with `respect_queue` unset, queued threads are ignored
    fn acquire_write(
        &self,
        sync: &Synchronizer<Self>,
        acquires: i32,
        respect_queue: bool,
    ) -> SyncResult<bool> {
        let c = sync.state();
        let w = exclusive_count(c);
        if c != 0 {
            // Readers present, or another writer
            if w == 0 || !sync.is_owned_by_current_thread() {
                return Ok(false);
            }
            if w + exclusive_count(acquires) > RW_MAX_COUNT {
                return Err(SyncError::Overflow("maximum write lock count exceeded".to_string()));
            }
            sync.set_state(c + acquires);
            return Ok(true);
        }
        if (respect_queue && self.writer_should_block(sync)) || !sync.compare_and_set_state(c, c + acquires) {
            return Ok(false);
        }
        sync.set_exclusive_owner_to_current();
        Ok(true)
    }

    /// Read acquire, retrying on CAS contention
    fn acquire_read(
        &self,
        sync: &Synchronizer<Self>,
        respect_queue: bool,
    ) -> SyncResult<SharedAcquire> {
        let id = park::current_id();
        loop {
            let c = sync.state();
            if exclusive_count(c) != 0 {
                if !sync.is_owned_by_current_thread() {
                    return Ok(SharedAcquire::Failed);
                }
            } else if respect_queue && self.reader_should_block(sync) && self.read_holds_of(id) == 0 {
                // Reentrant reads still pass, or they could deadlock a queued writer
                return Ok(SharedAcquire::Failed);
            }
            if shared_count(c) == RW_MAX_COUNT {
                return Err(SyncError::Overflow("maximum read lock count exceeded".to_string()));
            }
            if sync.compare_and_set_state(c, c.wrapping_add(RW_SHARED_UNIT)) {
                self.add_read_hold(id);
                return Ok(SharedAcquire::Propagate);
            }
        }
    }
}

impl Policy for RwPolicy {
    type Word = i32;

    fn try_acquire(&self, sync: &Synchronizer<Self>, acquires: i32) -> SyncResult<bool> {
        self.acquire_write(sync, acquires, true)
    }

    fn try_release(&self, sync: &Synchronizer<Self>, releases: i32) -> SyncResult<bool> {
        if !sync.is_owned_by_current_thread() || exclusive_count(sync.state()) == 0 {
            return Err(SyncError::not_owner());
        }
        let next = sync.state() - releases;
        let free = exclusive_count(next) == 0;
        if free {
            sync.set_exclusive_owner(None);
        }
        sync.set_state(next);
        Ok(free)
    }

    fn try_acquire_shared(&self, sync: &Synchronizer<Self>, _arg: i32) -> SyncResult<SharedAcquire> {
        self.acquire_read(sync, true)
    }

    fn try_release_shared(&self, sync: &Synchronizer<Self>, _arg: i32) -> SyncResult<bool> {
        let id = park::current_id();
        let remaining = match self.read_holds.get_mut(&id) {
            Some(mut holds) => {
                *holds -= 1;
                *holds
            }
            None => {
                return Err(SyncError::IllegalMonitorState(
                    "read lock not held by current thread".to_string(),
                ))
            }
        };
        if remaining == 0 {
            self.read_holds.remove_if(&id, |_, holds| *holds == 0);
        }

        loop {
            let c = sync.state();
            let next = c.wrapping_sub(RW_SHARED_UNIT);
            if sync.compare_and_set_state(c, next) {
                // Waking anyone only matters once the lock is fully free
                return Ok(next == 0);
            }
        }
    }

    fn is_held_exclusively(&self, sync: &Synchronizer<Self>) -> SyncResult<bool> {
        Ok(sync.is_owned_by_current_thread())
    }
}

/// Reentrant read-write lock with optional fairness
pub struct ReentrantReadWriteLock {
    sync: Arc<Synchronizer<RwPolicy>>,
}

impl ReentrantReadWriteLock {
    pub fn new() -> Self {
        Self::with_fairness(false)
    }

    pub fn with_fairness(fair: bool) -> Self {
        Self::with_config(fair, SyncConfig::default())
    }

    pub fn with_config(fair: bool, config: SyncConfig) -> Self {
        let policy = RwPolicy {
            fair,
            read_holds: DashMap::new(),
        };
        Self {
            sync: Arc::new(Synchronizer::with_config(policy, 0, config)),
        }
    }

    /// Shared view
    pub fn read_lock(&self) -> ReadLock<'_> {
        ReadLock { sync: &self.sync }
    }

    /// Exclusive view
    pub fn write_lock(&self) -> WriteLock<'_> {
        WriteLock { sync: &self.sync }
    }

    pub fn is_fair(&self) -> bool {
        self.sync.policy().fair
    }

    /// Read holds across all threads
    pub fn read_lock_count(&self) -> u32 {
        shared_count(self.sync.state()) as u32
    }

    /// Read holds of the calling thread
    pub fn read_hold_count(&self) -> u32 {
        self.sync.policy().read_holds_of(park::current_id())
    }

    pub fn is_write_locked(&self) -> bool {
        exclusive_count(self.sync.state()) != 0
    }

    pub fn is_write_locked_by_current_thread(&self) -> bool {
        self.sync.is_owned_by_current_thread()
    }

    pub fn write_hold_count(&self) -> u32 {
        if self.sync.is_owned_by_current_thread() {
            exclusive_count(self.sync.state()) as u32
        } else {
            0
        }
    }

    /// Waiter id of the write owner
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

    pub fn queued_writers(&self) -> Vec<Arc<Waiter>> {
        self.sync.exclusive_queued_waiters()
    }

    pub fn queued_readers(&self) -> Vec<Arc<Waiter>> {
        self.sync.shared_queued_waiters()
    }

    pub fn has_waiters(&self, condition: &Condition<RwPolicy>) -> SyncResult<bool> {
        self.sync.has_waiters(condition)
    }

    pub fn wait_queue_length(&self, condition: &Condition<RwPolicy>) -> SyncResult<usize> {
        self.sync.wait_queue_length(condition)
    }

    pub fn metrics(&self) -> SyncMetricsSnapshot {
        self.sync.metrics()
    }
}

impl Default for ReentrantReadWriteLock {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ReentrantReadWriteLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReentrantReadWriteLock")
            .field("fair", &self.is_fair())
            .field("readers", &self.read_lock_count())
            .field("write_locked", &self.is_write_locked())
            .finish()
    }
}

// =============================================================================
// Views
// =============================================================================

/// Shared side of a `ReentrantReadWriteLock`
#[derive(Clone, Copy)]
pub struct ReadLock<'a> {
    sync: &'a Arc<Synchronizer<RwPolicy>>,
}

impl<'a> ReadLock<'a> {
    pub fn lock(&self) -> SyncResult<()> {
        self.sync.acquire_shared(1)
    }

    pub fn lock_interruptibly(&self) -> SyncResult<()> {
        self.sync.acquire_shared_interruptibly(1)
    }

    /// Acquire if possible right now, ignoring fairness
    pub fn try_lock(&self) -> SyncResult<bool> {
        Ok(self.sync.policy().acquire_read(self.sync, false)?.is_acquired())
    }

    pub fn try_lock_for(&self, timeout: Duration) -> SyncResult<bool> {
        self.sync.try_acquire_shared_timeout(1, timeout)
    }

    pub fn unlock(&self) -> SyncResult<()> {
        self.sync.release_shared(1).map(|_| ())
    }

    pub fn guard(&self) -> SyncResult<ReadLockGuard<'a>> {
        self.lock()?;
        Ok(ReadLockGuard {
            lock: *self,
            _not_send: PhantomData,
        })
    }

    /// Read locks have no conditions
    pub fn new_condition(&self) -> SyncResult<Condition<RwPolicy>> {
        Err(SyncError::unsupported("condition on a read lock"))
    }
}

/// Exclusive side of a `ReentrantReadWriteLock`
#[derive(Clone, Copy)]
pub struct WriteLock<'a> {
    sync: &'a Arc<Synchronizer<RwPolicy>>,
}

impl<'a> WriteLock<'a> {
    pub fn lock(&self) -> SyncResult<()> {
        self.sync.acquire(1)
    }

    pub fn lock_interruptibly(&self) -> SyncResult<()> {
        self.sync.acquire_interruptibly(1)
    }

    /// Acquire if possible right now, ignoring fairness
    pub fn try_lock(&self) -> SyncResult<bool> {
        self.sync.policy().acquire_write(self.sync, 1, false)
    }

    pub fn try_lock_for(&self, timeout: Duration) -> SyncResult<bool> {
        self.sync.try_acquire_timeout(1, timeout)
    }

    pub fn unlock(&self) -> SyncResult<()> {
        self.sync.release(1).map(|_| ())
    }

    pub fn guard(&self) -> SyncResult<WriteLockGuard<'a>> {
        self.lock()?;
        Ok(WriteLockGuard {
            lock: *self,
            _not_send: PhantomData,
        })
    }

    pub fn is_held_by_current_thread(&self) -> bool {
        self.sync.is_owned_by_current_thread()
    }

    pub fn hold_count(&self) -> u32 {
        if self.sync.is_owned_by_current_thread() {
            exclusive_count(self.sync.state()) as u32
        } else {
            0
        }
    }

    pub fn new_condition(&self) -> Condition<RwPolicy> {
        self.sync.new_condition()
    }
}

#[must_use = "if unused the read lock will immediately unlock"]
pub struct ReadLockGuard<'a> {
    lock: ReadLock<'a>,
    _not_send: PhantomData<*const ()>,
}

impl Drop for ReadLockGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.lock.unlock() {
            warn!(error = %e, "read lock guard release failed");
        }
    }
}

#[must_use = "if unused the write lock will immediately unlock"]
pub struct WriteLockGuard<'a> {
    lock: WriteLock<'a>,
    _not_send: PhantomData<*const ()>,
}

impl Drop for WriteLockGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.lock.unlock() {
            warn!(error = %e, "write lock guard release failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    fn wait_until_queued(rw: &ReentrantReadWriteLock, n: usize) {
        let start = Instant::now();
        while rw.queue_length() < n {
            assert!(start.elapsed() < Duration::from_secs(5), "threads never queued");
            thread::yield_now();
        }
    }

    #[test]
    fn test_state_split() {
        let c = (3 << RW_SHARED_SHIFT) | 2;
        assert_eq!(shared_count(c), 3);
        assert_eq!(exclusive_count(c), 2);
        assert_eq!(shared_count(RW_MAX_COUNT << RW_SHARED_SHIFT), RW_MAX_COUNT);
    }

    #[test]
    fn test_readers_share() {
        let rw = Arc::new(ReentrantReadWriteLock::new());
        rw.read_lock().lock().unwrap();

        let r = rw.clone();
        let other = thread::spawn(move || {
            let acquired = r.read_lock().try_lock().unwrap();
            let count = r.read_lock_count();
            r.read_lock().unlock().unwrap();
            (acquired, count)
        })
        .join()
        .unwrap();

        assert_eq!(other, (true, 2));
        assert!(!rw.write_lock().try_lock().unwrap());
        rw.read_lock().unlock().unwrap();
        assert!(rw.write_lock().try_lock().unwrap());
        rw.write_lock().unlock().unwrap();
    }

    #[test]
    fn test_reentrant_read_holds() {
        let rw = ReentrantReadWriteLock::new();
        rw.read_lock().lock().unwrap();
        rw.read_lock().lock().unwrap();
        assert_eq!(rw.read_hold_count(), 2);
        rw.read_lock().unlock().unwrap();
        rw.read_lock().unlock().unwrap();
        assert_eq!(rw.read_hold_count(), 0);
        assert!(matches!(
            rw.read_lock().unlock(),
            Err(SyncError::IllegalMonitorState(_))
        ));
    }

    #[test]
    fn test_write_reentry_and_downgrade() {
        let rw = ReentrantReadWriteLock::new();
        let write_guard = rw.write_lock().guard().unwrap();
        rw.write_lock().lock().unwrap();
        assert_eq!(rw.write_hold_count(), 2);
        rw.write_lock().unlock().unwrap();

        // Downgrade: take the read lock, then drop the write lock
        rw.read_lock().lock().unwrap();
        drop(write_guard);
        assert!(!rw.is_write_locked());
        assert_eq!(rw.read_hold_count(), 1);
        rw.read_lock().unlock().unwrap();
    }

    #[test]
    fn test_read_conditions_unsupported() {
        let rw = ReentrantReadWriteLock::new();
        assert!(matches!(
            rw.read_lock().new_condition(),
            Err(SyncError::Unsupported(_))
        ));
        let cond = rw.write_lock().new_condition();
        rw.write_lock().lock().unwrap();
        assert!(!rw.has_waiters(&cond).unwrap());
        rw.write_lock().unlock().unwrap();
    }

    #[test]
    fn test_barging_reader_yields_to_queued_writer() {
        let rw = Arc::new(ReentrantReadWriteLock::new());
        rw.read_lock().lock().unwrap();

        let w = rw.clone();
        let writer = thread::spawn(move || {
            w.write_lock().lock().unwrap();
            w.write_lock().unlock().unwrap();
        });
        wait_until_queued(&rw, 1);
        assert_eq!(rw.queued_writers().len(), 1);

        let r = rw.clone();
        let reader = thread::spawn(move || {
            r.read_lock().lock().unwrap();
            r.read_lock().unlock().unwrap();
        });
        wait_until_queued(&rw, 2);
        assert_eq!(rw.queued_readers().len(), 1);

        // Reentrant read by the holder still succeeds
        rw.read_lock().lock().unwrap();
        rw.read_lock().unlock().unwrap();

        rw.read_lock().unlock().unwrap();
        writer.join().unwrap();
        reader.join().unwrap();
        assert!(!rw.has_queued_threads());
    }

    #[test]
    fn test_writer_excludes_readers() {
        let rw = Arc::new(ReentrantReadWriteLock::with_fairness(true));
        rw.write_lock().lock().unwrap();

        let r = rw.clone();
        let acquired = thread::spawn(move || r.read_lock().try_lock_for(Duration::from_millis(20)))
            .join()
            .unwrap();
        assert_eq!(acquired, Ok(false));
        rw.write_lock().unlock().unwrap();
    }
}
