/*!
 * Count-Down Latch
 *
 * One-shot gate: waiters block until the count reaches zero, then every
 * current and future waiter passes. The count never goes back up.
 */

use crate::core::errors::{SyncError, SyncResult};
use crate::core::sync::{Policy, SharedAcquire, SyncConfig, SyncMetricsSnapshot, Synchronizer};
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// Shared policy: acquire succeeds once the count is zero
#[derive(Debug, Default)]
pub struct LatchPolicy;

impl Policy for LatchPolicy {
    type Word = i32;

    fn try_acquire_shared(&self, sync: &Synchronizer<Self>, _arg: i32) -> SyncResult<SharedAcquire> {
        Ok(if sync.state() == 0 {
            SharedAcquire::Propagate
        } else {
            SharedAcquire::Failed
        })
    }

    fn try_release_shared(&self, sync: &Synchronizer<Self>, _arg: i32) -> SyncResult<bool> {
        loop {
            let c = sync.state();
            if c == 0 {
                return Ok(false);
            }
            if sync.compare_and_set_state(c, c - 1) {
                return Ok(c == 1);
            }
        }
    }
}

pub struct CountDownLatch {
    sync: Synchronizer<LatchPolicy>,
}

impl CountDownLatch {
    /// Latch that opens after `count` calls to `count_down`
    pub fn new(count: i32) -> SyncResult<Self> {
        Self::with_config(count, SyncConfig::default())
    }

    pub fn with_config(count: i32, config: SyncConfig) -> SyncResult<Self> {
        if count < 0 {
            return Err(SyncError::InvalidArgument(format!(
                "latch count must be non-negative, got {}",
                count
            )));
        }
        Ok(Self {
            sync: Synchronizer::with_config(LatchPolicy, count, config),
        })
    }

    /// Block until the count reaches zero
    pub fn wait(&self) -> SyncResult<()> {
        self.sync.acquire_shared_interruptibly(1)
    }

    /// `Ok(false)` if the timeout elapsed first
    pub fn wait_timeout(&self, timeout: Duration) -> SyncResult<bool> {
        self.sync.try_acquire_shared_timeout(1, timeout)
    }

    /// Decrement the count; opening the latch wakes every waiter
    pub fn count_down(&self) {
        if let Ok(true) = self.sync.release_shared(1) {
            debug!("latch opened");
        }
    }

    pub fn count(&self) -> i32 {
        self.sync.state()
    }

    pub fn metrics(&self) -> SyncMetricsSnapshot {
        self.sync.metrics()
    }
}

impl fmt::Debug for CountDownLatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CountDownLatch")
            .field("count", &self.count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::sync::park;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_negative_count_rejected() {
        assert!(matches!(
            CountDownLatch::new(-1),
            Err(SyncError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_zero_count_is_open() {
        let latch = CountDownLatch::new(0).unwrap();
        latch.wait().unwrap();
        latch.count_down();
        assert_eq!(latch.count(), 0);
    }

    #[test]
    fn test_count_down_past_zero_is_noop() {
        let latch = CountDownLatch::new(1).unwrap();
        latch.count_down();
        latch.count_down();
        latch.count_down();
        assert_eq!(latch.count(), 0);
        // Only the opening count down is a release
        assert_eq!(latch.metrics().releases, 1);
        latch.wait().unwrap();
    }

    #[test]
    fn test_latch_of_two() {
        let latch = Arc::new(CountDownLatch::new(2).unwrap());

        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let latch = latch.clone();
                thread::spawn(move || latch.wait())
            })
            .collect();

        latch.count_down();
        assert_eq!(latch.count(), 1);
        thread::sleep(std::time::Duration::from_millis(20));
        assert!(waiters.iter().all(|w| !w.is_finished()));

        latch.count_down();
        for waiter in waiters {
            waiter.join().unwrap().unwrap();
        }
        assert_eq!(latch.count(), 0);
    }

    #[test]
    fn test_wait_timeout() {
        let latch = CountDownLatch::new(1).unwrap();
        assert_eq!(latch.wait_timeout(Duration::from_millis(20)), Ok(false));
        latch.count_down();
        assert_eq!(latch.wait_timeout(Duration::from_millis(20)), Ok(true));
    }

    #[test]
    fn test_interrupted_wait() {
        let latch = Arc::new(CountDownLatch::new(1).unwrap());
        let l = latch.clone();
        let worker = park::spawn(move || l.wait());

        thread::sleep(Duration::from_millis(20));
        worker.interrupt();
        assert_eq!(worker.join().unwrap(), Err(SyncError::Interrupted));
        assert_eq!(latch.count(), 1);
    }
}
