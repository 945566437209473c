/*!
 * Cyclic Barrier
 *
 * A fixed number of parties wait until all have arrived, then the last one
 * runs the optional barrier action and releases everyone. The barrier then
 * resets itself for the next generation.
 *
 * # Breakage
 *
 * An interrupt or timeout in one party, a panicking action, or `reset`
 * breaks the current generation: every waiting party fails with
 * `BrokenBarrier` and so does every later arrival until `reset`.
 */

use super::reentrant::{ReentrantLock, ReentrantPolicy};
use crate::core::errors::{SyncError, SyncResult};
use crate::core::sync::{park, Condition};
use arc_swap::ArcSwap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

type BarrierAction = Box<dyn Fn() + Send + Sync>;

/// One use of the barrier
#[derive(Debug, Default)]
struct Generation {
    broken: AtomicBool,
}

impl Generation {
    fn is_broken(&self) -> bool {
        self.broken.load(Ordering::Acquire)
    }
}

pub struct CyclicBarrier {
    lock: ReentrantLock,
    trip: Condition<ReentrantPolicy>,
    parties: usize,
    action: Option<BarrierAction>,
    // Only written while `lock` is held
    generation: ArcSwap<Generation>,
    count: AtomicUsize,
}

impl CyclicBarrier {
    /// Barrier for `parties` threads; zero is rejected
    pub fn new(parties: usize) -> SyncResult<Self> {
        Self::build(parties, None)
    }

    /// Barrier that runs `action` on the last arriving thread before releasing
    pub fn with_action<F>(parties: usize, action: F) -> SyncResult<Self>
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self::build(parties, Some(Box::new(action)))
    }

    fn build(parties: usize, action: Option<BarrierAction>) -> SyncResult<Self> {
        if parties == 0 {
            return Err(SyncError::InvalidArgument(
                "barrier needs at least one party".to_string(),
            ));
        }
        let lock = ReentrantLock::new();
        let trip = lock.new_condition();
        Ok(Self {
            lock,
            trip,
            parties,
            action,
            generation: ArcSwap::from_pointee(Generation::default()),
            count: AtomicUsize::new(parties),
        })
    }

    /// Wait for all parties
    ///
    /// Returns the arrival index: `parties - 1` for the first arrival, zero
    /// for the last.
    pub fn wait(&self) -> SyncResult<usize> {
        self.dowait(None)
    }

    /// Wait at most `timeout`; on expiry the barrier breaks and this party
    /// fails with `Timeout`
    pub fn wait_timeout(&self, timeout: Duration) -> SyncResult<usize> {
        self.dowait(Some(timeout))
    }

    fn dowait(&self, timeout: Option<Duration>) -> SyncResult<usize> {
        let deadline = timeout.map(|t| park::deadline_after(t).unwrap_or_else(far_future));
        let _guard = self.lock.guard()?;

        let generation = self.generation.load_full();
        if generation.is_broken() {
            return Err(SyncError::BrokenBarrier);
        }
        if park::interrupted() {
            self.break_barrier()?;
            return Err(SyncError::Interrupted);
        }

        let index = self.count.load(Ordering::Acquire) - 1;
        self.count.store(index, Ordering::Release);
        if index == 0 {
            self.trip_barrier()?;
            return Ok(0);
        }

        loop {
            let waited = match deadline {
                None => self.trip.wait().map(|_| true),
                Some(deadline) => self.trip.wait_until(deadline),
            };

            let signalled = match waited {
                Ok(signalled) => signalled,
                Err(SyncError::Interrupted) => {
                    if self.is_current(&generation) && !generation.is_broken() {
                        self.break_barrier()?;
                        return Err(SyncError::Interrupted);
                    }
                    // Generation already over: keep the interrupt for later
                    park::current().interrupt();
                    true
                }
                Err(e) => return Err(e),
            };

            if generation.is_broken() {
                return Err(SyncError::BrokenBarrier);
            }
            if !self.is_current(&generation) {
                return Ok(index);
            }
            if !signalled {
                self.break_barrier()?;
                debug!(parties = self.parties, "barrier wait timed out");
                return Err(SyncError::Timeout(timeout.unwrap_or_default()));
            }
        }
    }

    /// Last arrival: run the action, then start the next generation
    fn trip_barrier(&self) -> SyncResult<()> {
        if let Some(action) = &self.action {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| action())) {
                warn!(parties = self.parties, "barrier action panicked");
                self.break_barrier()?;
                panic::resume_unwind(payload);
            }
        }
        self.next_generation()
    }

    fn is_current(&self, generation: &Arc<Generation>) -> bool {
        Arc::ptr_eq(generation, &self.generation.load())
    }

    fn break_barrier(&self) -> SyncResult<()> {
        self.generation.load().broken.store(true, Ordering::Release);
        self.count.store(self.parties, Ordering::Release);
        debug!(parties = self.parties, "barrier broken");
        self.trip.signal_all()
    }

    fn next_generation(&self) -> SyncResult<()> {
        self.trip.signal_all()?;
        self.count.store(self.parties, Ordering::Release);
        self.generation.store(Arc::new(Generation::default()));
        Ok(())
    }

    /// Break the current generation, failing its waiters, and start a new one
    pub fn reset(&self) -> SyncResult<()> {
        let _guard = self.lock.guard()?;
        self.break_barrier()?;
        self.next_generation()
    }

    pub fn is_broken(&self) -> SyncResult<bool> {
        let _guard = self.lock.guard()?;
        Ok(self.generation.load().is_broken())
    }

    /// Parties currently waiting
    pub fn number_waiting(&self) -> SyncResult<usize> {
        let _guard = self.lock.guard()?;
        Ok(self.parties - self.count.load(Ordering::Acquire))
    }

    pub fn parties(&self) -> usize {
        self.parties
    }
}

/// Stand-in deadline for timeouts too large to represent
fn far_future() -> Instant {
    Instant::now() + Duration::from_secs(60 * 60 * 24 * 365 * 30)
}

impl fmt::Debug for CyclicBarrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CyclicBarrier")
            .field("parties", &self.parties)
            .field("has_action", &self.action.is_some())
            .finish()
    }
}
