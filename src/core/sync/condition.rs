/*!
 * Condition Queues
 *
 * Wait/signal on top of an exclusive synchronizer. A waiter fully releases the
 * synchronizer, parks on the condition queue, and after a signal competes on
 * the main wait queue to reacquire with its saved state.
 *
 * # Design
 *
 * - A condition node carries `COND | WAITING`; signal clears `COND` with an
 *   atomic fetch-and and moves the node to the main queue, so a racing
 *   timeout or interrupt either wins the bit (cancelled) or loses it
 *   (signalled), never both
 * - The condition queue is only touched by the exclusive owner; the mutex
 *   around it keeps a misbehaving policy from corrupting it
 * - Spurious wake-ups never escape: waits return only after reacquiring
 */

use super::node::{Mode, Node};
use super::park::{self, Waiter};
use super::policy::Policy;
use super::synchronizer::Synchronizer;
use crate::core::errors::{SyncError, SyncResult};
use crate::core::limits::{NODE_COND, NODE_WAITING};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::ptr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::trace;

/// Result of a timed condition wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitTimeoutResult {
    timed_out: bool,
    remaining: Duration,
}

impl WaitTimeoutResult {
    /// Whether the wait ended because the timeout elapsed
    #[inline]
    pub fn timed_out(&self) -> bool {
        self.timed_out
    }

    /// Time left when the wait returned; zero after a timeout
    #[inline]
    pub fn remaining(&self) -> Duration {
        self.remaining
    }
}

/// Condition bound to one synchronizer
pub struct Condition<P: Policy> {
    sync: Arc<Synchronizer<P>>,
    waiters: Mutex<VecDeque<Arc<Node>>>,
}

impl<P: Policy> Condition<P> {
    pub(crate) fn new(sync: Arc<Synchronizer<P>>) -> Self {
        Self {
            sync,
            waiters: Mutex::new(VecDeque::new()),
        }
    }

    /// The synchronizer this condition waits on
    pub fn synchronizer(&self) -> &Arc<Synchronizer<P>> {
        &self.sync
    }

    pub(crate) fn is_owned_by(&self, sync: &Synchronizer<P>) -> bool {
        ptr::eq(Arc::as_ptr(&self.sync), sync)
    }

    fn check_held(&self) -> SyncResult<()> {
        if self.sync.is_held_exclusively()? {
            Ok(())
        } else {
            Err(SyncError::not_owner())
        }
    }

    // =========================================================================
    // Waiting
    // =========================================================================

    /// Wait until signalled or interrupted
    ///
    /// Always reacquires before returning, including on `Interrupted`.
    pub fn wait(&self) -> SyncResult<()> {
        self.wait_inner(None).map(|_| ())
    }

    /// Wait until signalled; interrupts are re-asserted after reacquiring
    pub fn wait_uninterruptibly(&self) -> SyncResult<()> {
        let current = park::current();
        let node = Node::new(Mode::Exclusive, current.clone());
        let saved = self.enable_wait(&node)?;

        let mut interrupted = false;
        while !self.can_reacquire(&node) {
            if current.take_interrupt() {
                interrupted = true;
            }
            if node.is_condition_waiting() {
                self.sync.metrics.record_park();
                park::park_while(&current, None, || node.is_condition_waiting());
            } else {
                std::hint::spin_loop();
            }
        }

        node.clear_status();
        self.sync
            .acquire_queued(Some(node), saved, Mode::Exclusive, false, None)?;
        if interrupted {
            current.interrupt();
        }
        Ok(())
    }

    /// Wait at most `timeout`
    pub fn wait_timeout(&self, timeout: Duration) -> SyncResult<WaitTimeoutResult> {
        let deadline = park::deadline_after(timeout);
        let signalled = self.wait_inner(deadline)?;
        let remaining = match deadline {
            Some(d) => d.saturating_duration_since(Instant::now()),
            None => timeout,
        };
        Ok(WaitTimeoutResult {
            timed_out: !signalled,
            remaining: if signalled { remaining } else { Duration::ZERO },
        })
    }

    /// Wait until `deadline`; `Ok(false)` if it passed first
    pub fn wait_until(&self, deadline: Instant) -> SyncResult<bool> {
        self.wait_inner(Some(deadline))
    }

    /// Interruptible wait, optionally bounded; `Ok(true)` when signalled
    fn wait_inner(&self, deadline: Option<Instant>) -> SyncResult<bool> {
        let current = park::current();
        if current.take_interrupt() {
            self.sync.metrics.record_interrupt();
            return Err(SyncError::Interrupted);
        }

        let node = Node::new(Mode::Exclusive, current.clone());
        let saved = self.enable_wait(&node)?;

        let mut interrupted = false;
        let mut cancelled = false;
        while !self.can_reacquire(&node) {
            interrupted |= current.take_interrupt();
            let expired = deadline.is_some_and(|d| Instant::now() >= d);

            if interrupted || expired {
                if node.get_and_unset_status(NODE_COND) & NODE_COND != 0 {
                    cancelled = true;
                    break;
                }
                // Lost the race to a signal: the transfer is in flight
                std::hint::spin_loop();
            } else if node.is_condition_waiting() {
                self.sync.metrics.record_park();
                park::park_while(&current, deadline, || node.is_condition_waiting());
            } else {
                std::hint::spin_loop();
            }
        }

        node.clear_status();
        self.sync
            .acquire_queued(Some(node), saved, Mode::Exclusive, false, None)?;

        if cancelled {
            self.unlink_cancelled_waiters();
            if interrupted {
                self.sync.metrics.record_interrupt();
                trace!(waiter = current.id(), "condition wait interrupted");
                return Err(SyncError::Interrupted);
            }
            self.sync.metrics.record_timeout();
            return Ok(false);
        }

        if interrupted {
            current.interrupt();
        }
        Ok(true)
    }

    /// Queue `node`, then fully release the synchronizer; returns saved state
    fn enable_wait(&self, node: &Arc<Node>) -> SyncResult<P::Word> {
        if self.sync.is_held_exclusively()? {
            node.set_status(NODE_COND | NODE_WAITING);
            self.waiters.lock().push_back(node.clone());

            let saved = self.sync.state();
            match self.sync.release(saved) {
                Ok(true) => return Ok(saved),
                Ok(false) => {}
                Err(e) => {
                    node.cancel();
                    self.unlink_cancelled_waiters();
                    return Err(e);
                }
            }
            node.cancel();
            self.unlink_cancelled_waiters();
        }
        Err(SyncError::not_owner())
    }

    /// Whether a signal has moved `node` onto the main queue
    fn can_reacquire(&self, node: &Arc<Node>) -> bool {
        match node.prev() {
            Some(p) => p.next_is(node) || self.sync.queue.is_enqueued(node),
            None => false,
        }
    }

    fn unlink_cancelled_waiters(&self) {
        self.waiters.lock().retain(|n| n.is_condition_waiting());
    }

    // =========================================================================
    // Signalling
    // =========================================================================

    /// Move the longest waiter to the main queue
    pub fn signal(&self) -> SyncResult<()> {
        self.check_held()?;
        self.do_signal(false);
        Ok(())
    }

    /// Move every waiter to the main queue
    pub fn signal_all(&self) -> SyncResult<()> {
        self.check_held()?;
        self.do_signal(true);
        Ok(())
    }

    fn do_signal(&self, all: bool) {
        let mut waiters = self.waiters.lock();
        while let Some(first) = waiters.pop_front() {
            // Skip nodes a timeout or interrupt already claimed
            if first.get_and_unset_status(NODE_COND) & NODE_COND != 0 {
                self.sync.queue.enqueue(&first);
                self.sync.metrics.record_transfer();
                if !all {
                    break;
                }
            }
        }
    }

    // =========================================================================
    // Introspection (owner only)
    // =========================================================================

    pub fn has_waiters(&self) -> SyncResult<bool> {
        self.check_held()?;
        Ok(self.waiters.lock().iter().any(|n| n.is_condition_waiting()))
    }

    pub fn wait_queue_length(&self) -> SyncResult<usize> {
        self.check_held()?;
        Ok(self
            .waiters
            .lock()
            .iter()
            .filter(|n| n.is_condition_waiting())
            .count())
    }

    /// Waiting threads, longest waiter first
    pub fn waiting_waiters(&self) -> SyncResult<Vec<Arc<Waiter>>> {
        self.check_held()?;
        Ok(self
            .waiters
            .lock()
            .iter()
            .filter(|n| n.is_condition_waiting())
            .filter_map(|n| n.waiter().cloned())
            .collect())
    }
}

impl<P: Policy> fmt::Debug for Condition<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Condition")
            .field("waiters", &self.waiters.lock().len())
            .finish()
    }
}
