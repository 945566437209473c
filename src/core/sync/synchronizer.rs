/*!
 * Queued Synchronizer
 *
 * The acquire/release engine shared by every primitive in this crate. It owns
 * the state word and the wait queue; a `Policy` interprets the state.
 *
 * # Acquire Loop
 *
 * One loop serves every variant (exclusive/shared, uninterruptible,
 * interruptible, timed):
 *
 * 1. If the node's predecessor is the head, try the policy hook
 * 2. Otherwise make progress on the slow path, one step per iteration:
 *    initialize the queue, allocate a node, enqueue it, spin briefly if first,
 *    set WAITING (then recheck), and finally park
 * 3. Interrupts and timeouts leave the loop and cancel the node
 *
 * Setting WAITING before the last recheck is what makes parking safe: a
 * releaser that changes the state after our recheck also sees WAITING and
 * unparks us.
 */

use super::condition::Condition;
use super::config::SyncConfig;
use super::metrics::{SyncMetrics, SyncMetricsSnapshot};
use super::node::{Mode, Node};
use super::park::{self, Waiter};
use super::policy::{Policy, SharedAcquire};
use super::queue::SyncQueue;
use super::state::StateCell;
use crate::core::errors::{SyncError, SyncResult};
use crate::core::limits::{NODE_PROPAGATE, NODE_WAITING};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::trace;

/// Owner id meaning "nobody"
const NO_OWNER: u64 = 0;

/// Queued synchronizer parameterized by its acquisition policy
pub struct Synchronizer<P: Policy> {
    state: StateCell<P::Word>,
    pub(crate) queue: SyncQueue,
    owner: AtomicU64,
    policy: P,
    config: SyncConfig,
    pub(crate) metrics: SyncMetrics,
}

impl<P: Policy> Synchronizer<P> {
    /// Create with the default configuration
    pub fn new(policy: P, initial: P::Word) -> Self {
        Self::with_config(policy, initial, SyncConfig::default())
    }

    pub fn with_config(policy: P, initial: P::Word, config: SyncConfig) -> Self {
        Self {
            state: StateCell::new(initial),
            queue: SyncQueue::new(),
            owner: AtomicU64::new(NO_OWNER),
            policy,
            config,
            metrics: SyncMetrics::new(config.metrics),
        }
    }

    #[inline]
    pub fn policy(&self) -> &P {
        &self.policy
    }

    #[inline]
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Snapshot of this synchronizer's counters
    pub fn metrics(&self) -> SyncMetricsSnapshot {
        self.metrics.snapshot()
    }

    // =========================================================================
    // State word
    // =========================================================================

    /// Current state (acquire-ordered)
    #[inline(always)]
    pub fn state(&self) -> P::Word {
        self.state.get()
    }

    /// Overwrite the state; only for the exclusive owner
    #[inline(always)]
    pub fn set_state(&self, value: P::Word) {
        self.state.set(value)
    }

    #[inline(always)]
    pub fn compare_and_set_state(&self, expected: P::Word, new: P::Word) -> bool {
        self.state.compare_and_set(expected, new)
    }

    // =========================================================================
    // Exclusive owner bookkeeping
    // =========================================================================

    /// Record (or clear) the exclusive owner
    #[inline]
    pub fn set_exclusive_owner(&self, owner: Option<&Waiter>) {
        let id = owner.map_or(NO_OWNER, Waiter::id);
        self.owner.store(id, Ordering::Release);
    }

    /// Record the calling thread as exclusive owner
    #[inline]
    pub fn set_exclusive_owner_to_current(&self) {
        self.owner.store(park::current_id(), Ordering::Release);
    }

    /// Waiter id of the exclusive owner, if any
    #[inline]
    pub fn exclusive_owner(&self) -> Option<u64> {
        match self.owner.load(Ordering::Acquire) {
            NO_OWNER => None,
            id => Some(id),
        }
    }

    #[inline]
    pub fn is_owned_by_current_thread(&self) -> bool {
        self.owner.load(Ordering::Acquire) == park::current_id()
    }

    /// Ask the policy whether the caller holds exclusive ownership
    pub fn is_held_exclusively(&self) -> SyncResult<bool> {
        self.policy.is_held_exclusively(self)
    }

    // =========================================================================
    // Exclusive mode
    // =========================================================================

    /// Acquire, ignoring interrupts (they are re-asserted on return)
    pub fn acquire(&self, arg: P::Word) -> SyncResult<()> {
        if self.policy.try_acquire(self, arg)? {
            self.metrics.record_fast_acquire();
            return Ok(());
        }
        self.acquire_queued(None, arg, Mode::Exclusive, false, None)
            .map(|_| ())
    }

    /// Acquire, failing with `Interrupted` if interrupted first
    pub fn acquire_interruptibly(&self, arg: P::Word) -> SyncResult<()> {
        self.check_interrupt()?;
        if self.policy.try_acquire(self, arg)? {
            self.metrics.record_fast_acquire();
            return Ok(());
        }
        self.acquire_queued(None, arg, Mode::Exclusive, true, None)
            .map(|_| ())
    }

    /// Acquire within `timeout`; `Ok(false)` when the time ran out
    pub fn try_acquire_timeout(&self, arg: P::Word, timeout: Duration) -> SyncResult<bool> {
        self.check_interrupt()?;
        if self.policy.try_acquire(self, arg)? {
            self.metrics.record_fast_acquire();
            return Ok(true);
        }
        if timeout.is_zero() {
            return Ok(false);
        }
        self.acquire_queued(None, arg, Mode::Exclusive, true, park::deadline_after(timeout))
    }

    /// Release; wakes the head successor when the policy reports a full release
    pub fn release(&self, arg: P::Word) -> SyncResult<bool> {
        if self.policy.try_release(self, arg)? {
            self.metrics.record_release();
            self.queue.signal_head_successor();
            return Ok(true);
        }
        Ok(false)
    }

    // =========================================================================
    // Shared mode
    // =========================================================================

    pub fn acquire_shared(&self, arg: P::Word) -> SyncResult<()> {
        if self.policy.try_acquire_shared(self, arg)?.is_acquired() {
            self.metrics.record_fast_acquire();
            return Ok(());
        }
        self.acquire_queued(None, arg, Mode::Shared, false, None)
            .map(|_| ())
    }

    pub fn acquire_shared_interruptibly(&self, arg: P::Word) -> SyncResult<()> {
        self.check_interrupt()?;
        if self.policy.try_acquire_shared(self, arg)?.is_acquired() {
            self.metrics.record_fast_acquire();
            return Ok(());
        }
        self.acquire_queued(None, arg, Mode::Shared, true, None)
            .map(|_| ())
    }

    pub fn try_acquire_shared_timeout(&self, arg: P::Word, timeout: Duration) -> SyncResult<bool> {
        self.check_interrupt()?;
        if self.policy.try_acquire_shared(self, arg)?.is_acquired() {
            self.metrics.record_fast_acquire();
            return Ok(true);
        }
        if timeout.is_zero() {
            return Ok(false);
        }
        self.acquire_queued(None, arg, Mode::Shared, true, park::deadline_after(timeout))
    }

    /// Release in shared mode, propagating the wake-up through shared waiters
    pub fn release_shared(&self, arg: P::Word) -> SyncResult<bool> {
        if self.policy.try_release_shared(self, arg)? {
            self.metrics.record_release();
            self.queue.signal_shared_release();
            return Ok(true);
        }
        Ok(false)
    }

    // =========================================================================
    // Engine
    // =========================================================================

    fn check_interrupt(&self) -> SyncResult<()> {
        if park::interrupted() {
            self.metrics.record_interrupt();
            return Err(SyncError::Interrupted);
        }
        Ok(())
    }

    /// One policy attempt; `Some(propagate)` when acquired
    #[inline]
    fn try_acquire_mode(&self, arg: P::Word, mode: Mode) -> SyncResult<Option<bool>> {
        match mode {
            Mode::Exclusive => Ok(self.policy.try_acquire(self, arg)?.then_some(false)),
            Mode::Shared => Ok(match self.policy.try_acquire_shared(self, arg)? {
                SharedAcquire::Failed => None,
                SharedAcquire::Acquired => Some(false),
                SharedAcquire::Propagate => Some(true),
            }),
        }
    }

    /// Slow path shared by every acquire variant
    ///
    /// `node` is `Some` only when reacquiring after a condition wait. Returns
    /// `Ok(true)` when acquired and `Ok(false)` when the deadline passed.
    pub(crate) fn acquire_queued(
        &self,
        mut node: Option<Arc<Node>>,
        arg: P::Word,
        mode: Mode,
        interruptible: bool,
        deadline: Option<Instant>,
    ) -> SyncResult<bool> {
        let current = park::current();
        let reacquire = node.is_some();
        let mut spins: u32 = 0;
        let mut post_spins: u32 = 0;
        let mut interrupted = false;
        let mut first = false;
        let mut pred: Option<Arc<Node>> = None;

        loop {
            if !first {
                pred = node.as_ref().and_then(|n| n.prev());
                if let Some(p) = &pred {
                    first = self.queue.is_head(p);
                    if !first {
                        if p.is_cancelled() {
                            self.queue.clean();
                            continue;
                        }
                        if !p.has_prev() {
                            // Predecessor is about to become head
                            std::hint::spin_loop();
                            continue;
                        }
                    }
                }
            }

            if first || pred.is_none() {
                let acquired = match self.try_acquire_mode(arg, mode) {
                    Ok(acquired) => acquired,
                    Err(e) => {
                        let _ = self.cancel_acquire(node.as_ref(), interrupted, false);
                        return Err(e);
                    }
                };

                if let Some(propagate) = acquired {
                    if first {
                        if let (Some(n), Some(p)) = (&node, &pred) {
                            n.set_prev(None);
                            self.queue.set_head(n.clone());
                            p.set_next(None);
                            if mode == Mode::Shared
                                && (propagate || p.status() & NODE_PROPAGATE != 0)
                            {
                                SyncQueue::signal_next_if_shared(n);
                            }
                        }
                    }
                    if interrupted {
                        current.interrupt();
                    }
                    if first || reacquire {
                        self.metrics.record_queued_acquire();
                    } else {
                        self.metrics.record_fast_acquire();
                    }
                    return Ok(true);
                }
            }

            let Some(tail) = self.queue.tail() else {
                self.queue.try_initialize_head();
                continue;
            };
            let Some(n) = node.clone() else {
                node = Some(Node::new(mode, current.clone()));
                continue;
            };

            if pred.is_none() {
                n.set_prev(Some(tail.clone()));
                if self.queue.cas_tail(&tail, &n) {
                    tail.set_next(Some(n.clone()));
                } else {
                    n.set_prev(None);
                }
            } else if first && spins != 0 {
                spins -= 1;
                std::hint::spin_loop();
            } else if n.status() == 0 {
                // Ask for a signal, then recheck before parking
                n.set_status(NODE_WAITING);
            } else {
                post_spins = ((post_spins << 1) | 1).min(self.config.max_spins);
                spins = post_spins;

                if let Some(deadline) = deadline {
                    if Instant::now() >= deadline {
                        self.metrics.record_timeout();
                        break;
                    }
                }

                self.metrics.record_park();
                park::park_while(&current, deadline, || n.is_waiting());
                n.clear_status();

                interrupted |= current.take_interrupt();
                if interrupted && interruptible {
                    break;
                }
            }
        }

        self.cancel_acquire(node.as_ref(), interrupted, interruptible)
    }

    /// Abandon an acquisition: mark the node cancelled and splice it out
    fn cancel_acquire(
        &self,
        node: Option<&Arc<Node>>,
        interrupted: bool,
        interruptible: bool,
    ) -> SyncResult<bool> {
        if let Some(n) = node {
            n.cancel();
            if n.has_prev() {
                self.queue.clean();
            }
            self.metrics.record_cancellation();
            trace!(
                waiter = park::current_id(),
                mode = ?n.mode(),
                interrupted,
                "acquire cancelled"
            );
        }

        if interrupted {
            if interruptible {
                self.metrics.record_interrupt();
                return Err(SyncError::Interrupted);
            }
            park::current().interrupt();
        }
        Ok(false)
    }

    // =========================================================================
    // Queue introspection
    // =========================================================================

    /// Whether any thread is waiting to acquire
    pub fn has_queued_threads(&self) -> bool {
        self.queue.has_queued_threads()
    }

    /// Whether any thread has ever had to queue
    pub fn has_contended(&self) -> bool {
        self.queue.has_contended()
    }

    /// Longest-waiting thread, if any
    pub fn first_queued_waiter(&self) -> Option<Arc<Waiter>> {
        self.queue.first_queued_waiter()
    }

    pub fn is_queued(&self, waiter: &Waiter) -> bool {
        self.queue.is_queued(waiter)
    }

    /// Whether some other thread has been waiting longer than the caller
    ///
    /// Fair policies refuse to barge when this holds.
    pub fn has_queued_predecessors(&self) -> bool {
        let current = park::current();
        self.queue.has_queued_predecessors(&current)
    }

    /// Whether the first queued thread waits in exclusive mode
    pub fn apparently_first_queued_is_exclusive(&self) -> bool {
        self.queue.apparently_first_queued_is_exclusive()
    }

    /// Estimated number of waiting threads
    pub fn queue_length(&self) -> usize {
        self.queue.queue_length()
    }

    /// Waiting threads in queue order
    pub fn queued_waiters(&self) -> Vec<Arc<Waiter>> {
        self.queue.queued_waiters(None)
    }

    pub fn exclusive_queued_waiters(&self) -> Vec<Arc<Waiter>> {
        self.queue.queued_waiters(Some(Mode::Exclusive))
    }

    pub fn shared_queued_waiters(&self) -> Vec<Arc<Waiter>> {
        self.queue.queued_waiters(Some(Mode::Shared))
    }

    // =========================================================================
    // Conditions
    // =========================================================================

    /// New condition bound to this synchronizer
    pub fn new_condition(self: &Arc<Self>) -> Condition<P> {
        Condition::new(Arc::clone(self))
    }

    /// Whether `condition` was created by this synchronizer
    pub fn owns(&self, condition: &Condition<P>) -> bool {
        condition.is_owned_by(self)
    }

    fn check_owns(&self, condition: &Condition<P>) -> SyncResult<()> {
        if self.owns(condition) {
            Ok(())
        } else {
            Err(SyncError::InvalidArgument(
                "condition belongs to another synchronizer".to_string(),
            ))
        }
    }

    pub fn has_waiters(&self, condition: &Condition<P>) -> SyncResult<bool> {
        self.check_owns(condition)?;
        condition.has_waiters()
    }

    pub fn wait_queue_length(&self, condition: &Condition<P>) -> SyncResult<usize> {
        self.check_owns(condition)?;
        condition.wait_queue_length()
    }

    pub fn waiting_waiters(&self, condition: &Condition<P>) -> SyncResult<Vec<Arc<Waiter>>> {
        self.check_owns(condition)?;
        condition.waiting_waiters()
    }
}

impl<P: Policy> fmt::Debug for Synchronizer<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Synchronizer")
            .field("state", &self.state())
            .field("owner", &self.exclusive_owner())
            .field("queued", &self.has_queued_threads())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    /// Non-reentrant exclusive lock: 0 unlocked, 1 locked
    struct TestMutex;

    impl Policy for TestMutex {
        type Word = i32;

        fn try_acquire(&self, sync: &Synchronizer<Self>, _arg: i32) -> SyncResult<bool> {
            if sync.compare_and_set_state(0, 1) {
                sync.set_exclusive_owner_to_current();
                return Ok(true);
            }
            Ok(false)
        }

        fn try_release(&self, sync: &Synchronizer<Self>, _arg: i32) -> SyncResult<bool> {
            if sync.state() != 1 || !sync.is_owned_by_current_thread() {
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

    /// One-shot gate: shared acquire succeeds once state is non-zero
    struct TestLatch;

    impl Policy for TestLatch {
        type Word = i32;

        fn try_acquire_shared(&self, sync: &Synchronizer<Self>, _arg: i32) -> SyncResult<SharedAcquire> {
            Ok(if sync.state() != 0 {
                SharedAcquire::Propagate
            } else {
                SharedAcquire::Failed
            })
        }

        fn try_release_shared(&self, sync: &Synchronizer<Self>, _arg: i32) -> SyncResult<bool> {
            sync.set_state(1);
            Ok(true)
        }
    }

    fn wait_for_queued<P: Policy>(sync: &Synchronizer<P>, n: usize) {
        let start = Instant::now();
        while sync.queue_length() < n {
            assert!(start.elapsed() < Duration::from_secs(5), "threads never queued");
            thread::yield_now();
        }
    }

    #[test]
    fn test_uncontended_acquire_release() {
        let sync = Synchronizer::new(TestMutex, 0);
        sync.acquire(1).unwrap();
        assert_eq!(sync.state(), 1);
        assert!(sync.is_held_exclusively().unwrap());
        assert!(sync.release(1).unwrap());
        assert_eq!(sync.state(), 0);
        assert!(!sync.has_contended());
        assert_eq!(sync.metrics().fast_acquires, 1);
    }

    #[test]
    fn test_release_without_ownership_fails() {
        let sync = Synchronizer::new(TestMutex, 0);
        assert!(matches!(sync.release(1), Err(SyncError::IllegalMonitorState(_))));
    }

    #[test]
    fn test_blocked_acquire_wakes_on_release() {
        let sync = Arc::new(Synchronizer::new(TestMutex, 0));
        sync.acquire(1).unwrap();

        let sync_clone = sync.clone();
        let worker = park::spawn(move || {
            sync_clone.acquire(1).unwrap();
            let held = sync_clone.is_held_exclusively().unwrap();
            sync_clone.release(1).unwrap();
            held
        });

        wait_for_queued(&sync, 1);
        assert!(sync.has_queued_threads());
        assert!(sync.is_queued(worker.waiter()));
        sync.release(1).unwrap();

        assert!(worker.join().unwrap());
        assert!(!sync.has_queued_threads());
        assert!(sync.has_contended());
    }

    #[test]
    fn test_interruptible_acquire_cancels() {
        let sync = Arc::new(Synchronizer::new(TestMutex, 0));
        sync.acquire(1).unwrap();

        let sync_clone = sync.clone();
        let worker = park::spawn(move || sync_clone.acquire_interruptibly(1));

        wait_for_queued(&sync, 1);
        worker.interrupt();
        assert_eq!(worker.join().unwrap(), Err(SyncError::Interrupted));
        assert!(!sync.has_queued_threads());
        assert_eq!(sync.metrics().cancellations, 1);
        sync.release(1).unwrap();
    }

    #[test]
    fn test_pending_interrupt_fails_fast() {
        let sync = Synchronizer::new(TestMutex, 0);
        park::current().interrupt();
        assert_eq!(sync.acquire_interruptibly(1), Err(SyncError::Interrupted));
        // Flag consumed
        sync.acquire_interruptibly(1).unwrap();
    }

    #[test]
    fn test_uninterruptible_acquire_reasserts_interrupt() {
        let sync = Arc::new(Synchronizer::new(TestMutex, 0));
        sync.acquire(1).unwrap();

        let sync_clone = sync.clone();
        let worker = park::spawn(move || {
            sync_clone.acquire(1).unwrap();
            sync_clone.release(1).unwrap();
            park::interrupted()
        });

        wait_for_queued(&sync, 1);
        worker.interrupt();
        thread::sleep(Duration::from_millis(20));
        assert!(!worker.is_finished());
        sync.release(1).unwrap();

        assert!(worker.join().unwrap());
    }

    #[test]
    fn test_timed_acquire_times_out() {
        let sync = Arc::new(Synchronizer::new(TestMutex, 0));
        sync.acquire(1).unwrap();

        let sync_clone = sync.clone();
        let result = thread::spawn(move || {
            let start = Instant::now();
            let acquired = sync_clone.try_acquire_timeout(1, Duration::from_millis(50));
            (acquired, start.elapsed())
        })
        .join()
        .unwrap();

        assert_eq!(result.0, Ok(false));
        assert!(result.1 >= Duration::from_millis(50));
        assert!(!sync.has_queued_threads());
        assert_eq!(sync.metrics().timeouts, 1);
    }

    #[test]
    fn test_zero_timeout_only_tries_once() {
        let sync = Synchronizer::new(TestMutex, 1);
        assert_eq!(sync.try_acquire_timeout(1, Duration::ZERO), Ok(false));
        assert!(!sync.has_contended());
    }

    #[test]
    fn test_shared_release_wakes_all() {
        let sync = Arc::new(Synchronizer::new(TestLatch, 0));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let sync = sync.clone();
                thread::spawn(move || sync.acquire_shared_interruptibly(1))
            })
            .collect();

        wait_for_queued(&sync, 4);
        assert_eq!(sync.shared_queued_waiters().len(), 4);
        assert!(sync.exclusive_queued_waiters().is_empty());
        assert!(sync.release_shared(1).unwrap());

        for handle in handles {
            assert!(handle.join().unwrap().is_ok());
        }
        assert!(!sync.has_queued_threads());
    }

    #[test]
    fn test_fast_path_never_enqueues() {
        let sync = Synchronizer::new(TestLatch, 1);
        sync.acquire_shared(1).unwrap();
        assert!(!sync.has_contended());
    }
}
