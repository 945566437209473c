/*!
 * Thread Parking and Interruption
 *
 * Every thread that touches a synchronizer gets a `Waiter`: a unique id, an
 * interrupted flag, and a parking key. Blocking goes through
 * `parking_lot_core` keyed on the waiter's address, so a specific thread can be
 * woken by whoever holds its `Waiter` handle.
 *
 * # Design
 *
 * - One key per thread: a wake-up can never land on the wrong thread
 * - Validation under the bucket lock: a park that races with an unpark or an
 *   interrupt returns immediately instead of losing the wake-up
 * - Interrupts are sticky: the flag stays set until a blocking operation (or
 *   `interrupted()`) consumes it
 */

use parking_lot_core::{park, unpark_one, ParkResult, DEFAULT_PARK_TOKEN, DEFAULT_UNPARK_TOKEN};
use std::cell::OnceCell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

static NEXT_WAITER_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT: OnceCell<Arc<Waiter>> = const { OnceCell::new() };
}

/// Per-thread handle used for parking, unparking and interrupt delivery
#[derive(Debug)]
pub struct Waiter {
    id: u64,
    name: Option<String>,
    interrupted: AtomicBool,
}

impl Waiter {
    fn new(name: Option<String>) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_WAITER_ID.fetch_add(1, Ordering::Relaxed),
            name,
            interrupted: AtomicBool::new(false),
        })
    }

    /// Unique id, never reused within the process
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Name of the thread the waiter was created on, if it had one
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Whether this is the calling thread's waiter
    #[inline]
    pub fn is_current(&self) -> bool {
        current_id() == self.id
    }

    /// Deliver an interrupt: set the flag and wake the thread if it is parked
    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
        self.unpark();
    }

    /// Check the interrupted flag without clearing it
    #[inline]
    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    /// Consume the interrupted flag
    #[inline]
    pub(crate) fn take_interrupt(&self) -> bool {
        self.interrupted.swap(false, Ordering::SeqCst)
    }

    /// Wake the thread if it is parked; otherwise a no-op
    pub(crate) fn unpark(&self) {
        // SAFETY: the unpark callback neither panics nor calls into parking_lot.
        unsafe {
            unpark_one(self.key(), |_| DEFAULT_UNPARK_TOKEN);
        }
    }

    #[inline(always)]
    fn key(&self) -> usize {
        self as *const Self as usize
    }
}

/// How a park call ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ParkOutcome {
    /// Woken by an unpark (possibly spurious for the caller's purposes)
    Unparked,
    /// Never slept: the condition no longer held or an interrupt was pending
    Skipped,
    /// Deadline passed
    TimedOut,
}

/// Park the calling thread while `should_park` holds
///
/// `waiter` must be the calling thread's waiter. `should_park` is evaluated
/// under the parking bucket lock, so an `unpark` issued after the condition is
/// made false can never be missed. A pending interrupt also prevents sleeping.
pub(crate) fn park_while(
    waiter: &Waiter,
    deadline: Option<Instant>,
    should_park: impl FnOnce() -> bool,
) -> ParkOutcome {
    // SAFETY: the callbacks only perform atomic loads; none of them panic or
    // re-enter parking_lot. The key is the address of a live waiter.
    let result = unsafe {
        park(
            waiter.key(),
            || !waiter.is_interrupted() && should_park(),
            || {},
            |_, _| {},
            DEFAULT_PARK_TOKEN,
            deadline,
        )
    };

    match result {
        ParkResult::Unparked(_) => ParkOutcome::Unparked,
        ParkResult::Invalid => ParkOutcome::Skipped,
        ParkResult::TimedOut => ParkOutcome::TimedOut,
    }
}

/// Waiter of the calling thread
pub fn current() -> Arc<Waiter> {
    CURRENT.with(|cell| {
        cell.get_or_init(|| Waiter::new(thread::current().name().map(str::to_owned)))
            .clone()
    })
}

/// Id of the calling thread's waiter
#[inline]
pub fn current_id() -> u64 {
    CURRENT.with(|cell| {
        cell.get_or_init(|| Waiter::new(thread::current().name().map(str::to_owned)))
            .id
    })
}

/// Test and clear the calling thread's interrupted flag
pub fn interrupted() -> bool {
    current().take_interrupt()
}

/// Absolute deadline for a relative timeout; `None` when it does not fit
#[inline]
pub(crate) fn deadline_after(timeout: Duration) -> Option<Instant> {
    Instant::now().checked_add(timeout)
}

/// Thread spawned with a pre-registered waiter, so it can be interrupted
pub struct WaiterThread<T> {
    handle: JoinHandle<T>,
    waiter: Arc<Waiter>,
}

impl<T> WaiterThread<T> {
    /// The spawned thread's waiter
    pub fn waiter(&self) -> &Arc<Waiter> {
        &self.waiter
    }

    /// Interrupt the spawned thread
    pub fn interrupt(&self) {
        self.waiter.interrupt();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the thread to finish
    pub fn join(self) -> thread::Result<T> {
        self.handle.join()
    }
}

/// Spawn a thread whose waiter is known before it starts running
pub fn spawn<F, T>(f: F) -> WaiterThread<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let waiter = Waiter::new(None);
    let installed = waiter.clone();

    let handle = thread::spawn(move || {
        CURRENT.with(|cell| {
            // Fresh thread: the slot is empty
            let _ = cell.set(installed);
        });
        f()
    });

    WaiterThread { handle, waiter }
}
