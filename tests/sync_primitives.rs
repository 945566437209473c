/*!
 * Synchronization Primitives Integration Tests
 *
 * Mutual exclusion, fairness, shared fan-out, interrupt and timeout behavior
 * across the public primitives
 */

use ai_os_sync::{park, CountDownLatch, Mutex, ReentrantLock, Semaphore, SyncError};
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn wait_until<F: Fn() -> bool>(what: &str, condition: F) {
    let start = Instant::now();
    while !condition() {
        assert!(start.elapsed() < Duration::from_secs(10), "timed out waiting for {}", what);
        thread::yield_now();
    }
}

#[test]
fn test_mutex_mutual_exclusion() {
    let mutex = Arc::new(Mutex::new());
    // Unsynchronized read-modify-write: any overlap loses updates
    let counter = Arc::new(AtomicU64::new(0));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let mutex = mutex.clone();
            let counter = counter.clone();
            thread::spawn(move || {
                for _ in 0..2_000 {
                    let _guard = mutex.guard().unwrap();
                    let v = counter.load(Ordering::Relaxed);
                    counter.store(v + 1, Ordering::Relaxed);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(counter.load(Ordering::SeqCst), 16_000);
    assert!(!mutex.is_locked());
    assert!(!mutex.has_queued_threads());
}

#[test]
fn test_mutex_hand_off() {
    let mutex = Arc::new(Mutex::new());
    mutex.lock().unwrap();

    let m = mutex.clone();
    let b = thread::spawn(move || {
        m.lock().unwrap();
        let held = m.is_held_by_current_thread();
        m.unlock().unwrap();
        held
    });

    wait_until("B to queue", || mutex.queue_length() == 1);
    assert!(!b.is_finished());
    mutex.unlock().unwrap();

    assert!(b.join().unwrap());
    assert!(!mutex.is_locked());
}

#[test]
fn test_fair_lock_grants_in_arrival_order() {
    let lock = Arc::new(ReentrantLock::with_fairness(true));
    let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
    lock.lock().unwrap();

    let mut handles = Vec::new();
    for i in 0..4 {
        let (l, o) = (lock.clone(), order.clone());
        handles.push(thread::spawn(move || {
            l.lock().unwrap();
            o.lock().push(i);
            l.unlock().unwrap();
        }));
        wait_until("waiter to queue", || lock.queue_length() == i + 1);
    }

    lock.unlock().unwrap();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(*order.lock(), vec![0, 1, 2, 3]);
}

#[test]
fn test_latch_of_two_releases_all_waiters() {
    let latch = Arc::new(CountDownLatch::new(2).unwrap());
    let passed = Arc::new(AtomicU64::new(0));

    let handles: Vec<_> = (0..5)
        .map(|_| {
            let (l, p) = (latch.clone(), passed.clone());
            thread::spawn(move || {
                l.wait().unwrap();
                p.fetch_add(1, Ordering::SeqCst);
            })
        })
        .collect();

    latch.count_down();
    thread::sleep(Duration::from_millis(30));
    assert_eq!(passed.load(Ordering::SeqCst), 0);

    latch.count_down();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(passed.load(Ordering::SeqCst), 5);

    // Open for good
    latch.count_down();
    latch.wait().unwrap();
    assert_eq!(latch.count(), 0);
}

#[test]
fn test_semaphore_of_zero_released_by_two() {
    let sem = Arc::new(Semaphore::new(0));

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let s = sem.clone();
            thread::spawn(move || s.acquire())
        })
        .collect();

    wait_until("both to queue", || sem.queue_length() == 2);
    sem.release_many(2).unwrap();

    for handle in handles {
        handle.join().unwrap().unwrap();
    }
    assert_eq!(sem.available_permits(), 0);
}

#[test]
fn test_semaphore_release_admits_cumulative_demand_in_order() {
    let sem = Arc::new(Semaphore::with_fairness(0, true));
    let admitted = Arc::new(parking_lot::Mutex::new(Vec::new()));

    let mut handles = Vec::new();
    for (i, demand) in [1, 2, 3].into_iter().enumerate() {
        let (s, a) = (sem.clone(), admitted.clone());
        handles.push(thread::spawn(move || {
            s.acquire_many(demand).unwrap();
            a.lock().push(demand);
        }));
        wait_until("waiter to queue", || sem.queue_length() == i + 1);
    }

    // Enough for the first two only
    sem.release_many(3).unwrap();
    wait_until("two admitted", || admitted.lock().len() == 2);
    thread::sleep(Duration::from_millis(30));
    assert_eq!(*admitted.lock(), vec![1, 2]);
    assert_eq!(sem.queue_length(), 1);

    sem.release_many(3).unwrap();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(*admitted.lock(), vec![1, 2, 3]);
    assert_eq!(sem.available_permits(), 0);
}

#[test]
fn test_interrupted_waiter_does_not_strand_successors() {
    let lock = Arc::new(ReentrantLock::with_fairness(true));
    lock.lock().unwrap();

    let l = lock.clone();
    let first = park::spawn(move || {
        l.lock().unwrap();
        l.unlock().unwrap();
    });
    wait_until("first to queue", || lock.queue_length() == 1);

    let l = lock.clone();
    let middle = park::spawn(move || l.lock_interruptibly());
    wait_until("middle to queue", || lock.queue_length() == 2);

    let l = lock.clone();
    let last = park::spawn(move || {
        l.lock().unwrap();
        l.unlock().unwrap();
    });
    wait_until("last to queue", || lock.queue_length() == 3);

    let middle_waiter = middle.waiter().clone();
    middle.interrupt();
    assert_eq!(middle.join().unwrap(), Err(SyncError::Interrupted));
    assert!(!lock.has_queued_thread(&middle_waiter));

    lock.unlock().unwrap();
    first.join().unwrap();
    last.join().unwrap();
    assert!(!lock.is_locked());
    assert!(!lock.has_queued_threads());
}

#[test]
fn test_timed_acquire_never_returns_early() {
    let lock = Arc::new(ReentrantLock::new());
    lock.lock().unwrap();

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let l = lock.clone();
            thread::spawn(move || {
                let timeout = Duration::from_millis(20 + 10 * i);
                let start = Instant::now();
                let acquired = l.try_lock_for(timeout).unwrap();
                (acquired, start.elapsed(), timeout)
            })
        })
        .collect();

    for handle in handles {
        let (acquired, elapsed, timeout) = handle.join().unwrap();
        assert!(!acquired);
        assert!(elapsed >= timeout, "returned after {:?}, before {:?}", elapsed, timeout);
    }
    assert!(!lock.has_queued_threads());
    assert_eq!(lock.metrics().timeouts, 4);
    lock.unlock().unwrap();
}

#[test]
fn test_timeouts_racing_with_releases() {
    let lock = Arc::new(ReentrantLock::new());
    let acquired = Arc::new(AtomicU64::new(0));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let (l, a) = (lock.clone(), acquired.clone());
            thread::spawn(move || {
                for _ in 0..200 {
                    if l.try_lock_for(Duration::from_micros(50)).unwrap() {
                        a.fetch_add(1, Ordering::Relaxed);
                        l.unlock().unwrap();
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    assert!(acquired.load(Ordering::Relaxed) > 0);
    assert!(!lock.is_locked());
    assert!(!lock.has_queued_threads());

    // Queue still healthy after many cancellations
    lock.lock().unwrap();
    lock.unlock().unwrap();
}

#[test]
fn test_condition_wait_restores_hold_count() {
    let lock = Arc::new(ReentrantLock::new());
    let cond = Arc::new(lock.new_condition());

    let (l, c) = (lock.clone(), cond.clone());
    let waiter = thread::spawn(move || {
        for _ in 0..3 {
            l.lock().unwrap();
        }
        c.wait().unwrap();
        let holds = l.hold_count();
        for _ in 0..3 {
            l.unlock().unwrap();
        }
        holds
    });

    wait_until("waiter on condition", || {
        lock.lock().unwrap();
        let waiting = lock.has_waiters(&cond).unwrap();
        if waiting {
            cond.signal().unwrap();
        }
        lock.unlock().unwrap();
        waiting
    });

    assert_eq!(waiter.join().unwrap(), 3);
    assert!(!lock.is_locked());
}

#[test]
fn test_pending_interrupt_rejected_before_blocking() {
    let sem = Semaphore::new(0);
    park::current().interrupt();
    assert_eq!(sem.acquire(), Err(SyncError::Interrupted));
    assert!(!sem.has_queued_threads());
    assert!(!park::interrupted());
}

#[test]
fn test_uninterruptible_condition_wait_outlasts_interrupt() {
    let lock = Arc::new(ReentrantLock::new());
    let cond = Arc::new(lock.new_condition());

    let (l, c) = (lock.clone(), cond.clone());
    let waiter = park::spawn(move || {
        l.lock().unwrap();
        l.lock().unwrap();
        c.wait_uninterruptibly().unwrap();
        let holds = l.hold_count();
        let interrupted = park::interrupted();
        l.unlock().unwrap();
        l.unlock().unwrap();
        (holds, interrupted)
    });

    wait_until("waiter on condition", || {
        lock.lock().unwrap();
        let waiting = lock.has_waiters(&cond).unwrap();
        lock.unlock().unwrap();
        waiting
    });
    waiter.interrupt();
    thread::sleep(Duration::from_millis(50));
    assert!(!waiter.is_finished());

    lock.lock().unwrap();
    cond.signal().unwrap();
    lock.unlock().unwrap();

    assert_eq!(waiter.join().unwrap(), (2, true));
    assert!(!lock.is_locked());
}

#[test]
fn test_uninterruptible_semaphore_acquire_outlasts_interrupt() {
    let sem = Arc::new(Semaphore::new(0));

    let s = sem.clone();
    let waiter = park::spawn(move || {
        s.acquire_uninterruptibly().unwrap();
        park::interrupted()
    });

    wait_until("waiter to queue", || sem.queue_length() == 1);
    waiter.interrupt();
    thread::sleep(Duration::from_millis(50));
    assert!(!waiter.is_finished());

    sem.release().unwrap();
    assert!(waiter.join().unwrap());
    assert_eq!(sem.available_permits(), 0);
    assert!(!sem.has_queued_threads());
}

#[test]
fn test_condition_timeouts_racing_with_signals() {
    const WAITERS: usize = 6;
    const WAITS: usize = 200;

    let lock = Arc::new(ReentrantLock::new());
    let cond = Arc::new(lock.new_condition());
    let signalled = Arc::new(AtomicU64::new(0));
    let done = Arc::new(AtomicBool::new(false));

    let handles: Vec<_> = (0..WAITERS)
        .map(|_| {
            let (l, c, sig) = (lock.clone(), cond.clone(), signalled.clone());
            thread::spawn(move || {
                for _ in 0..WAITS {
                    l.lock().unwrap();
                    let result = c.wait_timeout(Duration::from_micros(50)).unwrap();
                    assert!(l.is_held_by_current_thread());
                    if !result.timed_out() {
                        sig.fetch_add(1, Ordering::Relaxed);
                    }
                    l.unlock().unwrap();
                }
            })
        })
        .collect();

    let (l, c, d) = (lock.clone(), cond.clone(), done.clone());
    let signaller = thread::spawn(move || {
        while !d.load(Ordering::SeqCst) {
            l.lock().unwrap();
            c.signal().unwrap();
            l.unlock().unwrap();
            thread::yield_now();
        }
    });

    for handle in handles {
        handle.join().unwrap();
    }
    done.store(true, Ordering::SeqCst);
    signaller.join().unwrap();

    // Each waiter is either transferred once or times out, never both
    assert_eq!(lock.metrics().transfers, signalled.load(Ordering::Relaxed));
    lock.lock().unwrap();
    assert!(!lock.has_waiters(&cond).unwrap());
    lock.unlock().unwrap();
    assert!(!lock.has_queued_threads());
}
