/*!
 * Permit Accounting Property Tests
 *
 * Random single-threaded operation sequences against a simple model, then a
 * concurrent check that permits are conserved
 */

use ai_os_sync::{ReentrantReadWriteLock, Semaphore};
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::thread;

#[derive(Debug, Clone)]
enum PermitOp {
    TryAcquire(i32),
    Release(i32),
    Reduce(i32),
    Drain,
}

fn permit_op() -> impl Strategy<Value = PermitOp> {
    prop_oneof![
        (0..8i32).prop_map(PermitOp::TryAcquire),
        (0..8i32).prop_map(PermitOp::Release),
        (0..4i32).prop_map(PermitOp::Reduce),
        Just(PermitOp::Drain),
    ]
}

#[derive(Debug, Clone, Copy)]
enum RwOp {
    Read,
    ReadUnlock,
    Write,
    WriteUnlock,
}

fn rw_op() -> impl Strategy<Value = RwOp> {
    prop_oneof![
        Just(RwOp::Read),
        Just(RwOp::ReadUnlock),
        Just(RwOp::Write),
        Just(RwOp::WriteUnlock),
    ]
}

proptest! {
    #[test]
    fn semaphore_matches_model(
        initial in -4..16i32,
        fair in any::<bool>(),
        ops in prop::collection::vec(permit_op(), 0..64),
    ) {
        let sem = Semaphore::with_fairness(initial, fair);
        let mut model = i64::from(initial);

        for op in ops {
            match op {
                PermitOp::TryAcquire(n) => {
                    let acquired = sem.try_acquire_many(n).unwrap();
                    prop_assert_eq!(acquired, model >= i64::from(n));
                    if acquired {
                        model -= i64::from(n);
                    }
                }
                PermitOp::Release(n) => {
                    sem.release_many(n).unwrap();
                    model += i64::from(n);
                }
                PermitOp::Reduce(n) => {
                    sem.reduce_permits(n).unwrap();
                    model -= i64::from(n);
                }
                PermitOp::Drain => {
                    let drained = sem.drain_permits();
                    prop_assert_eq!(i64::from(drained), model.max(0));
                    model = model.min(0);
                }
            }
            prop_assert_eq!(i64::from(sem.available_permits()), model);
        }
        prop_assert!(!sem.has_queued_threads());
    }

    #[test]
    fn rwlock_hold_counts_match_model(ops in prop::collection::vec(rw_op(), 0..64)) {
        let rw = ReentrantReadWriteLock::new();
        let (mut reads, mut writes) = (0u32, 0u32);

        for op in ops {
            match op {
                RwOp::Read => {
                    // Readers only enter alongside our own write hold or none
                    prop_assert!(rw.read_lock().try_lock().unwrap());
                    reads += 1;
                }
                RwOp::ReadUnlock => {
                    let result = rw.read_lock().unlock();
                    prop_assert_eq!(result.is_ok(), reads > 0);
                    reads = reads.saturating_sub(1);
                }
                RwOp::Write => {
                    // No upgrade: a reader cannot take the write lock
                    let acquired = rw.write_lock().try_lock().unwrap();
                    prop_assert_eq!(acquired, reads == 0 || writes > 0);
                    if acquired {
                        writes += 1;
                    }
                }
                RwOp::WriteUnlock => {
                    let result = rw.write_lock().unlock();
                    prop_assert_eq!(result.is_ok(), writes > 0);
                    writes = writes.saturating_sub(1);
                }
            }
            prop_assert_eq!(rw.read_hold_count(), reads);
            prop_assert_eq!(rw.read_lock_count(), reads);
            prop_assert_eq!(rw.write_hold_count(), writes);
            prop_assert_eq!(rw.is_write_locked(), writes > 0);
        }
    }
}

#[test]
fn test_permits_conserved_under_contention() {
    let sem = Arc::new(Semaphore::new(3));

    let handles: Vec<_> = (0..8u64)
        .map(|i| {
            let sem = sem.clone();
            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(i);
                for _ in 0..500 {
                    let demand = rng.gen_range(1..=3);
                    sem.acquire_many(demand).unwrap();
                    assert!(sem.available_permits() >= 0);
                    sem.release_many(demand).unwrap();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(sem.available_permits(), 3);
    assert!(!sem.has_queued_threads());
}
