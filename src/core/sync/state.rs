/*!
 * State Cell
 *
 * The single word of synchronization state shared by every thread using one
 * synchronizer. Word width is chosen by the policy: `i32` covers locks, latches
 * and semaphores, `i64` serves primitives that need a larger state space.
 *
 * # Memory Ordering
 *
 * - Reads are `Acquire`: observing a released state also observes everything
 *   the releasing thread wrote before it
 * - Plain writes are `Release`: only the exclusive owner uses them
 * - CAS is `AcqRel` on success, making a successful acquire an acquire fence
 *   and a successful release a release fence
 */

use std::fmt::Debug;
use std::sync::atomic::{AtomicI32, AtomicI64, Ordering};

/// Integer type usable as a synchronizer state word
pub trait StateWord: Copy + Eq + Ord + Debug + Send + Sync + 'static {
    /// Backing atomic
    type Atomic: Send + Sync + Debug;

    const ZERO: Self;
    const ONE: Self;

    fn new_atomic(value: Self) -> Self::Atomic;
    fn load(atomic: &Self::Atomic) -> Self;
    fn store(atomic: &Self::Atomic, value: Self);
    fn compare_and_set(atomic: &Self::Atomic, expected: Self, new: Self) -> bool;

    /// Lossless widening, used for metrics and diagnostics
    fn to_i64(self) -> i64;
}

macro_rules! impl_state_word {
    ($word:ty, $atomic:ty) => {
        impl StateWord for $word {
            type Atomic = $atomic;

            const ZERO: Self = 0;
            const ONE: Self = 1;

            #[inline]
            fn new_atomic(value: Self) -> Self::Atomic {
                <$atomic>::new(value)
            }

            #[inline(always)]
            fn load(atomic: &Self::Atomic) -> Self {
                atomic.load(Ordering::Acquire)
            }

            #[inline(always)]
            fn store(atomic: &Self::Atomic, value: Self) {
                atomic.store(value, Ordering::Release)
            }

            #[inline(always)]
            fn compare_and_set(atomic: &Self::Atomic, expected: Self, new: Self) -> bool {
                atomic
                    .compare_exchange(expected, new, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
            }

            #[inline]
            fn to_i64(self) -> i64 {
                self as i64
            }
        }
    };
}

impl_state_word!(i32, AtomicI32);
impl_state_word!(i64, AtomicI64);

/// Atomic state word
#[derive(Debug)]
pub struct StateCell<W: StateWord> {
    value: W::Atomic,
}

impl<W: StateWord> StateCell<W> {
    pub fn new(initial: W) -> Self {
        Self {
            value: W::new_atomic(initial),
        }
    }

    /// Current state (acquire-ordered)
    #[inline(always)]
    pub fn get(&self) -> W {
        W::load(&self.value)
    }

    /// Overwrite the state (release-ordered)
    ///
    /// Only valid for the thread holding exclusive ownership.
    #[inline(always)]
    pub fn set(&self, value: W) {
        W::store(&self.value, value)
    }

    /// Atomically replace `expected` with `new`
    #[inline(always)]
    pub fn compare_and_set(&self, expected: W, new: W) -> bool {
        W::compare_and_set(&self.value, expected, new)
    }
}

impl<W: StateWord + Default> Default for StateCell<W> {
    fn default() -> Self {
        Self::new(W::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_cas_transitions() {
        let cell = StateCell::new(0i32);
        assert!(cell.compare_and_set(0, 1));
        assert!(!cell.compare_and_set(0, 2));
        assert_eq!(cell.get(), 1);

        cell.set(5);
        assert_eq!(cell.get(), 5);
    }

    #[test]
    fn test_wide_word() {
        let cell = StateCell::new(i64::MAX - 1);
        assert!(cell.compare_and_set(i64::MAX - 1, i64::MAX));
        assert_eq!(cell.get().to_i64(), i64::MAX);
    }

    #[test]
    fn test_concurrent_increments_are_totally_ordered() {
        let cell = Arc::new(StateCell::new(0i32));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let cell = cell.clone();
                thread::spawn(move || {
                    for _ in 0..1000 {
                        loop {
                            let c = cell.get();
                            if cell.compare_and_set(c, c + 1) {
                                break;
                            }
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(cell.get(), 4000);
    }
}
