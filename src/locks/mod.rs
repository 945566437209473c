/*!
 * Blocking Primitives
 *
 * Each primitive is a small `Policy` over a shared `Synchronizer`:
 * - `Mutex`: non-reentrant exclusive lock
 * - `ReentrantLock`: reentrant exclusive lock, fair or barging
 * - `ReentrantReadWriteLock`: shared readers, reentrant exclusive writer
 * - `Semaphore`: counting permits, fair or barging
 * - `CountDownLatch`: one-shot gate
 * - `CyclicBarrier`: reusable rendezvous for a fixed number of parties
 */

mod barrier;
mod latch;
mod mutex;
mod reentrant;
mod rwlock;
mod semaphore;

// Re-export public API
pub use barrier::CyclicBarrier;
pub use latch::{CountDownLatch, LatchPolicy};
pub use mutex::{Mutex, MutexGuard, MutexPolicy};
pub use reentrant::{ReentrantLock, ReentrantLockGuard, ReentrantPolicy};
pub use rwlock::{
    ReadLock, ReadLockGuard, ReentrantReadWriteLock, RwPolicy, WriteLock, WriteLockGuard,
};
pub use semaphore::{Semaphore, SemaphorePolicy};
