/*!
 * AI-OS Sync Library
 * Queued synchronizer framework and the blocking primitives built on it
 */

pub mod core;
pub mod locks;
pub mod monitoring;

// Re-exports
pub use crate::core::errors::{SyncError, SyncResult};
pub use crate::core::sync::{
    park, Condition, Mode, Policy, SharedAcquire, StateWord, SyncConfig, SyncMetricsSnapshot,
    Synchronizer, WaitTimeoutResult, Waiter, WaiterThread,
};
pub use locks::{
    CountDownLatch, CyclicBarrier, Mutex, MutexGuard, ReadLock, ReadLockGuard,
    ReentrantLock, ReentrantLockGuard, ReentrantReadWriteLock, Semaphore, WriteLock,
    WriteLockGuard,
};
pub use monitoring::init_tracing;
