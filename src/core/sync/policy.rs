/*!
 * Policy Hooks
 *
 * A primitive is a `Policy` plus a `Synchronizer`. The policy decides what the
 * state word means; the synchronizer decides who waits and who gets woken.
 *
 * # Contract
 *
 * - Hooks run on the calling thread and must not block
 * - Every state change goes through `compare_and_set_state`, or `set_state`
 *   while the caller holds exclusive ownership
 * - Hooks not meaningful for a primitive keep the default, which reports
 *   `SyncError::Unsupported`
 * - The engine trusts hook results: inconsistent answers break the primitive,
 *   not the queue
 */

use super::state::StateWord;
use super::synchronizer::Synchronizer;
use crate::core::errors::{SyncError, SyncResult};

/// Outcome of a shared acquisition attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SharedAcquire {
    /// Not acquired (negative)
    Failed,
    /// Acquired; no capacity left for further shared waiters (zero)
    Acquired,
    /// Acquired; later shared waiters may succeed too (positive)
    Propagate,
}

impl SharedAcquire {
    /// Map a signed remaining-capacity value onto the tri-state
    #[inline]
    pub fn from_remaining(remaining: i64) -> Self {
        match remaining {
            r if r < 0 => SharedAcquire::Failed,
            0 => SharedAcquire::Acquired,
            _ => SharedAcquire::Propagate,
        }
    }

    #[inline]
    pub fn is_acquired(self) -> bool {
        !matches!(self, SharedAcquire::Failed)
    }
}

/// Acquisition policy of a concrete primitive
pub trait Policy: Send + Sync + Sized + 'static {
    /// Width of the state word
    type Word: StateWord;

    /// Try to acquire in exclusive mode
    fn try_acquire(&self, sync: &Synchronizer<Self>, arg: Self::Word) -> SyncResult<bool> {
        let _ = (sync, arg);
        Err(SyncError::unsupported("exclusive acquire"))
    }

    /// Try to release in exclusive mode; `true` when fully released
    fn try_release(&self, sync: &Synchronizer<Self>, arg: Self::Word) -> SyncResult<bool> {
        let _ = (sync, arg);
        Err(SyncError::unsupported("exclusive release"))
    }

    /// Try to acquire in shared mode
    fn try_acquire_shared(
        &self,
        sync: &Synchronizer<Self>,
        arg: Self::Word,
    ) -> SyncResult<SharedAcquire> {
        let _ = (sync, arg);
        Err(SyncError::unsupported("shared acquire"))
    }

    /// Try to release in shared mode; `true` when waiters may now succeed
    fn try_release_shared(&self, sync: &Synchronizer<Self>, arg: Self::Word) -> SyncResult<bool> {
        let _ = (sync, arg);
        Err(SyncError::unsupported("shared release"))
    }

    /// Whether the calling thread holds exclusive ownership
    ///
    /// Conditions require this hook.
    fn is_held_exclusively(&self, sync: &Synchronizer<Self>) -> SyncResult<bool> {
        let _ = sync;
        Err(SyncError::unsupported("exclusive ownership query"))
    }
}
