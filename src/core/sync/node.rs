/*!
 * Wait Queue Nodes
 *
 * A node is one thread's pending acquisition. Links are `ArcSwapOption`s so
 * that every CAS compares against a pointer the caller keeps alive: no ABA, no
 * epoch reclamation. Unlinking clears the links that point at a node, and the
 * reference count frees it once its own thread lets go.
 *
 * Only the status word is written by threads other than the owner.
 */

use super::park::Waiter;
use crate::core::limits::{NODE_CANCELLED, NODE_COND, NODE_WAITING};
use arc_swap::ArcSwapOption;
use std::fmt;
use std::ptr;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

/// Acquisition mode of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    Exclusive,
    Shared,
}

pub(crate) struct Node {
    prev: ArcSwapOption<Node>,
    next: ArcSwapOption<Node>,
    status: AtomicI32,
    mode: Mode,
    waiter: Option<Arc<Waiter>>,
}

impl Node {
    pub(crate) fn new(mode: Mode, waiter: Arc<Waiter>) -> Arc<Self> {
        Arc::new(Self {
            prev: ArcSwapOption::empty(),
            next: ArcSwapOption::empty(),
            status: AtomicI32::new(0),
            mode,
            waiter: Some(waiter),
        })
    }

    /// Dummy head installed on first contention
    pub(crate) fn sentinel() -> Arc<Self> {
        Arc::new(Self {
            prev: ArcSwapOption::empty(),
            next: ArcSwapOption::empty(),
            status: AtomicI32::new(0),
            mode: Mode::Exclusive,
            waiter: None,
        })
    }

    #[inline]
    pub(crate) fn mode(&self) -> Mode {
        self.mode
    }

    #[inline]
    pub(crate) fn is_shared(&self) -> bool {
        self.mode == Mode::Shared
    }

    #[inline]
    pub(crate) fn waiter(&self) -> Option<&Arc<Waiter>> {
        self.waiter.as_ref()
    }

    // ---------------------------------------------------------------------
    // Status
    // ---------------------------------------------------------------------

    #[inline(always)]
    pub(crate) fn status(&self) -> i32 {
        self.status.load(Ordering::SeqCst)
    }

    #[inline(always)]
    pub(crate) fn set_status(&self, status: i32) {
        self.status.store(status, Ordering::SeqCst)
    }

    #[inline(always)]
    pub(crate) fn clear_status(&self) {
        self.status.store(0, Ordering::SeqCst)
    }

    /// Clear `bits`, returning the previous status
    #[inline(always)]
    pub(crate) fn get_and_unset_status(&self, bits: i32) -> i32 {
        self.status.fetch_and(!bits, Ordering::SeqCst)
    }

    #[inline(always)]
    pub(crate) fn set_status_bits(&self, bits: i32) {
        self.status.fetch_or(bits, Ordering::SeqCst);
    }

    #[inline(always)]
    pub(crate) fn is_cancelled(&self) -> bool {
        self.status() < 0
    }

    #[inline(always)]
    pub(crate) fn is_waiting(&self) -> bool {
        self.status() & NODE_WAITING != 0
    }

    /// Still on a condition queue, not yet signalled or cancelled
    #[inline(always)]
    pub(crate) fn is_condition_waiting(&self) -> bool {
        self.status() & NODE_COND != 0
    }

    pub(crate) fn cancel(&self) {
        self.set_status(NODE_CANCELLED);
    }

    // ---------------------------------------------------------------------
    // Links
    // ---------------------------------------------------------------------

    #[inline]
    pub(crate) fn prev(&self) -> Option<Arc<Node>> {
        self.prev.load_full()
    }

    #[inline]
    pub(crate) fn next(&self) -> Option<Arc<Node>> {
        self.next.load_full()
    }

    #[inline]
    pub(crate) fn has_prev(&self) -> bool {
        self.prev.load().is_some()
    }

    #[inline]
    pub(crate) fn set_prev(&self, prev: Option<Arc<Node>>) {
        self.prev.store(prev)
    }

    #[inline]
    pub(crate) fn set_next(&self, next: Option<Arc<Node>>) {
        self.next.store(next)
    }

    #[inline]
    pub(crate) fn prev_is(&self, node: &Arc<Node>) -> bool {
        node_ptr(&self.prev.load()) == Arc::as_ptr(node)
    }

    #[inline]
    pub(crate) fn next_is(&self, node: &Arc<Node>) -> bool {
        node_ptr(&self.next.load()) == Arc::as_ptr(node)
    }

    pub(crate) fn cas_prev(&self, current: &Arc<Node>, new: Option<Arc<Node>>) -> bool {
        cas_link(&self.prev, &Some(current.clone()), new)
    }

    pub(crate) fn cas_next(&self, current: &Option<Arc<Node>>, new: Option<Arc<Node>>) -> bool {
        cas_link(&self.next, current, new)
    }

    /// Drop both links; used when a node leaves the queue for good
    pub(crate) fn unlink(&self) {
        self.prev.store(None);
        self.next.store(None);
    }

    /// Wake the owning thread, if any
    #[inline]
    pub(crate) fn unpark(&self) {
        if let Some(waiter) = &self.waiter {
            waiter.unpark();
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("mode", &self.mode)
            .field("status", &self.status())
            .field("waiter", &self.waiter.as_ref().map(|w| w.id()))
            .finish()
    }
}

/// Raw address of an optional node, null for `None`
#[inline(always)]
pub(crate) fn node_ptr(node: &Option<Arc<Node>>) -> *const Node {
    node.as_ref().map_or(ptr::null(), Arc::as_ptr)
}

/// Pointer identity of two optional nodes
#[inline(always)]
pub(crate) fn same_node(a: &Option<Arc<Node>>, b: &Option<Arc<Node>>) -> bool {
    node_ptr(a) == node_ptr(b)
}

/// Compare-and-swap a link; `current` stays alive across the CAS so the
/// comparison is by identity of a live node
pub(crate) fn cas_link(
    link: &ArcSwapOption<Node>,
    current: &Option<Arc<Node>>,
    new: Option<Arc<Node>>,
) -> bool {
    let previous = link.compare_and_swap(current, new);
    node_ptr(&previous) == node_ptr(current)
}
