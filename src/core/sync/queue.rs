/*!
 * Lock-Free Wait Queue
 *
 * Doubly-linked FIFO of waiting nodes, a variant of the CLH queue:
 *
 * ```text
 *      +------+  prev +-----+       +-----+
 * head |      | <---- |     | <---- |     |  tail
 *      +------+       +-----+       +-----+
 * ```
 *
 * - `tail` CAS is the only linearization point for enqueue; `prev` is
 *   published before it, `next` patched after it and only used as a hint
 * - `head` is a sentinel: the node holding (or last holding) the resource
 * - Cancelled nodes stay linked until `clean` splices them out; every reader
 *   must tolerate them
 *
 * No lock protects the structure. Readers that need a consistent view walk
 * `prev` pointers from the tail, which are always valid once published.
 */

use super::node::{cas_link, node_ptr, same_node, Mode, Node};
use super::park::Waiter;
use crate::core::limits::{NODE_PROPAGATE, NODE_WAITING};
use arc_swap::ArcSwapOption;
use std::sync::Arc;

pub(crate) struct SyncQueue {
    head: ArcSwapOption<Node>,
    tail: ArcSwapOption<Node>,
}

impl SyncQueue {
    pub(crate) fn new() -> Self {
        Self {
            head: ArcSwapOption::empty(),
            tail: ArcSwapOption::empty(),
        }
    }

    #[inline]
    pub(crate) fn head(&self) -> Option<Arc<Node>> {
        self.head.load_full()
    }

    #[inline]
    pub(crate) fn tail(&self) -> Option<Arc<Node>> {
        self.tail.load_full()
    }

    #[inline]
    pub(crate) fn is_head(&self, node: &Arc<Node>) -> bool {
        node_ptr(&self.head.load()) == Arc::as_ptr(node)
    }

    #[inline]
    pub(crate) fn is_tail(&self, node: &Arc<Node>) -> bool {
        node_ptr(&self.tail.load()) == Arc::as_ptr(node)
    }

    /// Only the head successor may call this, right after it acquired
    #[inline]
    pub(crate) fn set_head(&self, node: Arc<Node>) {
        self.head.store(Some(node));
    }

    #[inline]
    pub(crate) fn cas_tail(&self, current: &Arc<Node>, new: &Arc<Node>) -> bool {
        cas_link(&self.tail, &Some(current.clone()), Some(new.clone()))
    }

    /// Install the sentinel head if the queue is still empty
    pub(crate) fn try_initialize_head(&self) {
        let sentinel = Node::sentinel();
        if cas_link(&self.head, &None, Some(sentinel.clone())) {
            self.tail.store(Some(sentinel));
        }
    }

    /// Append a node that was not linked before (condition transfer)
    pub(crate) fn enqueue(&self, node: &Arc<Node>) {
        loop {
            let tail = self.tail();
            node.set_prev(tail.clone());
            match tail {
                None => self.try_initialize_head(),
                Some(t) => {
                    if self.cas_tail(&t, node) {
                        t.set_next(Some(node.clone()));
                        if t.is_cancelled() {
                            // Nobody will signal through a dead predecessor
                            node.unpark();
                        }
                        return;
                    }
                }
            }
        }
    }

    /// Wake the successor of `h` if it asked for a signal
    pub(crate) fn signal_next(h: &Node) {
        if let Some(s) = h.next() {
            if s.status() != 0 {
                s.get_and_unset_status(NODE_WAITING);
                s.unpark();
            }
        }
    }

    /// Wake the successor of `h` if it is a waiting shared node
    pub(crate) fn signal_next_if_shared(h: &Node) {
        if let Some(s) = h.next() {
            if s.is_shared() && s.status() != 0 {
                s.get_and_unset_status(NODE_WAITING);
                s.unpark();
            }
        }
    }

    /// Wake the current head's successor
    pub(crate) fn signal_head_successor(&self) {
        if let Some(h) = self.head() {
            Self::signal_next(&h);
        }
    }

    /// Shared release: signal until the head is stable, leaving a propagate
    /// mark so an acquirer racing with this release still passes it on
    pub(crate) fn signal_shared_release(&self) {
        loop {
            let Some(h) = self.head() else { return };
            Self::signal_next(&h);
            h.set_status_bits(NODE_PROPAGATE);
            if self.is_head(&h) {
                return;
            }
        }
    }

    /// Splice out cancelled nodes, scanning from the tail
    ///
    /// Restarts from the tail whenever it observes an inconsistent triple;
    /// never blocks. Wakes the head successor when the node next to the head
    /// changed, so a cancelled node can never strand a live one.
    pub(crate) fn clean(&self) {
        'restart: loop {
            let mut q = self.tail();
            let mut s: Option<Arc<Node>> = None;

            loop {
                let Some(qn) = q else { return };
                let Some(p) = qn.prev() else { return };

                let inconsistent = match &s {
                    None => !self.is_tail(&qn),
                    Some(sn) => !sn.prev_is(&qn) || sn.is_cancelled(),
                };
                if inconsistent {
                    continue 'restart;
                }

                if qn.is_cancelled() {
                    let spliced = match &s {
                        None => self.cas_tail(&qn, &p),
                        Some(sn) => sn.cas_prev(&qn, Some(p.clone())),
                    };
                    if spliced && qn.prev_is(&p) {
                        // Failure is fine: a later pass repairs `next`
                        p.cas_next(&Some(qn.clone()), s.clone());
                        if !p.has_prev() {
                            Self::signal_next(&p);
                        }
                    }
                    continue 'restart;
                }

                let n = p.next();
                if !same_node(&n, &Some(qn.clone())) {
                    // Help finish a pending enqueue or splice
                    if n.is_some() && qn.prev_is(&p) {
                        p.cas_next(&n, Some(qn.clone()));
                        if !p.has_prev() {
                            Self::signal_next(&p);
                        }
                    }
                    continue 'restart;
                }

                q = Some(p);
                s = Some(qn);
            }
        }
    }

    /// Whether `node` is reachable from the tail
    pub(crate) fn is_enqueued(&self, node: &Arc<Node>) -> bool {
        let mut t = self.tail();
        while let Some(n) = t {
            if Arc::ptr_eq(&n, node) {
                return true;
            }
            t = n.prev();
        }
        false
    }

    // ---------------------------------------------------------------------
    // Introspection (snapshots; never block)
    // ---------------------------------------------------------------------

    /// Live queued nodes from tail to head (head excluded)
    fn live_nodes(&self) -> impl Iterator<Item = Arc<Node>> {
        std::iter::successors(self.tail(), |n| n.prev())
            .filter(|n| n.has_prev() && !n.is_cancelled())
    }

    pub(crate) fn has_queued_threads(&self) -> bool {
        let head = self.head.load();
        let mut p = self.tail();
        while let Some(n) = p {
            if node_ptr(&head) == Arc::as_ptr(&n) {
                break;
            }
            if n.status() >= 0 {
                return true;
            }
            p = n.prev();
        }
        false
    }

    pub(crate) fn has_contended(&self) -> bool {
        self.head.load().is_some()
    }

    pub(crate) fn first_queued_waiter(&self) -> Option<Arc<Waiter>> {
        let head = self.head()?;
        if let Some(s) = head.next() {
            if s.has_prev() && !s.is_cancelled() {
                if let Some(w) = s.waiter() {
                    return Some(w.clone());
                }
            }
        }
        // Stale `next`: the last live node seen walking back from the tail
        // is the first one in queue order
        self.live_nodes()
            .filter_map(|n| n.waiter().cloned())
            .last()
    }

    pub(crate) fn has_queued_predecessors(&self, current: &Waiter) -> bool {
        match self.first_queued_waiter() {
            Some(first) => first.id() != current.id(),
            None => false,
        }
    }

    pub(crate) fn apparently_first_queued_is_exclusive(&self) -> bool {
        self.head()
            .and_then(|h| h.next())
            .map(|s| !s.is_shared() && !s.is_cancelled() && s.waiter().is_some())
            .unwrap_or(false)
    }

    pub(crate) fn is_queued(&self, waiter: &Waiter) -> bool {
        self.live_nodes()
            .any(|n| n.waiter().map(|w| w.id()) == Some(waiter.id()))
    }

    pub(crate) fn queue_length(&self) -> usize {
        self.live_nodes().filter(|n| n.waiter().is_some()).count()
    }

    /// Waiters in queue order, optionally filtered by mode
    pub(crate) fn queued_waiters(&self, mode: Option<Mode>) -> Vec<Arc<Waiter>> {
        let mut waiters: Vec<Arc<Waiter>> = self
            .live_nodes()
            .filter(|n| mode.map_or(true, |m| n.mode() == m))
            .filter_map(|n| n.waiter().cloned())
            .collect();
        waiters.reverse();
        waiters
    }
}

impl Drop for SyncQueue {
    fn drop(&mut self) {
        // Break prev/next cycles so reference counts can reach zero
        let mut nodes = Vec::new();
        let mut n = self.tail.swap(None);
        while let Some(node) = n {
            n = node.prev();
            nodes.push(node);
        }
        let mut n = self.head.swap(None);
        while let Some(node) = n {
            n = node.next();
            nodes.push(node);
        }
        for node in nodes {
            node.unlink();
        }
    }
}
