/*!
 * Synchronizer Metrics
 *
 * Relaxed atomic counters per synchronizer. Counters are monotonic and only
 * meaningful as a snapshot; they never feed back into the algorithm.
 */

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub(crate) struct SyncMetrics {
    enabled: bool,
    fast_acquires: AtomicU64,
    queued_acquires: AtomicU64,
    parks: AtomicU64,
    cancellations: AtomicU64,
    timeouts: AtomicU64,
    interrupts: AtomicU64,
    releases: AtomicU64,
    transfers: AtomicU64,
}

macro_rules! counter {
    ($name:ident, $field:ident) => {
        #[inline(always)]
        pub(crate) fn $name(&self) {
            if self.enabled {
                self.$field.fetch_add(1, Ordering::Relaxed);
            }
        }
    };
}

impl SyncMetrics {
    pub(crate) fn new(enabled: bool) -> Self {
        Self {
            enabled,
            ..Default::default()
        }
    }

    counter!(record_fast_acquire, fast_acquires);
    counter!(record_queued_acquire, queued_acquires);
    counter!(record_park, parks);
    counter!(record_cancellation, cancellations);
    counter!(record_timeout, timeouts);
    counter!(record_interrupt, interrupts);
    counter!(record_release, releases);
    counter!(record_transfer, transfers);

    pub(crate) fn snapshot(&self) -> SyncMetricsSnapshot {
        SyncMetricsSnapshot {
            enabled: self.enabled,
            fast_acquires: self.fast_acquires.load(Ordering::Relaxed),
            queued_acquires: self.queued_acquires.load(Ordering::Relaxed),
            parks: self.parks.load(Ordering::Relaxed),
            cancellations: self.cancellations.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            interrupts: self.interrupts.load(Ordering::Relaxed),
            releases: self.releases.load(Ordering::Relaxed),
            transfers: self.transfers.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of a synchronizer's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMetricsSnapshot {
    pub enabled: bool,
    /// Acquisitions that succeeded without queueing
    pub fast_acquires: u64,
    /// Acquisitions that succeeded after queueing
    pub queued_acquires: u64,
    pub parks: u64,
    /// Nodes abandoned through interrupt or timeout
    pub cancellations: u64,
    pub timeouts: u64,
    pub interrupts: u64,
    /// Releases that fully freed the resource
    pub releases: u64,
    /// Condition waiters moved onto the wait queue
    pub transfers: u64,
}

impl SyncMetricsSnapshot {
    /// Share of successful acquisitions that had to queue
    pub fn contention_ratio(&self) -> f64 {
        let total = self.fast_acquires + self.queued_acquires;
        if total == 0 {
            0.0
        } else {
            self.queued_acquires as f64 / total as f64
        }
    }

    /// Counter-wise sum, for aggregating several synchronizers
    pub fn merge(&self, other: &Self) -> Self {
        Self {
            enabled: self.enabled || other.enabled,
            fast_acquires: self.fast_acquires + other.fast_acquires,
            queued_acquires: self.queued_acquires + other.queued_acquires,
            parks: self.parks + other.parks,
            cancellations: self.cancellations + other.cancellations,
            timeouts: self.timeouts + other.timeouts,
            interrupts: self.interrupts + other.interrupts,
            releases: self.releases + other.releases,
            transfers: self.transfers + other.transfers,
        }
    }
}
