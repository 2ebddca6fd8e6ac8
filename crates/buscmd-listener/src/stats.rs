use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Point-in-time counters for one listener.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerStats {
    /// Command frames captured into the receive buffer.
    pub commands_received: u64,
    /// Commands rejected because another was still pending.
    pub busy_rejections: u64,
    /// Frames that failed length or layout validation.
    pub malformed_frames: u64,
    /// Responses written to the response buffer.
    pub responses_posted: u64,
    /// Responses handed to the bus.
    pub responses_delivered: u64,
    /// Deferred responses registered.
    pub deferred_registered: u64,
    /// Deferred responses collected by a query.
    pub deferred_resolved: u64,
    /// Deferred responses reclaimed uncollected.
    pub deferred_expired: u64,
}

#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    pub(crate) commands_received: AtomicU64,
    pub(crate) busy_rejections: AtomicU64,
    pub(crate) malformed_frames: AtomicU64,
    pub(crate) responses_posted: AtomicU64,
    pub(crate) responses_delivered: AtomicU64,
    pub(crate) deferred_registered: AtomicU64,
    pub(crate) deferred_resolved: AtomicU64,
    pub(crate) deferred_expired: AtomicU64,
}

pub(crate) fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl StatsCounters {
    pub(crate) fn snapshot(&self) -> ListenerStats {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        ListenerStats {
            commands_received: load(&self.commands_received),
            busy_rejections: load(&self.busy_rejections),
            malformed_frames: load(&self.malformed_frames),
            responses_posted: load(&self.responses_posted),
            responses_delivered: load(&self.responses_delivered),
            deferred_registered: load(&self.deferred_registered),
            deferred_resolved: load(&self.deferred_resolved),
            deferred_expired: load(&self.deferred_expired),
        }
    }
}
