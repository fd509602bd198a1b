//! Cumulative interception counters

use parking_lot::Mutex;
use serde::Serialize;

/// Monotonic counters. Clearing the certificate cache never touches these.
///
/// All five counters sit behind one lock so a snapshot never observes half of
/// a resolution (a miss counted but its generation not yet).
#[derive(Debug, Default)]
pub struct InterceptStats {
    counters: Mutex<StatsSnapshot>,
}

/// Point-in-time copy of [`InterceptStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub certificates_generated: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub intercepted_connections: u64,
    pub passthrough_connections: u64,
}

impl InterceptStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_generated(&self) {
        self.counters.lock().certificates_generated += 1;
    }

    pub(crate) fn record_hit(&self) {
        self.counters.lock().cache_hits += 1;
    }

    pub(crate) fn record_miss(&self) {
        self.counters.lock().cache_misses += 1;
    }

    pub fn record_intercepted(&self) {
        self.counters.lock().intercepted_connections += 1;
    }

    pub fn record_passthrough(&self) {
        self.counters.lock().passthrough_connections += 1;
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        *self.counters.lock()
    }
}
