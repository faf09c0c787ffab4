//! Per-plugin routing counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Live counters updated by a subscription task.
#[derive(Debug, Default)]
pub(crate) struct RouteCounters {
    observed: AtomicU64,
    matched: AtomicU64,
    delivered: AtomicU64,
    retried: AtomicU64,
    failed: AtomicU64,
}

impl RouteCounters {
    pub(crate) fn observed(&self) {
        self.observed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn matched(&self) {
        self.matched.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn retried(&self) {
        self.retried.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> RouteStats {
        RouteStats {
            observed: self.observed.load(Ordering::Relaxed),
            matched: self.matched.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Routing counters for one plugin.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteStats {
    /// Log entries read.
    pub observed: u64,
    /// Entries that passed the plugin's filter.
    pub matched: u64,
    /// Entries acknowledged by the plugin.
    pub delivered: u64,
    /// Delivery attempts repeated after a failure.
    pub retried: u64,
    /// Entries abandoned after the retry limit.
    pub failed: u64,
}
