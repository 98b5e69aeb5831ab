//! Per-node assembly counters.
//!
//! Plain relaxed atomics; `snapshot()` gives a coherent-enough copy for
//! logging and tests. Counters are monotonic for the life of the node.

use std::sync::atomic::{AtomicU64, Ordering::Relaxed};

#[derive(Debug, Default)]
pub struct NodeMetrics {
    samples_processed: AtomicU64,
    emitted: AtomicU64,
    disposed: AtomicU64,
    dropped_assemblies: AtomicU64,
    callback_panics: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeMetricsSnapshot {
    pub samples_processed: u64,
    pub emitted: u64,
    pub disposed: u64,
    pub dropped_assemblies: u64,
    pub callback_panics: u64,
}

impl NodeMetrics {
    pub fn snapshot(&self) -> NodeMetricsSnapshot {
        NodeMetricsSnapshot {
            samples_processed: self.samples_processed.load(Relaxed),
            emitted: self.emitted.load(Relaxed),
            disposed: self.disposed.load(Relaxed),
            dropped_assemblies: self.dropped_assemblies.load(Relaxed),
            callback_panics: self.callback_panics.load(Relaxed),
        }
    }

    pub(crate) fn incr_samples(&self) {
        self.samples_processed.fetch_add(1, Relaxed);
    }

    pub(crate) fn incr_emitted(&self) {
        self.emitted.fetch_add(1, Relaxed);
    }

    pub(crate) fn incr_disposed(&self) {
        self.disposed.fetch_add(1, Relaxed);
    }

    pub(crate) fn add_dropped(&self, n: u64) {
        if n > 0 {
            self.dropped_assemblies.fetch_add(n, Relaxed);
        }
    }

    pub(crate) fn incr_panics(&self) {
        self.callback_panics.fetch_add(1, Relaxed);
    }
}
