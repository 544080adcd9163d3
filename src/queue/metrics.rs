//! Queue Metrics - observational counters shared by producer and consumer.
//!
//! All updates are `Relaxed`; nothing here participates in correctness.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Live counters for one queue.
#[derive(Debug, Default)]
pub struct QueueMetrics {
    enqueued: AtomicU64,
    dequeued: AtomicU64,
    enqueue_failures: AtomicU64,
    dequeue_failures: AtomicU64,
    max_size: AtomicU64,
    wait_ns: AtomicU64,
}

/// Point-in-time copy of [`QueueMetrics`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct QueueMetricsSnapshot {
    pub enqueued: u64,
    pub dequeued: u64,
    pub enqueue_failures: u64,
    pub dequeue_failures: u64,
    pub max_size: u64,
    /// Cumulative time MPSC producers spent retrying a contended ticket
    /// reservation or waiting for their slot; always 0 for SPSC
    pub wait_ns: u64,
}

impl QueueMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful enqueue that left `size` items in the queue.
    #[inline]
    pub(crate) fn record_enqueue(&self, size: usize) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
        self.max_size.fetch_max(size as u64, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_enqueue_failure(&self) {
        self.enqueue_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_dequeue(&self) {
        self.dequeued.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_dequeue_failure(&self) {
        self.dequeue_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_wait(&self, nanos: u64) {
        self.wait_ns.fetch_add(nanos, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> QueueMetricsSnapshot {
        QueueMetricsSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            dequeued: self.dequeued.load(Ordering::Relaxed),
            enqueue_failures: self.enqueue_failures.load(Ordering::Relaxed),
            dequeue_failures: self.dequeue_failures.load(Ordering::Relaxed),
            max_size: self.max_size.load(Ordering::Relaxed),
            wait_ns: self.wait_ns.load(Ordering::Relaxed),
        }
    }
}
