//! Bounded lock-free ring-buffer queues.
//!
//! - [`spsc`]: one producer, one consumer, one slot kept free.
//! - [`mpsc`]: many producers, one consumer, per-slot ready flags.
//!
//! Every operation is a non-blocking `try_*`. Callers that need
//! retry-until-success semantics supply their own backoff.

pub mod metrics;
pub mod mpsc;
pub mod spsc;

pub use metrics::{QueueMetrics, QueueMetricsSnapshot};

/// Round a requested capacity up to the next power of two (minimum 2).
#[inline]
pub(crate) fn round_capacity(requested: usize) -> usize {
    requested.max(2).next_power_of_two()
}
