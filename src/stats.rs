//! Performance counters and per-call latency tracking for a matching engine.
//!
//! Everything here is owned by the single matching thread, so plain
//! integers suffice. Latency percentiles come from an HDR histogram.

use hdrhistogram::Histogram;
use serde::Serialize;
use tracing::error;

/// Highest latency the histogram resolves (60 s); larger samples saturate.
const MAX_TRACKABLE_NS: u64 = 60_000_000_000;
const SIGNIFICANT_FIGURES: u8 = 3;

/// Cumulative activity counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct EngineCounters {
    pub orders_received: u64,
    pub orders_accepted: u64,
    pub orders_rejected: u64,
    pub orders_cancelled: u64,
    pub orders_modified: u64,
    pub trades: u64,
    /// Total executed quantity
    pub volume: u64,
    pub notional: u128,
}

/// Latency distribution of the current window, in nanoseconds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct LatencySummary {
    pub samples: u64,
    pub avg_ns: f64,
    pub min_ns: u64,
    pub max_ns: u64,
    pub p50_ns: u64,
    pub p99_ns: u64,
    pub p999_ns: u64,
}

/// What `get_performance_stats` reports.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PerformanceStats {
    #[serde(flatten)]
    pub counters: EngineCounters,
    pub resting_orders: usize,
    pub bid_levels: usize,
    pub ask_levels: usize,
    pub latency: LatencySummary,
}

/// Rolling latency window.
pub struct LatencyRecorder {
    histogram: Option<Histogram<u64>>,
    samples: u64,
    sum_ns: u128,
    min_ns: u64,
    max_ns: u64,
}

impl LatencyRecorder {
    pub fn new() -> Self {
        let histogram = match Histogram::new_with_bounds(1, MAX_TRACKABLE_NS, SIGNIFICANT_FIGURES) {
            Ok(h) => Some(h),
            Err(e) => {
                error!(error = ?e, "latency histogram unavailable, percentiles disabled");
                None
            }
        };
        Self {
            histogram,
            samples: 0,
            sum_ns: 0,
            min_ns: u64::MAX,
            max_ns: 0,
        }
    }

    #[inline]
    pub fn record(&mut self, nanos: u64) {
        if let Some(h) = self.histogram.as_mut() {
            h.saturating_record(nanos.max(1));
        }
        self.samples += 1;
        self.sum_ns += nanos as u128;
        self.min_ns = self.min_ns.min(nanos);
        self.max_ns = self.max_ns.max(nanos);
    }

    /// Start a new window.
    pub fn reset(&mut self) {
        if let Some(h) = self.histogram.as_mut() {
            h.reset();
        }
        self.samples = 0;
        self.sum_ns = 0;
        self.min_ns = u64::MAX;
        self.max_ns = 0;
    }

    pub fn summary(&self) -> LatencySummary {
        if self.samples == 0 {
            return LatencySummary::default();
        }
        let quantile = |q: f64| self.histogram.as_ref().map_or(0, |h| h.value_at_quantile(q));
        LatencySummary {
            samples: self.samples,
            avg_ns: self.sum_ns as f64 / self.samples as f64,
            min_ns: self.min_ns,
            max_ns: self.max_ns,
            p50_ns: quantile(0.50),
            p99_ns: quantile(0.99),
            p999_ns: quantile(0.999),
        }
    }
}

impl Default for LatencyRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LatencyRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LatencyRecorder")
            .field("samples", &self.samples)
            .field("min_ns", &self.min_ns)
            .field("max_ns", &self.max_ns)
            .finish()
    }
}
