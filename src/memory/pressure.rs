//! Memory-pressure probes used to trigger early reclamation passes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A source of "fraction of memory in use" readings.
pub trait PressureProbe: Send + Sync {
    /// Current pressure in `0.0..=1.0`, or `None` when unavailable.
    fn sample(&self) -> Option<f64>;
}

/// Reads system-wide usage from `/proc/meminfo`.
///
/// Pressure is `1 - MemAvailable / MemTotal`. Returns `None` on platforms
/// without procfs, which simply disables pressure-triggered passes.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemMemoryProbe;

impl SystemMemoryProbe {
    fn parse(meminfo: &str) -> Option<f64> {
        let mut total = None;
        let mut available = None;
        for line in meminfo.lines() {
            let mut parts = line.split_whitespace();
            match parts.next() {
                Some("MemTotal:") => total = parts.next().and_then(|v| v.parse::<u64>().ok()),
                Some("MemAvailable:") => {
                    available = parts.next().and_then(|v| v.parse::<u64>().ok())
                }
                _ => {}
            }
            if total.is_some() && available.is_some() {
                break;
            }
        }
        match (total, available) {
            (Some(total), Some(available)) if total > 0 => {
                Some((1.0 - available as f64 / total as f64).clamp(0.0, 1.0))
            }
            _ => None,
        }
    }
}

impl PressureProbe for SystemMemoryProbe {
    fn sample(&self) -> Option<f64> {
        std::fs::read_to_string("/proc/meminfo")
            .ok()
            .and_then(|s| Self::parse(&s))
    }
}

/// A probe whose reading is set by the embedding application.
///
/// Cloning shares the underlying value, so one handle can be given to the
/// manager and another kept to publish readings.
#[derive(Clone, Debug, Default)]
pub struct FixedProbe {
    bits: Arc<AtomicU64>,
}

impl FixedProbe {
    pub fn new(initial: f64) -> Self {
        let probe = Self::default();
        probe.set(initial);
        probe
    }

    pub fn set(&self, pressure: f64) {
        self.bits
            .store(pressure.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }
}

impl PressureProbe for FixedProbe {
    fn sample(&self) -> Option<f64> {
        Some(f64::from_bits(self.bits.load(Ordering::Relaxed)))
    }
}
