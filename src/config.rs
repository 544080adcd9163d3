//! Configuration value objects.
//!
//! Plain data with sensible defaults. The core never reads files or the
//! network to obtain these; callers build them (the binaries do so from
//! command-line flags) or deserialize them with serde.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level configuration for a sharded deployment.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub engine: EngineConfig,
    pub queues: QueueConfig,
    pub trade_buffers: MemoryPoolConfig,
    pub reclaim: ReclaimConfig,
}

/// Per-book matching engine settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum resting orders per book (arena size)
    pub order_capacity: u32,
    /// Pre-sized capacity of the order-id index
    pub index_capacity: usize,
    /// Pin each shard worker to its own core
    pub pin_workers: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            order_capacity: 1_000_000,
            index_capacity: 1_000_000,
            pin_workers: false,
        }
    }
}

/// Ring-buffer capacities (rounded up to powers of two).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Per-shard inbound MPSC command queue
    pub inbound_capacity: usize,
    /// Per-shard outbound SPSC event queue
    pub outbound_capacity: usize,
    /// Symbol registry slots (lock-free map)
    pub registry_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            inbound_capacity: 65_536,
            outbound_capacity: 65_536,
            registry_capacity: 1_024,
        }
    }
}

/// Growth and shrink policy for a [`crate::memory::MemoryPool`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryPoolConfig {
    /// Objects allocated up front; the pool never shrinks below this
    pub initial_size: usize,
    /// Upper bound on the free-list
    pub max_size: usize,
    /// On a miss the free-list grows by `in_use * (growth_factor - 1)`
    pub growth_factor: f64,
    /// Shrink when `in_use / total` falls below this
    pub shrink_threshold: f64,
    /// Minimum time between two shrinks
    pub shrink_interval_ms: u64,
}

impl Default for MemoryPoolConfig {
    fn default() -> Self {
        Self {
            initial_size: 1_024,
            max_size: 16_384,
            growth_factor: 1.5,
            shrink_threshold: 0.25,
            shrink_interval_ms: 30_000,
        }
    }
}

impl MemoryPoolConfig {
    #[inline]
    pub fn shrink_interval(&self) -> Duration {
        Duration::from_millis(self.shrink_interval_ms)
    }

    /// Clamp out-of-range values instead of rejecting them.
    pub fn normalized(mut self) -> Self {
        self.max_size = self.max_size.max(self.initial_size).max(1);
        if !self.growth_factor.is_finite() || self.growth_factor < 1.0 {
            self.growth_factor = 1.0;
        }
        if !self.shrink_threshold.is_finite() {
            self.shrink_threshold = 0.0;
        }
        self.shrink_threshold = self.shrink_threshold.clamp(0.0, 1.0);
        self
    }
}

/// Pause controller settings for paced reclamation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReclaimConfig {
    /// Budget for one reclamation pass
    pub max_pause_us: u64,
    /// Minimum spacing between passes, whatever triggered them
    pub min_interval_ms: u64,
    /// Timer-driven pass period
    pub timer_interval_ms: u64,
    /// Memory-pressure fraction (0..=1) that triggers an early pass
    pub pressure_threshold: f64,
    /// How often the controller wakes to check its triggers
    pub poll_interval_ms: u64,
}

impl Default for ReclaimConfig {
    fn default() -> Self {
        Self {
            max_pause_us: 500,
            min_interval_ms: 1_000,
            timer_interval_ms: 10_000,
            pressure_threshold: 0.85,
            poll_interval_ms: 100,
        }
    }
}

impl ReclaimConfig {
    #[inline]
    pub fn max_pause(&self) -> Duration {
        Duration::from_micros(self.max_pause_us)
    }

    #[inline]
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    #[inline]
    pub fn timer_interval(&self) -> Duration {
        Duration::from_millis(self.timer_interval_ms)
    }

    #[inline]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}
