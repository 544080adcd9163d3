//! Memory Pool - a mutex-guarded, growable and shrinkable free-list.
//!
//! This is the coarse-grained sibling of [`crate::pool::ObjectPool`]: it is
//! shared by reference across threads, grows in batches on a miss, and can
//! be trimmed by the reclamation controller. Contention on the mutex is
//! acceptable because these pools sit off the innermost matching loop.

use std::any::type_name;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

use crate::config::MemoryPoolConfig;
use crate::pool::{PoolStats, PoolStatsSnapshot};

type Reset<T> = Box<dyn Fn(&mut T) + Send + Sync>;

struct Inner<T> {
    free: Vec<T>,
    last_shrink: Instant,
}

/// Counters and sizes for a [`MemoryPool`].
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MemoryPoolStats {
    pub name: String,
    pub element_type: &'static str,
    pub free: usize,
    pub in_use: u64,
    pub shrinks: u64,
    pub trimmed: u64,
    #[serde(flatten)]
    pub counters: PoolStatsSnapshot,
}

impl MemoryPoolStats {
    /// Objects currently owned by the pool or its callers.
    pub fn total(&self) -> u64 {
        self.free as u64 + self.in_use
    }

    /// `in_use / total`, or 0 for an empty pool.
    pub fn usage_ratio(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            0.0
        } else {
            self.in_use as f64 / total as f64
        }
    }
}

/// A thread-safe pool of `T` with growth and shrink policy.
pub struct MemoryPool<T> {
    name: String,
    config: MemoryPoolConfig,
    factory: Box<dyn Fn() -> T + Send + Sync>,
    reset: Option<Reset<T>>,
    inner: Mutex<Inner<T>>,
    stats: PoolStats,
    shrinks: AtomicU64,
    trimmed: AtomicU64,
}

impl<T: Send> MemoryPool<T> {
    /// Create a pool and pre-allocate `config.initial_size` objects.
    pub fn new<F>(name: impl Into<String>, config: MemoryPoolConfig, factory: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        let config = config.normalized();
        let free: Vec<T> = (0..config.initial_size).map(|_| factory()).collect();
        let stats = PoolStats::default();
        stats.record_created(free.len() as u64);

        Self {
            name: name.into(),
            config,
            factory: Box::new(factory),
            reset: None,
            inner: Mutex::new(Inner {
                free,
                last_shrink: Instant::now(),
            }),
            stats,
            shrinks: AtomicU64::new(0),
            trimmed: AtomicU64::new(0),
        }
    }

    /// Install a reset hook run on every released object.
    pub fn with_reset<R>(mut self, reset: R) -> Self
    where
        R: Fn(&mut T) + Send + Sync + 'static,
    {
        self.reset = Some(Box::new(reset));
        self
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn config(&self) -> &MemoryPoolConfig {
        &self.config
    }

    /// Take an object, growing the free-list on a miss.
    ///
    /// # Complexity
    /// O(1) amortized; a miss allocates a batch sized by `growth_factor`.
    pub fn acquire(&self) -> T {
        let mut inner = self.inner.lock();
        if let Some(obj) = inner.free.pop() {
            drop(inner);
            self.stats.record_acquire(true);
            return obj;
        }

        // Miss: build one for the caller plus a growth batch for later
        let total = self.stats.in_use();
        let batch = self.growth_batch(total);
        inner.free.reserve(batch);
        for _ in 0..batch {
            inner.free.push((self.factory)());
        }
        drop(inner);

        self.stats.record_created(batch as u64 + 1);
        self.stats.record_acquire(false);
        (self.factory)()
    }

    fn growth_batch(&self, total: u64) -> usize {
        let grown = (total as f64 * (self.config.growth_factor - 1.0)).ceil() as usize;
        grown.clamp(0, self.config.max_size)
    }

    /// Reset and return an object.
    ///
    /// # Returns
    /// `false` if the free-list was already at `max_size` and the object
    /// was dropped instead.
    pub fn release(&self, mut obj: T) -> bool {
        if let Some(reset) = &self.reset {
            reset(&mut obj);
        }

        let mut inner = self.inner.lock();
        let kept = inner.free.len() < self.config.max_size;
        if kept {
            inner.free.push(obj);
        }
        drop(inner);

        self.stats.record_release(kept);
        kept
    }

    /// Trim the free-list when usage has fallen below `shrink_threshold`.
    ///
    /// Runs at most once per `shrink_interval`. The free-list is cut to
    /// `max(initial_size, 2 * in_use) - in_use`, so the pool never holds
    /// fewer objects in total than were pre-allocated.
    ///
    /// # Returns
    /// Number of objects dropped.
    pub fn shrink_if_needed(&self) -> usize {
        let mut inner = self.inner.lock();
        if inner.last_shrink.elapsed() < self.config.shrink_interval() {
            return 0;
        }
        inner.last_shrink = Instant::now();

        let in_use = self.stats.in_use() as usize;
        let total = inner.free.len() + in_use;
        if total == 0 {
            return 0;
        }
        let usage = in_use as f64 / total as f64;
        if usage >= self.config.shrink_threshold {
            return 0;
        }

        let target_total = self.config.initial_size.max(in_use * 2);
        let target_free = target_total.saturating_sub(in_use);
        self.trim_locked(&mut inner, target_free)
    }

    /// Drop free objects until only `initial_size - in_use` remain.
    ///
    /// Ignores the shrink interval; used for explicit memory-pressure passes.
    pub fn trim_to_initial(&self) -> usize {
        let mut inner = self.inner.lock();
        let in_use = self.stats.in_use() as usize;
        let target_free = self.config.initial_size.saturating_sub(in_use);
        inner.last_shrink = Instant::now();
        self.trim_locked(&mut inner, target_free)
    }

    fn trim_locked(&self, inner: &mut Inner<T>, target_free: usize) -> usize {
        let excess = inner.free.len().saturating_sub(target_free);
        if excess == 0 {
            return 0;
        }
        inner.free.truncate(target_free);
        inner.free.shrink_to(target_free.max(self.config.initial_size));

        self.shrinks.fetch_add(1, Ordering::Relaxed);
        self.trimmed.fetch_add(excess as u64, Ordering::Relaxed);
        self.stats.record_discarded(excess as u64);
        excess
    }

    /// Objects waiting in the free-list.
    pub fn available(&self) -> usize {
        self.inner.lock().free.len()
    }

    pub fn stats(&self) -> MemoryPoolStats {
        let free = self.available();
        let counters = self.stats.snapshot();
        MemoryPoolStats {
            name: self.name.clone(),
            element_type: type_name::<T>(),
            free,
            in_use: counters.in_use,
            shrinks: self.shrinks.load(Ordering::Relaxed),
            trimmed: self.trimmed.load(Ordering::Relaxed),
            counters,
        }
    }

    /// Time until the next `shrink_if_needed` may act.
    pub fn next_shrink_in(&self) -> Duration {
        let elapsed = self.inner.lock().last_shrink.elapsed();
        self.config.shrink_interval().saturating_sub(elapsed)
    }
}

impl<T> fmt::Debug for MemoryPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryPool")
            .field("name", &self.name)
            .field("element_type", &type_name::<T>())
            .field("config", &self.config)
            .finish()
    }
}
