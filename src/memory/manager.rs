//! The [`MemoryManager`] facade: pool and region registries plus the
//! reclamation controller lifecycle.

use std::any::type_name;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::ReclaimConfig;
use crate::error::MemoryError;
use crate::memory::pool::{MemoryPool, MemoryPoolStats};
use crate::memory::pressure::{PressureProbe, SystemMemoryProbe};
use crate::memory::reclaim::{run_pass, PassReport, ReclaimController, ReclaimCounters, ReclaimStats, Trigger};
use crate::memory::region::{RegionInfo, RegionKind, SharedRegion};
use crate::memory::{PoolEntry, PoolRegistry};

/// Aggregate view over everything the manager owns.
#[derive(Clone, Debug, Serialize)]
pub struct ManagerStats {
    pub pools: Vec<MemoryPoolStats>,
    pub regions: Vec<RegionInfo>,
    pub reclaim: ReclaimStats,
    pub pressure: Option<f64>,
    pub running: bool,
}

/// Owns named pools and regions and drives paced reclamation.
///
/// Lookups take a read lock; registration and removal take a write lock.
/// Neither is meant for the per-order path: fetch the `Arc` once at startup.
pub struct MemoryManager {
    config: ReclaimConfig,
    pools: PoolRegistry,
    regions: RwLock<FxHashMap<String, Arc<Mutex<SharedRegion>>>>,
    probe: Arc<dyn PressureProbe>,
    counters: Arc<ReclaimCounters>,
    controller: Mutex<Option<ReclaimController>>,
}

impl MemoryManager {
    /// Manager sampling system memory pressure from the OS.
    pub fn new(config: ReclaimConfig) -> Self {
        Self::with_probe(config, Arc::new(SystemMemoryProbe))
    }

    pub fn with_probe(config: ReclaimConfig, probe: Arc<dyn PressureProbe>) -> Self {
        Self {
            config,
            pools: Arc::new(RwLock::new(Vec::new())),
            regions: RwLock::new(FxHashMap::default()),
            probe,
            counters: Arc::new(ReclaimCounters::default()),
            controller: Mutex::new(None),
        }
    }

    #[inline]
    pub fn config(&self) -> &ReclaimConfig {
        &self.config
    }

    // ========================================================================
    // Pools
    // ========================================================================

    /// Register `pool` under its name.
    ///
    /// # Returns
    /// A shared handle to the pool, or `DuplicatePool` if the name is taken.
    pub fn register_pool<T: Send + 'static>(
        &self,
        pool: MemoryPool<T>,
    ) -> Result<Arc<MemoryPool<T>>, MemoryError> {
        let mut pools = self.pools.write();
        if pools.iter().any(|e| e.name() == pool.name()) {
            return Err(MemoryError::DuplicatePool(pool.name().to_owned()));
        }
        let pool = Arc::new(pool);
        pools.push(PoolEntry::new(Arc::clone(&pool)));
        info!(pool = pool.name(), element = type_name::<T>(), "registered pool");
        Ok(pool)
    }

    /// Look up a pool by name and element type.
    pub fn pool<T: Send + 'static>(&self, name: &str) -> Result<Arc<MemoryPool<T>>, MemoryError> {
        let pools = self.pools.read();
        let entry = pools
            .iter()
            .find(|e| e.name() == name)
            .ok_or_else(|| MemoryError::UnknownPool(name.to_owned()))?;
        entry.typed::<T>().ok_or_else(|| MemoryError::TypeMismatch {
            name: name.to_owned(),
            expected: type_name::<T>(),
        })
    }

    /// Unregister a pool. Outstanding handles keep it alive.
    pub fn remove_pool(&self, name: &str) -> bool {
        let mut pools = self.pools.write();
        let before = pools.len();
        pools.retain(|e| e.name() != name);
        let removed = pools.len() != before;
        if removed {
            debug!(pool = name, "removed pool");
        }
        removed
    }

    pub fn pool_count(&self) -> usize {
        self.pools.read().len()
    }

    // ========================================================================
    // Regions
    // ========================================================================

    /// Map a new named region.
    pub fn create_region(
        &self,
        name: &str,
        kind: RegionKind,
        len: usize,
    ) -> Result<Arc<Mutex<SharedRegion>>, MemoryError> {
        let mut regions = self.regions.write();
        if regions.contains_key(name) {
            return Err(MemoryError::DuplicateRegion(name.to_owned()));
        }
        let region = Arc::new(Mutex::new(SharedRegion::open(name, kind, len)?));
        regions.insert(name.to_owned(), Arc::clone(&region));
        info!(region = name, len, "mapped region");
        Ok(region)
    }

    pub fn region(&self, name: &str) -> Option<Arc<Mutex<SharedRegion>>> {
        self.regions.read().get(name).cloned()
    }

    /// Forget a region. The mapping is released once the last handle drops.
    pub fn remove_region(&self, name: &str) -> bool {
        self.regions.write().remove(name).is_some()
    }

    // ========================================================================
    // Reclamation
    // ========================================================================

    /// Run one pass on the calling thread, bounded by `max_pause`.
    pub fn run_reclamation_pass(&self, trigger: Trigger) -> PassReport {
        let pools: Vec<_> = self.pools.read().iter().map(|e| e.managed()).collect();
        let stop = AtomicBool::new(false);
        let report = run_pass(&pools, trigger, self.config.max_pause(), &stop);
        self.counters.record(&report);
        report
    }

    /// Start the background controller.
    pub fn start(&self) -> Result<(), MemoryError> {
        let mut slot = self.controller.lock();
        if slot.as_ref().is_some_and(|c| c.is_running()) {
            return Err(MemoryError::AlreadyRunning);
        }
        *slot = Some(ReclaimController::spawn(
            self.config.clone(),
            Arc::clone(&self.pools),
            Arc::clone(&self.probe),
            Arc::clone(&self.counters),
        )?);
        Ok(())
    }

    /// Request a pass from the running controller.
    ///
    /// # Returns
    /// `false` if the controller is not running.
    pub fn trigger(&self) -> bool {
        self.controller.lock().as_ref().is_some_and(|c| c.trigger())
    }

    /// Stop the controller and join its thread. Idempotent.
    pub fn stop(&self) {
        let controller = self.controller.lock().take();
        if let Some(mut controller) = controller {
            controller.shutdown();
        }
    }

    pub fn is_running(&self) -> bool {
        self.controller.lock().as_ref().is_some_and(|c| c.is_running())
    }

    pub fn reclaim_stats(&self) -> ReclaimStats {
        self.counters.snapshot()
    }

    pub fn stats(&self) -> ManagerStats {
        let pools = self.pools.read().iter().map(|e| e.managed().stats()).collect();
        let mut regions: Vec<RegionInfo> =
            self.regions.read().values().map(|r| r.lock().info()).collect();
        regions.sort_by(|a, b| a.name.cmp(&b.name));

        ManagerStats {
            pools,
            regions,
            reclaim: self.counters.snapshot(),
            pressure: self.probe.sample(),
            running: self.is_running(),
        }
    }
}

impl Drop for MemoryManager {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for MemoryManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryManager")
            .field("config", &self.config)
            .field("pools", &self.pool_count())
            .field("regions", &self.regions.read().len())
            .finish()
    }
}
