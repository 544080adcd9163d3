//! Memory Manager
//!
//! Named pools, memory-mapped regions and a paced background reclamation
//! controller. The matching hot path never waits on anything in here: pools
//! are handed out as `Arc`s once and reclamation runs on its own thread.

pub mod manager;
pub mod pool;
pub mod pressure;
pub mod reclaim;
pub mod region;

use std::any::Any;
use std::sync::Arc;

use parking_lot::RwLock;

pub use manager::{ManagerStats, MemoryManager};
pub use pool::{MemoryPool, MemoryPoolStats};
pub use pressure::{FixedProbe, PressureProbe, SystemMemoryProbe};
pub use reclaim::{run_pass, PassReport, ReclaimController, ReclaimStats, Trigger};
pub use region::{RegionInfo, RegionKind, SharedRegion};

/// Type-erased view of a [`MemoryPool`] for the reclamation controller.
pub trait ManagedPool: Send + Sync {
    fn name(&self) -> &str;
    fn stats(&self) -> MemoryPoolStats;
    fn shrink_if_needed(&self) -> usize;
    fn trim_to_initial(&self) -> usize;
}

impl<T: Send + 'static> ManagedPool for MemoryPool<T> {
    fn name(&self) -> &str {
        MemoryPool::name(self)
    }

    fn stats(&self) -> MemoryPoolStats {
        MemoryPool::stats(self)
    }

    fn shrink_if_needed(&self) -> usize {
        MemoryPool::shrink_if_needed(self)
    }

    fn trim_to_initial(&self) -> usize {
        MemoryPool::trim_to_initial(self)
    }
}

/// One registered pool, held both type-erased and as `dyn Any` so typed
/// lookups can downcast back to `Arc<MemoryPool<T>>`.
pub(crate) struct PoolEntry {
    managed: Arc<dyn ManagedPool>,
    typed: Arc<dyn Any + Send + Sync>,
}

impl PoolEntry {
    pub(crate) fn new<T: Send + 'static>(pool: Arc<MemoryPool<T>>) -> Self {
        Self {
            managed: pool.clone(),
            typed: pool,
        }
    }

    #[inline]
    pub(crate) fn name(&self) -> &str {
        self.managed.name()
    }

    #[inline]
    pub(crate) fn managed(&self) -> Arc<dyn ManagedPool> {
        Arc::clone(&self.managed)
    }

    pub(crate) fn typed<T: Send + 'static>(&self) -> Option<Arc<MemoryPool<T>>> {
        Arc::clone(&self.typed).downcast::<MemoryPool<T>>().ok()
    }
}

/// Pools in registration order, shared with the reclamation thread.
pub(crate) type PoolRegistry = Arc<RwLock<Vec<PoolEntry>>>;
