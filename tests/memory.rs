//! Memory manager integration: background reclamation, pause budgets and
//! file-backed regions.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use flash_core::config::{MemoryPoolConfig, ReclaimConfig};
use flash_core::memory::{
    run_pass, FixedProbe, ManagedPool, MemoryManager, MemoryPool, MemoryPoolStats, RegionKind, Trigger,
};

fn pool_config(initial_size: usize) -> MemoryPoolConfig {
    MemoryPoolConfig {
        initial_size,
        max_size: 1_024,
        growth_factor: 2.0,
        shrink_threshold: 0.5,
        shrink_interval_ms: 0,
    }
}

fn fast_reclaim() -> ReclaimConfig {
    ReclaimConfig {
        max_pause_us: 50_000,
        min_interval_ms: 0,
        timer_interval_ms: 3_600_000,
        pressure_threshold: 0.5,
        poll_interval_ms: 2,
    }
}

fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    cond()
}

/// Grow `pool` well past its initial size, then return everything.
fn inflate(pool: &MemoryPool<Vec<u8>>, n: usize) {
    let held: Vec<_> = (0..n).map(|_| pool.acquire()).collect();
    for buf in held {
        pool.release(buf);
    }
}

#[test]
fn test_pressure_triggers_background_trim() {
    let probe = FixedProbe::new(0.0);
    let manager = MemoryManager::with_probe(fast_reclaim(), Arc::new(probe.clone()));
    let pool = manager
        .register_pool(MemoryPool::new("bufs", pool_config(4), Vec::<u8>::new))
        .unwrap();
    inflate(&pool, 100);
    assert!(pool.available() > 4);

    manager.start().unwrap();
    probe.set(0.95);

    assert!(wait_for(|| pool.available() == 4), "pool was not trimmed");
    assert!(manager.reclaim_stats().pressure_passes >= 1);

    manager.stop();
    assert!(!manager.is_running());
}

#[test]
fn test_manual_trigger_applies_shrink_policy() {
    let config = ReclaimConfig {
        pressure_threshold: 1.0,
        ..fast_reclaim()
    };
    let manager = MemoryManager::with_probe(config, Arc::new(FixedProbe::new(0.0)));
    let pool = manager
        .register_pool(MemoryPool::new("bufs", pool_config(8), Vec::<u8>::new))
        .unwrap();
    inflate(&pool, 200);

    // Keep a few in use: target total is max(initial, 2 * in_use)
    let held: Vec<_> = (0..6).map(|_| pool.acquire()).collect();

    manager.start().unwrap();
    thread::sleep(Duration::from_millis(20));
    assert_eq!(manager.reclaim_stats().passes, 0, "no trigger should have fired");

    assert!(manager.trigger());
    assert!(wait_for(|| manager.reclaim_stats().manual_passes >= 1));
    assert_eq!(pool.available(), 6);

    manager.stop();
    drop(held);
}

#[test]
fn test_timer_pass_fires() {
    let config = ReclaimConfig {
        timer_interval_ms: 10,
        pressure_threshold: 1.0,
        ..fast_reclaim()
    };
    let manager = MemoryManager::with_probe(config, Arc::new(FixedProbe::new(0.0)));
    let pool = manager
        .register_pool(MemoryPool::new("bufs", pool_config(2), Vec::<u8>::new))
        .unwrap();
    inflate(&pool, 50);

    manager.start().unwrap();
    assert!(wait_for(|| manager.reclaim_stats().timer_passes >= 1));
    assert!(wait_for(|| pool.available() == 2));
    manager.stop();

    let stats = manager.stats();
    assert!(!stats.running);
    assert_eq!(stats.pools.len(), 1);
    assert!(stats.pools[0].trimmed > 0);
}

#[test]
fn test_restart_after_stop() {
    let manager = MemoryManager::with_probe(fast_reclaim(), Arc::new(FixedProbe::new(0.0)));
    manager.start().unwrap();
    manager.stop();
    manager.start().unwrap();
    assert!(manager.is_running());
}

/// A pool whose shrink takes a fixed amount of time.
struct SlowPool {
    name: String,
    delay: Duration,
}

impl ManagedPool for SlowPool {
    fn name(&self) -> &str {
        &self.name
    }

    fn stats(&self) -> MemoryPoolStats {
        MemoryPool::new(self.name.clone(), MemoryPoolConfig::default(), || 0u8).stats()
    }

    fn shrink_if_needed(&self) -> usize {
        thread::sleep(self.delay);
        1
    }

    fn trim_to_initial(&self) -> usize {
        self.shrink_if_needed()
    }
}

#[test]
fn test_pass_stops_at_budget() {
    let pools: Vec<Arc<dyn ManagedPool>> = (0..5)
        .map(|i| {
            Arc::new(SlowPool {
                name: format!("slow{i}"),
                delay: Duration::from_millis(10),
            }) as Arc<dyn ManagedPool>
        })
        .collect();
    let stop = AtomicBool::new(false);

    let report = run_pass(&pools, Trigger::Timer, Duration::from_millis(15), &stop);
    assert!(report.over_budget);
    assert!(report.pools_visited >= 1 && report.pools_visited < 5);
    assert_eq!(report.objects_freed, report.pools_visited);
    assert_eq!(report.pools_total, 5);

    let report = run_pass(&pools, Trigger::Manual, Duration::from_secs(10), &stop);
    assert!(!report.over_budget);
    assert_eq!(report.pools_visited, 5);
}

#[test]
fn test_pass_honours_stop_flag() {
    let pools: Vec<Arc<dyn ManagedPool>> = vec![Arc::new(SlowPool {
        name: "slow".into(),
        delay: Duration::ZERO,
    })];
    let stop = AtomicBool::new(true);

    let report = run_pass(&pools, Trigger::Pressure, Duration::from_secs(1), &stop);
    assert!(report.cancelled);
    assert_eq!(report.pools_visited, 0);
}

#[test]
fn test_file_backed_region_through_manager() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("book.bin");

    {
        let manager = MemoryManager::with_probe(fast_reclaim(), Arc::new(FixedProbe::new(0.0)));
        let region = manager
            .create_region("book", RegionKind::File(path.clone()), 4096)
            .unwrap();
        let mut region = region.lock();
        region.as_mut_slice()[..5].copy_from_slice(b"flash");
        region.flush().unwrap();

        let stats = manager.stats();
        assert_eq!(stats.regions.len(), 1);
        assert_eq!(stats.regions[0].len, 4096);
    }

    let bytes = std::fs::read(&path).unwrap();
    assert_eq!(bytes.len(), 4096);
    assert_eq!(&bytes[..5], b"flash");
}
