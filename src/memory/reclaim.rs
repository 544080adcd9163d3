//! Pause Controller - paced, budgeted reclamation on a background thread.
//!
//! Instead of letting memory be returned whenever the allocator feels like
//! it, pools keep their objects until a reclamation pass trims them. Passes
//! run on a dedicated thread (never on a matching thread), are spaced by at
//! least `min_interval`, and stop visiting pools once `max_pause` is spent.
//!
//! A pass is triggered by:
//! - the timer (`timer_interval` since the previous pass),
//! - memory pressure above `pressure_threshold`,
//! - an explicit [`ReclaimController::trigger`].
//!
//! Shutdown is cooperative: a stop request is checked between pools and
//! the thread is joined before [`ReclaimController::shutdown`] returns.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, RecvTimeoutError};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::ReclaimConfig;
use crate::error::MemoryError;
use crate::memory::pressure::PressureProbe;
use crate::memory::{ManagedPool, PoolRegistry};

/// What started a reclamation pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Trigger {
    Timer,
    Pressure,
    Manual,
}

/// Outcome of one pass.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PassReport {
    pub trigger: Trigger,
    pub pools_visited: usize,
    pub pools_total: usize,
    pub objects_freed: usize,
    pub duration: Duration,
    /// The budget ran out before every pool was visited
    pub over_budget: bool,
    /// A stop request cut the pass short
    pub cancelled: bool,
}

/// Run one reclamation pass over `pools`.
///
/// Under pressure pools are trimmed back to their pre-allocated size;
/// otherwise each pool applies its own shrink policy.
pub fn run_pass(
    pools: &[Arc<dyn ManagedPool>],
    trigger: Trigger,
    budget: Duration,
    stop: &AtomicBool,
) -> PassReport {
    let started = Instant::now();
    let mut report = PassReport {
        trigger,
        pools_visited: 0,
        pools_total: pools.len(),
        objects_freed: 0,
        duration: Duration::ZERO,
        over_budget: false,
        cancelled: false,
    };

    for pool in pools {
        if stop.load(Ordering::Acquire) {
            report.cancelled = true;
            break;
        }
        if started.elapsed() >= budget {
            report.over_budget = true;
            break;
        }

        report.objects_freed += match trigger {
            Trigger::Pressure => pool.trim_to_initial(),
            Trigger::Timer | Trigger::Manual => pool.shrink_if_needed(),
        };
        report.pools_visited += 1;
    }

    report.duration = started.elapsed();
    report
}

/// Cumulative controller counters.
#[derive(Debug, Default)]
pub struct ReclaimCounters {
    passes: AtomicU64,
    timer_passes: AtomicU64,
    pressure_passes: AtomicU64,
    manual_passes: AtomicU64,
    objects_freed: AtomicU64,
    last_pass_ns: AtomicU64,
    max_pass_ns: AtomicU64,
    budget_overruns: AtomicU64,
}

/// Point-in-time copy of [`ReclaimCounters`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ReclaimStats {
    pub passes: u64,
    pub timer_passes: u64,
    pub pressure_passes: u64,
    pub manual_passes: u64,
    pub objects_freed: u64,
    pub last_pass_ns: u64,
    pub max_pass_ns: u64,
    pub budget_overruns: u64,
}

impl ReclaimCounters {
    pub(crate) fn record(&self, report: &PassReport) {
        self.passes.fetch_add(1, Ordering::Relaxed);
        let by_trigger = match report.trigger {
            Trigger::Timer => &self.timer_passes,
            Trigger::Pressure => &self.pressure_passes,
            Trigger::Manual => &self.manual_passes,
        };
        by_trigger.fetch_add(1, Ordering::Relaxed);
        self.objects_freed
            .fetch_add(report.objects_freed as u64, Ordering::Relaxed);

        let nanos = report.duration.as_nanos() as u64;
        self.last_pass_ns.store(nanos, Ordering::Relaxed);
        self.max_pass_ns.fetch_max(nanos, Ordering::Relaxed);
        if report.over_budget {
            self.budget_overruns.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> ReclaimStats {
        ReclaimStats {
            passes: self.passes.load(Ordering::Relaxed),
            timer_passes: self.timer_passes.load(Ordering::Relaxed),
            pressure_passes: self.pressure_passes.load(Ordering::Relaxed),
            manual_passes: self.manual_passes.load(Ordering::Relaxed),
            objects_freed: self.objects_freed.load(Ordering::Relaxed),
            last_pass_ns: self.last_pass_ns.load(Ordering::Relaxed),
            max_pass_ns: self.max_pass_ns.load(Ordering::Relaxed),
            budget_overruns: self.budget_overruns.load(Ordering::Relaxed),
        }
    }
}

enum Control {
    Trigger,
    Stop,
}

/// Handle to the running background reclamation thread.
///
/// Dropping the handle stops and joins the thread.
pub struct ReclaimController {
    control: channel::Sender<Control>,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl ReclaimController {
    pub(crate) fn spawn(
        config: ReclaimConfig,
        registry: PoolRegistry,
        probe: Arc<dyn PressureProbe>,
        counters: Arc<ReclaimCounters>,
    ) -> Result<Self, MemoryError> {
        let (control, inbox) = channel::unbounded();
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);

        let worker = thread::Builder::new()
            .name("mem-reclaim".into())
            .spawn(move || {
                let mut pacer = Pacer::new(&config);
                info!(
                    max_pause_us = config.max_pause_us,
                    min_interval_ms = config.min_interval_ms,
                    timer_interval_ms = config.timer_interval_ms,
                    "reclamation controller started"
                );

                loop {
                    match inbox.recv_timeout(config.poll_interval()) {
                        Ok(Control::Trigger) => pacer.request_manual(),
                        Ok(Control::Stop) | Err(RecvTimeoutError::Disconnected) => break,
                        Err(RecvTimeoutError::Timeout) => {}
                    }
                    if stop_flag.load(Ordering::Acquire) {
                        break;
                    }

                    let now = Instant::now();
                    let Some(trigger) = pacer.due(now, probe.sample()) else {
                        continue;
                    };

                    let pools = registry.read().iter().map(|e| e.managed()).collect::<Vec<_>>();
                    let report = run_pass(&pools, trigger, config.max_pause(), &stop_flag);
                    pacer.completed(now);
                    counters.record(&report);

                    if report.over_budget {
                        warn!(
                            visited = report.pools_visited,
                            total = report.pools_total,
                            elapsed_us = report.duration.as_micros() as u64,
                            "reclamation pass exceeded its pause budget"
                        );
                    } else {
                        debug!(
                            ?trigger,
                            freed = report.objects_freed,
                            elapsed_us = report.duration.as_micros() as u64,
                            "reclamation pass complete"
                        );
                    }
                }

                info!("reclamation controller stopped");
            })
            .map_err(MemoryError::Spawn)?;

        Ok(Self {
            control,
            stop,
            worker: Some(worker),
        })
    }

    /// Ask for a pass as soon as `min_interval` allows.
    pub fn trigger(&self) -> bool {
        self.control.send(Control::Trigger).is_ok()
    }

    /// Stop the thread and wait for it to exit.
    pub fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        let _ = self.control.send(Control::Stop);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("reclamation thread panicked");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }
}

impl Drop for ReclaimController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Trigger bookkeeping, kept separate from the thread so it can be tested
/// with synthetic clocks.
#[derive(Debug)]
struct Pacer {
    min_interval: Duration,
    timer_interval: Duration,
    pressure_threshold: f64,
    last_pass: Option<Instant>,
    timer_anchor: Instant,
    manual_pending: bool,
}

impl Pacer {
    fn new(config: &ReclaimConfig) -> Self {
        Self::starting_at(config, Instant::now())
    }

    fn starting_at(config: &ReclaimConfig, now: Instant) -> Self {
        Self {
            min_interval: config.min_interval(),
            timer_interval: config.timer_interval(),
            pressure_threshold: config.pressure_threshold,
            last_pass: None,
            timer_anchor: now,
            manual_pending: false,
        }
    }

    fn request_manual(&mut self) {
        self.manual_pending = true;
    }

    /// Which trigger, if any, fires at `now`.
    fn due(&self, now: Instant, pressure: Option<f64>) -> Option<Trigger> {
        if let Some(last) = self.last_pass {
            if now.saturating_duration_since(last) < self.min_interval {
                return None;
            }
        }
        if self.manual_pending {
            Some(Trigger::Manual)
        } else if pressure.is_some_and(|p| p > self.pressure_threshold) {
            Some(Trigger::Pressure)
        } else if now.saturating_duration_since(self.timer_anchor) >= self.timer_interval {
            Some(Trigger::Timer)
        } else {
            None
        }
    }

    fn completed(&mut self, at: Instant) {
        self.last_pass = Some(at);
        self.timer_anchor = at;
        self.manual_pending = false;
    }
}
