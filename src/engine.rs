//! Engine - command dispatch, worker loop with CPU pinning and warm-up, and
//! the per-symbol sharded runtime.
//!
//! ```text
//! [Producers] --MPSC--> [Shard worker (pinned)] --SPSC--> [Event consumer]
//!                              |
//!                        MatchingEngine
//! ```
//!
//! Each symbol gets its own book, its own inbound queue and its own worker
//! thread, so matching stays single-writer while symbols scale across cores.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::utils::Backoff;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::{CoreConfig, EngineConfig};
use crate::error::{EngineError, PushError};
use crate::hashmap::LockFreeHashMap;
use crate::matching::MatchingEngine;
use crate::memory::{MemoryManager, MemoryPool};
use crate::order::{symbol, try_symbol, MatchResult, Order, Symbol, Trade};
use crate::queue::{mpsc, spsc};
use crate::stats::PerformanceStats;

/// How long an idle worker parks once spinning has backed off.
const IDLE_PARK: Duration = Duration::from_micros(50);

// ============================================================================
// Commands and Events
// ============================================================================

/// Cancel-replace request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ModifyOrder {
    /// Original order ID
    pub order_id: u64,
    /// New order ID (may equal the original)
    pub new_order_id: u64,
    pub new_price: u64,
    pub new_qty: u32,
}

/// Input commands for a book.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    Place(Order),
    Cancel { order_id: u64 },
    Modify(ModifyOrder),
}

/// One output per command.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum OutputEvent {
    /// Outcome of a place or modify
    Result(MatchResult),
    /// The order's state at cancellation
    Cancelled(Order),
    /// The order was not resting
    CancelRejected { order_id: u64 },
}

// ============================================================================
// Single-book engine
// ============================================================================

/// A matching engine driven by [`Command`]s.
pub struct Engine {
    /// The underlying matching engine
    pub matcher: MatchingEngine,
}

impl Engine {
    pub fn new(symbol_name: &str, capacity: u32) -> Self {
        Self {
            matcher: MatchingEngine::new(symbol_name, capacity),
        }
    }

    pub fn with_config(symbol_name: &str, config: &EngineConfig) -> Self {
        Self {
            matcher: MatchingEngine::with_config(symbol_name, config),
        }
    }

    pub fn from_matcher(matcher: MatchingEngine) -> Self {
        Self { matcher }
    }

    /// Process a single command.
    ///
    /// This is the main entry point for synchronous usage (testing, benchmarks).
    #[inline]
    pub fn process_command(&mut self, cmd: Command) -> OutputEvent {
        match cmd {
            Command::Place(order) => OutputEvent::Result(self.matcher.add_order(order)),
            Command::Cancel { order_id } => match self.matcher.cancel(order_id) {
                Some(order) => OutputEvent::Cancelled(order),
                None => OutputEvent::CancelRejected { order_id },
            },
            Command::Modify(m) => OutputEvent::Result(self.matcher.modify_order(
                m.order_id,
                m.new_order_id,
                m.new_price,
                m.new_qty,
            )),
        }
    }

    /// Run the event loop until `running` is cleared and `input` is drained.
    ///
    /// Once stopped, `input` is closed so further pushes fail with
    /// `Disconnected`, and every command reserved before the close is
    /// still processed. Events are never dropped while running; a full
    /// output queue stalls the loop until the consumer catches up.
    pub fn run(
        &mut self,
        input: &mut mpsc::Receiver<Command>,
        output: &mut spsc::Producer<OutputEvent>,
        running: &AtomicBool,
    ) {
        let backoff = Backoff::new();
        loop {
            if !input.is_closed() && !running.load(Ordering::Acquire) {
                input.close();
            }
            match input.try_pop() {
                Ok(cmd) => {
                    backoff.reset();
                    let event = self.process_command(cmd);
                    Self::publish(output, event, running);
                }
                Err(_) if input.is_closed() => {
                    // A producer may hold a ticket it has not published yet
                    if input.is_empty() {
                        break;
                    }
                    backoff.snooze();
                }
                Err(_) => {
                    if backoff.is_completed() {
                        thread::park_timeout(IDLE_PARK);
                    } else {
                        backoff.snooze();
                    }
                }
            }
        }
    }

    fn publish(output: &mut spsc::Producer<OutputEvent>, mut event: OutputEvent, running: &AtomicBool) {
        let backoff = Backoff::new();
        loop {
            match output.try_push(event) {
                Ok(()) => return,
                Err(full) => {
                    if !running.load(Ordering::Acquire) {
                        warn!("output queue full during shutdown, dropping event");
                        return;
                    }
                    event = full.into_inner();
                    if backoff.is_completed() {
                        thread::park_timeout(IDLE_PARK);
                    } else {
                        backoff.snooze();
                    }
                }
            }
        }
    }

    /// Pin the current thread to the last available CPU core.
    ///
    /// The last core is typically isolated from OS interrupts.
    pub fn pin_to_core(&self) -> bool {
        pin_current_thread(0)
    }

    /// Warm up the engine by pre-faulting memory pages.
    pub fn warm_up(&mut self) {
        self.matcher.warm_up();
    }

    #[inline]
    pub fn best_bid(&self) -> Option<u64> {
        self.matcher.best_bid()
    }

    #[inline]
    pub fn best_ask(&self) -> Option<u64> {
        self.matcher.best_ask()
    }

    #[inline]
    pub fn order_count(&self) -> usize {
        self.matcher.order_count()
    }

    /// Compute state hash for determinism testing.
    #[inline]
    pub fn state_hash(&self) -> u64 {
        self.matcher.state_hash()
    }
}

/// Pin the calling thread to the `offset`-th core counting down from the
/// last one. Returns `false` if the platform refused.
fn pin_current_thread(offset: usize) -> bool {
    match core_affinity::get_core_ids() {
        Some(cores) if !cores.is_empty() => {
            let core = cores[cores.len() - 1 - offset % cores.len()];
            core_affinity::set_for_current(core)
        }
        _ => false,
    }
}

// ============================================================================
// Sharded runtime
// ============================================================================

struct Shard {
    symbol: Symbol,
    inbound: mpsc::Sender<Command>,
    outbound: spsc::Consumer<OutputEvent>,
    trade_buffers: Option<Arc<MemoryPool<Vec<Trade>>>>,
    worker: Option<JoinHandle<MatchingEngine>>,
}

/// One matching thread per symbol, fed through lock-free queues.
pub struct ShardedEngine {
    registry: LockFreeHashMap<Symbol, usize>,
    shards: Vec<Shard>,
    running: Arc<AtomicBool>,
}

impl ShardedEngine {
    /// Start one shard per distinct symbol.
    ///
    /// Fails with `EngineError::InvalidSymbol` for an empty name or one
    /// longer than a [`Symbol`] holds.
    pub fn start(symbols: &[&str], config: &CoreConfig) -> Result<Self, EngineError> {
        Self::launch(symbols, config, None)
    }

    /// Like [`ShardedEngine::start`], with each shard drawing trade vectors
    /// from a pool named `trades.<symbol>` registered in `memory`.
    pub fn start_with_memory(
        symbols: &[&str],
        config: &CoreConfig,
        memory: &MemoryManager,
    ) -> Result<Self, EngineError> {
        Self::launch(symbols, config, Some(memory))
    }

    fn launch(
        symbols: &[&str],
        config: &CoreConfig,
        memory: Option<&MemoryManager>,
    ) -> Result<Self, EngineError> {
        let registry = LockFreeHashMap::with_capacity(config.queues.registry_capacity.max(symbols.len()));
        let running = Arc::new(AtomicBool::new(true));
        let mut engine = Self {
            registry,
            shards: Vec::with_capacity(symbols.len()),
            running,
        };

        for name in symbols {
            let sym = match try_symbol(name) {
                Some(sym) if !sym.is_empty() => sym,
                _ => return Err(EngineError::InvalidSymbol((*name).to_owned())),
            };
            if engine.registry.contains_key(&sym) {
                warn!(symbol = %sym, "duplicate symbol ignored");
                continue;
            }
            let index = engine.shards.len();
            engine.registry.put(sym, index)?;
            engine.spawn_shard(sym, index, config, memory)?;
        }

        info!(shards = engine.shards.len(), "sharded engine started");
        Ok(engine)
    }

    fn spawn_shard(
        &mut self,
        sym: Symbol,
        index: usize,
        config: &CoreConfig,
        memory: Option<&MemoryManager>,
    ) -> Result<(), EngineError> {
        let (inbound, mut input) = mpsc::channel(config.queues.inbound_capacity);
        let (mut output, outbound) = spsc::channel(config.queues.outbound_capacity);

        let mut matcher = MatchingEngine::with_config(&sym, &config.engine);
        let trade_buffers: Option<Arc<MemoryPool<Vec<Trade>>>> = match memory {
            Some(manager) => {
                let pool = MemoryPool::new(format!("trades.{sym}"), config.trade_buffers.clone(), Vec::<Trade>::new)
                    .with_reset(|trades: &mut Vec<Trade>| trades.clear());
                match manager.register_pool(pool) {
                    Ok(pool) => Some(pool),
                    Err(e) => {
                        warn!(symbol = %sym, error = %e, "trade buffer pool unavailable");
                        None
                    }
                }
            }
            None => None,
        };
        if let Some(pool) = &trade_buffers {
            matcher = matcher.with_trade_buffers(Arc::clone(pool));
        }

        let pin = config.engine.pin_workers;
        let running = Arc::clone(&self.running);
        let worker = thread::Builder::new()
            .name(format!("match-{sym}"))
            .spawn(move || {
                let mut engine = Engine::from_matcher(matcher);
                if pin && !pin_current_thread(index) {
                    warn!(symbol = %sym, "could not pin shard worker");
                }
                engine.warm_up();
                info!(symbol = %sym, "shard worker started");
                engine.run(&mut input, &mut output, &running);
                info!(symbol = %sym, "shard worker stopped");
                engine.matcher
            })
            .map_err(EngineError::Spawn)?;

        self.shards.push(Shard {
            symbol: sym,
            inbound,
            outbound,
            trade_buffers,
            worker: Some(worker),
        });
        Ok(())
    }

    fn shard(&self, name: &str) -> Result<&Shard, EngineError> {
        self.registry
            .get(&symbol(name))
            .and_then(|i| self.shards.get(i))
            .ok_or_else(|| EngineError::UnknownSymbol(name.to_owned()))
    }

    fn shard_mut(&mut self, name: &str) -> Result<&mut Shard, EngineError> {
        let index = self
            .registry
            .get(&symbol(name))
            .ok_or_else(|| EngineError::UnknownSymbol(name.to_owned()))?;
        self.shards
            .get_mut(index)
            .ok_or_else(|| EngineError::UnknownSymbol(name.to_owned()))
    }

    /// Enqueue a command for `symbol` without blocking.
    pub fn submit(&self, symbol_name: &str, cmd: Command) -> Result<(), EngineError> {
        if !self.is_running() {
            return Err(EngineError::ShutDown);
        }
        self.shard(symbol_name)?
            .inbound
            .try_push(cmd)
            .map_err(|e| match e {
                PushError::Full(_) => EngineError::QueueFull(symbol_name.to_owned()),
                PushError::Disconnected(_) => EngineError::ShutDown,
            })
    }

    /// A producer handle for `symbol`, for use from other threads.
    ///
    /// After [`ShardedEngine::shutdown`] its pushes fail with
    /// `PushError::Disconnected`.
    pub fn sender(&self, symbol_name: &str) -> Result<mpsc::Sender<Command>, EngineError> {
        Ok(self.shard(symbol_name)?.inbound.clone())
    }

    /// Drain every event currently published by the `symbol` shard.
    pub fn poll_events(&mut self, symbol_name: &str) -> Result<Vec<OutputEvent>, EngineError> {
        let shard = self.shard_mut(symbol_name)?;
        let mut events = Vec::with_capacity(shard.outbound.len());
        while let Ok(event) = shard.outbound.try_pop() {
            events.push(event);
        }
        Ok(events)
    }

    /// Return a result's trade vector to its shard's pool.
    pub fn recycle(&self, result: MatchResult) {
        let Ok(shard) = self.shard(&result.order.symbol) else {
            return;
        };
        if let Some(pool) = &shard.trade_buffers {
            pool.release(result.trades);
        }
    }

    pub fn symbols(&self) -> Vec<Symbol> {
        self.shards.iter().map(|s| s.symbol).collect()
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Stop all workers after they drain their inbound queues and join them.
    ///
    /// # Returns
    /// Final statistics per symbol. Empty if already shut down.
    pub fn shutdown(&mut self) -> Vec<(Symbol, PerformanceStats)> {
        self.running.store(false, Ordering::Release);

        let mut stats = Vec::with_capacity(self.shards.len());
        for shard in &mut self.shards {
            let Some(worker) = shard.worker.take() else {
                continue;
            };
            worker.thread().unpark();
            match worker.join() {
                Ok(matcher) => stats.push((shard.symbol, matcher.get_performance_stats())),
                Err(_) => warn!(symbol = %shard.symbol, "shard worker panicked"),
            }
        }
        if !stats.is_empty() {
            info!(shards = stats.len(), "sharded engine stopped");
        }
        stats
    }
}

impl Drop for ShardedEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for ShardedEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardedEngine")
            .field("symbols", &self.symbols())
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::{OrderStatus, Side};
    use std::time::Instant;

    fn limit(order_id: u64, side: Side, price: u64, qty: u32) -> Order {
        Order::limit(order_id, "TEST", side, qty, price, 1)
    }

    #[test]
    fn test_engine_creation() {
        let engine = Engine::new("TEST", 10000);
        assert_eq!(engine.order_count(), 0);
        assert_eq!(engine.best_bid(), None);
        assert_eq!(engine.best_ask(), None);
    }

    #[test]
    fn test_engine_process_place_and_cancel() {
        let mut engine = Engine::new("TEST", 1000);

        let event = engine.process_command(Command::Place(limit(1, Side::Buy, 10000, 100)));
        assert!(matches!(event, OutputEvent::Result(ref r) if r.order.status == OrderStatus::Pending));
        assert_eq!(engine.best_bid(), Some(10000));

        let event = engine.process_command(Command::Cancel { order_id: 1 });
        assert!(matches!(event, OutputEvent::Cancelled(o) if o.remaining_quantity == 100));
        assert_eq!(engine.order_count(), 0);

        let event = engine.process_command(Command::Cancel { order_id: 1 });
        assert_eq!(event, OutputEvent::CancelRejected { order_id: 1 });
    }

    #[test]
    fn test_engine_modify() {
        let mut engine = Engine::new("TEST", 1000);
        engine.process_command(Command::Place(limit(1, Side::Buy, 10000, 100)));

        let event = engine.process_command(Command::Modify(ModifyOrder {
            order_id: 1,
            new_order_id: 2,
            new_price: 10010,
            new_qty: 50,
        }));
        assert!(matches!(event, OutputEvent::Result(ref r) if !r.is_rejected()));
        assert_eq!(engine.best_bid(), Some(10010));
        assert_eq!(engine.order_count(), 1);
    }

    #[test]
    fn test_engine_state_hash_determinism() {
        let mut engine1 = Engine::new("TEST", 1000);
        let mut engine2 = Engine::new("TEST", 1000);

        for i in 0..100u64 {
            let mut order = limit(i, if i % 2 == 0 { Side::Buy } else { Side::Sell }, 10000 + (i % 10) * 10, 100);
            order.timestamp = i + 1;
            engine1.process_command(Command::Place(order));
            engine2.process_command(Command::Place(order));
        }

        assert_eq!(engine1.state_hash(), engine2.state_hash());
    }

    fn small_config() -> CoreConfig {
        let mut config = CoreConfig::default();
        config.engine.order_capacity = 1_000;
        config.engine.index_capacity = 1_000;
        config.queues.inbound_capacity = 256;
        config.queues.outbound_capacity = 256;
        config
    }

    fn poll_until(engine: &mut ShardedEngine, symbol: &str, want: usize) -> Vec<OutputEvent> {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut events = Vec::new();
        while events.len() < want && Instant::now() < deadline {
            events.extend(engine.poll_events(symbol).unwrap());
            thread::yield_now();
        }
        events
    }

    #[test]
    fn test_sharded_round_trip() {
        let config = small_config();
        let mut engine = ShardedEngine::start(&["AAA", "BBB"], &config).unwrap();

        engine
            .submit("AAA", Command::Place(Order::limit(1, "AAA", Side::Sell, 10, 100, 1)))
            .unwrap();
        engine
            .submit("AAA", Command::Place(Order::limit(2, "AAA", Side::Buy, 10, 100, 2)))
            .unwrap();
        engine.submit("BBB", Command::Cancel { order_id: 5 }).unwrap();

        let events = poll_until(&mut engine, "AAA", 2);
        assert_eq!(events.len(), 2);
        match &events[1] {
            OutputEvent::Result(r) => {
                assert_eq!(r.trades.len(), 1);
                assert_eq!(r.order.status, OrderStatus::Filled);
            }
            other => panic!("unexpected event {other:?}"),
        }

        let events = poll_until(&mut engine, "BBB", 1);
        assert_eq!(events, vec![OutputEvent::CancelRejected { order_id: 5 }]);

        assert!(matches!(
            engine.submit("ZZZ", Command::Cancel { order_id: 1 }),
            Err(EngineError::UnknownSymbol(_))
        ));

        let stats = engine.shutdown();
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].1.counters.trades, 1);
        assert!(matches!(
            engine.submit("AAA", Command::Cancel { order_id: 1 }),
            Err(EngineError::ShutDown)
        ));
        assert!(engine.shutdown().is_empty());
    }

    #[test]
    fn test_sharded_trade_buffers_recycled() {
        let memory = MemoryManager::new(crate::config::ReclaimConfig::default());
        let mut engine = ShardedEngine::start_with_memory(&["AAA"], &small_config(), &memory).unwrap();
        let pool = memory.pool::<Vec<Trade>>("trades.AAA").unwrap();

        engine
            .submit("AAA", Command::Place(Order::limit(1, "AAA", Side::Sell, 10, 100, 1)))
            .unwrap();
        engine
            .submit("AAA", Command::Place(Order::limit(2, "AAA", Side::Buy, 10, 100, 2)))
            .unwrap();

        let events = poll_until(&mut engine, "AAA", 2);
        assert_eq!(events.len(), 2);
        assert_eq!(pool.stats().counters.acquired, 2);

        for event in events {
            if let OutputEvent::Result(result) = event {
                engine.recycle(result);
            }
        }
        let stats = pool.stats();
        assert_eq!(stats.counters.released, 2);
        assert_eq!(stats.in_use, 0);
    }

    #[test]
    fn test_sharded_duplicate_symbols() {
        let config = small_config();
        let engine = ShardedEngine::start(&["AAA", "AAA"], &config).unwrap();
        assert_eq!(engine.symbols().len(), 1);
    }

    #[test]
    fn test_sharded_rejects_invalid_symbols() {
        let config = small_config();
        // Both share a 16-byte prefix and would collide if truncated
        let result = ShardedEngine::start(&["ABCDEFGHIJKLMNOP-1", "ABCDEFGHIJKLMNOP-2"], &config);
        assert!(matches!(result, Err(EngineError::InvalidSymbol(ref s)) if s == "ABCDEFGHIJKLMNOP-1"));

        let result = ShardedEngine::start(&["AAA", ""], &config);
        assert!(matches!(result, Err(EngineError::InvalidSymbol(ref s)) if s.is_empty()));
    }
}
