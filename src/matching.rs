//! Matching Engine - Core order matching algorithm.
//!
//! Implements price-time priority with the cross/rest algorithm:
//! 1. VALIDATE: reject malformed or unsupported orders without touching the book
//! 2. CROSSING: match against the opposite side, best level first, FIFO within a level
//! 3. RESTING: a Limit remainder joins the tail of its price level; a Market
//!    remainder is cancelled
//!
//! Trades always execute at the resting order's price.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error};

use crate::arena::{Arena, ArenaIndex, NULL_INDEX};
use crate::config::EngineConfig;
use crate::memory::MemoryPool;
use crate::order::{
    now_nanos, symbol, BookUpdate, MatchResult, Order, OrderStatus, OrderType, RejectReason, Side,
    Symbol, Trade,
};
use crate::order_book::{BookSnapshot, OrderBook};
use crate::stats::{EngineCounters, LatencyRecorder, PerformanceStats};

/// Single-symbol matching engine. Owned by exactly one thread.
pub struct MatchingEngine {
    symbol: Symbol,
    /// Memory arena for resting order nodes
    pub arena: Arena,
    /// The limit order book
    pub book: OrderBook,
    next_trade_id: u64,
    counters: EngineCounters,
    latency: LatencyRecorder,
    trade_buffers: Option<Arc<MemoryPool<Vec<Trade>>>>,
}

impl MatchingEngine {
    /// Create an engine holding at most `capacity` resting orders.
    pub fn new(symbol_name: &str, capacity: u32) -> Self {
        Self::with_config(
            symbol_name,
            &EngineConfig {
                order_capacity: capacity,
                index_capacity: capacity as usize,
                ..EngineConfig::default()
            },
        )
    }

    pub fn with_config(symbol_name: &str, config: &EngineConfig) -> Self {
        let symbol = symbol(symbol_name);
        Self {
            symbol,
            arena: Arena::new(config.order_capacity),
            book: OrderBook::with_capacity(symbol, config.index_capacity),
            next_trade_id: 1,
            counters: EngineCounters::default(),
            latency: LatencyRecorder::new(),
            trade_buffers: None,
        }
    }

    /// Take trade vectors from `pool` instead of allocating per call.
    ///
    /// Callers hand them back with [`MatchingEngine::recycle`].
    pub fn with_trade_buffers(mut self, pool: Arc<MemoryPool<Vec<Trade>>>) -> Self {
        self.trade_buffers = Some(pool);
        self
    }

    #[inline]
    pub fn symbol(&self) -> Symbol {
        self.symbol
    }

    // ========================================================================
    // Admission
    // ========================================================================

    /// Admit an order, match it, and rest any Limit remainder.
    ///
    /// An order with an empty symbol is stamped with this book's symbol; any
    /// other symbol must match it. A zero timestamp is replaced with the
    /// current time. `remaining_quantity` and `status` are
    /// reset from `quantity`.
    ///
    /// # Returns
    /// Trades, the order's final state, and the L2 updates caused. A
    /// rejected order leaves the book untouched.
    pub fn add_order(&mut self, order: Order) -> MatchResult {
        let started = Instant::now();
        let result = self.process_order(order);
        self.latency.record(started.elapsed().as_nanos() as u64);
        result
    }

    fn process_order(&mut self, mut order: Order) -> MatchResult {
        self.counters.orders_received += 1;

        if order.symbol.is_empty() {
            order.symbol = self.symbol;
        }
        order.remaining_quantity = order.quantity;
        order.status = OrderStatus::Pending;
        if order.timestamp == 0 {
            order.timestamp = now_nanos();
        }

        if let Err(reason) = self.validate(&order) {
            return self.reject(order, reason);
        }

        // Reserve the resting slot up front so a capacity rejection can
        // never follow a partial execution.
        let reserved = match order.order_type {
            OrderType::Limit => match self.arena.alloc() {
                Some(idx) => Some(idx),
                None => return self.reject(order, RejectReason::ArenaFull),
            },
            _ => None,
        };

        self.counters.orders_accepted += 1;
        let mut result = MatchResult {
            trades: self.trade_buffers.as_ref().map(|p| p.acquire()).unwrap_or_default(),
            ..MatchResult::default()
        };

        self.cross_order(&mut order, &mut result);

        match reserved {
            Some(idx) if order.remaining_quantity > 0 => {
                order.status = if order.remaining_quantity == order.quantity {
                    OrderStatus::Pending
                } else {
                    OrderStatus::Partial
                };
                if !self.rest_order(&order, idx, &mut result) {
                    order.status = OrderStatus::Cancelled;
                }
            }
            _ => {
                if let Some(idx) = reserved {
                    self.arena.free(idx);
                }
                order.status = if order.remaining_quantity == 0 {
                    OrderStatus::Filled
                } else {
                    // Market remainder does not rest
                    debug!(
                        order_id = order.order_id,
                        unfilled = order.remaining_quantity,
                        "market order remainder cancelled"
                    );
                    OrderStatus::Cancelled
                };
            }
        }

        self.counters.trades += result.trades.len() as u64;
        self.counters.volume += result.total_matched;
        self.counters.notional += result.notional;

        result.order = order;
        result
    }

    fn validate(&self, order: &Order) -> Result<(), RejectReason> {
        if order.symbol != self.symbol {
            return Err(RejectReason::SymbolMismatch);
        }
        if order.quantity == 0 {
            return Err(RejectReason::InvalidQuantity);
        }
        match order.order_type {
            OrderType::Market => {}
            OrderType::Limit if order.price == 0 => return Err(RejectReason::InvalidPrice),
            OrderType::Limit => {}
            OrderType::Stop | OrderType::StopLimit | OrderType::Ioc | OrderType::Fok => {
                return Err(RejectReason::UnsupportedOrderType)
            }
        }
        if self.book.contains_order(order.order_id) {
            return Err(RejectReason::DuplicateOrderId);
        }
        Ok(())
    }

    fn reject(&mut self, order: Order, reason: RejectReason) -> MatchResult {
        self.counters.orders_rejected += 1;
        debug!(order_id = order.order_id, ?reason, "order rejected");
        MatchResult::rejected(order, reason)
    }

    /// Cross (match) an incoming order against the opposite side.
    fn cross_order(&mut self, order: &mut Order, result: &mut MatchResult) {
        let maker_side = order.side.opposite();

        while order.remaining_quantity > 0 {
            let best_opposite = match self.book.best_opposite_price(order.side) {
                Some(price) => price,
                None => break, // No orders on opposite side
            };

            if order.order_type == OrderType::Limit
                && !prices_cross(order.price, best_opposite, order.side)
            {
                break;
            }

            let before = order.remaining_quantity;
            self.match_at_level(order, best_opposite, maker_side, result);
            if order.remaining_quantity == before {
                break;
            }
        }
    }

    /// Match against the orders at one price level, oldest first.
    fn match_at_level(
        &mut self,
        taker: &mut Order,
        price: u64,
        maker_side: Side,
        result: &mut MatchResult,
    ) {
        while taker.remaining_quantity > 0 {
            let maker_idx = match self.book.get_level(maker_side, price) {
                Some(level) if !level.is_empty() => level.peek_head(),
                _ => break,
            };
            if maker_idx == NULL_INDEX {
                break;
            }

            let maker = *self.arena.get(maker_idx);
            let trade_qty = taker.remaining_quantity.min(maker.remaining);

            let (buy_order_id, buyer_client_id, sell_order_id, seller_client_id) = match taker.side {
                Side::Buy => (taker.order_id, taker.client_id, maker.order_id, maker.client_id),
                Side::Sell => (maker.order_id, maker.client_id, taker.order_id, taker.client_id),
            };
            let trade = Trade {
                trade_id: self.next_trade_id,
                buy_order_id,
                sell_order_id,
                symbol: self.symbol,
                quantity: trade_qty,
                price,
                timestamp: taker.timestamp,
                buyer_client_id,
                seller_client_id,
                aggressor: taker.side,
            };
            self.next_trade_id += 1;
            result.record_trade(trade);

            taker.remaining_quantity -= trade_qty;
            let maker_remaining = maker.remaining - trade_qty;

            let Some(level) = self.book.get_level_mut(maker_side, price) else {
                break;
            };
            if maker_remaining == 0 {
                // Maker fully filled - remove from book
                level.pop_front(&mut self.arena);
                let update = BookUpdate {
                    side: maker_side,
                    price,
                    new_qty: level.total_qty,
                    new_count: level.count,
                };
                let emptied = level.is_empty();
                self.book.remove_order_from_map(maker.order_id);
                self.arena.free(maker_idx);
                if emptied {
                    self.book.remove_empty_level(maker_side, price);
                }
                result.book_updates.push(update);
            } else {
                let node = self.arena.get_mut(maker_idx);
                node.remaining = maker_remaining;
                node.status = OrderStatus::Partial;
                level.subtract_qty(trade_qty);
                result.book_updates.push(BookUpdate {
                    side: maker_side,
                    price,
                    new_qty: level.total_qty,
                    new_count: level.count,
                });
            }
        }
    }

    /// Rest an order in the book (passive posting) at the reserved slot.
    ///
    /// Returns `false` and frees the slot if the id is already indexed.
    fn rest_order(&mut self, order: &Order, arena_idx: ArenaIndex, result: &mut MatchResult) -> bool {
        self.arena.get_mut(arena_idx).load(order);
        if !self.book.add_order(&mut self.arena, arena_idx) {
            error!(order_id = order.order_id, "order id already resting, remainder not posted");
            self.arena.free(arena_idx);
            return false;
        }

        let (new_qty, new_count) = self.book.depth_at(order.side, order.price);
        result.book_updates.push(BookUpdate {
            side: order.side,
            price: order.price,
            new_qty,
            new_count,
        });
        true
    }

    // ========================================================================
    // Cancel / Modify
    // ========================================================================

    /// Cancel a resting order.
    ///
    /// # Returns
    /// The order's final state (status Cancelled, `remaining_quantity` the
    /// cancelled amount), or `None` if the id is not resting. Unknown or
    /// terminal ids have no side effect.
    pub fn cancel(&mut self, order_id: u64) -> Option<Order> {
        let info = match self.book.remove_order(&mut self.arena, order_id) {
            Some(info) => info,
            None => {
                debug!(order_id, "cancel for unknown order");
                return None;
            }
        };

        let mut order = self.arena.get(info.arena_index).to_order(self.symbol);
        order.status = OrderStatus::Cancelled;
        self.arena.free(info.arena_index);

        self.counters.orders_cancelled += 1;
        debug!(order_id, cancelled_qty = order.remaining_quantity, "order cancelled");
        Some(order)
    }

    /// Cancel a resting order. `false` if it was not resting.
    #[inline]
    pub fn cancel_order(&mut self, order_id: u64) -> bool {
        self.cancel(order_id).is_some()
    }

    /// Cancel-replace. The replacement keeps side and client id, loses time
    /// priority, and is matched like a new Limit order.
    ///
    /// Nothing is cancelled unless the replacement passes validation.
    pub fn modify_order(
        &mut self,
        order_id: u64,
        new_order_id: u64,
        new_price: u64,
        new_quantity: u32,
    ) -> MatchResult {
        let symbol = self.symbol;
        let replacement = move |side, client_id| Order {
            order_id: new_order_id,
            symbol,
            side,
            order_type: OrderType::Limit,
            quantity: new_quantity,
            remaining_quantity: new_quantity,
            price: new_price,
            timestamp: 0,
            client_id,
            status: OrderStatus::Pending,
        };

        let Some(info) = self.book.get_order(order_id).copied() else {
            let order = replacement(Side::Buy, 0);
            return self.reject(order, RejectReason::OrderNotFound);
        };
        let order = replacement(info.side, info.client_id);

        let precheck = if new_quantity == 0 {
            Err(RejectReason::InvalidQuantity)
        } else if new_price == 0 {
            Err(RejectReason::InvalidPrice)
        } else if new_order_id != order_id && self.book.contains_order(new_order_id) {
            Err(RejectReason::DuplicateOrderId)
        } else {
            Ok(())
        };
        if let Err(reason) = precheck {
            return self.reject(order, reason);
        }

        self.cancel(order_id);
        self.counters.orders_modified += 1;
        self.add_order(order)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Current state of a resting order.
    pub fn get_order(&self, order_id: u64) -> Option<Order> {
        self.book
            .get_order(order_id)
            .map(|info| self.arena.get(info.arena_index).to_order(self.symbol))
    }

    /// Resting orders at one price, in time priority.
    pub fn orders_at(&self, side: Side, price: u64) -> Vec<Order> {
        self.book
            .get_level(side, price)
            .map(|level| {
                level
                    .iter(&self.arena)
                    .map(|idx| self.arena.get(idx).to_order(self.symbol))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Depth snapshot, `depth` levels per side (all when `None`).
    pub fn get_order_book_snapshot(&self, depth: Option<usize>) -> BookSnapshot {
        self.book.snapshot(depth, now_nanos())
    }

    pub fn get_performance_stats(&self) -> PerformanceStats {
        PerformanceStats {
            counters: self.counters,
            resting_orders: self.book.order_count(),
            bid_levels: self.book.bid_levels(),
            ask_levels: self.book.ask_levels(),
            latency: self.latency.summary(),
        }
    }

    /// Start a fresh latency window; cumulative counters are kept.
    pub fn reset_latency_window(&mut self) {
        self.latency.reset();
    }

    /// Return a result's trade vector to the buffer pool, if one is set.
    pub fn recycle(&self, result: MatchResult) {
        if let Some(pool) = &self.trade_buffers {
            pool.release(result.trades);
        }
    }

    // ========================================================================
    // Utility Methods
    // ========================================================================

    #[inline]
    pub fn best_bid(&self) -> Option<u64> {
        self.book.best_bid()
    }

    #[inline]
    pub fn best_ask(&self) -> Option<u64> {
        self.book.best_ask()
    }

    #[inline]
    pub fn spread(&self) -> Option<u64> {
        self.book.spread()
    }

    #[inline]
    pub fn order_count(&self) -> usize {
        self.book.order_count()
    }

    /// Warm up the engine (pre-fault memory pages)
    pub fn warm_up(&mut self) {
        self.arena.warm_up();
    }

    /// Compute a hash of the book contents (for determinism testing)
    pub fn state_hash(&self) -> u64 {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();

        for side in [Side::Buy, Side::Sell] {
            for level in self.book.levels(side) {
                (level.price, level.total_qty, level.count).hash(&mut hasher);
                for idx in level.iter(&self.arena) {
                    let node = self.arena.get(idx);
                    (node.order_id, node.remaining).hash(&mut hasher);
                }
            }
        }
        self.book.order_count().hash(&mut hasher);
        self.arena.allocated().hash(&mut hasher);
        self.next_trade_id.hash(&mut hasher);

        hasher.finish()
    }
}

/// Check if an incoming limit price crosses the opposite best price.
#[inline]
fn prices_cross(order_price: u64, opposite_best: u64, order_side: Side) -> bool {
    match order_side {
        // Buyer willing to pay >= lowest ask
        Side::Buy => order_price >= opposite_best,
        // Seller willing to accept <= highest bid
        Side::Sell => order_price <= opposite_best,
    }
}

impl std::fmt::Debug for MatchingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatchingEngine")
            .field("symbol", &self.symbol)
            .field("arena", &self.arena)
            .field("book", &self.book)
            .field("next_trade_id", &self.next_trade_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryPoolConfig;

    fn limit(order_id: u64, side: Side, price: u64, qty: u32) -> Order {
        Order::limit(order_id, "TEST", side, qty, price, 100 + order_id)
    }

    fn engine() -> MatchingEngine {
        MatchingEngine::new("TEST", 1000)
    }

    #[test]
    fn test_place_bid_no_match() {
        let mut engine = engine();
        let result = engine.add_order(limit(1, Side::Buy, 10000, 100));

        assert!(result.trades.is_empty());
        assert_eq!(result.order.status, OrderStatus::Pending);
        assert_eq!(result.book_updates.len(), 1);
        assert_eq!(engine.best_bid(), Some(10000));
        assert_eq!(engine.best_ask(), None);
        assert_eq!(engine.order_count(), 1);
    }

    #[test]
    fn test_full_match() {
        let mut engine = engine();
        engine.add_order(limit(1, Side::Sell, 10000, 100));
        let result = engine.add_order(limit(2, Side::Buy, 10000, 100));

        assert_eq!(result.trades.len(), 1);
        let t = result.trades[0];
        assert_eq!(t.trade_id, 1);
        assert_eq!(t.price, 10000);
        assert_eq!(t.quantity, 100);
        assert_eq!(t.sell_order_id, 1);
        assert_eq!(t.buy_order_id, 2);
        assert_eq!(t.buyer_client_id, 102);
        assert_eq!(t.seller_client_id, 101);
        assert_eq!(t.aggressor, Side::Buy);
        assert_eq!(result.order.status, OrderStatus::Filled);

        assert_eq!(engine.order_count(), 0);
        assert_eq!(engine.best_bid(), None);
        assert_eq!(engine.best_ask(), None);
        assert_eq!(engine.arena.allocated(), 0, "reserved slot released");
    }

    #[test]
    fn test_partial_match_taker_rests() {
        let mut engine = engine();
        engine.add_order(limit(1, Side::Sell, 10000, 50));
        let result = engine.add_order(limit(2, Side::Buy, 10000, 100));

        assert_eq!(result.total_matched, 50);
        assert_eq!(result.order.status, OrderStatus::Partial);
        assert_eq!(result.order.remaining_quantity, 50);
        assert_eq!(engine.get_order(2).unwrap().remaining_quantity, 50);
        assert_eq!(engine.best_bid(), Some(10000));
        assert_eq!(engine.best_ask(), None);
    }

    #[test]
    fn test_partial_match_maker_remains() {
        let mut engine = engine();
        engine.add_order(limit(1, Side::Sell, 10000, 100));
        engine.add_order(limit(2, Side::Buy, 10000, 30));

        assert_eq!(engine.book.depth_at(Side::Sell, 10000), (70, 1));
        let maker = engine.get_order(1).unwrap();
        assert_eq!(maker.remaining_quantity, 70);
        assert_eq!(maker.status, OrderStatus::Partial);
    }

    #[test]
    fn test_match_multiple_levels() {
        let mut engine = engine();
        engine.add_order(limit(1, Side::Sell, 10000, 50));
        engine.add_order(limit(2, Side::Sell, 10010, 50));
        engine.add_order(limit(3, Side::Sell, 10020, 50));
        engine.add_order(limit(9, Side::Sell, 10030, 50));

        let result = engine.add_order(limit(4, Side::Buy, 10020, 160));
        let fills: Vec<_> = result.trades.iter().map(|t| (t.price, t.quantity)).collect();
        assert_eq!(fills, vec![(10000, 50), (10010, 50), (10020, 50)]);
        assert_eq!(result.vwap(), Some(10010.0));

        // Stopped at its limit: 10 rests at 10020, ask at 10030 untouched
        assert_eq!(engine.best_bid(), Some(10020));
        assert_eq!(engine.best_ask(), Some(10030));
    }

    #[test]
    fn test_price_improvement_for_aggressor() {
        let mut engine = engine();
        engine.add_order(limit(1, Side::Buy, 10050, 10));
        let result = engine.add_order(limit(2, Side::Sell, 10000, 10));
        assert_eq!(result.trades[0].price, 10050);
    }

    #[test]
    fn test_fifo_at_level() {
        let mut engine = engine();
        engine.add_order(limit(1, Side::Sell, 10000, 10));
        engine.add_order(limit(2, Side::Sell, 10000, 10));
        engine.add_order(limit(3, Side::Sell, 10000, 10));

        let result = engine.add_order(limit(4, Side::Buy, 10000, 15));
        let makers: Vec<_> = result.trades.iter().map(|t| t.sell_order_id).collect();
        assert_eq!(makers, vec![1, 2]);

        let queue: Vec<_> = engine.orders_at(Side::Sell, 10000).iter().map(|o| o.order_id).collect();
        assert_eq!(queue, vec![2, 3]);
    }

    #[test]
    fn test_market_order_remainder_cancelled() {
        let mut engine = engine();
        engine.add_order(limit(1, Side::Sell, 10000, 30));
        let result = engine.add_order(Order::market(2, "TEST", Side::Buy, 50, 7));

        assert_eq!(result.total_matched, 30);
        assert_eq!(result.order.status, OrderStatus::Cancelled);
        assert_eq!(result.order.remaining_quantity, 20);
        assert_eq!(engine.order_count(), 0);
        assert_eq!(engine.best_bid(), None, "market remainder never rests");
    }

    #[test]
    fn test_market_order_empty_book() {
        let mut engine = engine();
        let result = engine.add_order(Order::market(1, "TEST", Side::Sell, 5, 7));
        assert!(result.trades.is_empty());
        assert_eq!(result.order.status, OrderStatus::Cancelled);
        assert!(!result.is_rejected());
    }

    #[test]
    fn test_rejections() {
        let mut engine = engine();
        let cases = [
            (limit(1, Side::Buy, 100, 0), RejectReason::InvalidQuantity),
            (limit(2, Side::Buy, 0, 10), RejectReason::InvalidPrice),
            (
                Order::new(3, "TEST", Side::Buy, OrderType::Ioc, 10, 100, 1),
                RejectReason::UnsupportedOrderType,
            ),
            (
                Order::new(4, "TEST", Side::Buy, OrderType::StopLimit, 10, 100, 1),
                RejectReason::UnsupportedOrderType,
            ),
        ];
        for (order, reason) in cases {
            let result = engine.add_order(order);
            assert_eq!(result.reject_reason, Some(reason));
            assert_eq!(result.order.status, OrderStatus::Rejected);
        }

        engine.add_order(limit(5, Side::Buy, 100, 10));
        let dup = engine.add_order(limit(5, Side::Sell, 90, 10));
        assert_eq!(dup.reject_reason, Some(RejectReason::DuplicateOrderId));
        assert!(dup.trades.is_empty(), "duplicate must not match");
        assert_eq!(engine.order_count(), 1);

        let stats = engine.get_performance_stats();
        assert_eq!(stats.counters.orders_rejected, 5);
        assert_eq!(stats.counters.orders_accepted, 1);
    }

    #[test]
    fn test_symbol_mismatch_rejected() {
        let mut engine = MatchingEngine::new("AAPL", 100);
        engine.add_order(Order::limit(1, "AAPL", Side::Sell, 10, 100, 1));

        let result = engine.add_order(Order::limit(2, "MSFT", Side::Buy, 10, 100, 2));
        assert_eq!(result.reject_reason, Some(RejectReason::SymbolMismatch));
        assert_eq!(result.order.status, OrderStatus::Rejected);
        assert_eq!(result.order.symbol.as_str(), "MSFT");
        assert!(result.trades.is_empty());
        assert!(engine.get_order(1).is_some());
        assert!(engine.get_order(2).is_none());

        // An unlabelled order is taken as this book's
        let unlabelled = Order {
            symbol: Symbol::new(),
            ..Order::limit(3, "AAPL", Side::Buy, 10, 100, 3)
        };
        let result = engine.add_order(unlabelled);
        assert_eq!(result.trades.len(), 1);
        assert_eq!(result.order.symbol.as_str(), "AAPL");
    }

    #[test]
    fn test_rest_order_frees_slot_when_id_indexed() {
        let mut engine = engine();
        engine.add_order(limit(1, Side::Buy, 100, 10));
        let allocated = engine.arena.allocated();

        let idx = engine.arena.alloc().expect("free slot");
        let mut result = MatchResult::default();
        let rested = engine.rest_order(&limit(1, Side::Buy, 101, 5), idx, &mut result);

        assert!(!rested);
        assert!(result.book_updates.is_empty());
        assert_eq!(engine.arena.allocated(), allocated);
        assert_eq!(engine.best_bid(), Some(100));
        assert_eq!(engine.order_count(), 1);
    }

    #[test]
    fn test_arena_full_rejects_before_matching() {
        let mut engine = MatchingEngine::new("TEST", 2);
        engine.add_order(limit(1, Side::Sell, 100, 10));
        engine.add_order(limit(2, Side::Sell, 101, 10));

        // Would partially fill then rest, but no slot is free
        let result = engine.add_order(limit(3, Side::Buy, 100, 20));
        assert_eq!(result.reject_reason, Some(RejectReason::ArenaFull));
        assert!(result.trades.is_empty());
        assert_eq!(engine.book.depth_at(Side::Sell, 100), (10, 1));

        // Market orders need no slot
        let market = engine.add_order(Order::market(4, "TEST", Side::Buy, 10, 1));
        assert_eq!(market.order.status, OrderStatus::Filled);
    }

    #[test]
    fn test_cancel() {
        let mut engine = engine();
        engine.add_order(limit(1, Side::Buy, 10000, 100));
        engine.add_order(limit(2, Side::Sell, 10000, 40));

        let cancelled = engine.cancel(1).unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);
        assert_eq!(cancelled.remaining_quantity, 60);
        assert_eq!(cancelled.filled_quantity(), 40);
        assert_eq!(engine.order_count(), 0);
        assert_eq!(engine.best_bid(), None);

        // Idempotent
        assert!(!engine.cancel_order(1));
        assert!(!engine.cancel_order(2), "filled orders are not cancellable");
        assert_eq!(engine.get_performance_stats().counters.orders_cancelled, 1);
    }

    #[test]
    fn test_modify_order() {
        let mut engine = engine();
        engine.add_order(limit(1, Side::Buy, 10000, 100));
        engine.add_order(limit(2, Side::Buy, 10000, 100));

        let result = engine.modify_order(1, 10, 10000, 50);
        assert!(!result.is_rejected());
        assert!(engine.get_order(1).is_none());

        // Lost time priority: 2 is now ahead of 10
        let queue: Vec<_> = engine.orders_at(Side::Buy, 10000).iter().map(|o| o.order_id).collect();
        assert_eq!(queue, vec![2, 10]);
        assert_eq!(engine.get_order(10).unwrap().client_id, 101);

        let missing = engine.modify_order(99, 100, 10000, 5);
        assert_eq!(missing.reject_reason, Some(RejectReason::OrderNotFound));

        let bad = engine.modify_order(2, 11, 10000, 0);
        assert_eq!(bad.reject_reason, Some(RejectReason::InvalidQuantity));
        assert!(engine.get_order(2).is_some(), "rejected modify leaves the original");

        let clash = engine.modify_order(2, 10, 10000, 5);
        assert_eq!(clash.reject_reason, Some(RejectReason::DuplicateOrderId));
    }

    #[test]
    fn test_modify_can_cross() {
        let mut engine = engine();
        engine.add_order(limit(1, Side::Buy, 9900, 10));
        engine.add_order(limit(2, Side::Sell, 10000, 10));

        let result = engine.modify_order(1, 1, 10000, 10);
        assert_eq!(result.trades.len(), 1);
        assert_eq!(engine.order_count(), 0);
    }

    #[test]
    fn test_trade_ids_monotonic() {
        let mut engine = engine();
        for i in 0..5 {
            engine.add_order(limit(i, Side::Sell, 100, 1));
        }
        let result = engine.add_order(limit(10, Side::Buy, 100, 5));
        let ids: Vec<_> = result.trades.iter().map(|t| t.trade_id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_trade_buffer_pool() {
        let pool = Arc::new(MemoryPool::new(
            "trades",
            MemoryPoolConfig {
                initial_size: 2,
                max_size: 4,
                ..MemoryPoolConfig::default()
            },
            || Vec::with_capacity(16),
        ));
        let mut engine = engine().with_trade_buffers(Arc::clone(&pool));

        engine.add_order(limit(1, Side::Sell, 100, 5));
        let result = engine.add_order(limit(2, Side::Buy, 100, 5));
        assert_eq!(result.trades.len(), 1);
        engine.recycle(result);

        let stats = pool.stats();
        assert_eq!(stats.counters.acquired, 2);
        assert_eq!(stats.counters.released, 1);
        assert_eq!(stats.counters.misses, 0);
    }

    #[test]
    fn test_snapshot_and_stats() {
        let mut engine = engine();
        engine.add_order(limit(1, Side::Buy, 9900, 10));
        engine.add_order(limit(2, Side::Buy, 9950, 20));
        engine.add_order(limit(3, Side::Sell, 10050, 5));

        let snap = engine.get_order_book_snapshot(None);
        assert_eq!(snap.best_bid, Some(9950));
        assert_eq!(snap.best_ask, Some(10050));
        assert_eq!(snap.spread, 100);
        assert_eq!(snap.bids[0].price, 9950);

        let stats = engine.get_performance_stats();
        assert_eq!(stats.counters.orders_received, 3);
        assert_eq!(stats.latency.samples, 3);
        assert_eq!(stats.resting_orders, 3);

        engine.reset_latency_window();
        assert_eq!(engine.get_performance_stats().latency.samples, 0);
        assert_eq!(engine.get_performance_stats().counters.orders_received, 3);
    }

    #[test]
    fn test_state_hash_determinism() {
        let mut e1 = engine();
        let mut e2 = engine();
        for i in 0..100u64 {
            let side = if i % 2 == 0 { Side::Buy } else { Side::Sell };
            let mut order = limit(i, side, 10000 + (i % 10) * 10, 100);
            order.timestamp = i + 1;
            e1.add_order(order);
            e2.add_order(order);
        }
        e1.add_order(limit(1000, Side::Buy, 1, 5));
        e2.add_order(limit(1000, Side::Buy, 1, 5));
        assert_eq!(e1.state_hash(), e2.state_hash());
        e2.cancel(1000);
        assert_ne!(e1.state_hash(), e2.state_hash());
    }
}
