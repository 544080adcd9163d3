//! Order Book - The central limit order book data structure.
//!
//! Each side is an ordered `price -> PriceLevel` map so the matcher can
//! walk levels best-first; an FxHashMap index gives O(1) lookup by order
//! id for cancellation.

use std::collections::BTreeMap;

use rustc_hash::FxHashMap;
use serde::Serialize;

use crate::arena::{Arena, ArenaIndex};
use crate::order::{Side, Symbol};
use crate::price_level::PriceLevel;

/// Order metadata stored alongside the arena index
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OrderInfo {
    /// Index in the arena
    pub arena_index: ArenaIndex,
    /// Order side (needed for cancel to find correct book side)
    pub side: Side,
    /// Price level (needed for cancel to find the PriceLevel)
    pub price: u64,
    pub client_id: u64,
}

/// Aggregate view of one price level.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct LevelSummary {
    pub price: u64,
    pub quantity: u64,
    pub order_count: u32,
}

/// Depth snapshot, best price first on both sides.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BookSnapshot {
    pub symbol: Symbol,
    pub bids: Vec<LevelSummary>,
    pub asks: Vec<LevelSummary>,
    pub best_bid: Option<u64>,
    pub best_ask: Option<u64>,
    /// `best_ask - best_bid`, or 0 when either side is empty
    pub spread: u64,
    pub order_count: usize,
    pub timestamp: u64,
}

/// Limit order book for one symbol.
pub struct OrderBook {
    symbol: Symbol,
    /// Bid price levels (buy orders)
    pub bids: BTreeMap<u64, PriceLevel>,
    /// Ask price levels (sell orders)
    pub asks: BTreeMap<u64, PriceLevel>,
    /// Cached best bid price (highest buy price)
    best_bid: Option<u64>,
    /// Cached best ask price (lowest sell price)
    best_ask: Option<u64>,
    /// Order lookup map: OrderId -> OrderInfo
    order_map: FxHashMap<u64, OrderInfo>,
}

impl OrderBook {
    pub fn new(symbol: Symbol) -> Self {
        Self::with_capacity(symbol, 0)
    }

    /// Create a new order book with a pre-sized order index
    pub fn with_capacity(symbol: Symbol, orders: usize) -> Self {
        Self {
            symbol,
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            best_bid: None,
            best_ask: None,
            order_map: FxHashMap::with_capacity_and_hasher(orders, Default::default()),
        }
    }

    #[inline]
    pub fn symbol(&self) -> Symbol {
        self.symbol
    }

    // ========================================================================
    // Best Price Access
    // ========================================================================

    /// Get the best bid price (highest buy price)
    #[inline]
    pub fn best_bid(&self) -> Option<u64> {
        self.best_bid
    }

    /// Get the best ask price (lowest sell price)
    #[inline]
    pub fn best_ask(&self) -> Option<u64> {
        self.best_ask
    }

    #[inline]
    pub fn best_price(&self, side: Side) -> Option<u64> {
        match side {
            Side::Buy => self.best_bid,
            Side::Sell => self.best_ask,
        }
    }

    /// Get the best opposite price (for matching)
    #[inline]
    pub fn best_opposite_price(&self, side: Side) -> Option<u64> {
        match side {
            Side::Buy => self.best_ask,  // Buyer matches with lowest ask
            Side::Sell => self.best_bid, // Seller matches with highest bid
        }
    }

    // ========================================================================
    // Level Access
    // ========================================================================

    #[inline]
    pub fn get_level(&self, side: Side, price: u64) -> Option<&PriceLevel> {
        self.side(side).get(&price)
    }

    #[inline]
    pub fn get_level_mut(&mut self, side: Side, price: u64) -> Option<&mut PriceLevel> {
        match side {
            Side::Buy => self.bids.get_mut(&price),
            Side::Sell => self.asks.get_mut(&price),
        }
    }

    #[inline]
    fn side(&self, side: Side) -> &BTreeMap<u64, PriceLevel> {
        match side {
            Side::Buy => &self.bids,
            Side::Sell => &self.asks,
        }
    }

    /// Levels of one side, best price first.
    pub fn levels(&self, side: Side) -> Box<dyn Iterator<Item = &PriceLevel> + '_> {
        match side {
            Side::Buy => Box::new(self.bids.values().rev()),
            Side::Sell => Box::new(self.asks.values()),
        }
    }

    // ========================================================================
    // Order Management
    // ========================================================================

    /// Add a resting order to the book.
    ///
    /// The node at `arena_index` must already carry the order's fields.
    ///
    /// # Returns
    /// `true` if order was added, `false` if order_id already exists
    pub fn add_order(&mut self, arena: &mut Arena, arena_index: ArenaIndex) -> bool {
        let node = arena.get(arena_index);
        let (order_id, side, price, client_id) = (node.order_id, node.side, node.price, node.client_id);

        if self.order_map.contains_key(&order_id) {
            return false;
        }

        self.order_map.insert(
            order_id,
            OrderInfo {
                arena_index,
                side,
                price,
                client_id,
            },
        );

        let level = match side {
            Side::Buy => self.bids.entry(price).or_insert_with(|| PriceLevel::new(price)),
            Side::Sell => self.asks.entry(price).or_insert_with(|| PriceLevel::new(price)),
        };
        level.push_back(arena, arena_index);

        self.update_best_price_on_add(side, price);
        true
    }

    /// Remove an order from the book (for cancel).
    ///
    /// # Returns
    /// The removed order's info if found, or `None` if not found.
    /// The arena slot is NOT freed; caller must do that.
    pub fn remove_order(&mut self, arena: &mut Arena, order_id: u64) -> Option<OrderInfo> {
        let info = self.order_map.remove(&order_id)?;

        let emptied = self
            .get_level_mut(info.side, info.price)
            .is_some_and(|level| level.remove(arena, info.arena_index));
        if emptied {
            self.remove_empty_level(info.side, info.price);
        }

        Some(info)
    }

    #[inline]
    pub fn get_order(&self, order_id: u64) -> Option<&OrderInfo> {
        self.order_map.get(&order_id)
    }

    #[inline]
    pub fn contains_order(&self, order_id: u64) -> bool {
        self.order_map.contains_key(&order_id)
    }

    /// Remove an order from the order map only (after matching).
    /// Call this when an order is fully filled during matching.
    #[inline]
    pub fn remove_order_from_map(&mut self, order_id: u64) {
        self.order_map.remove(&order_id);
    }

    /// Ids of every resting order, in no particular order.
    pub fn order_ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.order_map.keys().copied()
    }

    // ========================================================================
    // Level Removal
    // ========================================================================

    /// Remove an empty price level and update best price if needed.
    pub fn remove_empty_level(&mut self, side: Side, price: u64) {
        match side {
            Side::Buy => {
                self.bids.remove(&price);
                if self.best_bid == Some(price) {
                    self.best_bid = self.bids.keys().next_back().copied();
                }
            }
            Side::Sell => {
                self.asks.remove(&price);
                if self.best_ask == Some(price) {
                    self.best_ask = self.asks.keys().next().copied();
                }
            }
        }
    }

    fn update_best_price_on_add(&mut self, side: Side, price: u64) {
        match side {
            Side::Buy => {
                if self.best_bid.map_or(true, |best| price > best) {
                    self.best_bid = Some(price);
                }
            }
            Side::Sell => {
                if self.best_ask.map_or(true, |best| price < best) {
                    self.best_ask = Some(price);
                }
            }
        }
    }

    // ========================================================================
    // Utility Methods
    // ========================================================================

    pub fn order_count(&self) -> usize {
        self.order_map.len()
    }

    pub fn bid_levels(&self) -> usize {
        self.bids.len()
    }

    pub fn ask_levels(&self) -> usize {
        self.asks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order_map.is_empty()
    }

    /// Spread (best_ask - best_bid), `None` when either side is empty
    pub fn spread(&self) -> Option<u64> {
        match (self.best_bid, self.best_ask) {
            (Some(bid), Some(ask)) => Some(ask.saturating_sub(bid)),
            _ => None,
        }
    }

    /// Aggregate quantity and order count at a price level
    pub fn depth_at(&self, side: Side, price: u64) -> (u64, u32) {
        self.get_level(side, price)
            .map(|l| (l.total_qty, l.count))
            .unwrap_or((0, 0))
    }

    /// Depth snapshot limited to `depth` levels per side (all when `None`).
    pub fn snapshot(&self, depth: Option<usize>, timestamp: u64) -> BookSnapshot {
        let take = depth.unwrap_or(usize::MAX);
        let summarize = |l: &PriceLevel| LevelSummary {
            price: l.price,
            quantity: l.total_qty,
            order_count: l.count,
        };
        BookSnapshot {
            symbol: self.symbol,
            bids: self.levels(Side::Buy).take(take).map(summarize).collect(),
            asks: self.levels(Side::Sell).take(take).map(summarize).collect(),
            best_bid: self.best_bid,
            best_ask: self.best_ask,
            spread: self.spread().unwrap_or(0),
            order_count: self.order_map.len(),
            timestamp,
        }
    }
}

impl std::fmt::Debug for OrderBook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderBook")
            .field("symbol", &self.symbol)
            .field("best_bid", &self.best_bid)
            .field("best_ask", &self.best_ask)
            .field("bid_levels", &self.bids.len())
            .field("ask_levels", &self.asks.len())
            .field("order_count", &self.order_map.len())
            .finish()
    }
}
