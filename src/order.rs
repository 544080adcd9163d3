//! Order, Trade and result types exchanged with the matching engine.
//!
//! Prices are integer ticks and quantities integer lots; see
//! [`crate::price::PriceScale`] for the decimal boundary.

use arrayvec::ArrayString;
use serde::{Deserialize, Serialize};

use crate::pool::Poolable;

/// Inline instrument symbol (at most 16 bytes, no heap).
pub type Symbol = ArrayString<16>;

/// Build a [`Symbol`], truncating anything beyond 16 bytes.
pub fn symbol(s: &str) -> Symbol {
    let mut out = Symbol::new();
    for c in s.chars() {
        if out.try_push(c).is_err() {
            break;
        }
    }
    out
}

/// Build a [`Symbol`] only if `s` fits without truncation.
pub fn try_symbol(s: &str) -> Option<Symbol> {
    Symbol::from(s).ok()
}

/// Nanoseconds since the Unix epoch.
#[inline]
pub fn now_nanos() -> u64 {
    chrono::Utc::now()
        .timestamp_nanos_opt()
        .map_or(0, |ns| ns.max(0) as u64)
}

/// Order side.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Side {
    #[default]
    Buy = 0,
    Sell = 1,
}

impl Side {
    /// Returns the opposite side
    #[inline]
    pub const fn opposite(self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum OrderType {
    Market = 0,
    #[default]
    Limit = 1,
    Stop = 2,
    StopLimit = 3,
    Ioc = 4,
    Fok = 5,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum OrderStatus {
    #[default]
    Pending = 0,
    Partial = 1,
    Filled = 2,
    Cancelled = 3,
    Rejected = 4,
}

impl OrderStatus {
    /// Filled, Cancelled and Rejected never change again.
    #[inline]
    pub const fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected)
    }
}

/// An order as submitted, and as reported back after matching.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: u64,
    pub symbol: Symbol,
    pub side: Side,
    pub order_type: OrderType,
    /// Original quantity in lots
    pub quantity: u32,
    /// Quantity not yet executed
    pub remaining_quantity: u32,
    /// Limit price in ticks (ignored for Market orders)
    pub price: u64,
    /// Admission time, ns since epoch; stamped by the engine when zero
    pub timestamp: u64,
    pub client_id: u64,
    pub status: OrderStatus,
}

impl Order {
    pub fn new(
        order_id: u64,
        symbol_name: &str,
        side: Side,
        order_type: OrderType,
        quantity: u32,
        price: u64,
        client_id: u64,
    ) -> Self {
        Self {
            order_id,
            symbol: symbol(symbol_name),
            side,
            order_type,
            quantity,
            remaining_quantity: quantity,
            price,
            timestamp: 0,
            client_id,
            status: OrderStatus::Pending,
        }
    }

    pub fn limit(order_id: u64, symbol_name: &str, side: Side, quantity: u32, price: u64, client_id: u64) -> Self {
        Self::new(order_id, symbol_name, side, OrderType::Limit, quantity, price, client_id)
    }

    pub fn market(order_id: u64, symbol_name: &str, side: Side, quantity: u32, client_id: u64) -> Self {
        Self::new(order_id, symbol_name, side, OrderType::Market, quantity, 0, client_id)
    }

    /// Quantity executed so far.
    #[inline]
    pub fn filled_quantity(&self) -> u32 {
        self.quantity.saturating_sub(self.remaining_quantity)
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

impl Poolable for Order {
    #[inline]
    fn reset(&mut self) {
        *self = Order::default();
    }
}

/// An execution between one buy and one sell order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    /// Per-engine sequence, starting at 1
    pub trade_id: u64,
    pub buy_order_id: u64,
    pub sell_order_id: u64,
    pub symbol: Symbol,
    pub quantity: u32,
    /// Always the resting order's price
    pub price: u64,
    pub timestamp: u64,
    pub buyer_client_id: u64,
    pub seller_client_id: u64,
    /// Side of the incoming order
    pub aggressor: Side,
}

impl Trade {
    #[inline]
    pub fn notional(&self) -> u128 {
        self.price as u128 * self.quantity as u128
    }
}

/// Why an admission, cancel or modify was refused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum RejectReason {
    /// Order ID already exists
    DuplicateOrderId = 0,
    /// Order not found (for cancel/modify)
    OrderNotFound = 1,
    /// Arena is full
    ArenaFull = 2,
    InvalidPrice = 3,
    InvalidQuantity = 4,
    /// Stop, StopLimit, IOC and FOK have no matching rules here
    UnsupportedOrderType = 5,
    /// Order names a different instrument than this book
    SymbolMismatch = 6,
}

/// Level 2 update: the new aggregate at one price (0/0 = level removed).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookUpdate {
    pub side: Side,
    pub price: u64,
    pub new_qty: u64,
    pub new_count: u32,
}

/// Everything produced by one `add_order` call.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MatchResult {
    pub trades: Vec<Trade>,
    /// Final state of the incoming order
    pub order: Order,
    pub total_matched: u64,
    /// Sum of price * quantity over `trades`
    pub notional: u128,
    pub reject_reason: Option<RejectReason>,
    pub book_updates: Vec<BookUpdate>,
}

impl MatchResult {
    pub(crate) fn rejected(mut order: Order, reason: RejectReason) -> Self {
        order.status = OrderStatus::Rejected;
        Self {
            order,
            reject_reason: Some(reason),
            ..Self::default()
        }
    }

    /// Volume-weighted average execution price in ticks.
    pub fn vwap(&self) -> Option<f64> {
        if self.total_matched == 0 {
            None
        } else {
            Some(self.notional as f64 / self.total_matched as f64)
        }
    }

    #[inline]
    pub fn is_rejected(&self) -> bool {
        self.reject_reason.is_some()
    }

    pub(crate) fn record_trade(&mut self, trade: Trade) {
        self.total_matched += trade.quantity as u64;
        self.notional += trade.notional();
        self.trades.push(trade);
    }
}
