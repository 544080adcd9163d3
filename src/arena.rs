//! Arena Allocator - O(1) slab allocator with cache-line aligned nodes.
//!
//! The arena pre-allocates a contiguous block of memory at startup,
//! eliminating heap allocation in the hot path. Uses a free list for
//! O(1) allocation and deallocation.

use std::fmt;

use crate::order::{Order, OrderStatus, OrderType, Side, Symbol};

/// Sentinel value representing a null/invalid index (like nullptr)
pub const NULL_INDEX: u32 = u32::MAX;

/// Type alias for arena indices - our "compressed pointers"
/// Using u32 instead of 64-bit pointers halves metadata size,
/// doubling cache efficiency.
pub type ArenaIndex = u32;

/// A resting order - exactly 64 bytes (one cache line).
///
/// # Memory Layout
///
/// | Field       | Type    | Offset | Size |
/// |-------------|---------|--------|------|
/// | price       | u64     | 0      | 8    |
/// | order_id    | u64     | 8      | 8    |
/// | client_id   | u64     | 16     | 8    |
/// | timestamp   | u64     | 24     | 8    |
/// | quantity    | u32     | 32     | 4    |
/// | remaining   | u32     | 36     | 4    |
/// | next        | u32     | 40     | 4    |
/// | prev        | u32     | 44     | 4    |
/// | side        | u8      | 48     | 1    |
/// | order_type  | u8      | 49     | 1    |
/// | status      | u8      | 50     | 1    |
/// | _reserved   | [u8;13] | 51     | 13   |
/// | **Total**   |         |        | 64   |
///
/// The symbol is not stored per node; a book serves a single symbol.
#[repr(C)]
#[repr(align(64))]
#[derive(Clone, Copy)]
pub struct OrderNode {
    // === Hot Data (read on every match) ===
    pub price: u64,
    pub order_id: u64,
    pub client_id: u64,
    pub timestamp: u64,
    pub quantity: u32,
    /// Unexecuted quantity
    pub remaining: u32,

    // === Linkage (FIFO queue pointers within a PriceLevel) ===
    /// Index of next order at same price level
    pub next: ArenaIndex,
    /// Index of previous order (enables O(1) cancel)
    pub prev: ArenaIndex,

    pub side: Side,
    pub order_type: OrderType,
    pub status: OrderStatus,
    pub _reserved: [u8; 13],
}

// Compile-time assertion: OrderNode must be exactly 64 bytes
const _: () = assert!(
    std::mem::size_of::<OrderNode>() == 64,
    "OrderNode must be exactly 64 bytes (one cache line)"
);

// Compile-time assertion: OrderNode must be 64-byte aligned
const _: () = assert!(
    std::mem::align_of::<OrderNode>() == 64,
    "OrderNode must be 64-byte aligned"
);

impl OrderNode {
    /// Create an empty/uninitialized node (for free list)
    #[inline]
    pub const fn empty() -> Self {
        Self {
            price: 0,
            order_id: 0,
            client_id: 0,
            timestamp: 0,
            quantity: 0,
            remaining: 0,
            next: NULL_INDEX,
            prev: NULL_INDEX,
            side: Side::Buy,
            order_type: OrderType::Limit,
            status: OrderStatus::Pending,
            _reserved: [0u8; 13],
        }
    }

    /// Copy an order's fields into this node, leaving linkage untouched.
    #[inline]
    pub fn load(&mut self, order: &Order) {
        self.price = order.price;
        self.order_id = order.order_id;
        self.client_id = order.client_id;
        self.timestamp = order.timestamp;
        self.quantity = order.quantity;
        self.remaining = order.remaining_quantity;
        self.side = order.side;
        self.order_type = order.order_type;
        self.status = order.status;
    }

    /// Rebuild the public order view.
    #[inline]
    pub fn to_order(&self, symbol: Symbol) -> Order {
        Order {
            order_id: self.order_id,
            symbol,
            side: self.side,
            order_type: self.order_type,
            quantity: self.quantity,
            remaining_quantity: self.remaining,
            price: self.price,
            timestamp: self.timestamp,
            client_id: self.client_id,
            status: self.status,
        }
    }

    /// Reset the node for reuse (when returning to free list)
    #[inline]
    pub fn reset(&mut self) {
        *self = Self::empty();
    }
}

impl fmt::Debug for OrderNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrderNode")
            .field("order_id", &self.order_id)
            .field("client_id", &self.client_id)
            .field("side", &self.side)
            .field("price", &self.price)
            .field("remaining", &self.remaining)
            .field("status", &self.status)
            .field("prev", &self.prev)
            .field("next", &self.next)
            .finish()
    }
}

/// Pre-allocated memory pool with O(1) allocation and deallocation.
///
/// Uses a free list threaded through the `next` field of unused nodes.
/// No system calls or locks in the hot path.
pub struct Arena {
    /// Contiguous block of pre-allocated nodes
    nodes: Vec<OrderNode>,

    /// Head of the free list (index of first available node)
    free_head: ArenaIndex,

    /// Number of currently allocated nodes
    allocated_count: u32,

    /// Total capacity
    capacity: u32,
}

impl Arena {
    /// Create a new arena with the specified capacity.
    ///
    /// # Arguments
    /// * `capacity` - Maximum number of orders the arena can hold. Values at
    ///   or above `NULL_INDEX` are clamped, since that index is the sentinel.
    pub fn new(capacity: u32) -> Self {
        let capacity = capacity.min(NULL_INDEX - 1);

        let mut nodes = vec![OrderNode::empty(); capacity as usize];

        // Thread the free list through all nodes
        for i in 0..capacity.saturating_sub(1) {
            nodes[i as usize].next = i + 1;
        }

        Self {
            nodes,
            free_head: if capacity > 0 { 0 } else { NULL_INDEX },
            allocated_count: 0,
            capacity,
        }
    }

    /// Allocate a node from the arena.
    ///
    /// Returns `None` if the arena is full.
    ///
    /// # Complexity
    /// O(1) - pops from head of free list
    #[inline]
    pub fn alloc(&mut self) -> Option<ArenaIndex> {
        if self.free_head == NULL_INDEX {
            return None;
        }

        let index = self.free_head;
        self.free_head = self.nodes[index as usize].next;
        self.allocated_count += 1;

        self.nodes[index as usize].next = NULL_INDEX;
        self.nodes[index as usize].prev = NULL_INDEX;

        Some(index)
    }

    /// Free a node back to the arena.
    ///
    /// The caller must ensure the index was previously allocated and has
    /// not already been freed.
    ///
    /// # Complexity
    /// O(1) - pushes to head of free list
    #[inline]
    pub fn free(&mut self, index: ArenaIndex) {
        debug_assert!(index < self.capacity, "Index out of bounds");
        debug_assert!(self.allocated_count > 0, "Double free detected");

        self.nodes[index as usize].reset();
        self.nodes[index as usize].next = self.free_head;
        self.free_head = index;
        self.allocated_count = self.allocated_count.saturating_sub(1);
    }

    #[inline]
    pub fn get(&self, index: ArenaIndex) -> &OrderNode {
        debug_assert!(index < self.capacity, "Index out of bounds");
        &self.nodes[index as usize]
    }

    #[inline]
    pub fn get_mut(&mut self, index: ArenaIndex) -> &mut OrderNode {
        debug_assert!(index < self.capacity, "Index out of bounds");
        &mut self.nodes[index as usize]
    }

    /// Returns the number of currently allocated nodes.
    #[inline]
    pub fn allocated(&self) -> u32 {
        self.allocated_count
    }

    #[inline]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.allocated_count == 0
    }

    /// Returns true if the arena is full (no free nodes).
    #[inline]
    pub fn is_full(&self) -> bool {
        self.free_head == NULL_INDEX
    }

    /// Pre-fault all memory pages (warm-up routine).
    ///
    /// Walks through all nodes to force the OS to map virtual pages
    /// to physical RAM, preventing page faults in the hot path.
    pub fn warm_up(&mut self) {
        for node in &mut self.nodes {
            // SAFETY: the pointer comes from a live &mut borrow.
            unsafe {
                std::ptr::write_volatile(&mut node._reserved[0], 0);
            }
        }
    }
}

impl fmt::Debug for Arena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arena")
            .field("capacity", &self.capacity)
            .field("allocated", &self.allocated_count)
            .field("free_head", &self.free_head)
            .finish()
    }
}
