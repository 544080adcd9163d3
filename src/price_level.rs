//! Price Level - A FIFO queue of orders at a single price point.
//!
//! Implements a doubly-linked list using arena indices for O(1)
//! insertion, removal from head, and removal from arbitrary position.

use tracing::error;

use crate::arena::{Arena, ArenaIndex, NULL_INDEX};

/// A queue of orders at a specific price level.
///
/// Orders are processed in FIFO order (price-time priority).
/// The doubly-linked structure enables O(1) cancel from any position.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PriceLevel {
    pub price: u64,
    /// Index of the oldest order (highest priority, first to match)
    pub head: ArenaIndex,
    /// Index of the newest order (last to match)
    pub tail: ArenaIndex,
    /// Sum of the remaining quantity of every order at this level
    pub total_qty: u64,
    /// Number of orders at this level
    pub count: u32,
}

impl PriceLevel {
    /// Create a new empty price level
    #[inline]
    pub const fn new(price: u64) -> Self {
        Self {
            price,
            head: NULL_INDEX,
            tail: NULL_INDEX,
            total_qty: 0,
            count: 0,
        }
    }

    /// Returns true if there are no orders at this level
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Append an order to the tail of the queue (newest order).
    ///
    /// # Arguments
    /// * `arena` - The arena containing order nodes
    /// * `index` - Index of the order to add
    ///
    /// # Complexity
    /// O(1)
    #[inline]
    pub fn push_back(&mut self, arena: &mut Arena, index: ArenaIndex) {
        let qty = arena.get(index).remaining;

        if self.tail == NULL_INDEX {
            debug_assert!(self.head == NULL_INDEX);
            self.head = index;
            self.tail = index;
            arena.get_mut(index).prev = NULL_INDEX;
            arena.get_mut(index).next = NULL_INDEX;
        } else {
            arena.get_mut(self.tail).next = index;
            arena.get_mut(index).prev = self.tail;
            arena.get_mut(index).next = NULL_INDEX;
            self.tail = index;
        }

        self.count += 1;
        self.total_qty += qty as u64;
    }

    /// Remove and return the head order (oldest/highest priority).
    ///
    /// # Returns
    /// The index of the removed order, or `None` if empty.
    /// The order is NOT freed from the arena; caller must do that.
    ///
    /// # Complexity
    /// O(1)
    #[inline]
    pub fn pop_front(&mut self, arena: &mut Arena) -> Option<ArenaIndex> {
        if self.head == NULL_INDEX {
            return None;
        }

        let index = self.head;
        let node = arena.get(index);
        let next_idx = node.next;
        let qty = node.remaining;

        if next_idx == NULL_INDEX {
            self.head = NULL_INDEX;
            self.tail = NULL_INDEX;
        } else {
            self.head = next_idx;
            arena.get_mut(next_idx).prev = NULL_INDEX;
        }

        self.count = self.count.saturating_sub(1);
        self.subtract_qty(qty);

        arena.get_mut(index).prev = NULL_INDEX;
        arena.get_mut(index).next = NULL_INDEX;

        Some(index)
    }

    /// Remove an order from anywhere in the queue (for cancel).
    ///
    /// Handles all edge cases:
    /// - Only node in level (head == tail)
    /// - Removing head
    /// - Removing tail
    /// - Removing from middle
    ///
    /// # Returns
    /// `true` if the level is now empty, `false` otherwise.
    /// The order is NOT freed from the arena; caller must do that.
    ///
    /// # Complexity
    /// O(1)
    #[inline]
    pub fn remove(&mut self, arena: &mut Arena, index: ArenaIndex) -> bool {
        let node = arena.get(index);
        let prev_idx = node.prev;
        let next_idx = node.next;
        let qty = node.remaining;

        if prev_idx == NULL_INDEX && next_idx == NULL_INDEX {
            debug_assert!(self.head == index && self.tail == index);
            self.head = NULL_INDEX;
            self.tail = NULL_INDEX;
        } else if prev_idx == NULL_INDEX {
            debug_assert!(self.head == index);
            self.head = next_idx;
            arena.get_mut(next_idx).prev = NULL_INDEX;
        } else if next_idx == NULL_INDEX {
            debug_assert!(self.tail == index);
            self.tail = prev_idx;
            arena.get_mut(prev_idx).next = NULL_INDEX;
        } else {
            arena.get_mut(prev_idx).next = next_idx;
            arena.get_mut(next_idx).prev = prev_idx;
        }

        self.count = self.count.saturating_sub(1);
        self.subtract_qty(qty);

        arena.get_mut(index).prev = NULL_INDEX;
        arena.get_mut(index).next = NULL_INDEX;

        self.count == 0
    }

    /// Peek at the head order without removing it.
    ///
    /// # Returns
    /// Index of the head order, or `NULL_INDEX` if empty.
    #[inline]
    pub const fn peek_head(&self) -> ArenaIndex {
        self.head
    }

    /// Update total quantity after a partial fill.
    ///
    /// An underflow means the aggregate drifted from its members; it is
    /// clamped to zero so matching can continue.
    #[inline]
    pub fn subtract_qty(&mut self, qty: u32) {
        match self.total_qty.checked_sub(qty as u64) {
            Some(rest) => self.total_qty = rest,
            None => {
                error!(
                    price = self.price,
                    total = self.total_qty,
                    subtract = qty,
                    "price level aggregate underflow, clamping to zero"
                );
                self.total_qty = 0;
            }
        }
    }

    /// Walk the queue head to tail.
    pub fn iter<'a>(&self, arena: &'a Arena) -> LevelIter<'a> {
        LevelIter {
            arena,
            cursor: self.head,
        }
    }
}

/// Iterator over the arena indices of a level, in priority order.
pub struct LevelIter<'a> {
    arena: &'a Arena,
    cursor: ArenaIndex,
}

impl Iterator for LevelIter<'_> {
    type Item = ArenaIndex;

    fn next(&mut self) -> Option<ArenaIndex> {
        if self.cursor == NULL_INDEX {
            return None;
        }
        let current = self.cursor;
        self.cursor = self.arena.get(current).next;
        Some(current)
    }
}
