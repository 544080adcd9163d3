//! Atomic Counter - the integer primitive every other structure builds on.
//!
//! Each method is exactly one atomic instruction, so every value a reader
//! observes is the result of one complete operation.

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

/// An atomically mutable signed integer.
///
/// Read-modify-write operations use `AcqRel`; plain loads use `Acquire`
/// and plain stores use `Release`, so a counter can double as a publication
/// flag for data written before the store.
#[derive(Default)]
pub struct AtomicCounter {
    value: AtomicI64,
}

impl AtomicCounter {
    /// Create a counter holding `initial`.
    #[inline]
    pub const fn new(initial: i64) -> Self {
        Self {
            value: AtomicI64::new(initial),
        }
    }

    #[inline]
    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set(&self, value: i64) {
        self.value.store(value, Ordering::Release);
    }

    /// Increment by one, returning the new value.
    #[inline]
    pub fn increment(&self) -> i64 {
        self.value.fetch_add(1, Ordering::AcqRel).wrapping_add(1)
    }

    /// Decrement by one, returning the new value.
    #[inline]
    pub fn decrement(&self) -> i64 {
        self.value.fetch_sub(1, Ordering::AcqRel).wrapping_sub(1)
    }

    /// Add `delta` (may be negative), returning the new value.
    #[inline]
    pub fn add(&self, delta: i64) -> i64 {
        self.value.fetch_add(delta, Ordering::AcqRel).wrapping_add(delta)
    }

    /// Replace the value with `new` iff it currently equals `expected`.
    ///
    /// # Returns
    /// `Ok(expected)` on success, `Err(observed)` on failure. A failed
    /// exchange has no side effect.
    #[inline]
    pub fn compare_and_swap(&self, expected: i64, new: i64) -> Result<i64, i64> {
        self.value
            .compare_exchange(expected, new, Ordering::AcqRel, Ordering::Acquire)
    }

    /// Store `value` and return the previous one.
    #[inline]
    pub fn swap(&self, value: i64) -> i64 {
        self.value.swap(value, Ordering::AcqRel)
    }
}

impl fmt::Debug for AtomicCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AtomicCounter").field(&self.get()).finish()
    }
}
