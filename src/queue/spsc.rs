//! Single-Producer Single-Consumer ring buffer.
//!
//! A power-of-two circular buffer over two monotonically increasing
//! counters. One slot always stays unused so that `head == tail` means
//! empty and `tail - head == capacity - 1` means full.
//!
//! The single-producer/single-consumer discipline is enforced by the types:
//! [`channel`] hands out exactly one [`Producer`] and one [`Consumer`], neither
//! is `Clone`, and both mutate through `&mut self`.

use std::cell::UnsafeCell;
use std::fmt;
use std::mem::MaybeUninit;
use std::sync::Arc;

use crossbeam::utils::CachePadded;

use crate::atomic::AtomicCounter;
use crate::error::{PopError, PushError};
use crate::queue::metrics::{QueueMetrics, QueueMetricsSnapshot};
use crate::queue::round_capacity;

struct Shared<T> {
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
    mask: usize,
    /// Next slot the consumer will read. Written only by the consumer.
    head: CachePadded<AtomicCounter>,
    /// Next slot the producer will write. Written only by the producer.
    tail: CachePadded<AtomicCounter>,
    metrics: QueueMetrics,
}

// SAFETY: a slot is touched by the producer only while it lies outside
// [head, tail) and by the consumer only while it lies inside. The Release
// store of `tail` after the slot write (and of `head` after the slot read)
// paired with the Acquire load on the other side hands each slot over.
unsafe impl<T: Send> Send for Shared<T> {}
unsafe impl<T: Send> Sync for Shared<T> {}

impl<T> Shared<T> {
    #[inline]
    fn slot(&self, index: i64) -> *mut MaybeUninit<T> {
        self.slots[(index as usize) & self.mask].get()
    }

    #[inline]
    fn len(&self) -> usize {
        let head = self.head.get();
        let tail = self.tail.get();
        (tail - head).max(0) as usize
    }
}

impl<T> Drop for Shared<T> {
    fn drop(&mut self) {
        let head = self.head.get();
        let tail = self.tail.get();
        for index in head..tail {
            // SAFETY: slots in [head, tail) hold initialised items and we
            // have exclusive access during drop.
            unsafe { (*self.slot(index)).assume_init_drop() };
        }
    }
}

/// Create a bounded SPSC queue.
///
/// `capacity` is rounded up to a power of two (minimum 2); one slot is
/// reserved, so the queue holds at most `rounded - 1` items.
pub fn channel<T>(capacity: usize) -> (Producer<T>, Consumer<T>) {
    let slots = round_capacity(capacity);
    let buffer: Box<[UnsafeCell<MaybeUninit<T>>]> = (0..slots)
        .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
        .collect();

    let shared = Arc::new(Shared {
        slots: buffer,
        mask: slots - 1,
        head: CachePadded::new(AtomicCounter::new(0)),
        tail: CachePadded::new(AtomicCounter::new(0)),
        metrics: QueueMetrics::new(),
    });

    (
        Producer {
            shared: Arc::clone(&shared),
            tail: 0,
            cached_head: 0,
        },
        Consumer {
            shared,
            head: 0,
            cached_tail: 0,
        },
    )
}

/// The writing end of an SPSC queue.
pub struct Producer<T> {
    shared: Arc<Shared<T>>,
    /// Local copy of the published tail (only we write it)
    tail: i64,
    /// Last head value observed; refreshed only when the queue looks full
    cached_head: i64,
}

impl<T> Producer<T> {
    /// Enqueue `item` without blocking.
    ///
    /// # Returns
    /// `Err(PushError::Full(item))` when the next tail would collide with
    /// the consumer's head. No state changes in that case.
    ///
    /// # Complexity
    /// O(1)
    #[inline]
    pub fn try_push(&mut self, item: T) -> Result<(), PushError<T>> {
        let mask = self.shared.mask as i64;

        if self.tail - self.cached_head >= mask {
            self.cached_head = self.shared.head.get();
            if self.tail - self.cached_head >= mask {
                self.shared.metrics.record_enqueue_failure();
                return Err(PushError::Full(item));
            }
        }

        // SAFETY: the slot at `tail` is outside [head, tail) so the consumer
        // is not reading it; it was moved out (or never written) before head
        // advanced past it.
        unsafe { (*self.shared.slot(self.tail)).write(item) };

        // Publish only after the slot write is complete
        self.tail += 1;
        self.shared.tail.set(self.tail);

        self.shared
            .metrics
            .record_enqueue((self.tail - self.cached_head) as usize);
        Ok(())
    }

    /// Number of items currently queued (racy snapshot).
    #[inline]
    pub fn len(&self) -> usize {
        self.shared.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity()
    }

    /// Maximum number of items the queue can hold.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.shared.mask
    }

    /// Number of slots in the backing array (the rounded capacity).
    #[inline]
    pub fn slots(&self) -> usize {
        self.shared.mask + 1
    }

    pub fn metrics(&self) -> QueueMetricsSnapshot {
        self.shared.metrics.snapshot()
    }
}

/// The reading end of an SPSC queue.
pub struct Consumer<T> {
    shared: Arc<Shared<T>>,
    head: i64,
    cached_tail: i64,
}

impl<T> Consumer<T> {
    /// Dequeue the oldest item without blocking.
    ///
    /// # Complexity
    /// O(1)
    #[inline]
    pub fn try_pop(&mut self) -> Result<T, PopError> {
        if self.head == self.cached_tail {
            self.cached_tail = self.shared.tail.get();
            if self.head == self.cached_tail {
                self.shared.metrics.record_dequeue_failure();
                return Err(PopError::Empty);
            }
        }

        // SAFETY: head < tail (Acquire-observed), so the producer finished
        // writing this slot and will not touch it until head moves on.
        let item = unsafe { (*self.shared.slot(self.head)).assume_init_read() };

        self.head += 1;
        self.shared.head.set(self.head);

        self.shared.metrics.record_dequeue();
        Ok(item)
    }

    /// Peek at the oldest item without removing it.
    #[inline]
    pub fn peek(&mut self) -> Option<&T> {
        if self.head == self.cached_tail {
            self.cached_tail = self.shared.tail.get();
            if self.head == self.cached_tail {
                return None;
            }
        }
        // SAFETY: same hand-over argument as `try_pop`; the shared borrow of
        // `self` prevents a concurrent pop from this consumer.
        Some(unsafe { (*self.shared.slot(self.head)).assume_init_ref() })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.shared.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.shared.mask
    }

    pub fn metrics(&self) -> QueueMetricsSnapshot {
        self.shared.metrics.snapshot()
    }
}

impl<T> fmt::Debug for Producer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("spsc::Producer")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .finish()
    }
}

impl<T> fmt::Debug for Consumer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("spsc::Consumer")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_capacity_rounds_up() {
        let (producer, consumer) = channel::<u32>(10);
        assert_eq!(producer.slots(), 16);
        assert_eq!(producer.capacity(), 15);
        assert_eq!(consumer.capacity(), 15);

        let (producer, _) = channel::<u32>(0);
        assert_eq!(producer.slots(), 2);
        assert_eq!(producer.capacity(), 1);
    }

    #[test]
    fn test_full_reserves_one_slot() {
        let (mut producer, _consumer) = channel::<u32>(10);

        for i in 0..15 {
            assert!(producer.try_push(i).is_ok(), "push {} should succeed", i);
        }
        assert!(producer.is_full());

        let err = producer.try_push(99).unwrap_err();
        assert_eq!(err.into_inner(), 99);
        assert_eq!(producer.len(), 15);
        assert_eq!(producer.metrics().enqueue_failures, 1);
    }

    #[test]
    fn test_fifo_and_wraparound() {
        let (mut producer, mut consumer) = channel::<u64>(4);

        let mut expected = 0u64;
        let mut next = 0u64;
        for _ in 0..50 {
            while producer.try_push(next).is_ok() {
                next += 1;
            }
            while let Ok(item) = consumer.try_pop() {
                assert_eq!(item, expected);
                expected += 1;
            }
        }
        assert_eq!(expected, next);
        assert!(consumer.is_empty());
    }

    #[test]
    fn test_empty_pop() {
        let (_producer, mut consumer) = channel::<u8>(8);
        assert_eq!(consumer.try_pop(), Err(PopError::Empty));
        assert!(consumer.peek().is_none());
        assert_eq!(consumer.metrics().dequeue_failures, 1);
    }

    #[test]
    fn test_peek_does_not_consume() {
        let (mut producer, mut consumer) = channel::<String>(8);
        producer.try_push("a".to_string()).unwrap();
        assert_eq!(consumer.peek().map(String::as_str), Some("a"));
        assert_eq!(consumer.len(), 1);
        assert_eq!(consumer.try_pop().unwrap(), "a");
    }

    #[test]
    fn test_drop_releases_items() {
        let marker = Arc::new(());
        {
            let (mut producer, mut consumer) = channel::<Arc<()>>(8);
            for _ in 0..5 {
                producer.try_push(Arc::clone(&marker)).unwrap();
            }
            drop(consumer.try_pop());
            assert_eq!(Arc::strong_count(&marker), 5);
        }
        assert_eq!(Arc::strong_count(&marker), 1);
    }

    #[test]
    fn test_threaded_fifo() {
        const COUNT: u64 = 200_000;
        let (mut producer, mut consumer) = channel::<u64>(1024);

        let writer = thread::spawn(move || {
            let mut i = 0;
            while i < COUNT {
                if producer.try_push(i).is_ok() {
                    i += 1;
                } else {
                    std::hint::spin_loop();
                }
            }
        });

        let mut expected = 0;
        while expected < COUNT {
            match consumer.try_pop() {
                Ok(item) => {
                    assert_eq!(item, expected);
                    expected += 1;
                }
                Err(PopError::Empty) => std::hint::spin_loop(),
            }
        }

        writer.join().unwrap();
        assert_eq!(consumer.metrics().dequeued, COUNT);
    }
}
