//! Multi-Producer Single-Consumer ring buffer.
//!
//! Producers reserve a unique ticket by advancing the shared tail counter
//! with CAS, write the slot, then flip the slot's ready flag. The single
//! consumer only ever looks at the slot under `head`, so items come out in
//! ticket order even when producers finish their writes out of order.
//!
//! A ticket is refused before the tail moves whenever it would reach
//! `head + capacity`, so an overrunning producer never leaves a hole the
//! consumer would wait on, and never overwrites unread data.
//!
//! Closing the queue sets a flag bit inside the tail counter. Any producer
//! CAS against a pre-close tail then fails, so once closed the set of
//! reserved tickets is final and the consumer can drain exactly those.

use std::cell::UnsafeCell;
use std::fmt;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::utils::{Backoff, CachePadded};
use tracing::warn;

use crate::atomic::AtomicCounter;
use crate::error::{PopError, PushError};
use crate::queue::metrics::{QueueMetrics, QueueMetricsSnapshot};
use crate::queue::round_capacity;

const SLOT_FREE: u8 = 0;
const SLOT_READY: u8 = 1;

/// Set in the tail counter once the receiver has closed the queue.
const CLOSED: i64 = 1 << 62;

/// Sleep between slot checks once the spin phase is exhausted.
const SLOT_WAIT_SLEEP: Duration = Duration::from_micros(1);

/// Producer waits (ticket CAS retries plus slot wait) longer than this are
/// logged.
const SLOW_WAIT: Duration = Duration::from_millis(1);

struct Slot<T> {
    state: AtomicU8,
    value: UnsafeCell<MaybeUninit<T>>,
}

struct Shared<T> {
    slots: Box<[Slot<T>]>,
    mask: usize,
    head: CachePadded<AtomicCounter>,
    tail: CachePadded<AtomicCounter>,
    metrics: QueueMetrics,
}

// SAFETY: a slot's value is written only by the producer holding its ticket
// while the flag is FREE, and read only by the consumer after observing
// READY with Acquire. The flag transitions carry the hand-over.
unsafe impl<T: Send> Send for Shared<T> {}
unsafe impl<T: Send> Sync for Shared<T> {}

impl<T> Shared<T> {
    #[inline]
    fn slot(&self, ticket: i64) -> &Slot<T> {
        &self.slots[(ticket as usize) & self.mask]
    }

    #[inline]
    fn capacity(&self) -> i64 {
        (self.mask + 1) as i64
    }

    /// Tail with the closed bit masked off.
    #[inline]
    fn reserved(&self) -> i64 {
        self.tail.get() & !CLOSED
    }

    #[inline]
    fn is_closed(&self) -> bool {
        self.tail.get() & CLOSED != 0
    }

    #[inline]
    fn len(&self) -> usize {
        (self.reserved() - self.head.get()).max(0) as usize
    }
}

impl<T> Drop for Shared<T> {
    fn drop(&mut self) {
        let head = self.head.get();
        let tail = self.reserved();
        for ticket in head..tail {
            let slot = self.slot(ticket);
            if slot.state.load(Ordering::Acquire) == SLOT_READY {
                // SAFETY: READY slots hold an initialised item and nobody
                // else can reach the queue during drop.
                unsafe { (*slot.value.get()).assume_init_drop() };
            }
        }
    }
}

/// Create a bounded MPSC queue.
///
/// `capacity` is rounded up to a power of two (minimum 2). Unlike the SPSC
/// variant no slot is reserved: the per-slot ready flag disambiguates
/// empty from full.
pub fn channel<T>(capacity: usize) -> (Sender<T>, Receiver<T>) {
    let slots = round_capacity(capacity);
    let buffer: Box<[Slot<T>]> = (0..slots)
        .map(|_| Slot {
            state: AtomicU8::new(SLOT_FREE),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        })
        .collect();

    let shared = Arc::new(Shared {
        slots: buffer,
        mask: slots - 1,
        head: CachePadded::new(AtomicCounter::new(0)),
        tail: CachePadded::new(AtomicCounter::new(0)),
        metrics: QueueMetrics::new(),
    });

    (
        Sender {
            shared: Arc::clone(&shared),
        },
        Receiver {
            shared,
            head: 0,
            closed: false,
        },
    )
}

/// A producing handle. Clone it once per producer thread.
pub struct Sender<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Sender<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Sender<T> {
    /// Enqueue `item` without blocking on the consumer.
    ///
    /// # Returns
    /// - `Err(PushError::Full(item))` if taking a ticket would overrun the
    ///   consumer.
    /// - `Err(PushError::Disconnected(item))` once the receiver has closed
    ///   the queue or been dropped. An `Ok` push was reserved before the
    ///   close and is seen by a receiver that drains after closing.
    ///
    /// Contention with other producers is resolved internally; time spent
    /// retrying the ticket CAS, plus any wait for a lapped slot, is recorded
    /// as wait time.
    pub fn try_push(&self, item: T) -> Result<(), PushError<T>> {
        let shared = &*self.shared;
        let backoff = Backoff::new();
        let mut contended: Option<Instant> = None;

        // Phase 1: reserve a ticket
        let (ticket, head) = loop {
            let tail = shared.tail.get();
            if tail & CLOSED != 0 {
                return Err(PushError::Disconnected(item));
            }
            let head = shared.head.get();
            if tail - head >= shared.capacity() {
                shared.metrics.record_enqueue_failure();
                return Err(PushError::Full(item));
            }
            if shared.tail.compare_and_swap(tail, tail + 1).is_ok() {
                break (tail, head);
            }
            contended.get_or_insert_with(Instant::now);
            backoff.spin();
        };

        // Phase 2: wait until the slot's flag reads free. The consumer
        // clears it before publishing the head that admitted this ticket,
        // so this loop only runs on a lapped slot whose clear is not yet
        // visible.
        let slot = shared.slot(ticket);
        if slot.state.load(Ordering::Acquire) != SLOT_FREE {
            contended.get_or_insert_with(Instant::now);
            let backoff = Backoff::new();
            while slot.state.load(Ordering::Acquire) != SLOT_FREE {
                if backoff.is_completed() {
                    thread::sleep(SLOT_WAIT_SLEEP);
                } else {
                    backoff.snooze();
                }
            }
        }
        if let Some(started) = contended {
            let waited = started.elapsed();
            shared.metrics.record_wait(waited.as_nanos() as u64);
            if waited > SLOW_WAIT {
                warn!(ticket, waited_us = waited.as_micros() as u64, "slow mpsc ticket wait");
            }
        }

        // Phase 3: write, then flag ready
        // SAFETY: our ticket gives exclusive write access to this slot while
        // its flag is FREE.
        unsafe { (*slot.value.get()).write(item) };
        let published = slot.state.compare_exchange(
            SLOT_FREE,
            SLOT_READY,
            Ordering::Release,
            Ordering::Relaxed,
        );
        debug_assert!(published.is_ok(), "slot flag changed under a held ticket");

        shared
            .metrics
            .record_enqueue((ticket + 1 - head).max(0) as usize);
        Ok(())
    }

    /// Number of reserved tickets not yet consumed (racy snapshot).
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
        self.shared.mask + 1
    }

    /// True once the receiver has closed the queue or been dropped.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    pub fn metrics(&self) -> QueueMetricsSnapshot {
        self.shared.metrics.snapshot()
    }
}

/// The single consuming handle. Dropping it closes the queue.
pub struct Receiver<T> {
    shared: Arc<Shared<T>>,
    head: i64,
    closed: bool,
}

impl<T> Receiver<T> {
    /// Dequeue the item holding the next ticket.
    ///
    /// Returns `Empty` when that ticket has not been published yet, even if
    /// later tickets already have been.
    pub fn try_pop(&mut self) -> Result<T, PopError> {
        let shared = &*self.shared;
        let slot = shared.slot(self.head);

        if slot.state.load(Ordering::Acquire) != SLOT_READY {
            shared.metrics.record_dequeue_failure();
            return Err(PopError::Empty);
        }

        // SAFETY: READY observed with Acquire; the producer is done with it.
        let item = unsafe { (*slot.value.get()).assume_init_read() };

        let cleared = slot.state.compare_exchange(
            SLOT_READY,
            SLOT_FREE,
            Ordering::Release,
            Ordering::Relaxed,
        );
        debug_assert!(cleared.is_ok(), "ready slot changed under the consumer");

        self.head += 1;
        shared.head.set(self.head);

        shared.metrics.record_dequeue();
        Ok(item)
    }

    /// Drain up to `max` items into `out`, returning how many were moved.
    pub fn drain_into(&mut self, out: &mut Vec<T>, max: usize) -> usize {
        let mut moved = 0;
        while moved < max {
            match self.try_pop() {
                Ok(item) => {
                    out.push(item);
                    moved += 1;
                }
                Err(PopError::Empty) => break,
            }
        }
        moved
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
        self.shared.mask + 1
    }

    /// Refuse all further pushes.
    ///
    /// Tickets reserved before the close stay valid: keep popping until
    /// [`Receiver::is_empty`] to receive every accepted item.
    pub fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.shared.tail.add(CLOSED);
        }
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// True once every `Sender` has been dropped.
    #[inline]
    pub fn is_disconnected(&self) -> bool {
        Arc::strong_count(&self.shared) == 1
    }

    pub fn metrics(&self) -> QueueMetricsSnapshot {
        self.shared.metrics.snapshot()
    }
}

impl<T> Drop for Receiver<T> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<T> fmt::Debug for Sender<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("mpsc::Sender")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .finish()
    }
}

impl<T> fmt::Debug for Receiver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("mpsc::Receiver")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .finish()
    }
}
