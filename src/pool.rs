//! Object Pool - a bounded lock-free free-list of reusable instances.
//!
//! The free-list is an SPSC ring buffer: the acquiring side pops, the
//! releasing side pushes. Both sides may live on one thread
//! ([`ObjectPool`]) or be split across two ([`ObjectPool::into_split`]),
//! e.g. a matching thread that fills trade buffers and a downstream thread
//! that hands them back once published.
//!
//! `acquire` never fails: an empty free-list degrades to allocation via the
//! factory (a cache miss). `release` resets the object and keeps it only
//! while the free-list is below `max_size`; anything beyond that is dropped
//! so pool memory stays bounded.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::queue::spsc;

/// Capability every pooled type must provide.
pub trait Poolable {
    /// Return the object to a clean, reusable state.
    fn reset(&mut self);
}

impl<T> Poolable for Vec<T> {
    #[inline]
    fn reset(&mut self) {
        self.clear();
    }
}

impl Poolable for String {
    #[inline]
    fn reset(&mut self) {
        self.clear();
    }
}

/// Factory used on a cache miss.
pub type Factory<T> = Box<dyn Fn() -> T + Send>;

/// Shared, non-blocking counters for a pool.
#[derive(Debug, Default)]
pub struct PoolStats {
    created: AtomicU64,
    acquired: AtomicU64,
    released: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    in_use: AtomicU64,
    peak_in_use: AtomicU64,
    discarded: AtomicU64,
}

/// Point-in-time copy of [`PoolStats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PoolStatsSnapshot {
    pub created: u64,
    pub acquired: u64,
    pub released: u64,
    pub hits: u64,
    pub misses: u64,
    pub in_use: u64,
    pub peak_in_use: u64,
    pub discarded: u64,
}

impl PoolStatsSnapshot {
    /// Fraction of acquisitions served from the free-list.
    pub fn hit_rate(&self) -> f64 {
        if self.acquired == 0 {
            0.0
        } else {
            self.hits as f64 / self.acquired as f64
        }
    }
}

impl PoolStats {
    #[inline]
    pub(crate) fn record_created(&self, count: u64) {
        self.created.fetch_add(count, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_acquire(&self, hit: bool) {
        self.acquired.fetch_add(1, Ordering::Relaxed);
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        let in_use = self.in_use.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak_in_use.fetch_max(in_use, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_release(&self, kept: bool) {
        self.released.fetch_add(1, Ordering::Relaxed);
        if !kept {
            self.discarded.fetch_add(1, Ordering::Relaxed);
        }
        // Objects created outside the pool may be released into it
        let _ = self
            .in_use
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                Some(n.saturating_sub(1))
            });
    }

    #[inline]
    pub(crate) fn record_discarded(&self, count: u64) {
        self.discarded.fetch_add(count, Ordering::Relaxed);
    }

    #[inline]
    pub fn in_use(&self) -> u64 {
        self.in_use.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> PoolStatsSnapshot {
        PoolStatsSnapshot {
            created: self.created.load(Ordering::Relaxed),
            acquired: self.acquired.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            in_use: self.in_use.load(Ordering::Relaxed),
            peak_in_use: self.peak_in_use.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
        }
    }
}

/// The acquiring half of a pool.
pub struct Acquirer<T> {
    free: spsc::Consumer<T>,
    factory: Factory<T>,
    stats: Arc<PoolStats>,
}

impl<T> Acquirer<T> {
    /// Take an object from the free-list, or build one on a miss.
    #[inline]
    pub fn acquire(&mut self) -> T {
        match self.free.try_pop() {
            Ok(obj) => {
                self.stats.record_acquire(true);
                obj
            }
            Err(_) => {
                self.stats.record_created(1);
                self.stats.record_acquire(false);
                (self.factory)()
            }
        }
    }

    /// Objects currently waiting in the free-list.
    #[inline]
    pub fn available(&self) -> usize {
        self.free.len()
    }

    pub fn stats(&self) -> Arc<PoolStats> {
        Arc::clone(&self.stats)
    }
}

/// The releasing half of a pool.
pub struct Recycler<T> {
    free: spsc::Producer<T>,
    max_size: usize,
    stats: Arc<PoolStats>,
}

impl<T: Poolable> Recycler<T> {
    /// Reset `obj` and return it to the free-list.
    ///
    /// # Returns
    /// `true` if the object was kept, `false` if the free-list was at
    /// `max_size` and the object was dropped.
    #[inline]
    pub fn release(&mut self, mut obj: T) -> bool {
        obj.reset();
        let kept = self.free.len() < self.max_size && self.free.try_push(obj).is_ok();
        self.stats.record_release(kept);
        kept
    }

    pub fn stats(&self) -> Arc<PoolStats> {
        Arc::clone(&self.stats)
    }
}

/// A bounded pool whose free-list is an SPSC queue.
pub struct ObjectPool<T> {
    acquirer: Acquirer<T>,
    recycler: Recycler<T>,
}

impl<T: Poolable> ObjectPool<T> {
    /// Build a pool pre-filled with `initial_size` objects.
    ///
    /// `max_size` bounds the free-list; it is raised to `initial_size` if
    /// smaller.
    pub fn new<F>(initial_size: usize, max_size: usize, factory: F) -> Self
    where
        F: Fn() -> T + Send + 'static,
    {
        let max_size = max_size.max(initial_size).max(1);
        // One extra slot: the SPSC queue keeps one slot free
        let (mut producer, consumer) = spsc::channel(max_size + 1);
        let stats = Arc::new(PoolStats::default());

        for _ in 0..initial_size {
            if producer.try_push(factory()).is_err() {
                break;
            }
        }
        stats.record_created(initial_size as u64);

        Self {
            acquirer: Acquirer {
                free: consumer,
                factory: Box::new(factory),
                stats: Arc::clone(&stats),
            },
            recycler: Recycler {
                free: producer,
                max_size,
                stats,
            },
        }
    }

    #[inline]
    pub fn acquire(&mut self) -> T {
        self.acquirer.acquire()
    }

    #[inline]
    pub fn release(&mut self, obj: T) -> bool {
        self.recycler.release(obj)
    }

    #[inline]
    pub fn available(&self) -> usize {
        self.acquirer.available()
    }

    #[inline]
    pub fn max_size(&self) -> usize {
        self.recycler.max_size
    }

    pub fn stats(&self) -> PoolStatsSnapshot {
        self.acquirer.stats.snapshot()
    }

    /// Split into halves that may be moved to different threads.
    pub fn into_split(self) -> (Acquirer<T>, Recycler<T>) {
        (self.acquirer, self.recycler)
    }
}

impl<T> fmt::Debug for ObjectPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectPool")
            .field("available", &self.acquirer.available())
            .field("max_size", &self.recycler.max_size)
            .field("stats", &self.acquirer.stats.snapshot())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_initial_hits_then_miss() {
        let mut pool = ObjectPool::new(10, 20, || Vec::<u64>::with_capacity(8));

        let mut held = Vec::new();
        for _ in 0..10 {
            held.push(pool.acquire());
        }
        let stats = pool.stats();
        assert_eq!(stats.hits, 10);
        assert_eq!(stats.misses, 0);

        held.push(pool.acquire());
        let stats = pool.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.created, 11);
        assert_eq!(stats.in_use, 11);
        assert_eq!(stats.peak_in_use, 11);
    }

    #[test]
    fn test_release_resets() {
        let mut pool = ObjectPool::new(1, 4, Vec::<u32>::new);
        let mut buf = pool.acquire();
        buf.extend([1, 2, 3]);
        assert!(pool.release(buf));

        let buf = pool.acquire();
        assert!(buf.is_empty());
        assert!(buf.capacity() >= 3, "allocation should be reused");
    }

    #[test]
    fn test_release_beyond_max_is_dropped() {
        let mut pool = ObjectPool::new(0, 2, String::new);
        let a = pool.acquire();
        let b = pool.acquire();
        let c = pool.acquire();

        assert!(pool.release(a));
        assert!(pool.release(b));
        assert!(!pool.release(c));

        let stats = pool.stats();
        assert_eq!(stats.discarded, 1);
        assert_eq!(stats.in_use, 0);
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn test_max_size_raised_to_initial() {
        let pool = ObjectPool::new(8, 2, String::new);
        assert_eq!(pool.max_size(), 8);
        assert_eq!(pool.available(), 8);
    }

    #[test]
    fn test_split_across_threads() {
        let pool = ObjectPool::new(4, 64, Vec::<u8>::new);
        let (mut acquirer, mut recycler) = pool.into_split();
        let stats = acquirer.stats();

        let (mut tx, mut rx) = spsc::channel::<Vec<u8>>(64);
        let releaser = thread::spawn(move || {
            let mut returned = 0;
            while returned < 1000 {
                if let Ok(buf) = rx.try_pop() {
                    recycler.release(buf);
                    returned += 1;
                }
            }
        });

        for i in 0..1000u32 {
            let mut buf = acquirer.acquire();
            buf.push(i as u8);
            let mut pending = buf;
            loop {
                match tx.try_push(pending) {
                    Ok(()) => break,
                    Err(e) => pending = e.into_inner(),
                }
            }
        }

        releaser.join().unwrap();
        let snap = stats.snapshot();
        assert_eq!(snap.acquired, 1000);
        assert_eq!(snap.released, 1000);
        assert_eq!(snap.in_use, 0);
        assert!(snap.hits > 0);
    }
}
