//! Lock-free open-addressing hash map with a fixed capacity.
//!
//! Linear probing over a power-of-two slot array. Each slot carries a state
//! flag moved by CAS:
//!
//! ```text
//! Empty --CAS--> Busy --store--> Occupied --CAS--> Tombstone
//! ```
//!
//! `Busy` covers the short window in which the inserting thread writes the
//! key; other threads wait it out before comparing keys. Tombstones are
//! never reused, so the key of a slot is written exactly once and can be
//! read without synchronisation after the `Occupied` publish. Values live in
//! an [`AtomicCell`] and may be overwritten in place.
//!
//! There is no resize path. Capacity bounds the number of distinct
//! insertions over the map's lifetime; once the probe sequence is exhausted
//! `put` reports [`MapError::Full`].

use std::cell::UnsafeCell;
use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use crossbeam::atomic::AtomicCell;
use crossbeam::utils::Backoff;
use rustc_hash::FxBuildHasher;

use crate::error::MapError;

const EMPTY: u8 = 0;
const BUSY: u8 = 1;
const OCCUPIED: u8 = 2;
const TOMBSTONE: u8 = 3;

struct Slot<K, V> {
    state: AtomicU8,
    key: UnsafeCell<MaybeUninit<K>>,
    value: AtomicCell<Option<V>>,
}

/// Fixed-capacity concurrent map. All operations take `&self`.
pub struct LockFreeHashMap<K, V> {
    slots: Box<[Slot<K, V>]>,
    mask: usize,
    len: AtomicUsize,
    tombstones: AtomicUsize,
    hasher: FxBuildHasher,
}

// SAFETY: keys are written once while the slot is BUSY (exclusive after a
// successful CAS) and only read after OCCUPIED/TOMBSTONE is observed with
// Acquire. Values are behind AtomicCell.
unsafe impl<K: Send + Sync, V: Send> Sync for LockFreeHashMap<K, V> {}
unsafe impl<K: Send, V: Send> Send for LockFreeHashMap<K, V> {}

enum Probe<'a, K, V> {
    Found(&'a Slot<K, V>),
    Vacant(&'a Slot<K, V>),
    Exhausted,
}

impl<K: Hash + Eq, V: Copy> LockFreeHashMap<K, V> {
    /// Create a map with at least `capacity` slots (rounded to a power of two).
    pub fn with_capacity(capacity: usize) -> Self {
        let slots = capacity.max(2).next_power_of_two();
        let buffer: Box<[Slot<K, V>]> = (0..slots)
            .map(|_| Slot {
                state: AtomicU8::new(EMPTY),
                key: UnsafeCell::new(MaybeUninit::uninit()),
                value: AtomicCell::new(None),
            })
            .collect();

        Self {
            slots: buffer,
            mask: slots - 1,
            len: AtomicUsize::new(0),
            tombstones: AtomicUsize::new(0),
            hasher: FxBuildHasher,
        }
    }

    #[inline]
    fn start_index(&self, key: &K) -> usize {
        (self.hasher.hash_one(key) as usize) & self.mask
    }

    /// Load a slot's state, waiting out an in-progress insert.
    #[inline]
    fn settled_state(slot: &Slot<K, V>) -> u8 {
        let backoff = Backoff::new();
        loop {
            let state = slot.state.load(Ordering::Acquire);
            if state != BUSY {
                return state;
            }
            backoff.snooze();
        }
    }

    /// # Safety
    /// The caller must have observed OCCUPIED or TOMBSTONE on `slot`.
    #[inline]
    unsafe fn key_of(slot: &Slot<K, V>) -> &K {
        (*slot.key.get()).assume_init_ref()
    }

    /// Walk the probe sequence for `key`.
    ///
    /// Stops at the first Empty slot (vacant) or Occupied slot holding
    /// `key` (found). Tombstones are stepped over.
    fn probe(&self, key: &K) -> Probe<'_, K, V> {
        let start = self.start_index(key);
        for step in 0..=self.mask {
            let slot = &self.slots[(start + step) & self.mask];
            match Self::settled_state(slot) {
                EMPTY => return Probe::Vacant(slot),
                // SAFETY: OCCUPIED observed with Acquire
                OCCUPIED if unsafe { Self::key_of(slot) } == key => return Probe::Found(slot),
                _ => {}
            }
        }
        Probe::Exhausted
    }

    /// Insert or overwrite.
    ///
    /// # Returns
    /// `Ok(Some(previous))` when `key` was present, `Ok(None)` for a new
    /// entry, `Err(MapError::Full)` when no slot is left on the probe path.
    pub fn put(&self, key: K, value: V) -> Result<Option<V>, MapError> {
        loop {
            match self.probe(&key) {
                Probe::Found(slot) => {
                    let previous = slot.value.swap(Some(value));
                    // A racing remove may have tombstoned the slot meanwhile;
                    // the write then lands on a dead slot, so retry.
                    if slot.state.load(Ordering::Acquire) == OCCUPIED {
                        return Ok(previous);
                    }
                }
                Probe::Vacant(slot) => {
                    if slot
                        .state
                        .compare_exchange(EMPTY, BUSY, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        // SAFETY: BUSY gives us exclusive access to the key
                        unsafe { (*slot.key.get()).write(key) };
                        slot.value.store(Some(value));
                        slot.state.store(OCCUPIED, Ordering::Release);
                        self.len.fetch_add(1, Ordering::AcqRel);
                        return Ok(None);
                    }
                    // Lost the race for this slot: re-probe, it may now hold our key
                }
                Probe::Exhausted => {
                    return Err(MapError::Full {
                        capacity: self.capacity(),
                    })
                }
            }
        }
    }

    /// Look up `key`.
    pub fn get(&self, key: &K) -> Option<V> {
        match self.probe(key) {
            Probe::Found(slot) => slot.value.load(),
            _ => None,
        }
    }

    #[inline]
    pub fn contains_key(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Remove `key`, leaving a tombstone.
    pub fn remove(&self, key: &K) -> Option<V> {
        match self.probe(key) {
            Probe::Found(slot) => {
                if slot
                    .state
                    .compare_exchange(OCCUPIED, TOMBSTONE, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    let previous = slot.value.swap(None);
                    self.len.fetch_sub(1, Ordering::AcqRel);
                    self.tombstones.fetch_add(1, Ordering::Relaxed);
                    previous
                } else {
                    // Someone else removed it first
                    None
                }
            }
            _ => None,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total slot count.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.mask + 1
    }

    /// Slots permanently consumed by removals.
    #[inline]
    pub fn tombstones(&self) -> usize {
        self.tombstones.load(Ordering::Relaxed)
    }
}

impl<K, V> Drop for LockFreeHashMap<K, V> {
    fn drop(&mut self) {
        for slot in self.slots.iter_mut() {
            let state = *slot.state.get_mut();
            if state == OCCUPIED || state == TOMBSTONE {
                // SAFETY: the key was initialised before either state was set
                unsafe { slot.key.get_mut().assume_init_drop() };
            }
        }
    }
}

impl<K, V> fmt::Debug for LockFreeHashMap<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockFreeHashMap")
            .field("capacity", &(self.mask + 1))
            .field("len", &self.len.load(Ordering::Relaxed))
            .field("tombstones", &self.tombstones.load(Ordering::Relaxed))
            .finish()
    }
}
