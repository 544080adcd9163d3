//! Error types shared across the crate.
//!
//! Capacity exhaustion and contention are reported as values, never panics.
//! Order rejections are not errors at all; see [`crate::order::RejectReason`].

use std::fmt;

use thiserror::Error;

/// A `try_push` was refused. The item is handed back to the caller.
#[derive(Error, PartialEq, Eq)]
pub enum PushError<T> {
    /// The queue has no free slot (or the producer would overrun the consumer).
    #[error("queue is full")]
    Full(T),

    /// The consumer has closed the queue; nothing pushed now would be read.
    #[error("queue receiver is closed")]
    Disconnected(T),
}

impl<T> PushError<T> {
    /// Recover the rejected item.
    #[inline]
    pub fn into_inner(self) -> T {
        match self {
            PushError::Full(item) | PushError::Disconnected(item) => item,
        }
    }
}

impl<T> fmt::Debug for PushError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PushError::Full(_) => f.write_str("Full(..)"),
            PushError::Disconnected(_) => f.write_str("Disconnected(..)"),
        }
    }
}

/// A `try_pop` found nothing to return.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopError {
    #[error("queue is empty")]
    Empty,
}

/// Errors from the fixed-capacity lock-free map.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapError {
    /// Every slot on the probe sequence is occupied or tombstoned.
    #[error("hash map is full (capacity {capacity})")]
    Full { capacity: usize },
}

/// Errors raised by the memory manager.
#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("pool `{0}` is already registered")]
    DuplicatePool(String),

    #[error("pool `{0}` is not registered")]
    UnknownPool(String),

    #[error("pool `{name}` does not hold `{expected}`")]
    TypeMismatch { name: String, expected: &'static str },

    #[error("region `{0}` already exists")]
    DuplicateRegion(String),

    #[error("region size must be non-zero")]
    InvalidRegionSize,

    #[error("reclamation controller is already running")]
    AlreadyRunning,

    #[error("failed to spawn reclamation thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("region I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the sharded matching runtime.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("no shard serves symbol `{0}`")]
    UnknownSymbol(String),

    #[error("inbound queue for `{0}` is full")]
    QueueFull(String),

    #[error("symbol `{0}` is empty or longer than 16 bytes")]
    InvalidSymbol(String),

    #[error("runtime has been shut down")]
    ShutDown,

    #[error("symbol registry is full: {0}")]
    Registry(#[from] MapError),

    #[error("failed to spawn shard worker: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Errors converting external decimal prices into ticks.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PriceError {
    #[error("tick size must be positive")]
    InvalidTickSize,

    #[error("price {0} is negative")]
    Negative(String),

    #[error("price {price} is not a multiple of tick size {tick}")]
    OffTick { price: String, tick: String },

    #[error("price {0} does not fit in u64 ticks")]
    Overflow(String),
}
