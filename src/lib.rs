//! # Flash-Core
//!
//! Low-latency building blocks and a deterministic price-time matching engine.
//!
//! ## Design Principles
//!
//! - **Single-Writer**: One thread owns each order book exclusively (no locks)
//! - **Lock-Free Hand-off**: Bounded SPSC/MPSC rings between threads
//! - **Cache-Optimized**: 64-byte aligned nodes, 32-bit indices, padded counters
//! - **Pooled Allocation**: Arenas and object pools keep the hot path off the heap
//!
//! ## Architecture
//!
//! ```text
//! [Producers] --MPSC--> [Shard Worker (Pinned)] --SPSC--> [Event Consumer]
//!                               |
//!                     [MatchingEngine per symbol]
//!
//! [MemoryManager] -- pools, shared regions, paced reclamation thread
//! ```

pub mod arena;
pub mod atomic;
pub mod config;
pub mod engine;
pub mod error;
pub mod hashmap;
pub mod matching;
pub mod memory;
pub mod order;
pub mod order_book;
pub mod pool;
pub mod price;
pub mod price_level;
pub mod queue;
pub mod stats;

// Re-exports for convenience
pub use arena::{Arena, ArenaIndex, OrderNode, NULL_INDEX};
pub use atomic::AtomicCounter;
pub use config::{CoreConfig, EngineConfig, MemoryPoolConfig, QueueConfig, ReclaimConfig};
pub use engine::{Command, Engine, ModifyOrder, OutputEvent, ShardedEngine};
pub use error::{EngineError, MapError, MemoryError, PopError, PriceError, PushError};
pub use hashmap::LockFreeHashMap;
pub use matching::MatchingEngine;
pub use memory::{MemoryManager, MemoryPool};
pub use order::{
    BookUpdate, MatchResult, Order, OrderStatus, OrderType, RejectReason, Side, Symbol, Trade,
};
pub use order_book::{BookSnapshot, LevelSummary, OrderBook};
pub use pool::{ObjectPool, Poolable};
pub use price::PriceScale;
pub use price_level::PriceLevel;
pub use queue::QueueMetrics;
pub use stats::PerformanceStats;
