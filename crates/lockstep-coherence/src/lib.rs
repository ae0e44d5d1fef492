//! MESI cache coherence for the lockstep multiprocessor emulator.
//!
//! This crate models the memory half of the execution-coordination core: per-
//! processor caches with MESI line states, a single-ported memory bus that
//! serializes requests FIFO and runs the cross-cache protocol logic, and the
//! [`CoherentMemorySystem`] facade that exposes plain `read`/`write` entry
//! points to the simulation driver.
//!
//! Everything is stepped synchronously by an external tick loop; nothing here
//! blocks, spawns, or touches the host clock. See `MemoryBus::tick` for the
//! latency model and `CoherentMemorySystem` for the miss-handling paths.

#![forbid(unsafe_code)]

mod analysis;
mod bus;
mod cache;
mod error;
mod memory;
mod system;

pub use analysis::{
    AccessFilter, AccessKind, AccessOutcome, AccessPatternAnalysis, AccessRecord,
};
pub use bus::{
    BusOperation, BusRequest, BusResponse, BusStatistics, InvalidateResult, MemoryBus, ReadResult,
    TransactionEntry, TransactionFilter, TransactionPhase, WriteBackResult,
};
pub use cache::{
    CacheConfig, CacheLine, CacheStatistics, EvictedLine, MesiCache, MesiState, SnoopRead,
    SnoopReadExclusive, WriteOutcome,
};
pub use error::{CoherenceError, Result};
pub use memory::MainMemory;
pub use system::{CoherentMemorySystem, MemoryConfig};

/// Cache coherence protocols the bus knows by name. Only MESI is
/// implemented; constructing a bus with another protocol fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum CoherenceProtocol {
    #[default]
    Mesi,
    Moesi,
    Dragon,
}
