//! The shared memory bus: single-ported arbitration plus the cross-cache
//! half of the MESI protocol.
//!
//! The bus serializes requests strictly FIFO and carries at most one in
//! flight. Two entry points resolve a request's protocol result:
//!
//! - [`MemoryBus::execute`] resolves synchronously, for callers (the
//!   [`crate::CoherentMemorySystem`] miss paths) that need the answer in the
//!   same logical step;
//! - [`MemoryBus::request`] + [`MemoryBus::tick`] model bus latency: `tick`
//!   dequeues the head, computes its result exactly once, counts the latency
//!   down, and hands the completed request back to the driver.
//!
//! Either way a request's result is memoized in the request itself and never
//! recomputed, so snoops run once per request.

use std::collections::{BTreeMap, VecDeque};

use lockstep_types::{ProcessorId, ThreadId};

use crate::cache::{MesiCache, MesiState, SnoopRead, SnoopReadExclusive};
use crate::error::{CoherenceError, Result};
use crate::memory::MainMemory;
use crate::CoherenceProtocol;

/// The closed set of bus operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BusOperation {
    /// Coherence-neutral line fetch from main memory; no snooping, no
    /// ownership claim. Intended for driver-side inspection.
    Read,
    /// Read with intent to share.
    ReadShared,
    /// Read with intent to modify; every other copy is relinquished.
    ReadExclusive,
    /// Write a modified line back to main memory.
    WriteBack,
    /// Force every other cache's copy of the line to `Invalid`.
    Invalidate,
    /// Shared-to-exclusive promotion: the invalidation round of a local
    /// upgrade, without a data transfer.
    Upgrade,
}

/// Result of a read-class operation: the line plus the MESI state the
/// requester should fill with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadResult {
    pub data: Vec<u64>,
    pub state: MesiState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteBackResult {
    pub success: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidateResult {
    pub success: bool,
    /// Whether any cache actually held (and dropped) the line.
    pub invalidated: bool,
}

/// Per-operation protocol result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusResponse {
    Read(ReadResult),
    WriteBack(WriteBackResult),
    Invalidate(InvalidateResult),
}

/// One request travelling over the bus.
///
/// Created on a cache miss or an explicit flush; consumed by the issuing
/// cache/system once completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusRequest {
    pub operation: BusOperation,
    /// Word address; the bus aligns it to the requester's line size.
    pub address: u64,
    pub processor: ProcessorId,
    pub thread: ThreadId,
    /// Line payload, present only for `WriteBack`.
    pub data: Option<Vec<u64>>,
    /// Stamped by the bus when the request starts resolving.
    pub timestamp: u64,
    pub completed: bool,
    pub result: Option<BusResponse>,
}

impl BusRequest {
    /// Build a payload-free request. `WriteBack` is rejected here: its
    /// payload is mandatory, so it has its own constructor.
    pub fn new(
        operation: BusOperation,
        address: u64,
        processor: ProcessorId,
        thread: ThreadId,
    ) -> Result<Self> {
        if operation == BusOperation::WriteBack {
            return Err(CoherenceError::MissingWriteBackPayload);
        }
        Ok(Self {
            operation,
            address,
            processor,
            thread,
            data: None,
            timestamp: 0,
            completed: false,
            result: None,
        })
    }

    /// Build a write-back request carrying one full line.
    pub fn write_back(
        address: u64,
        processor: ProcessorId,
        thread: ThreadId,
        data: Vec<u64>,
    ) -> Self {
        Self {
            operation: BusOperation::WriteBack,
            address,
            processor,
            thread,
            data: Some(data),
            timestamp: 0,
            completed: false,
            result: None,
        }
    }
}

/// Whether a log entry marks a request starting or completing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionPhase {
    Started,
    Completed,
}

/// One append-only transaction log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionEntry {
    pub timestamp: u64,
    pub operation: BusOperation,
    pub address: u64,
    pub processor: ProcessorId,
    pub thread: ThreadId,
    pub phase: TransactionPhase,
}

/// Filter for [`MemoryBus::transaction_log`]. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct TransactionFilter {
    pub start_time: Option<u64>,
    pub end_time: Option<u64>,
    pub processor: Option<ProcessorId>,
    pub operations: Option<Vec<BusOperation>>,
}

impl TransactionFilter {
    fn matches(&self, entry: &TransactionEntry) -> bool {
        if let Some(start) = self.start_time {
            if entry.timestamp < start {
                return false;
            }
        }
        if let Some(end) = self.end_time {
            if entry.timestamp > end {
                return false;
            }
        }
        if let Some(processor) = self.processor {
            if entry.processor != processor {
                return false;
            }
        }
        if let Some(ops) = &self.operations {
            if !ops.contains(&entry.operation) {
                return false;
            }
        }
        true
    }
}

/// Point-in-time bus counters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BusStatistics {
    pub protocol: CoherenceProtocol,
    pub latency: u32,
    pub connected_caches: usize,
    pub total_requests: u64,
    pub read_requests: u64,
    pub write_requests: u64,
    pub invalidation_requests: u64,
    pub bus_cycles_busy: u64,
    pub ticks_observed: u64,
    pub max_queue_length: usize,
    /// `bus_cycles_busy / ticks_observed`, in `[0, 1]`.
    pub bus_utilization: f64,
}

struct InFlight {
    request: BusRequest,
    cycles_remaining: u32,
}

/// The shared memory bus. Owns the connected caches; borrows main memory per
/// call from whoever owns it.
pub struct MemoryBus {
    protocol: CoherenceProtocol,
    latency: u32,
    caches: BTreeMap<ProcessorId, MesiCache>,
    queue: VecDeque<BusRequest>,
    current: Option<InFlight>,
    log: Vec<TransactionEntry>,
    total_requests: u64,
    read_requests: u64,
    write_requests: u64,
    invalidation_requests: u64,
    bus_cycles_busy: u64,
    ticks_observed: u64,
    max_queue_length: usize,
}

impl MemoryBus {
    /// Only `CoherenceProtocol::Mesi` is implemented; the other protocol
    /// names are rejected here rather than silently degrading.
    pub fn new(protocol: CoherenceProtocol, latency: u32) -> Result<Self> {
        if protocol != CoherenceProtocol::Mesi {
            return Err(CoherenceError::ProtocolUnsupported(protocol));
        }
        Ok(Self {
            protocol,
            latency,
            caches: BTreeMap::new(),
            queue: VecDeque::new(),
            current: None,
            log: Vec::new(),
            total_requests: 0,
            read_requests: 0,
            write_requests: 0,
            invalidation_requests: 0,
            bus_cycles_busy: 0,
            ticks_observed: 0,
            max_queue_length: 0,
        })
    }

    pub fn latency(&self) -> u32 {
        self.latency
    }

    /// Register a cache. No effect on in-flight requests.
    pub fn connect_cache(&mut self, cache: MesiCache) {
        self.caches.insert(cache.processor_id(), cache);
    }

    /// Unregister and return a cache. No effect on in-flight requests.
    pub fn disconnect_cache(&mut self, processor: ProcessorId) -> Option<MesiCache> {
        self.caches.remove(&processor)
    }

    pub fn cache(&self, processor: ProcessorId) -> Option<&MesiCache> {
        self.caches.get(&processor)
    }

    pub fn cache_mut(&mut self, processor: ProcessorId) -> Option<&mut MesiCache> {
        self.caches.get_mut(&processor)
    }

    pub fn connected_caches(&self) -> usize {
        self.caches.len()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Whether a request is currently in flight.
    pub fn is_busy(&self) -> bool {
        self.current.is_some()
    }

    fn note_request(&mut self, operation: BusOperation) {
        self.total_requests += 1;
        match operation {
            BusOperation::Read | BusOperation::ReadShared | BusOperation::ReadExclusive => {
                self.read_requests += 1;
            }
            BusOperation::WriteBack => self.write_requests += 1,
            BusOperation::Invalidate | BusOperation::Upgrade => {
                self.invalidation_requests += 1;
            }
        }
    }

    /// Enqueue a request for latency-modelled resolution via [`tick`].
    /// Never blocks.
    ///
    /// [`tick`]: MemoryBus::tick
    pub fn request(&mut self, request: BusRequest) {
        self.note_request(request.operation);
        self.queue.push_back(request);
        self.max_queue_length = self.max_queue_length.max(self.queue.len());
    }

    /// Advance the bus by one cycle. Completes at most one request per tick
    /// (exactly one per tick while draining a backlog at zero latency).
    pub fn tick(&mut self, timestamp: u64, memory: &mut MainMemory) -> Result<Vec<BusRequest>> {
        self.ticks_observed += 1;
        let mut completed = Vec::new();

        if let Some(inflight) = self.current.as_mut() {
            inflight.cycles_remaining -= 1;
            self.bus_cycles_busy += 1;
            if inflight.cycles_remaining == 0 {
                let mut request = match self.current.take() {
                    Some(inflight) => inflight.request,
                    None => unreachable!("in-flight request checked above"),
                };
                request.completed = true;
                if request.result.is_none() {
                    self.resolve(&mut request, memory)?;
                }
                self.log_transaction(timestamp, &request, TransactionPhase::Completed);
                completed.push(request);
            }
        }

        if self.current.is_none() {
            if let Some(mut request) = self.queue.pop_front() {
                request.timestamp = timestamp;
                self.resolve(&mut request, memory)?;
                self.log_transaction(timestamp, &request, TransactionPhase::Started);
                if self.latency == 0 {
                    request.completed = true;
                    self.log_transaction(timestamp, &request, TransactionPhase::Completed);
                    completed.push(request);
                } else {
                    self.current = Some(InFlight {
                        request,
                        cycles_remaining: self.latency,
                    });
                }
            }
        }

        Ok(completed)
    }

    /// Resolve a request synchronously: snoops, memory traffic, statistics,
    /// and one `Completed` log entry, all in this call. Used by the memory
    /// system's miss/upgrade/eviction paths, where the issuing processor
    /// stalls until the answer is known.
    pub fn execute(
        &mut self,
        request: &mut BusRequest,
        timestamp: u64,
        memory: &mut MainMemory,
    ) -> Result<BusResponse> {
        self.note_request(request.operation);
        request.timestamp = timestamp;
        self.resolve(request, memory)?;
        request.completed = true;
        self.log_transaction(timestamp, request, TransactionPhase::Completed);
        match &request.result {
            Some(response) => Ok(response.clone()),
            None => unreachable!("resolve always sets a result"),
        }
    }

    /// Compute a request's protocol result. Runs at most once per request;
    /// the result is memoized in `request.result`.
    fn resolve(&mut self, request: &mut BusRequest, memory: &mut MainMemory) -> Result<()> {
        let line_words = self
            .caches
            .get(&request.processor)
            .ok_or(CoherenceError::UnknownProcessor(request.processor))?
            .line_words();
        let aligned = request.address - request.address % line_words as u64;
        // Range-check before any snoop runs, so a failing request mutates
        // nothing.
        memory.check_line(aligned, line_words)?;

        let response = match request.operation {
            BusOperation::Read => BusResponse::Read(ReadResult {
                data: memory.read_line(aligned, line_words)?,
                state: MesiState::Shared,
            }),

            BusOperation::ReadShared => {
                let mut forwarded = None;
                for (&id, cache) in self.caches.iter_mut() {
                    if id == request.processor {
                        continue;
                    }
                    if let SnoopRead::Hit { data, writeback } = cache.snoop_read(aligned) {
                        if writeback {
                            // The remote copy was Modified: it downgrades to
                            // Shared and memory is brought up to date in the
                            // same resolution.
                            memory.write_line(aligned, &data)?;
                        }
                        forwarded = Some(data);
                        break;
                    }
                }
                match forwarded {
                    Some(data) => {
                        tracing::debug!(address = aligned, processor = %request.processor, "read-shared forwarded from peer cache");
                        BusResponse::Read(ReadResult {
                            data,
                            state: MesiState::Shared,
                        })
                    }
                    None => BusResponse::Read(ReadResult {
                        data: memory.read_line(aligned, line_words)?,
                        state: MesiState::Exclusive,
                    }),
                }
            }

            BusOperation::ReadExclusive => {
                let mut dirty = None;
                for (&id, cache) in self.caches.iter_mut() {
                    if id == request.processor {
                        continue;
                    }
                    if let SnoopReadExclusive::Invalidated { dirty: d } =
                        cache.snoop_read_exclusive(aligned)
                    {
                        if d.is_some() {
                            dirty = d;
                        }
                    }
                }
                match dirty {
                    // Dirty value wins over main-memory contents.
                    Some(data) => BusResponse::Read(ReadResult {
                        data,
                        state: MesiState::Modified,
                    }),
                    None => BusResponse::Read(ReadResult {
                        data: memory.read_line(aligned, line_words)?,
                        state: MesiState::Exclusive,
                    }),
                }
            }

            BusOperation::WriteBack => {
                let data = request
                    .data
                    .as_ref()
                    .ok_or(CoherenceError::MissingWriteBackPayload)?;
                if data.len() != line_words {
                    return Err(CoherenceError::PayloadSizeMismatch {
                        got: data.len(),
                        line_words,
                    });
                }
                memory.write_line(aligned, data)?;
                BusResponse::WriteBack(WriteBackResult { success: true })
            }

            BusOperation::Invalidate | BusOperation::Upgrade => {
                let mut invalidated = false;
                for (&id, cache) in self.caches.iter_mut() {
                    if id == request.processor {
                        continue;
                    }
                    invalidated |= cache.snoop_invalidate(aligned);
                }
                BusResponse::Invalidate(InvalidateResult {
                    success: true,
                    invalidated,
                })
            }
        };

        tracing::trace!(op = ?request.operation, address = aligned, processor = %request.processor, "bus request resolved");
        request.result = Some(response);
        Ok(())
    }

    fn log_transaction(&mut self, timestamp: u64, request: &BusRequest, phase: TransactionPhase) {
        self.log.push(TransactionEntry {
            timestamp,
            operation: request.operation,
            address: request.address,
            processor: request.processor,
            thread: request.thread,
            phase,
        });
    }

    /// Write every cache's dirty lines back to main memory. Used at shutdown
    /// or explicit barrier points.
    pub fn flush_all_caches(&mut self, memory: &mut MainMemory) -> Result<()> {
        let mut dirty_lines = Vec::new();
        for cache in self.caches.values_mut() {
            dirty_lines.extend(cache.flush_dirty());
        }
        for (base, data) in dirty_lines {
            memory.write_line(base, &data)?;
        }
        Ok(())
    }

    pub fn statistics(&self) -> BusStatistics {
        let bus_utilization = if self.ticks_observed == 0 {
            0.0
        } else {
            self.bus_cycles_busy as f64 / self.ticks_observed as f64
        };
        BusStatistics {
            protocol: self.protocol,
            latency: self.latency,
            connected_caches: self.caches.len(),
            total_requests: self.total_requests,
            read_requests: self.read_requests,
            write_requests: self.write_requests,
            invalidation_requests: self.invalidation_requests,
            bus_cycles_busy: self.bus_cycles_busy,
            ticks_observed: self.ticks_observed,
            max_queue_length: self.max_queue_length,
            bus_utilization,
        }
    }

    /// Filtered view of the append-only transaction log.
    pub fn transaction_log(&self, filter: &TransactionFilter) -> Vec<TransactionEntry> {
        self.log
            .iter()
            .filter(|entry| filter.matches(entry))
            .cloned()
            .collect()
    }

    /// Per-cache statistics, keyed by processor.
    pub fn caches_statistics(&self) -> BTreeMap<ProcessorId, crate::cache::CacheStatistics> {
        self.caches
            .iter()
            .map(|(&id, cache)| (id, cache.statistics()))
            .collect()
    }

    /// Snapshot of every connected cache's MESI state for one address.
    /// Diagnostic surface; used by the invariant tests.
    pub fn line_states(&self, address: u64) -> BTreeMap<ProcessorId, MesiState> {
        self.caches
            .iter()
            .map(|(&id, cache)| (id, cache.state_of(address)))
            .collect()
    }
}
