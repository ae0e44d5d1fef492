//! Per-processor set-associative cache with MESI line states.
//!
//! A line is either resident (in `Modified`, `Exclusive`, or `Shared`) or not
//! present at all; `MesiState::Invalid` is what lookups report for absent
//! lines. Folding validity, dirtiness, and sharing into the one state enum
//! means a line cannot claim to be simultaneously clean and `Modified`.
//!
//! The cache itself never talks to the bus. Local reads/writes report what
//! bus traffic they need (`WriteOutcome`), and the bus drives the snoop
//! handlers when other processors' requests resolve.

use lockstep_types::ProcessorId;

use crate::error::{CoherenceError, Result};

/// MESI coherence states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MesiState {
    Modified,
    Exclusive,
    Shared,
    Invalid,
}

/// Geometry of one per-processor cache. All quantities are in words.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    /// Total capacity in words.
    pub size_words: usize,
    /// Words per cache line.
    pub line_words: usize,
    /// Ways of associativity.
    pub ways: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            size_words: 1024,
            line_words: 8,
            ways: 4,
        }
    }
}

impl CacheConfig {
    /// Number of sets implied by the geometry, or an error if the capacity
    /// does not divide evenly.
    pub fn num_sets(&self) -> Result<usize> {
        let invalid = || CoherenceError::InvalidCacheGeometry {
            size_words: self.size_words,
            line_words: self.line_words,
            ways: self.ways,
        };
        if self.line_words == 0 || self.ways == 0 || self.size_words == 0 {
            return Err(invalid());
        }
        let per_set = self.line_words * self.ways;
        if self.size_words % per_set != 0 {
            return Err(invalid());
        }
        Ok(self.size_words / per_set)
    }
}

/// One resident cache line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheLine {
    /// Line-aligned word address of the first word.
    pub base: u64,
    pub data: Box<[u64]>,
    pub state: MesiState,
    /// LRU stamp; larger is more recent.
    last_access: u64,
}

/// What a local write needs from the bus before (or after) it commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Committed locally; no bus traffic required.
    Done,
    /// Shared hit: other copies must be invalidated before the write commits
    /// (call [`MesiCache::commit_word`] after the invalidation round).
    NeedsInvalidate,
    /// Miss: the line must be fetched with read-exclusive semantics first.
    MissNeedsExclusive,
}

/// Response to another processor's read of `address`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnoopRead {
    /// Line not resident here.
    Miss,
    /// Line forwarded; this cache is now (or still) a sharer. `writeback` is
    /// set when the line was `Modified`, in which case the bus must also
    /// write `data` to main memory as part of the same resolution.
    Hit { data: Vec<u64>, writeback: bool },
}

/// Response to another processor's read-exclusive of `address`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnoopReadExclusive {
    /// Line not resident here.
    Miss,
    /// The local copy was relinquished. `dirty` carries the line data iff it
    /// was `Modified` (dirty value wins over main memory).
    Invalidated { dirty: Option<Vec<u64>> },
}

/// A line displaced by an allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictedLine {
    pub base: u64,
    pub data: Vec<u64>,
    /// The victim was `Modified`; the caller must write it back.
    pub modified: bool,
}

/// Point-in-time counters for one cache.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheStatistics {
    pub processor: Option<ProcessorId>,
    pub size_words: usize,
    pub line_words: usize,
    pub ways: usize,
    pub num_sets: usize,
    pub reads: u64,
    pub writes: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub state_transitions: u64,
    pub bus_transactions: u64,
    pub invalidations_sent: u64,
    pub invalidations_received: u64,
    /// Percentage of accesses that hit.
    pub hit_rate: f64,
}

/// One processor's private cache.
#[derive(Debug, Clone)]
pub struct MesiCache {
    id: ProcessorId,
    config: CacheConfig,
    num_sets: usize,
    /// `sets[set][way]`; `None` is an invalid (absent) line.
    sets: Vec<Vec<Option<CacheLine>>>,
    access_clock: u64,
    reads: u64,
    writes: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
    state_transitions: u64,
    bus_transactions: u64,
    invalidations_sent: u64,
    invalidations_received: u64,
}

impl MesiCache {
    pub fn new(id: ProcessorId, config: CacheConfig) -> Result<Self> {
        let num_sets = config.num_sets()?;
        Ok(Self {
            id,
            config,
            num_sets,
            sets: vec![vec![None; config.ways]; num_sets],
            access_clock: 0,
            reads: 0,
            writes: 0,
            hits: 0,
            misses: 0,
            evictions: 0,
            state_transitions: 0,
            bus_transactions: 0,
            invalidations_sent: 0,
            invalidations_received: 0,
        })
    }

    pub fn processor_id(&self) -> ProcessorId {
        self.id
    }

    pub fn line_words(&self) -> usize {
        self.config.line_words
    }

    /// Line-align a word address.
    pub fn align(&self, address: u64) -> u64 {
        address - address % self.config.line_words as u64
    }

    fn set_index(&self, aligned: u64) -> usize {
        ((aligned / self.config.line_words as u64) % self.num_sets as u64) as usize
    }

    fn offset(&self, address: u64) -> usize {
        (address % self.config.line_words as u64) as usize
    }

    fn find(&self, address: u64) -> Option<(usize, usize)> {
        let aligned = self.align(address);
        let set = self.set_index(aligned);
        self.sets[set]
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|line| line.base == aligned))
            .map(|way| (set, way))
    }

    /// MESI state of the line covering `address` (`Invalid` when absent).
    pub fn state_of(&self, address: u64) -> MesiState {
        match self.find(address) {
            Some((set, way)) => self.sets[set][way]
                .as_ref()
                .map(|line| line.state)
                .unwrap_or(MesiState::Invalid),
            None => MesiState::Invalid,
        }
    }

    fn touch(&mut self, set: usize, way: usize) {
        self.access_clock += 1;
        if let Some(line) = self.sets[set][way].as_mut() {
            line.last_access = self.access_clock;
        }
    }

    fn set_state(&mut self, set: usize, way: usize, state: MesiState) {
        if let Some(line) = self.sets[set][way].as_mut() {
            if line.state != state {
                line.state = state;
                self.state_transitions += 1;
            }
        }
    }

    fn drop_line(&mut self, set: usize, way: usize) {
        if self.sets[set][way].take().is_some() {
            self.state_transitions += 1;
            self.invalidations_received += 1;
        }
    }

    /// Local read. `None` is a miss; the caller fetches the line with a
    /// `ReadShared` bus request and then allocates it here.
    pub fn read(&mut self, address: u64) -> Option<u64> {
        self.reads += 1;
        match self.find(address) {
            Some((set, way)) => {
                self.hits += 1;
                self.touch(set, way);
                let offset = self.offset(address);
                self.sets[set][way].as_ref().map(|line| line.data[offset])
            }
            None => {
                self.misses += 1;
                self.bus_transactions += 1;
                None
            }
        }
    }

    /// Local write. Commits immediately on a `Modified`/`Exclusive` hit;
    /// reports the bus traffic required otherwise (see [`WriteOutcome`]).
    pub fn write(&mut self, address: u64, value: u64) -> WriteOutcome {
        self.writes += 1;
        match self.find(address) {
            Some((set, way)) => {
                self.hits += 1;
                self.touch(set, way);
                let offset = self.offset(address);
                let state = self.sets[set][way]
                    .as_ref()
                    .map(|line| line.state)
                    .unwrap_or(MesiState::Invalid);
                match state {
                    MesiState::Modified => {
                        if let Some(line) = self.sets[set][way].as_mut() {
                            line.data[offset] = value;
                        }
                        WriteOutcome::Done
                    }
                    MesiState::Exclusive => {
                        if let Some(line) = self.sets[set][way].as_mut() {
                            line.data[offset] = value;
                        }
                        self.set_state(set, way, MesiState::Modified);
                        WriteOutcome::Done
                    }
                    MesiState::Shared => {
                        // Other copies exist: the invalidation round runs
                        // first, then the caller commits via `commit_word`.
                        self.bus_transactions += 1;
                        self.invalidations_sent += 1;
                        WriteOutcome::NeedsInvalidate
                    }
                    MesiState::Invalid => WriteOutcome::MissNeedsExclusive,
                }
            }
            None => {
                self.misses += 1;
                self.bus_transactions += 1;
                WriteOutcome::MissNeedsExclusive
            }
        }
    }

    /// Commit a word into a resident line and mark it `Modified`. Used after
    /// the bus traffic a [`WriteOutcome`] asked for has completed.
    pub fn commit_word(&mut self, address: u64, value: u64) -> Result<()> {
        let (set, way) = self
            .find(address)
            .ok_or(CoherenceError::LineNotResident { address })?;
        let offset = self.offset(address);
        if let Some(line) = self.sets[set][way].as_mut() {
            line.data[offset] = value;
        }
        self.set_state(set, way, MesiState::Modified);
        Ok(())
    }

    /// Install a line fetched over the bus. Updates in place if the line is
    /// already resident; otherwise fills an invalid way or evicts the LRU
    /// victim, which the caller must write back if `modified`.
    pub fn allocate(
        &mut self,
        address: u64,
        data: Vec<u64>,
        state: MesiState,
    ) -> Result<Option<EvictedLine>> {
        if data.len() != self.config.line_words {
            return Err(CoherenceError::PayloadSizeMismatch {
                got: data.len(),
                line_words: self.config.line_words,
            });
        }
        let aligned = self.align(address);

        if let Some((set, way)) = self.find(aligned) {
            if let Some(line) = self.sets[set][way].as_mut() {
                line.data = data.into_boxed_slice();
            }
            self.set_state(set, way, state);
            self.touch(set, way);
            return Ok(None);
        }

        let set = self.set_index(aligned);
        let way = self.victim_way(set);
        let evicted = self.sets[set][way].take().map(|line| {
            self.evictions += 1;
            EvictedLine {
                base: line.base,
                data: line.data.into_vec(),
                modified: line.state == MesiState::Modified,
            }
        });

        self.access_clock += 1;
        self.sets[set][way] = Some(CacheLine {
            base: aligned,
            data: data.into_boxed_slice(),
            state,
            last_access: self.access_clock,
        });
        self.state_transitions += 1;
        Ok(evicted)
    }

    fn victim_way(&self, set: usize) -> usize {
        // Prefer an invalid way; otherwise evict the least recently used.
        if let Some(way) = self.sets[set].iter().position(|slot| slot.is_none()) {
            return way;
        }
        self.sets[set]
            .iter()
            .enumerate()
            .min_by_key(|(_, slot)| slot.as_ref().map(|line| line.last_access))
            .map(|(way, _)| way)
            .unwrap_or(0)
    }

    /// Another processor is reading this address. A `Modified` or `Exclusive`
    /// copy downgrades to `Shared`; a `Modified` copy additionally asks the
    /// bus to write the forwarded data back to memory.
    pub fn snoop_read(&mut self, address: u64) -> SnoopRead {
        let Some((set, way)) = self.find(address) else {
            return SnoopRead::Miss;
        };
        let Some(line) = self.sets[set][way].as_ref() else {
            return SnoopRead::Miss;
        };
        let data = line.data.to_vec();
        let writeback = line.state == MesiState::Modified;
        self.set_state(set, way, MesiState::Shared);
        SnoopRead::Hit { data, writeback }
    }

    /// Another processor is reading this address for exclusive ownership.
    /// Any local copy is relinquished; a `Modified` copy forwards its data.
    pub fn snoop_read_exclusive(&mut self, address: u64) -> SnoopReadExclusive {
        let Some((set, way)) = self.find(address) else {
            return SnoopReadExclusive::Miss;
        };
        let dirty = self.sets[set][way]
            .as_ref()
            .filter(|line| line.state == MesiState::Modified)
            .map(|line| line.data.to_vec());
        self.drop_line(set, way);
        SnoopReadExclusive::Invalidated { dirty }
    }

    /// Another processor is invalidating this address. Forces any resident
    /// copy out, regardless of state. Returns whether a line was dropped.
    pub fn snoop_invalidate(&mut self, address: u64) -> bool {
        match self.find(address) {
            Some((set, way)) => {
                self.drop_line(set, way);
                true
            }
            None => false,
        }
    }

    /// Collect all `Modified` lines for write-back, downgrading each to
    /// `Exclusive` (clean, still the sole owner).
    pub fn flush_dirty(&mut self) -> Vec<(u64, Vec<u64>)> {
        let mut dirty = Vec::new();
        for set in 0..self.num_sets {
            for way in 0..self.config.ways {
                let is_modified = self.sets[set][way]
                    .as_ref()
                    .is_some_and(|line| line.state == MesiState::Modified);
                if is_modified {
                    if let Some(line) = self.sets[set][way].as_ref() {
                        dirty.push((line.base, line.data.to_vec()));
                    }
                    self.set_state(set, way, MesiState::Exclusive);
                }
            }
        }
        dirty
    }

    pub fn statistics(&self) -> CacheStatistics {
        let accesses = self.reads + self.writes;
        let hit_rate = if accesses == 0 {
            0.0
        } else {
            self.hits as f64 / accesses as f64 * 100.0
        };
        CacheStatistics {
            processor: Some(self.id),
            size_words: self.config.size_words,
            line_words: self.config.line_words,
            ways: self.config.ways,
            num_sets: self.num_sets,
            reads: self.reads,
            writes: self.writes,
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
            state_transitions: self.state_transitions,
            bus_transactions: self.bus_transactions,
            invalidations_sent: self.invalidations_sent,
            invalidations_received: self.invalidations_received,
            hit_rate,
        }
    }
}
