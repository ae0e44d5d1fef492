//! Typed memory-access log and pattern analysis.
//!
//! The access log records what each `read`/`write` on the
//! [`crate::CoherentMemorySystem`] did; analysis derives hit rate and
//! spatial/temporal locality from it. Read-only: nothing here feeds back into
//! protocol state.

use lockstep_types::{ProcessorId, ThreadId};

use crate::bus::BusOperation;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    Read,
    Write,
}

/// How an access was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessOutcome {
    /// Served from the local cache, no bus traffic.
    Hit,
    /// Line fetched over the bus.
    Miss,
    /// Shared-hit write that needed an invalidation round first.
    Upgrade,
}

/// One entry of the append-only access log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessRecord {
    pub address: u64,
    pub kind: AccessKind,
    pub processor: ProcessorId,
    pub thread: ThreadId,
    pub timestamp: u64,
    pub outcome: AccessOutcome,
    /// Bus operation the access triggered, if any.
    pub bus_op: Option<BusOperation>,
    /// Value written (writes only).
    pub value: Option<u64>,
}

/// Filter for access-history queries. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct AccessFilter {
    pub address: Option<u64>,
    pub processor: Option<ProcessorId>,
    pub thread: Option<ThreadId>,
    pub kind: Option<AccessKind>,
    pub start_time: Option<u64>,
    pub end_time: Option<u64>,
}

impl AccessFilter {
    pub fn matches(&self, record: &AccessRecord) -> bool {
        if let Some(address) = self.address {
            if record.address != address {
                return false;
            }
        }
        if let Some(processor) = self.processor {
            if record.processor != processor {
                return false;
            }
        }
        if let Some(thread) = self.thread {
            if record.thread != thread {
                return false;
            }
        }
        if let Some(kind) = self.kind {
            if record.kind != kind {
                return false;
            }
        }
        if let Some(start) = self.start_time {
            if record.timestamp < start {
                return false;
            }
        }
        if let Some(end) = self.end_time {
            if record.timestamp > end {
                return false;
            }
        }
        true
    }
}

/// Derived view of a slice of the access log. All-zero when the slice is
/// empty (analysis queries never fail).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccessPatternAnalysis {
    pub total_accesses: usize,
    pub reads: usize,
    pub writes: usize,
    pub read_percentage: f64,
    pub write_percentage: f64,
    pub cache_hits: usize,
    pub cache_misses: usize,
    /// Hits as a percentage of all accesses.
    pub hit_rate: f64,
    /// Up to ten hottest addresses, most accessed first.
    pub most_common_addresses: Vec<(u64, usize)>,
    /// Percentage of consecutive access pairs landing within one line.
    pub spatial_locality_score: f64,
    /// Percentage of accesses reusing an address within a short window.
    pub temporal_locality_score: f64,
    pub average_reuse_distance: f64,
    pub unique_addresses: usize,
}

/// Reuse distances below this count as temporally local.
const TEMPORAL_WINDOW: usize = 10;

pub(crate) fn analyze(records: &[AccessRecord], line_words: usize) -> AccessPatternAnalysis {
    if records.is_empty() {
        return AccessPatternAnalysis::default();
    }

    let total = records.len();
    let reads = records
        .iter()
        .filter(|r| r.kind == AccessKind::Read)
        .count();
    let writes = total - reads;
    let hits = records
        .iter()
        .filter(|r| r.outcome == AccessOutcome::Hit)
        .count();
    let misses = records
        .iter()
        .filter(|r| r.outcome == AccessOutcome::Miss)
        .count();

    let mut counts: std::collections::HashMap<u64, usize> = std::collections::HashMap::new();
    for record in records {
        *counts.entry(record.address).or_default() += 1;
    }
    let unique_addresses = counts.len();
    let mut most_common: Vec<(u64, usize)> = counts.into_iter().collect();
    // Most accessed first; ties broken by address for determinism.
    most_common.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    most_common.truncate(10);

    let mut spatial = 0usize;
    for pair in records.windows(2) {
        if pair[0].address.abs_diff(pair[1].address) < line_words as u64 {
            spatial += 1;
        }
    }
    let spatial_locality_score = if total > 1 {
        spatial as f64 / (total - 1) as f64 * 100.0
    } else {
        0.0
    };

    let mut last_seen: std::collections::HashMap<u64, usize> = std::collections::HashMap::new();
    let mut temporal = 0usize;
    let mut distances = Vec::new();
    for (i, record) in records.iter().enumerate() {
        if let Some(&prev) = last_seen.get(&record.address) {
            let distance = i - prev;
            distances.push(distance);
            if distance < TEMPORAL_WINDOW {
                temporal += 1;
            }
        }
        last_seen.insert(record.address, i);
    }
    let temporal_locality_score = temporal as f64 / total as f64 * 100.0;
    let average_reuse_distance = if distances.is_empty() {
        0.0
    } else {
        distances.iter().sum::<usize>() as f64 / distances.len() as f64
    };

    AccessPatternAnalysis {
        total_accesses: total,
        reads,
        writes,
        read_percentage: reads as f64 / total as f64 * 100.0,
        write_percentage: writes as f64 / total as f64 * 100.0,
        cache_hits: hits,
        cache_misses: misses,
        hit_rate: hits as f64 / total as f64 * 100.0,
        most_common_addresses: most_common,
        spatial_locality_score,
        temporal_locality_score,
        average_reuse_distance,
        unique_addresses,
    }
}
