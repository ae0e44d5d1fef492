//! Scheduling trace and statistics surfaces.

use lockstep_types::{ProcessorId, ThreadId, ThreadPriority};

/// What happened at one point of the scheduling trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerEvent {
    /// A thread was bound to a processor.
    Scheduled { priority: ThreadPriority },
    /// A running thread was moved back to the ready queue.
    Preempted {
        /// Cumulative run time of the thread at preemption.
        run_time: u64,
    },
}

/// Discriminant of [`SchedulerEvent`], for filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerEventKind {
    Scheduled,
    Preempted,
}

/// One entry of the append-only scheduling trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEntry {
    pub timestamp: u64,
    pub processor: ProcessorId,
    pub thread: ThreadId,
    pub event: SchedulerEvent,
}

impl TraceEntry {
    pub fn kind(&self) -> SchedulerEventKind {
        match self.event {
            SchedulerEvent::Scheduled { .. } => SchedulerEventKind::Scheduled,
            SchedulerEvent::Preempted { .. } => SchedulerEventKind::Preempted,
        }
    }
}

/// Filter for trace queries. Unset fields match everything; unknown ids
/// simply match nothing.
#[derive(Debug, Clone, Default)]
pub struct TraceFilter {
    pub thread: Option<ThreadId>,
    pub processor: Option<ProcessorId>,
    pub event: Option<SchedulerEventKind>,
    pub start_time: Option<u64>,
    pub end_time: Option<u64>,
}

impl TraceFilter {
    pub fn matches(&self, entry: &TraceEntry) -> bool {
        if let Some(thread) = self.thread {
            if entry.thread != thread {
                return false;
            }
        }
        if let Some(processor) = self.processor {
            if entry.processor != processor {
                return false;
            }
        }
        if let Some(event) = self.event {
            if entry.kind() != event {
                return false;
            }
        }
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
        true
    }
}

/// Aggregate scheduler counters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchedulerStatistics {
    pub policy: &'static str,
    pub time_slice: u32,
    pub num_processors: usize,
    pub schedule_calls: u64,
    pub context_switches: u64,
    pub preemptions: u64,
    pub avg_wait_time: f64,
    pub avg_run_time: f64,
}

/// Per-thread counters. All zero/empty for thread ids the scheduler has
/// never seen; lookups never fail.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThreadStatistics {
    pub thread: Option<ThreadId>,
    pub run_time: u64,
    pub wait_time: u64,
    pub processor: Option<ProcessorId>,
    pub time_slice_remaining: u32,
}
