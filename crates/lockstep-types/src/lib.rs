//! Shared identifiers and the driver-owned thread/processor model.
//!
//! The simulation driver owns the thread table, the ready queue, and the
//! processor array; the scheduler and the memory system only borrow them.
//! Everything here is plain data: lifecycle transitions are applied by the
//! scheduler, never by the types themselves.

#![forbid(unsafe_code)]

use std::fmt;

/// Identifies one simulated processor core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessorId(pub u32);

impl fmt::Display for ProcessorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cpu{}", self.0)
    }
}

/// Identifies one simulated thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(pub u64);

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// Thread priority. Ordered: `Low < Normal < High < Critical`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ThreadPriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

/// Thread lifecycle state.
///
/// Only a `Running` thread may be preempted (back to `Ready`) or complete
/// (`Terminated`). `Waiting` is entered by the driver when a thread blocks on
/// something outside the scheduler (a synchronization primitive, I/O, ...).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ThreadState {
    #[default]
    Ready,
    Running,
    Waiting,
    Terminated,
}

/// One simulated thread, as the scheduler sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thread {
    pub id: ThreadId,
    pub priority: ThreadPriority,
    pub state: ThreadState,
    /// Processor currently executing this thread, if any. Maintained by the
    /// scheduler; at most one thread maps to a processor and vice versa.
    pub processor: Option<ProcessorId>,
}

impl Thread {
    pub fn new(id: ThreadId, priority: ThreadPriority) -> Self {
        Self {
            id,
            priority,
            state: ThreadState::Ready,
            processor: None,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state == ThreadState::Ready
    }
}

/// Processor occupancy state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ProcessorState {
    #[default]
    Idle,
    Running,
}

/// One simulated processor core, as the scheduler sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Processor {
    pub id: ProcessorId,
    pub state: ProcessorState,
    pub current_thread: Option<ThreadId>,
}

impl Processor {
    pub fn new(id: ProcessorId) -> Self {
        Self {
            id,
            state: ProcessorState::Idle,
            current_thread: None,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.state != ProcessorState::Idle
    }

    /// Bind a thread to this processor.
    pub fn assign(&mut self, thread: ThreadId) {
        self.state = ProcessorState::Running;
        self.current_thread = Some(thread);
    }

    /// Release whatever thread is bound to this processor.
    pub fn release(&mut self) {
        self.state = ProcessorState::Idle;
        self.current_thread = None;
    }
}
