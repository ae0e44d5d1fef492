//! Thread schedulers for the lockstep multiprocessor emulator.
//!
//! An external driver owns the thread table, ready queue, and processor
//! array, and calls [`Scheduler::schedule`] once per tick. The scheduler
//! binds ready threads to idle processors, preempts running threads per the
//! active policy, and keeps the shared bookkeeping (run/wait time, time
//! slices, the scheduling trace) in [`SchedulerCore`].
//!
//! Policies implement [`Policy`]; [`Deterministic`] wraps any of them to
//! record and replay scheduling decisions bit-for-bit.

#![forbid(unsafe_code)]

mod core;
mod error;
mod policy;
mod trace;

pub use crate::core::{Scheduler, SchedulerCore};
pub use error::{Result, SchedulerError};
pub use policy::{
    Affinity, Deterministic, FeedbackQueue, Policy, Priority, RoundRobin, ShortestJobFirst,
    ShortestRemainingTime,
};
pub use trace::{
    SchedulerEvent, SchedulerEventKind, SchedulerStatistics, ThreadStatistics, TraceEntry,
    TraceFilter,
};

/// Round-robin scheduler.
pub type RoundRobinScheduler = Scheduler<RoundRobin>;
/// Priority scheduler.
pub type PriorityScheduler = Scheduler<Priority>;
/// Shortest-job-first scheduler.
pub type ShortestJobFirstScheduler = Scheduler<ShortestJobFirst>;
/// Shortest-remaining-time scheduler.
pub type ShortestRemainingTimeScheduler = Scheduler<ShortestRemainingTime>;
/// Multilevel-feedback-queue scheduler.
pub type FeedbackQueueScheduler = Scheduler<FeedbackQueue>;
/// Processor-affinity scheduler.
pub type AffinityScheduler = Scheduler<Affinity>;
/// Deterministic-replay scheduler over a base policy.
pub type DeterministicScheduler<P> = Scheduler<Deterministic<P>>;
