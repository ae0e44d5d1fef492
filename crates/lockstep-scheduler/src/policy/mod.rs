//! The scheduling policy family.
//!
//! Policies differ only in how they pick a thread and when they preempt; all
//! assignment bookkeeping lives in [`SchedulerCore`]. The operation set is
//! closed: seven concrete policies, each a plain struct implementing
//! [`Policy`], with [`Deterministic`] wrapping any of the others.

mod affinity;
mod deterministic;
mod feedback;
mod priority;
mod round_robin;
mod shortest_job;

pub use affinity::Affinity;
pub use deterministic::Deterministic;
pub use feedback::FeedbackQueue;
pub use priority::Priority;
pub use round_robin::RoundRobin;
pub use shortest_job::{ShortestJobFirst, ShortestRemainingTime};

use lockstep_types::{ProcessorId, Thread, ThreadId};

use crate::core::SchedulerCore;

/// A scheduling policy: the two decision points that vary between
/// algorithms, plus a dispatch hook for slice re-arming.
pub trait Policy {
    /// Short policy name for statistics.
    fn name(&self) -> &'static str;

    /// Pick the next thread to run on `processor` from the ready threads,
    /// or `None` to leave the processor idle this tick.
    fn select_thread(
        &mut self,
        core: &SchedulerCore,
        available: &[&Thread],
        processor: ProcessorId,
        timestamp: u64,
    ) -> Option<ThreadId>;

    /// Decide whether `running` gives up its processor this tick. The
    /// default rule counts one tick against the thread's time slice and
    /// preempts on expiry.
    fn should_preempt(
        &mut self,
        core: &mut SchedulerCore,
        running: &Thread,
        available: &[&Thread],
        timestamp: u64,
    ) -> bool {
        let _ = (available, timestamp);
        core.tick_default_slice(running.id)
    }

    /// Called when a thread is bound to a processor; re-arms its slice.
    fn on_dispatch(&mut self, core: &mut SchedulerCore, thread: ThreadId) {
        core.reset_slice(thread);
    }
}
