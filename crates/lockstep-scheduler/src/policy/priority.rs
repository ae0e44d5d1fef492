use lockstep_types::{ProcessorId, Thread, ThreadId};

use crate::core::SchedulerCore;
use crate::policy::Policy;

/// Priority scheduling: always runs the highest-priority ready thread.
///
/// With `preemptive` set, a ready thread with strictly higher priority than
/// the running one preempts it immediately, independent of the time slice;
/// otherwise only slice expiry preempts.
#[derive(Debug, Clone, Copy)]
pub struct Priority {
    preemptive: bool,
}

impl Priority {
    pub fn new(preemptive: bool) -> Self {
        Self { preemptive }
    }

    pub fn preemptive(&self) -> bool {
        self.preemptive
    }
}

impl Policy for Priority {
    fn name(&self) -> &'static str {
        "priority"
    }

    fn select_thread(
        &mut self,
        _core: &SchedulerCore,
        available: &[&Thread],
        _processor: ProcessorId,
        _timestamp: u64,
    ) -> Option<ThreadId> {
        // First among equals, so same-priority threads keep FIFO order.
        let mut best: Option<&Thread> = None;
        for &thread in available {
            if best.map_or(true, |b| thread.priority > b.priority) {
                best = Some(thread);
            }
        }
        best.map(|thread| thread.id)
    }

    fn should_preempt(
        &mut self,
        core: &mut SchedulerCore,
        running: &Thread,
        available: &[&Thread],
        _timestamp: u64,
    ) -> bool {
        // The slice keeps counting down even when priority preempts first.
        let expired = core.tick_default_slice(running.id);
        if self.preemptive
            && available
                .iter()
                .any(|thread| thread.priority > running.priority)
        {
            return true;
        }
        expired
    }
}
