use lockstep_types::{ProcessorId, Thread, ThreadId};

use crate::core::SchedulerCore;
use crate::policy::Policy;

/// Round-robin: always runs the head of the ready queue; preemption is
/// purely time-slice based. Preempted threads rejoin at the back, so N
/// threads on one processor each run within N slices.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoundRobin;

impl RoundRobin {
    pub fn new() -> Self {
        Self
    }
}

impl Policy for RoundRobin {
    fn name(&self) -> &'static str {
        "round-robin"
    }

    fn select_thread(
        &mut self,
        _core: &SchedulerCore,
        available: &[&Thread],
        _processor: ProcessorId,
        _timestamp: u64,
    ) -> Option<ThreadId> {
        available.first().map(|thread| thread.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockstep_types::ThreadPriority;

    #[test]
    fn picks_head_of_queue() {
        let core = SchedulerCore::new(1, 4);
        let mut policy = RoundRobin::new();
        let t1 = Thread::new(ThreadId(1), ThreadPriority::Normal);
        let t2 = Thread::new(ThreadId(2), ThreadPriority::High);

        // Head wins even when a higher-priority thread waits behind it.
        let picked = policy.select_thread(&core, &[&t1, &t2], ProcessorId(0), 0);
        assert_eq!(picked, Some(ThreadId(1)));
    }

    #[test]
    fn empty_queue_selects_nothing() {
        let core = SchedulerCore::new(1, 4);
        let mut policy = RoundRobin::new();
        assert_eq!(policy.select_thread(&core, &[], ProcessorId(0), 0), None);
    }

    #[test]
    fn time_slice_countdown() {
        let mut core = SchedulerCore::new(1, 3);
        let mut policy = RoundRobin::new();
        let mut running = Thread::new(ThreadId(1), ThreadPriority::Normal);
        running.state = lockstep_types::ThreadState::Running;

        assert!(!policy.should_preempt(&mut core, &running, &[], 0));
        assert!(!policy.should_preempt(&mut core, &running, &[], 1));
        assert!(policy.should_preempt(&mut core, &running, &[], 2));
        // Slice re-armed after expiry.
        assert!(!policy.should_preempt(&mut core, &running, &[], 3));
    }
}
