//! Run-time-estimate driven policies: shortest job first and shortest
//! remaining time. Estimates are external hints supplied by the driver via
//! `update_estimated_run_time`; threads without an estimate sort last.

use std::collections::HashMap;

use lockstep_types::{ProcessorId, Thread, ThreadId};

use crate::core::SchedulerCore;
use crate::policy::Policy;

/// Shortest job first: runs the thread with the smallest estimated total run
/// time. Non-preemptive beyond the base time-slice rule.
#[derive(Debug, Clone, Default)]
pub struct ShortestJobFirst {
    estimates: HashMap<ThreadId, u64>,
}

impl ShortestJobFirst {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update_estimated_run_time(&mut self, thread: ThreadId, estimate: u64) {
        self.estimates.insert(thread, estimate);
    }

    pub fn estimated_run_time(&self, thread: ThreadId) -> Option<u64> {
        self.estimates.get(&thread).copied()
    }
}

impl Policy for ShortestJobFirst {
    fn name(&self) -> &'static str {
        "shortest-job-first"
    }

    fn select_thread(
        &mut self,
        _core: &SchedulerCore,
        available: &[&Thread],
        _processor: ProcessorId,
        _timestamp: u64,
    ) -> Option<ThreadId> {
        available
            .iter()
            .min_by_key(|thread| self.estimates.get(&thread.id).copied().unwrap_or(u64::MAX))
            .map(|thread| thread.id)
    }
}

/// Shortest remaining time: tracks each thread's executed ticks and preempts
/// whenever a ready thread's `estimate - executed` is strictly smaller than
/// the running thread's.
#[derive(Debug, Clone, Default)]
pub struct ShortestRemainingTime {
    estimates: HashMap<ThreadId, u64>,
    executed: HashMap<ThreadId, u64>,
}

impl ShortestRemainingTime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update_estimated_run_time(&mut self, thread: ThreadId, estimate: u64) {
        self.estimates.insert(thread, estimate);
    }

    pub fn executed_time(&self, thread: ThreadId) -> u64 {
        self.executed.get(&thread).copied().unwrap_or(0)
    }

    fn remaining(&self, thread: ThreadId) -> u64 {
        let executed = self.executed_time(thread);
        self.estimates
            .get(&thread)
            .copied()
            .unwrap_or(u64::MAX)
            .saturating_sub(executed)
    }
}

impl Policy for ShortestRemainingTime {
    fn name(&self) -> &'static str {
        "shortest-remaining-time"
    }

    fn select_thread(
        &mut self,
        _core: &SchedulerCore,
        available: &[&Thread],
        _processor: ProcessorId,
        _timestamp: u64,
    ) -> Option<ThreadId> {
        available
            .iter()
            .min_by_key(|thread| self.remaining(thread.id))
            .map(|thread| thread.id)
    }

    fn should_preempt(
        &mut self,
        core: &mut SchedulerCore,
        running: &Thread,
        available: &[&Thread],
        _timestamp: u64,
    ) -> bool {
        *self.executed.entry(running.id).or_insert(0) += 1;
        let mine = self.remaining(running.id);
        if available
            .iter()
            .any(|thread| self.remaining(thread.id) < mine)
        {
            return true;
        }
        core.tick_default_slice(running.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockstep_types::{ThreadPriority, ThreadState};

    fn thread(id: u64) -> Thread {
        Thread::new(ThreadId(id), ThreadPriority::Normal)
    }

    #[test]
    fn sjf_picks_smallest_estimate() {
        let core = SchedulerCore::new(1, 10);
        let mut policy = ShortestJobFirst::new();
        policy.update_estimated_run_time(ThreadId(1), 30);
        policy.update_estimated_run_time(ThreadId(2), 10);
        policy.update_estimated_run_time(ThreadId(3), 20);

        let (t1, t2, t3) = (thread(1), thread(2), thread(3));
        let picked = policy.select_thread(&core, &[&t1, &t2, &t3], ProcessorId(0), 0);
        assert_eq!(picked, Some(ThreadId(2)));

        let picked = policy.select_thread(&core, &[&t1, &t3], ProcessorId(0), 1);
        assert_eq!(picked, Some(ThreadId(3)));
    }

    #[test]
    fn sjf_unestimated_threads_sort_last() {
        let core = SchedulerCore::new(1, 10);
        let mut policy = ShortestJobFirst::new();
        policy.update_estimated_run_time(ThreadId(2), 1000);

        let (t1, t2) = (thread(1), thread(2));
        let picked = policy.select_thread(&core, &[&t1, &t2], ProcessorId(0), 0);
        assert_eq!(picked, Some(ThreadId(2)));
    }

    #[test]
    fn srt_preempts_when_shorter_work_arrives() {
        let mut core = SchedulerCore::new(1, 100);
        let mut policy = ShortestRemainingTime::new();
        policy.update_estimated_run_time(ThreadId(1), 50);
        policy.update_estimated_run_time(ThreadId(2), 10);

        let mut running = thread(1);
        running.state = ThreadState::Running;
        let short = thread(2);

        // Remaining(running) = 50 - 1 = 49; remaining(short) = 10.
        assert!(policy.should_preempt(&mut core, &running, &[&short], 0));
        assert_eq!(policy.executed_time(ThreadId(1)), 1);
    }

    #[test]
    fn srt_executed_time_closes_the_gap() {
        let mut core = SchedulerCore::new(1, 1000);
        let mut policy = ShortestRemainingTime::new();
        policy.update_estimated_run_time(ThreadId(1), 10);
        policy.update_estimated_run_time(ThreadId(2), 12);

        let mut running = thread(1);
        running.state = ThreadState::Running;
        let other = thread(2);

        // The other thread's remaining time (12) never drops below the
        // running thread's, so only the slice rule could preempt.
        for t in 0..10 {
            assert!(!policy.should_preempt(&mut core, &running, &[&other], t));
        }
        assert_eq!(policy.executed_time(ThreadId(1)), 10);
    }
}
