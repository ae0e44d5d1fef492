use std::collections::HashMap;

use lockstep_types::{ProcessorId, Thread, ThreadId};

use crate::core::SchedulerCore;
use crate::policy::Policy;

/// Multilevel feedback queue.
///
/// Threads start on the highest-priority level (index 0). Expiring a time
/// slice demotes a thread one level; slices grow per level (exponentially by
/// default). A ready thread on a strictly higher-priority level than the
/// running one preempts it immediately. [`FeedbackQueue::boost_priority`]
/// promotes a thread one level, for driver-side anti-starvation.
#[derive(Debug, Clone)]
pub struct FeedbackQueue {
    levels: HashMap<ThreadId, usize>,
    level_slices: Vec<u32>,
}

impl FeedbackQueue {
    /// `num_levels` queues with slices `base_slice * 2^level`.
    pub fn new(base_slice: u32, num_levels: usize) -> Self {
        let num_levels = num_levels.max(1);
        Self {
            levels: HashMap::new(),
            level_slices: (0..num_levels)
                .map(|level| base_slice.saturating_mul(1 << level.min(31)))
                .collect(),
        }
    }

    /// Explicit per-level slices; one queue per entry.
    pub fn with_level_slices(level_slices: Vec<u32>) -> Self {
        let level_slices = if level_slices.is_empty() {
            vec![1]
        } else {
            level_slices
        };
        Self {
            levels: HashMap::new(),
            level_slices,
        }
    }

    pub fn num_levels(&self) -> usize {
        self.level_slices.len()
    }

    /// Current queue level of a thread (0 = highest priority; new threads
    /// start there).
    pub fn level_of(&self, thread: ThreadId) -> usize {
        self.levels.get(&thread).copied().unwrap_or(0)
    }

    fn slice_for(&self, level: usize) -> u32 {
        let clamped = level.min(self.level_slices.len() - 1);
        self.level_slices[clamped]
    }

    /// Promote a thread one level (anti-starvation hook).
    pub fn boost_priority(&mut self, thread: ThreadId) {
        let level = self.level_of(thread).saturating_sub(1);
        self.levels.insert(thread, level);
    }
}

impl Policy for FeedbackQueue {
    fn name(&self) -> &'static str {
        "multilevel-feedback-queue"
    }

    fn select_thread(
        &mut self,
        _core: &SchedulerCore,
        available: &[&Thread],
        _processor: ProcessorId,
        _timestamp: u64,
    ) -> Option<ThreadId> {
        for level in 0..self.num_levels() {
            if let Some(thread) = available
                .iter()
                .find(|thread| self.level_of(thread.id) == level)
            {
                return Some(thread.id);
            }
        }
        available.first().map(|thread| thread.id)
    }

    fn should_preempt(
        &mut self,
        core: &mut SchedulerCore,
        running: &Thread,
        available: &[&Thread],
        _timestamp: u64,
    ) -> bool {
        let level = self.level_of(running.id);
        let slice = self.slice_for(level);

        if core.tick_slice(running.id, slice, slice) {
            // Slice expired: demote one level and re-arm with the longer
            // slice of the new level.
            let demoted = (level + 1).min(self.num_levels() - 1);
            self.levels.insert(running.id, demoted);
            core.set_slice(running.id, self.slice_for(demoted));
            return true;
        }

        available
            .iter()
            .any(|thread| self.level_of(thread.id) < level)
    }

    fn on_dispatch(&mut self, core: &mut SchedulerCore, thread: ThreadId) {
        // Re-arm with the thread's own level slice, not the scheduler
        // default.
        core.set_slice(thread, self.slice_for(self.level_of(thread)));
    }
}
