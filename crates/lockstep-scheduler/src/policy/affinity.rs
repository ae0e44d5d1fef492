use std::collections::{BTreeSet, HashMap};

use lockstep_types::{ProcessorId, Thread, ThreadId};

use crate::core::SchedulerCore;
use crate::policy::Policy;

/// Processor-affinity scheduling.
///
/// Each thread carries a set of processors it may run on (every processor by
/// default). Selection only considers threads whose affinity includes the
/// offering processor, preferring one that last ran there (warm cache);
/// a processor no eligible thread can use stays idle.
#[derive(Debug, Clone)]
pub struct Affinity {
    num_processors: usize,
    default_affinity: BTreeSet<ProcessorId>,
    affinities: HashMap<ThreadId, BTreeSet<ProcessorId>>,
}

impl Affinity {
    pub fn new(num_processors: usize) -> Self {
        let default_affinity = (0..num_processors)
            .map(|i| ProcessorId(i as u32))
            .collect();
        Self {
            num_processors,
            default_affinity,
            affinities: HashMap::new(),
        }
    }

    /// Like [`Affinity::new`], with a default set for threads that never had
    /// `set_affinity` called. Clamped to the valid processor range.
    pub fn with_default_affinity(
        num_processors: usize,
        default_affinity: impl IntoIterator<Item = ProcessorId>,
    ) -> Self {
        let mut policy = Self::new(num_processors);
        policy.default_affinity = policy.clamp(default_affinity);
        policy
    }

    fn clamp(&self, processors: impl IntoIterator<Item = ProcessorId>) -> BTreeSet<ProcessorId> {
        processors
            .into_iter()
            .filter(|pid| (pid.0 as usize) < self.num_processors)
            .collect()
    }

    /// Set the processors `thread` may run on. Ids outside the configured
    /// processor range are silently clamped away.
    pub fn set_affinity(
        &mut self,
        thread: ThreadId,
        processors: impl IntoIterator<Item = ProcessorId>,
    ) {
        let clamped = self.clamp(processors);
        self.affinities.insert(thread, clamped);
    }

    pub fn get_affinity(&self, thread: ThreadId) -> BTreeSet<ProcessorId> {
        self.affinities
            .get(&thread)
            .cloned()
            .unwrap_or_else(|| self.default_affinity.clone())
    }

    fn is_eligible(&self, thread: ThreadId, processor: ProcessorId) -> bool {
        match self.affinities.get(&thread) {
            Some(set) => set.contains(&processor),
            None => self.default_affinity.contains(&processor),
        }
    }
}

impl Policy for Affinity {
    fn name(&self) -> &'static str {
        "affinity"
    }

    fn select_thread(
        &mut self,
        core: &SchedulerCore,
        available: &[&Thread],
        processor: ProcessorId,
        _timestamp: u64,
    ) -> Option<ThreadId> {
        let eligible: Vec<&&Thread> = available
            .iter()
            .filter(|thread| self.is_eligible(thread.id, processor))
            .collect();

        // Prefer a thread that last ran on this processor.
        eligible
            .iter()
            .find(|thread| core.last_processor(thread.id) == Some(processor))
            .or_else(|| eligible.first())
            .map(|thread| thread.id)
    }
}
