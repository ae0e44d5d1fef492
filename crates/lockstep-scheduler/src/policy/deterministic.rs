use std::collections::BTreeMap;

use lockstep_types::{ProcessorId, Thread, ThreadId};

use crate::core::SchedulerCore;
use crate::policy::Policy;

/// Key of one recorded decision: which thread was bound to a processor at a
/// given tick.
pub type DecisionKey = (u64, ProcessorId);

/// Deterministic-replay wrapper around any base policy.
///
/// While recording, every selection the base policy makes is written into a
/// `(timestamp, processor) -> thread` table. Loading that table into a fresh
/// scheduler over an identical thread/processor configuration replays the
/// run bit-for-bit: recorded decisions short-circuit both selection and
/// preemption, so the base policy is only consulted for gaps the table does
/// not cover.
#[derive(Debug, Clone)]
pub struct Deterministic<P> {
    base: P,
    decisions: BTreeMap<DecisionKey, ThreadId>,
}

impl<P: Policy> Deterministic<P> {
    pub fn new(base: P) -> Self {
        Self {
            base,
            decisions: BTreeMap::new(),
        }
    }

    pub fn base(&self) -> &P {
        &self.base
    }

    /// The wrapped policy, for its own setters.
    pub fn base_mut(&mut self) -> &mut P {
        &mut self.base
    }

    /// Preload decisions recorded by a previous run.
    pub fn load_decisions(&mut self, decisions: BTreeMap<DecisionKey, ThreadId>) {
        self.decisions = decisions;
    }

    /// The decision table recorded so far.
    pub fn export_decisions(&self) -> BTreeMap<DecisionKey, ThreadId> {
        self.decisions.clone()
    }
}

impl<P: Policy> Policy for Deterministic<P> {
    fn name(&self) -> &'static str {
        "deterministic"
    }

    fn select_thread(
        &mut self,
        core: &SchedulerCore,
        available: &[&Thread],
        processor: ProcessorId,
        timestamp: u64,
    ) -> Option<ThreadId> {
        if let Some(&recorded) = self.decisions.get(&(timestamp, processor)) {
            if available.iter().any(|thread| thread.id == recorded) {
                return Some(recorded);
            }
        }

        let chosen = self
            .base
            .select_thread(core, available, processor, timestamp)?;
        self.decisions.insert((timestamp, processor), chosen);
        Some(chosen)
    }

    fn should_preempt(
        &mut self,
        core: &mut SchedulerCore,
        running: &Thread,
        available: &[&Thread],
        timestamp: u64,
    ) -> bool {
        // A recorded dispatch at this (tick, processor) means the original
        // run replaced the running thread here.
        if let Some(processor) = running.processor {
            if self.decisions.contains_key(&(timestamp, processor)) {
                return true;
            }
        }
        self.base
            .should_preempt(core, running, available, timestamp)
    }

    fn on_dispatch(&mut self, core: &mut SchedulerCore, thread: ThreadId) {
        self.base.on_dispatch(core, thread);
    }
}
