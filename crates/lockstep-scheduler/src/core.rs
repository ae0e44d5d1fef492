//! Shared scheduler bookkeeping and the `schedule` driver loop.

use std::collections::{BTreeMap, HashMap, VecDeque};

use lockstep_types::{Processor, ProcessorId, Thread, ThreadId, ThreadState};

use crate::error::{Result, SchedulerError};
use crate::policy::Policy;
use crate::trace::{
    SchedulerEvent, SchedulerStatistics, ThreadStatistics, TraceEntry, TraceFilter,
};

/// Bookkeeping shared by every policy: assignment maps, time accounting,
/// time-slice countdowns, and the scheduling trace.
///
/// Policies receive the core on every callback; the few pieces of state they
/// are expected to touch (time slices) have explicit accessors.
#[derive(Debug, Clone)]
pub struct SchedulerCore {
    num_processors: usize,
    time_slice: u32,
    schedule_calls: u64,
    context_switches: u64,
    preemptions: u64,
    run_times: HashMap<ThreadId, u64>,
    wait_times: HashMap<ThreadId, u64>,
    /// processor -> currently assigned thread (None while idle).
    assignments: BTreeMap<ProcessorId, Option<ThreadId>>,
    /// thread -> processor, for live assignments only.
    thread_processor: HashMap<ThreadId, ProcessorId>,
    /// thread -> processor it last ran on (survives preemption).
    last_processor: HashMap<ThreadId, ProcessorId>,
    time_slice_remaining: HashMap<ThreadId, u32>,
    trace: Vec<TraceEntry>,
}

impl SchedulerCore {
    pub(crate) fn new(num_processors: usize, time_slice: u32) -> Self {
        Self {
            num_processors,
            time_slice,
            schedule_calls: 0,
            context_switches: 0,
            preemptions: 0,
            run_times: HashMap::new(),
            wait_times: HashMap::new(),
            assignments: (0..num_processors)
                .map(|i| (ProcessorId(i as u32), None))
                .collect(),
            thread_processor: HashMap::new(),
            last_processor: HashMap::new(),
            time_slice_remaining: HashMap::new(),
            trace: Vec::new(),
        }
    }

    pub fn num_processors(&self) -> usize {
        self.num_processors
    }

    /// Default time slice, in ticks.
    pub fn time_slice(&self) -> u32 {
        self.time_slice
    }

    /// Count one tick against a thread's slice. The slice is seeded with
    /// `initial` when the thread has none; on expiry it is re-armed with
    /// `reset` and `true` is returned.
    pub fn tick_slice(&mut self, thread: ThreadId, initial: u32, reset: u32) -> bool {
        let remaining = self.time_slice_remaining.entry(thread).or_insert(initial);
        *remaining = remaining.saturating_sub(1);
        if *remaining == 0 {
            *remaining = reset;
            true
        } else {
            false
        }
    }

    /// Count one tick against the default slice.
    pub fn tick_default_slice(&mut self, thread: ThreadId) -> bool {
        let slice = self.time_slice;
        self.tick_slice(thread, slice, slice)
    }

    /// Re-arm a thread's slice to an explicit value.
    pub fn set_slice(&mut self, thread: ThreadId, remaining: u32) {
        self.time_slice_remaining.insert(thread, remaining);
    }

    /// Re-arm a thread's slice to the default.
    pub fn reset_slice(&mut self, thread: ThreadId) {
        self.set_slice(thread, self.time_slice);
    }

    pub fn slice_remaining(&self, thread: ThreadId) -> u32 {
        self.time_slice_remaining.get(&thread).copied().unwrap_or(0)
    }

    /// Processor the thread is currently bound to, if any.
    pub fn current_processor(&self, thread: ThreadId) -> Option<ProcessorId> {
        self.thread_processor.get(&thread).copied()
    }

    /// Processor the thread most recently ran on, surviving preemption.
    pub fn last_processor(&self, thread: ThreadId) -> Option<ProcessorId> {
        self.last_processor.get(&thread).copied()
    }

    pub fn run_time(&self, thread: ThreadId) -> u64 {
        self.run_times.get(&thread).copied().unwrap_or(0)
    }

    pub fn wait_time(&self, thread: ThreadId) -> u64 {
        self.wait_times.get(&thread).copied().unwrap_or(0)
    }
}

/// A scheduling policy plus the shared bookkeeping, driven once per tick by
/// the external simulation loop.
pub struct Scheduler<P: Policy> {
    core: SchedulerCore,
    policy: P,
}

impl<P: Policy> Scheduler<P> {
    pub fn new(policy: P, num_processors: usize, time_slice: u32) -> Self {
        Self {
            core: SchedulerCore::new(num_processors, time_slice),
            policy,
        }
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }

    /// Policy-specific setters (`set_affinity`, `boost_priority`, ...) live
    /// on the policy itself.
    pub fn policy_mut(&mut self) -> &mut P {
        &mut self.policy
    }

    pub fn core(&self) -> &SchedulerCore {
        &self.core
    }

    /// One scheduling decision per processor for this tick.
    ///
    /// For each processor in slice order: a busy processor keeps its thread
    /// unless the policy preempts it (the thread then returns to the ready
    /// queue and the processor is refilled in the same pass); an idle
    /// processor is offered the ready queue. Run time accrues to every
    /// thread that was running when the tick started, wait time to every
    /// thread still queued when it ends.
    ///
    /// Returns the processor→thread assignment map. Fails without mutating
    /// anything if the ready queue or a processor references a thread id
    /// missing from `threads`.
    pub fn schedule(
        &mut self,
        threads: &mut BTreeMap<ThreadId, Thread>,
        ready_queue: &mut VecDeque<ThreadId>,
        processors: &mut [Processor],
        timestamp: u64,
    ) -> Result<BTreeMap<ProcessorId, Option<ThreadId>>> {
        for &tid in ready_queue.iter() {
            if !threads.contains_key(&tid) {
                return Err(SchedulerError::UnknownThread(tid));
            }
        }
        for processor in processors.iter() {
            if let Some(tid) = processor.current_thread {
                if !threads.contains_key(&tid) {
                    return Err(SchedulerError::UnknownThread(tid));
                }
            }
        }

        self.core.schedule_calls += 1;

        for i in 0..processors.len() {
            let pid = processors[i].id;

            if processors[i].is_busy() {
                let Some(tid) = processors[i].current_thread else {
                    continue;
                };
                *self.core.run_times.entry(tid).or_insert(0) += 1;

                let available: Vec<&Thread> =
                    ready_queue.iter().map(|id| &threads[id]).collect();
                let preempt = self.policy.should_preempt(
                    &mut self.core,
                    &threads[&tid],
                    &available,
                    timestamp,
                );

                if !preempt {
                    continue;
                }

                let run_time = self.core.run_time(tid);
                if let Some(thread) = threads.get_mut(&tid) {
                    thread.state = ThreadState::Ready;
                    thread.processor = None;
                }
                processors[i].release();
                ready_queue.push_back(tid);
                self.core.assignments.insert(pid, None);
                self.core.thread_processor.remove(&tid);
                self.core.preemptions += 1;
                self.core.trace.push(TraceEntry {
                    timestamp,
                    processor: pid,
                    thread: tid,
                    event: SchedulerEvent::Preempted { run_time },
                });
                tracing::trace!(thread = %tid, processor = %pid, timestamp, "thread preempted");
            }

            if ready_queue.is_empty() {
                continue;
            }
            let available: Vec<&Thread> = ready_queue.iter().map(|id| &threads[id]).collect();
            let Some(tid) = self
                .policy
                .select_thread(&self.core, &available, pid, timestamp)
            else {
                continue;
            };

            // Policies choose among `available`, so the id must be queued.
            let position = ready_queue
                .iter()
                .position(|&queued| queued == tid)
                .ok_or(SchedulerError::UnknownThread(tid))?;
            ready_queue.remove(position);

            let priority = threads[&tid].priority;
            if let Some(thread) = threads.get_mut(&tid) {
                thread.state = ThreadState::Running;
                thread.processor = Some(pid);
            }
            processors[i].assign(tid);
            self.core.assignments.insert(pid, Some(tid));
            self.core.thread_processor.insert(tid, pid);
            self.core.last_processor.insert(tid, pid);
            self.policy.on_dispatch(&mut self.core, tid);
            self.core.context_switches += 1;
            self.core.trace.push(TraceEntry {
                timestamp,
                processor: pid,
                thread: tid,
                event: SchedulerEvent::Scheduled { priority },
            });
            tracing::trace!(thread = %tid, processor = %pid, timestamp, "thread scheduled");
        }

        for &tid in ready_queue.iter() {
            *self.core.wait_times.entry(tid).or_insert(0) += 1;
        }

        Ok(self.core.assignments.clone())
    }

    pub fn get_statistics(&self) -> SchedulerStatistics {
        let avg = |map: &HashMap<ThreadId, u64>| {
            if map.is_empty() {
                0.0
            } else {
                map.values().sum::<u64>() as f64 / map.len() as f64
            }
        };
        SchedulerStatistics {
            policy: self.policy.name(),
            time_slice: self.core.time_slice,
            num_processors: self.core.num_processors,
            schedule_calls: self.core.schedule_calls,
            context_switches: self.core.context_switches,
            preemptions: self.core.preemptions,
            avg_wait_time: avg(&self.core.wait_times),
            avg_run_time: avg(&self.core.run_times),
        }
    }

    /// Zero-default statistics for unknown thread ids; never fails.
    pub fn get_thread_statistics(&self, thread: ThreadId) -> ThreadStatistics {
        ThreadStatistics {
            thread: Some(thread),
            run_time: self.core.run_time(thread),
            wait_time: self.core.wait_time(thread),
            processor: self.core.current_processor(thread),
            time_slice_remaining: self.core.slice_remaining(thread),
        }
    }

    /// Filtered view of the append-only scheduling trace.
    pub fn get_scheduling_trace(&self, filter: &TraceFilter) -> Vec<TraceEntry> {
        self.core
            .trace
            .iter()
            .filter(|entry| filter.matches(entry))
            .cloned()
            .collect()
    }

    /// Percentage of `schedule` calls that dispatched a thread onto each
    /// processor, for every processor the scheduler was configured with.
    pub fn analyze_processor_utilization(&self) -> BTreeMap<ProcessorId, f64> {
        let mut dispatches: BTreeMap<ProcessorId, u64> = (0..self.core.num_processors)
            .map(|i| (ProcessorId(i as u32), 0))
            .collect();
        for entry in &self.core.trace {
            if matches!(entry.event, SchedulerEvent::Scheduled { .. }) {
                *dispatches.entry(entry.processor).or_insert(0) += 1;
            }
        }
        dispatches
            .into_iter()
            .map(|(pid, count)| {
                let pct = if self.core.schedule_calls == 0 {
                    0.0
                } else {
                    count as f64 / self.core.schedule_calls as f64 * 100.0
                };
                (pid, pct)
            })
            .collect()
    }
}
