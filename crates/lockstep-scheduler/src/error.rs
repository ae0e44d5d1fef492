use lockstep_types::ThreadId;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SchedulerError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SchedulerError {
    /// A thread id referenced by the ready queue, a processor, or a policy
    /// decision is missing from the driver's thread table. This is a driver
    /// bug, not a transient condition; no scheduler state was mutated.
    #[error("thread {0} is not present in the thread table")]
    UnknownThread(ThreadId),
}
