//! Background task execution: a bounded worker-thread pool with a shared
//! backlog, timer-deferred tasks, and affinity-sticky ordering.

mod manager;

pub use manager::{Finalizer, Step, TaskHandleId, TaskManager, TaskSpec, DEFAULT_WORKER_COUNT};
