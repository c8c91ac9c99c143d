//! Medialib Worker
//!
//! The job executor, which runs a transformer invocation in the caller or
//! defers it to a persistent queue, and the worker pool that processes
//! deferred jobs with retry and backoff.

pub mod context;
pub mod executor;
pub mod invocation;
pub mod queue;

pub use context::{empty_context_weak, JobHandlerContext};
pub use executor::{Dispatch, JobExecutor, JobExecutorConfig};
pub use invocation::Invocation;
pub use queue::{JobOutcome, JobQueue, JobQueueConfig, MAX_RETRY_BACKOFF_SECS};
