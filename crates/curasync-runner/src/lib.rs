//! Job runner for curasync.
//!
//! Matches push events against workflow triggers and runs the workflow's steps
//! strictly in order on the local machine. The first failing step aborts the job.

pub mod error;
pub mod local;
pub mod orchestrator;
pub mod queue;
pub mod steps;
pub mod trigger;

pub use error::{RunnerError, RunnerResult};
pub use local::LocalProcessExecutor;
pub use orchestrator::{JobContext, JobEvent, JobResult, JobRunner};
pub use queue::{EnqueueOutcome, JobQueue, QueuedJob, Worker, WorkerStats};
pub use trigger::{glob_match, matches_manual, matches_push};
