//! Runner errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error(transparent)]
    Core(#[from] curasync_core::Error),

    #[error("job queue is full")]
    QueueFull,

    #[error("job queue is closed")]
    QueueClosed,
}

pub type RunnerResult<T> = std::result::Result<T, RunnerError>;
