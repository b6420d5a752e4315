use batchsim_cache::CacheError;
use batchsim_core::{CoreError, TaskId};
use thiserror::Error;

/// Errors returned synchronously by scheduler operations.
///
/// Execution-time failures are never reported here; they are recorded on
/// the task as a [`TaskError`](crate::TaskError).
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("task not found: {0}")]
    NotFound(TaskId),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("cache error: {0}")]
    Cache(#[from] CacheError),
}

impl From<CoreError> for SchedulerError {
    fn from(e: CoreError) -> Self {
        SchedulerError::InvalidRequest(e.to_string())
    }
}
