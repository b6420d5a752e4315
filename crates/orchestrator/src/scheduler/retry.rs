//! Bounded retries with exponential backoff around one backend call.
//!
//! The backend call is atomic over the batch, so a transient failure
//! retries every task in it. Cancellation is checked before each attempt.

use std::sync::Arc;
use std::time::Duration;

use batchsim_core::{Parameters, ResultPayload, TaskId};
use tracing::{debug, warn};

use super::batch::BatchItem;
use super::types::TaskError;
use crate::backend::{ExecutionBackend, ExecutionError};

/// Retry budget and backoff base.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; at most `max_retries + 1` calls.
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based): `base * 2^(retry-1)`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(31);
        self.base_delay.saturating_mul(1u32 << exponent)
    }
}

/// Terminal failure of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchFailure {
    Fatal(String),
    RetriesExhausted { attempts: u32, last_error: String },
}

impl From<BatchFailure> for TaskError {
    fn from(failure: BatchFailure) -> Self {
        match failure {
            BatchFailure::Fatal(message) => TaskError::Fatal { message },
            BatchFailure::RetriesExhausted { attempts, last_error } => {
                TaskError::RetriesExhausted { attempts, last_error }
            }
        }
    }
}

/// Passed to the retry hook before each backoff sleep.
#[derive(Debug)]
pub struct RetryNotice<'a> {
    /// 1-based retry number.
    pub retry: u32,
    pub delay: Duration,
    pub error: &'a ExecutionError,
    /// Tasks that will be retried.
    pub task_ids: &'a [TaskId],
}

/// What happened to a batch.
#[derive(Debug)]
pub struct BatchOutcome {
    /// Backend calls made.
    pub attempts: u32,
    /// Tasks dropped at a retry boundary because cancellation was requested.
    pub cancelled: Vec<TaskId>,
    /// Tasks still in the batch when it finished.
    pub attempted: Vec<TaskId>,
    /// One `(task, result)` per attempted task in input order, or why they
    /// all failed.
    pub result: Result<Vec<(TaskId, ResultPayload)>, BatchFailure>,
}

/// Runs batches against the backend under a [`RetryPolicy`].
pub struct RetryExecutor {
    backend: Arc<dyn ExecutionBackend>,
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(backend: Arc<dyn ExecutionBackend>, policy: RetryPolicy) -> Self {
        Self { backend, policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Execute `items` against `model_id`, retrying transient failures.
    ///
    /// `on_retry` fires once per retry, before the backoff sleep.
    pub async fn execute_batch<F>(
        &self,
        model_id: &str,
        mut items: Vec<BatchItem>,
        mut on_retry: F,
    ) -> BatchOutcome
    where
        F: FnMut(RetryNotice<'_>),
    {
        let mut attempts = 0u32;
        let mut retries = 0u32;
        let mut cancelled = Vec::new();

        loop {
            items.retain(|item| {
                if item.cancel.is_requested() {
                    cancelled.push(item.task_id);
                    false
                } else {
                    true
                }
            });
            let task_ids: Vec<TaskId> = items.iter().map(|i| i.task_id).collect();
            if items.is_empty() {
                debug!(model_id, "every task in batch was cancelled");
                return BatchOutcome {
                    attempts,
                    cancelled,
                    attempted: task_ids,
                    result: Ok(Vec::new()),
                };
            }

            attempts += 1;
            let parameter_sets: Vec<Parameters> =
                items.iter().map(|i| i.parameters.clone()).collect();
            debug!(model_id, attempt = attempts, batch_size = items.len(), "calling backend");

            let error = match self.backend.execute(model_id, &parameter_sets).await {
                Ok(results) if results.len() == items.len() => {
                    return BatchOutcome {
                        attempts,
                        cancelled,
                        result: Ok(task_ids.iter().copied().zip(results).collect()),
                        attempted: task_ids,
                    };
                }
                Ok(results) => ExecutionError::Fatal(format!(
                    "result count mismatch: sent {} parameter sets, got {} results",
                    items.len(),
                    results.len()
                )),
                Err(e) => e,
            };

            if !error.is_transient() {
                warn!(model_id, attempt = attempts, error = %error, "batch failed fatally");
                return BatchOutcome {
                    attempts,
                    cancelled,
                    attempted: task_ids,
                    result: Err(BatchFailure::Fatal(error.message().to_string())),
                };
            }

            if retries >= self.policy.max_retries {
                warn!(
                    model_id,
                    attempts,
                    error = %error,
                    "batch failed, retries exhausted"
                );
                return BatchOutcome {
                    attempts,
                    cancelled,
                    attempted: task_ids,
                    result: Err(BatchFailure::RetriesExhausted {
                        attempts,
                        last_error: error.message().to_string(),
                    }),
                };
            }

            retries += 1;
            let delay = self.policy.delay_for(retries);
            warn!(
                model_id,
                retry = retries,
                max_retries = self.policy.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "transient backend failure, retrying"
            );
            on_retry(RetryNotice {
                retry: retries,
                delay,
                error: &error,
                task_ids: &task_ids,
            });
            tokio::time::sleep(delay).await;
        }
    }
}
