use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use batchsim_core::{Parameters, Priority, ResultPayload, TaskId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::retry::RetryPolicy;
use crate::error::SchedulerError;

/// Lifecycle state of a task.
///
/// `Queued` and `Running` are the only non-terminal states; a terminal task
/// never changes again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

/// Why a task ended in `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskError {
    /// The backend rejected the input; not retried.
    Fatal { message: String },
    /// Every allowed attempt hit a transient error.
    RetriesExhausted { attempts: u32, last_error: String },
    /// The batch worker panicked.
    Internal { message: String },
}

impl std::fmt::Display for TaskError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskError::Fatal { message } => write!(f, "fatal: {}", message),
            TaskError::RetriesExhausted { attempts, last_error } => {
                write!(f, "retries exhausted after {} attempts: {}", attempts, last_error)
            }
            TaskError::Internal { message } => write!(f, "internal: {}", message),
        }
    }
}

/// Snapshot of a task, as returned by `status`.
#[derive(Debug, Clone, Serialize)]
pub struct Task {
    pub id: TaskId,
    pub model_id: String,
    pub parameters: Parameters,
    pub priority: Priority,
    pub status: TaskStatus,
    /// 0-100.
    pub progress: u8,
    pub retry_count: u32,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Whether the result came from the cache rather than the backend.
    pub cache_hit: bool,
    pub result: Option<ResultPayload>,
    pub error: Option<TaskError>,
}

impl Task {
    pub(crate) fn new(model_id: String, parameters: Parameters, priority: Priority) -> Self {
        Self {
            id: TaskId::new(),
            model_id,
            parameters,
            priority,
            status: TaskStatus::Queued,
            progress: 0,
            retry_count: 0,
            submitted_at: Utc::now(),
            started_at: None,
            completed_at: None,
            cache_hit: false,
            result: None,
            error: None,
        }
    }
}

/// Cooperative cancellation signal shared between the task table and an
/// in-flight batch.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Result of a `cancel` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelAck {
    /// Was queued; removed from the backlog and now `Cancelled`.
    Cancelled,
    /// Is running; will be cancelled at the next checked boundary.
    Requested,
    /// Already terminal; nothing changed.
    AlreadyTerminal,
}

/// Summary of one dispatch cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub batches: usize,
    pub tasks: usize,
    pub cache_hits: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl DispatchReport {
    pub fn merge(&mut self, other: DispatchReport) {
        self.batches += other.batches;
        self.tasks += other.tasks;
        self.cache_hits += other.cache_hits;
        self.completed += other.completed;
        self.failed += other.failed;
        self.cancelled += other.cancelled;
    }
}

/// Scheduler configuration, typically parsed from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Upper bound on tasks grouped into one backend call.
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    /// Retries after the first attempt on transient failure.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each further retry.
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_ms: u64,
    /// Batches allowed in flight against the backend at once.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    /// Idle wait between background dispatch cycles.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Buffered events per subscriber before it starts lagging.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_max_batch_size() -> usize { 4 }
fn default_max_retries() -> u32 { 3 }
fn default_retry_base_delay() -> u64 { 500 }
fn default_max_in_flight() -> usize { 2 }
fn default_poll_interval() -> u64 { 1000 }
fn default_event_capacity() -> usize { 1024 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_batch_size: default_max_batch_size(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay(),
            max_in_flight: default_max_in_flight(),
            poll_interval_ms: default_poll_interval(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl SchedulerConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.max_batch_size == 0 {
            return Err(SchedulerError::Config("max_batch_size must be >= 1".into()));
        }
        if self.max_in_flight == 0 {
            return Err(SchedulerError::Config("max_in_flight must be >= 1".into()));
        }
        if self.event_capacity == 0 {
            return Err(SchedulerError::Config("event_capacity must be >= 1".into()));
        }
        Ok(())
    }
}
