use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use batchsim_cache::{ModelSource, ResultCache};
use batchsim_core::{Parameters, Priority, TaskId};
use serde_json::json;
use tokio::sync::{Notify, Semaphore};
use tracing::{debug, info};

use crate::backend::ExecutionBackend;
use crate::config::OrchestratorConfig;
use crate::error::SchedulerError;
use crate::scheduler::backlog::{Backlog, BacklogEntry};
use crate::scheduler::events::{EventBus, EventKind, EventSubscription};
use crate::scheduler::metrics::SchedulerMetrics;
use crate::scheduler::retry::RetryExecutor;
use crate::scheduler::types::{CancelAck, CancelFlag, SchedulerConfig, Task, TaskStatus};

/// A task as the scheduler tracks it.
pub(super) struct TaskRecord {
    pub(super) task: Task,
    pub(super) cancel: CancelFlag,
    pub(super) sequence: u64,
}

/// Everything guarded by the scheduler lock. Backlog and task table change
/// together so a task is never queued without a record or vice versa.
#[derive(Default)]
pub(super) struct SchedulerState {
    pub(super) tasks: HashMap<TaskId, TaskRecord>,
    pub(super) backlog: Backlog,
    pub(super) next_sequence: u64,
}

/// The task scheduler. Cheap to clone; clones share the same state.
///
/// The state lock is a `std::sync::Mutex` and is never held across an
/// `.await`, so submissions and status queries are not blocked by batches
/// that are executing or backing off.
#[derive(Clone)]
pub struct Scheduler {
    pub(super) config: Arc<SchedulerConfig>,
    pub(super) state: Arc<Mutex<SchedulerState>>,
    pub(super) executor: Arc<RetryExecutor>,
    pub(super) cache: Arc<ResultCache>,
    pub(super) models: Arc<dyn ModelSource>,
    /// Captured once at construction; part of every cache key.
    pub(super) engine_version: Arc<str>,
    pub(super) events: EventBus,
    pub(super) metrics: Arc<RwLock<SchedulerMetrics>>,
    /// Bounds concurrently executing batches.
    pub(super) in_flight: Arc<Semaphore>,
    /// Signalled on submission and shutdown.
    pub(super) wakeup: Arc<Notify>,
    pub(super) shutdown: Arc<AtomicBool>,
}

impl Scheduler {
    /// Create a scheduler. Fails when the configuration is invalid or the
    /// backend can't honour it.
    pub fn new(
        config: SchedulerConfig,
        backend: Arc<dyn ExecutionBackend>,
        cache: Arc<ResultCache>,
        models: Arc<dyn ModelSource>,
    ) -> Result<Self, SchedulerError> {
        config.validate()?;

        let engine_version = backend.engine_version();
        if engine_version.trim().is_empty() {
            return Err(SchedulerError::Config(
                "backend reported an empty engine version".into(),
            ));
        }
        let capabilities = backend.capabilities();
        if !capabilities.batch_execution && config.max_batch_size > 1 {
            return Err(SchedulerError::Config(format!(
                "backend does not support batch execution but max_batch_size is {}",
                config.max_batch_size
            )));
        }

        info!(
            "Scheduler created: engine={}, max_batch_size={}, max_in_flight={}, max_retries={}, backend parallelism={}",
            engine_version,
            config.max_batch_size,
            config.max_in_flight,
            config.max_retries,
            capabilities.parallelism
        );

        Ok(Self {
            executor: Arc::new(RetryExecutor::new(backend, config.retry_policy())),
            events: EventBus::new(config.event_capacity),
            in_flight: Arc::new(Semaphore::new(config.max_in_flight)),
            config: Arc::new(config),
            state: Arc::new(Mutex::new(SchedulerState::default())),
            cache,
            models,
            engine_version: Arc::from(engine_version),
            metrics: Arc::new(RwLock::new(SchedulerMetrics::default())),
            wakeup: Arc::new(Notify::new()),
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Build the cache described by `config` and a scheduler over it.
    pub async fn from_config(
        config: &OrchestratorConfig,
        backend: Arc<dyn ExecutionBackend>,
        models: Arc<dyn ModelSource>,
    ) -> Result<Self, SchedulerError> {
        config.validate()?;
        let cache = ResultCache::from_config(&config.cache).await?;
        Self::new(config.scheduler.clone(), backend, Arc::new(cache), models)
    }

    /// Queue a task. Returns as soon as it is in the backlog.
    pub fn submit(
        &self,
        model_id: impl Into<String>,
        parameters: Parameters,
        priority: Priority,
    ) -> Result<TaskId, SchedulerError> {
        let model_id = model_id.into();
        parameters.validate()?;
        if model_id.trim().is_empty() {
            return Err(SchedulerError::InvalidRequest("model id is empty".into()));
        }
        if !self.models.contains(&model_id) {
            return Err(SchedulerError::InvalidRequest(format!(
                "unknown model: {}",
                model_id
            )));
        }

        let task = Task::new(model_id.clone(), parameters, priority);
        let task_id = task.id;
        {
            let mut state = self.lock_state();
            let sequence = state.next_sequence;
            state.next_sequence += 1;
            state.backlog.push(BacklogEntry {
                task_id,
                model_id: model_id.clone(),
                priority,
                sequence,
            });
            state.tasks.insert(
                task_id,
                TaskRecord {
                    task,
                    cancel: CancelFlag::new(),
                    sequence,
                },
            );
        }

        self.update_metrics(|m| m.tasks_submitted += 1);
        debug!(task_id = %task_id, model_id = %model_id, priority = %priority, "task submitted");
        self.events.emit(
            task_id,
            EventKind::Submitted,
            json!({ "model_id": model_id, "priority": priority }),
        );
        self.wakeup.notify_one();
        Ok(task_id)
    }

    /// Snapshot of a task.
    pub fn status(&self, task_id: &TaskId) -> Result<Task, SchedulerError> {
        self.lock_state()
            .tasks
            .get(task_id)
            .map(|r| r.task.clone())
            .ok_or(SchedulerError::NotFound(*task_id))
    }

    /// Cancel a task. Queued tasks are cancelled on the spot; running ones
    /// at the next checked boundary.
    pub fn cancel(&self, task_id: &TaskId) -> Result<CancelAck, SchedulerError> {
        let ack = {
            let mut state = self.lock_state();
            let SchedulerState { tasks, backlog, .. } = &mut *state;
            let record = tasks
                .get_mut(task_id)
                .ok_or(SchedulerError::NotFound(*task_id))?;
            match record.task.status {
                TaskStatus::Queued => {
                    backlog.remove(task_id);
                    record.cancel.request();
                    record.task.status = TaskStatus::Cancelled;
                    record.task.completed_at = Some(chrono::Utc::now());
                    CancelAck::Cancelled
                }
                TaskStatus::Running => {
                    record.cancel.request();
                    CancelAck::Requested
                }
                _ => CancelAck::AlreadyTerminal,
            }
        };

        match ack {
            CancelAck::Cancelled => {
                self.update_metrics(|m| m.tasks_cancelled += 1);
                info!(task_id = %task_id, "queued task cancelled");
                self.events.emit(
                    *task_id,
                    EventKind::Cancelled,
                    json!({ "reason": "cancelled while queued" }),
                );
            }
            CancelAck::Requested => {
                info!(task_id = %task_id, "cancellation requested for running task");
            }
            CancelAck::AlreadyTerminal => {}
        }
        Ok(ack)
    }

    /// Drop a finished task from the table, returning its final snapshot.
    pub fn purge(&self, task_id: &TaskId) -> Result<Task, SchedulerError> {
        let mut state = self.lock_state();
        let status = state
            .tasks
            .get(task_id)
            .map(|r| r.task.status)
            .ok_or(SchedulerError::NotFound(*task_id))?;
        if !status.is_terminal() {
            return Err(SchedulerError::InvalidRequest(format!(
                "task {} is {:?} and cannot be purged",
                task_id, status
            )));
        }
        state
            .tasks
            .remove(task_id)
            .map(|r| r.task)
            .ok_or(SchedulerError::NotFound(*task_id))
    }

    /// Snapshots in submission order, optionally filtered by status.
    pub fn list(&self, status: Option<TaskStatus>) -> Vec<Task> {
        let state = self.lock_state();
        let mut records: Vec<&TaskRecord> = state
            .tasks
            .values()
            .filter(|r| status.map_or(true, |s| r.task.status == s))
            .collect();
        records.sort_by_key(|r| r.sequence);
        records.into_iter().map(|r| r.task.clone()).collect()
    }

    /// Number of tasks waiting in the backlog.
    pub fn queued(&self) -> usize {
        self.lock_state().backlog.len()
    }

    /// Subscribe to task events of the given kinds (empty = all).
    pub fn subscribe(&self, kinds: impl IntoIterator<Item = EventKind>) -> EventSubscription {
        self.events.subscribe(kinds)
    }

    /// Get a snapshot of the current scheduler metrics.
    pub fn metrics(&self) -> SchedulerMetrics {
        let mut snapshot = self
            .metrics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        snapshot.tasks_pending = self.lock_state().backlog.depth_by_priority();
        snapshot.in_flight_batches = self
            .config
            .max_in_flight
            .saturating_sub(self.in_flight.available_permits());
        snapshot
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn engine_version(&self) -> &str {
        &self.engine_version
    }

    /// The result cache this scheduler reads and fills.
    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    /// Signal the background loop to stop after its current cycle.
    pub fn shutdown(&self) {
        info!("Scheduler shutdown requested");
        self.shutdown.store(true, Ordering::Relaxed);
        self.wakeup.notify_one();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    // State transitions are single assignments under the lock, so a
    // poisoned lock still holds consistent data.
    pub(super) fn lock_state(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(super) fn update_metrics(&self, f: impl FnOnce(&mut SchedulerMetrics)) {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut metrics);
    }
}
