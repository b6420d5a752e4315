use batchsim_core::{ResultPayload, TaskId};
use chrono::Utc;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::scheduler::batch::{select_batch, Batch, BatchItem};
use crate::scheduler::events::EventKind;
use crate::scheduler::retry::RetryNotice;
use crate::scheduler::types::{TaskError, TaskStatus};

use super::Scheduler;

/// Progress reported once a task has been handed to a batch.
const PROGRESS_STARTED: u8 = 10;
const PROGRESS_DONE: u8 = 100;

impl Scheduler {
    /// Pop the next batch off the backlog and mark its tasks running.
    ///
    /// Selection and the state change happen under one lock acquisition, so
    /// no other caller can see a task both queued and batched.
    pub(super) fn next_batch(&self) -> Option<Batch> {
        let batch = {
            let mut state = self.lock_state();
            let entries = select_batch(&mut state.backlog, self.config.max_batch_size);
            let anchor = entries.first()?;
            let model_id = anchor.model_id.clone();
            let priority = anchor.priority;

            let now = Utc::now();
            let mut items = Vec::with_capacity(entries.len());
            for entry in &entries {
                let Some(record) = state.tasks.get_mut(&entry.task_id) else {
                    warn!(task_id = %entry.task_id, "backlog entry without a task record, dropping");
                    continue;
                };
                record.task.status = TaskStatus::Running;
                record.task.started_at = Some(now);
                record.task.progress = PROGRESS_STARTED;
                items.push(BatchItem {
                    task_id: entry.task_id,
                    parameters: record.task.parameters.clone(),
                    cancel: record.cancel.clone(),
                });
            }
            Batch {
                model_id,
                priority,
                items,
            }
        };
        if batch.is_empty() {
            return None;
        }

        debug!(
            model_id = %batch.model_id,
            priority = %batch.priority,
            batch_size = batch.len(),
            "batch selected"
        );
        for item in &batch.items {
            self.events.emit(
                item.task_id,
                EventKind::Started,
                json!({
                    "model_id": batch.model_id,
                    "batch_size": batch.len(),
                    "progress": PROGRESS_STARTED,
                }),
            );
        }
        Some(batch)
    }

    /// RUNNING -> COMPLETED. Returns false if the task was no longer running.
    pub(super) fn complete_task(&self, task_id: TaskId, payload: ResultPayload, cache_hit: bool) -> bool {
        {
            let mut state = self.lock_state();
            let Some(record) = state.tasks.get_mut(&task_id) else {
                return false;
            };
            if record.task.status != TaskStatus::Running {
                return false;
            }
            record.task.status = TaskStatus::Completed;
            record.task.progress = PROGRESS_DONE;
            record.task.completed_at = Some(Utc::now());
            record.task.cache_hit = cache_hit;
            record.task.result = Some(payload);
        }

        self.update_metrics(|m| m.tasks_completed += 1);
        debug!(task_id = %task_id, cache_hit, "task completed");
        self.events.emit(
            task_id,
            EventKind::Completed,
            json!({ "cache_hit": cache_hit, "progress": PROGRESS_DONE }),
        );
        true
    }

    /// RUNNING -> FAILED.
    pub(super) fn fail_task(&self, task_id: TaskId, error: TaskError) -> bool {
        {
            let mut state = self.lock_state();
            let Some(record) = state.tasks.get_mut(&task_id) else {
                return false;
            };
            if record.task.status != TaskStatus::Running {
                return false;
            }
            record.task.status = TaskStatus::Failed;
            record.task.completed_at = Some(Utc::now());
            record.task.error = Some(error.clone());
        }

        self.update_metrics(|m| m.tasks_failed += 1);
        warn!(task_id = %task_id, error = %error, "task failed");
        self.events
            .emit(task_id, EventKind::Failed, json!({ "error": error }));
        true
    }

    /// RUNNING -> CANCELLED, after the cancellation flag was observed.
    pub(super) fn cancel_running(&self, task_id: TaskId, reason: &str) -> bool {
        {
            let mut state = self.lock_state();
            let Some(record) = state.tasks.get_mut(&task_id) else {
                return false;
            };
            if record.task.status != TaskStatus::Running {
                return false;
            }
            record.task.status = TaskStatus::Cancelled;
            record.task.completed_at = Some(Utc::now());
        }

        self.update_metrics(|m| m.tasks_cancelled += 1);
        info!(task_id = %task_id, reason, "running task cancelled");
        self.events
            .emit(task_id, EventKind::Cancelled, json!({ "reason": reason }));
        true
    }

    /// Record a batch-level retry against every task in it.
    pub(super) fn record_retry(&self, notice: &RetryNotice<'_>) {
        {
            let mut state = self.lock_state();
            for task_id in notice.task_ids {
                if let Some(record) = state.tasks.get_mut(task_id) {
                    record.task.retry_count = notice.retry;
                }
            }
        }

        self.update_metrics(|m| m.retries += 1);
        let delay_ms = notice.delay.as_millis() as u64;
        for task_id in notice.task_ids {
            self.events.emit(
                *task_id,
                EventKind::Progress,
                json!({
                    "attempt": notice.retry + 1,
                    "retry": notice.retry,
                    "delay_ms": delay_ms,
                    "error": notice.error.message(),
                }),
            );
        }
    }
}
