use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use batchsim_cache::CacheKey;
use batchsim_core::TaskId;
use futures::FutureExt;
use serde_json::json;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::scheduler::batch::{Batch, BatchItem};
use crate::scheduler::events::EventKind;
use crate::scheduler::types::{CancelFlag, DispatchReport, TaskError};

use super::Scheduler;

impl Scheduler {
    /// Drain the backlog once: pop batches while permits are available and
    /// wait for every batch started by this cycle to finish.
    pub async fn run_dispatch_cycle(&self) -> DispatchReport {
        let mut workers = JoinSet::new();

        loop {
            // Permit first, then pop: a batch never leaves the backlog
            // until it can actually run.
            let permit = match Arc::clone(&self.in_flight).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let Some(batch) = self.next_batch() else {
                break;
            };
            let scheduler = self.clone();
            workers.spawn(async move {
                let _permit = permit;
                scheduler.run_batch(batch).await
            });
        }

        let mut report = DispatchReport::default();
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(batch_report) => report.merge(batch_report),
                Err(e) => error!("Batch worker did not finish: {}", e),
            }
        }

        if report.batches > 0 {
            info!(
                batches = report.batches,
                tasks = report.tasks,
                cache_hits = report.cache_hits,
                completed = report.completed,
                failed = report.failed,
                cancelled = report.cancelled,
                "dispatch cycle finished"
            );
        }
        report
    }

    /// Run one batch, turning a panic into FAILED tasks instead of losing
    /// them in RUNNING.
    async fn run_batch(&self, batch: Batch) -> DispatchReport {
        let task_ids = batch.task_ids();
        let model_id = batch.model_id.clone();
        let started = Instant::now();

        let report = match AssertUnwindSafe(self.process_batch(batch)).catch_unwind().await {
            Ok(report) => report,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(model_id = %model_id, batch_size = task_ids.len(), "Batch worker panicked: {}", message);
                let error = TaskError::Internal { message };
                let failed = task_ids
                    .iter()
                    .filter(|id| self.fail_task(**id, error.clone()))
                    .count();
                DispatchReport {
                    batches: 1,
                    tasks: task_ids.len(),
                    failed,
                    ..Default::default()
                }
            }
        };

        let elapsed = started.elapsed();
        self.update_metrics(|m| m.record_batch(elapsed));
        debug!(model_id = %model_id, elapsed_ms = elapsed.as_millis() as u64, "batch finished");
        report
    }

    /// Resolve cache hits, send the misses to the backend as one call and
    /// record every outcome.
    async fn process_batch(&self, batch: Batch) -> DispatchReport {
        let mut report = DispatchReport {
            batches: 1,
            tasks: batch.len(),
            ..Default::default()
        };

        // Model content is read once per batch. Without it no key can be
        // computed, so the batch runs uncached.
        let model_content = self.read_model(&batch.model_id).await;

        let mut misses: Vec<BatchItem> = Vec::with_capacity(batch.len());
        let mut keys: HashMap<TaskId, CacheKey> = HashMap::new();
        for item in batch.items {
            if item.cancel.is_requested() {
                if self.cancel_running(item.task_id, "cancelled before execution") {
                    report.cancelled += 1;
                }
                continue;
            }

            let key = model_content
                .as_deref()
                .map(|content| self.cache.key_for(content, &item.parameters, &self.engine_version));
            let Some(key) = key else {
                self.update_metrics(|m| m.cache_misses += 1);
                self.events
                    .emit(item.task_id, EventKind::CacheMiss, json!({ "key": null }));
                misses.push(item);
                continue;
            };

            match self.cache.get(&key).await {
                Some(entry) => {
                    self.update_metrics(|m| m.cache_hits += 1);
                    debug!(task_id = %item.task_id, key = %key, "cache hit");
                    self.events.emit(
                        item.task_id,
                        EventKind::CacheHit,
                        json!({ "key": key.to_hex(), "engine_version": entry.metadata.engine_version }),
                    );
                    report.cache_hits += 1;
                    if self.complete_task(item.task_id, entry.payload, true) {
                        report.completed += 1;
                    }
                }
                None => {
                    self.update_metrics(|m| m.cache_misses += 1);
                    self.events.emit(
                        item.task_id,
                        EventKind::CacheMiss,
                        json!({ "key": key.to_hex() }),
                    );
                    keys.insert(item.task_id, key);
                    misses.push(item);
                }
            }
        }

        if misses.is_empty() {
            return report;
        }

        let flags: HashMap<TaskId, CancelFlag> = misses
            .iter()
            .map(|item| (item.task_id, item.cancel.clone()))
            .collect();
        let outcome = self
            .executor
            .execute_batch(&batch.model_id, misses, |notice| self.record_retry(&notice))
            .await;
        self.update_metrics(|m| m.backend_calls += outcome.attempts as u64);

        for task_id in &outcome.cancelled {
            if self.cancel_running(*task_id, "cancelled at retry boundary") {
                report.cancelled += 1;
            }
        }

        match outcome.result {
            Ok(results) => {
                // No retry boundary is left, so a late cancel request still
                // completes the task. It only keeps the result out of the
                // cache.
                for (task_id, payload) in results {
                    let cancel_requested = flags.get(&task_id).is_some_and(|f| f.is_requested());
                    match keys.get(&task_id) {
                        Some(key) if !cancel_requested => {
                            self.persist_result(task_id, *key, &payload).await;
                        }
                        Some(key) => {
                            debug!(task_id = %task_id, key = %key, "cancel requested mid-call, result not cached");
                        }
                        None => {}
                    }
                    if self.complete_task(task_id, payload, false) {
                        report.completed += 1;
                    }
                }
            }
            Err(failure) => {
                let error = TaskError::from(failure);
                for task_id in &outcome.attempted {
                    if self.fail_task(*task_id, error.clone()) {
                        report.failed += 1;
                    }
                }
            }
        }
        report
    }

    /// Read model content on the blocking pool. `None` means the batch
    /// bypasses the cache.
    async fn read_model(&self, model_id: &str) -> Option<Vec<u8>> {
        let models = Arc::clone(&self.models);
        let id = model_id.to_string();
        match tokio::task::spawn_blocking(move || models.read(&id)).await {
            Ok(Ok(content)) => Some(content),
            Ok(Err(e)) => {
                warn!(model_id = %model_id, error = %e, "model content unreadable, bypassing cache");
                None
            }
            Err(e) => {
                error!(model_id = %model_id, "Model read task did not finish: {}", e);
                None
            }
        }
    }

    /// Best-effort cache write. Failure is a warning, never a task failure.
    async fn persist_result(&self, task_id: TaskId, key: CacheKey, payload: &serde_json::Value) {
        match self.cache.put(key, payload.clone(), &self.engine_version).await {
            Ok(meta) => {
                debug!(task_id = %task_id, key = %key, size_bytes = meta.size_bytes, "result cached");
            }
            Err(e) => {
                warn!(task_id = %task_id, key = %key, error = %e, "failed to cache result");
                self.update_metrics(|m| m.cache_write_failures += 1);
                self.events.emit(
                    task_id,
                    EventKind::CacheWarning,
                    json!({ "key": key.to_hex(), "error": e.to_string() }),
                );
            }
        }
    }

    /// Start the background dispatch loop on the current runtime.
    pub fn spawn(&self) -> JoinHandle<()> {
        let scheduler = self.clone();
        tokio::spawn(async move { scheduler.run().await })
    }

    /// Run dispatch cycles until shutdown. Between cycles, sleeps until a
    /// submission arrives or the poll interval elapses.
    pub async fn run(&self) {
        info!(
            "Scheduler loop starting (poll interval {:?})",
            self.config.poll_interval()
        );

        while !self.shutdown.load(Ordering::Relaxed) {
            let report = self.run_dispatch_cycle().await;
            if report.batches > 0 {
                continue;
            }
            // Timing out is the normal idle path.
            let _ = tokio::time::timeout(self.config.poll_interval(), self.wakeup.notified()).await;
        }

        info!("Scheduler stopped");
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "batch worker panicked".to_string()
    }
}
