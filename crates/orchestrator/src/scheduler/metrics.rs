use std::collections::HashMap;
use std::time::Duration;

use batchsim_core::Priority;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Scheduler operational metrics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerMetrics {
    pub tasks_submitted: u64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub tasks_cancelled: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    /// Results computed but not persisted to the cache.
    pub cache_write_failures: u64,
    pub batches_dispatched: u64,
    pub backend_calls: u64,
    pub retries: u64,
    /// Queued tasks per priority level (filled in at snapshot time).
    pub tasks_pending: HashMap<Priority, usize>,
    /// Batches currently holding an in-flight permit.
    pub in_flight_batches: usize,
    /// Rolling average wall time of a batch, cache lookups included.
    pub avg_batch_duration: Duration,
    pub last_dispatch: Option<DateTime<Utc>>,
}

impl SchedulerMetrics {
    /// Record a finished batch.
    pub fn record_batch(&mut self, duration: Duration) {
        self.batches_dispatched += 1;
        self.last_dispatch = Some(Utc::now());

        // Incremental mean: new_avg = prev_avg + (duration - prev_avg) / count
        let count = self.batches_dispatched;
        self.avg_batch_duration = if count == 1 {
            duration
        } else {
            let prev_nanos = self.avg_batch_duration.as_nanos() as f64;
            let cur_nanos = duration.as_nanos() as f64;
            let avg_nanos = prev_nanos + (cur_nanos - prev_nanos) / count as f64;
            Duration::from_nanos(avg_nanos as u64)
        };
    }

    /// Fraction of cache lookups that hit, 0.0 when nothing was looked up.
    pub fn cache_hit_ratio(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            self.cache_hits as f64 / total as f64
        }
    }
}
