//! Priority scheduler with batching, retries and result caching.
//!
//! The [`Scheduler`] owns the backlog and task table behind one lock. Each
//! dispatch cycle asks the batch optimizer for compatible tasks, answers
//! what it can from the result cache and hands the rest to the
//! [`RetryExecutor`]. Progress is published as [`TaskEvent`]s.

pub mod backlog;
pub mod batch;
pub mod events;
pub mod metrics;
pub mod retry;
pub mod runner;
pub mod types;

pub use backlog::{Backlog, BacklogEntry};
pub use batch::{select_batch, Batch, BatchItem};
pub use events::{EventBus, EventKind, EventSubscription, TaskEvent};
pub use metrics::SchedulerMetrics;
pub use retry::{BatchFailure, BatchOutcome, RetryExecutor, RetryNotice, RetryPolicy};
pub use runner::Scheduler;
pub use types::{
    CancelAck, CancelFlag, DispatchReport, SchedulerConfig, Task, TaskError, TaskStatus,
};
