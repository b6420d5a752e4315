//! Task orchestration for a scarce, slow simulation engine.
//!
//! Submissions land in a priority backlog; dispatch cycles group compatible
//! tasks into batches, resolve what they can from the result cache and send
//! the rest to the [`ExecutionBackend`] with bounded retries.

pub mod backend;
pub mod config;
pub mod error;
pub mod scheduler;

pub use backend::{BackendCapabilities, ExecutionBackend, ExecutionError};
pub use config::OrchestratorConfig;
pub use error::SchedulerError;
pub use scheduler::{
    Batch, BatchItem, CancelAck, DispatchReport, EventKind, EventSubscription, RetryExecutor,
    RetryPolicy, Scheduler, SchedulerConfig, SchedulerMetrics, Task, TaskError, TaskEvent,
    TaskStatus,
};

pub use batchsim_core::{Parameters, Priority, ResultPayload, TaskId};
