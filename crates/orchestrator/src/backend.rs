//! Execution backend capability.
//!
//! The simulation engine sits behind a narrow RPC interface; the
//! orchestrator only needs "run these parameter sets against this model".

use async_trait::async_trait;
use batchsim_core::{Parameters, ResultPayload};
use thiserror::Error;

/// Failure of a whole backend call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    /// Infrastructure-level: connection loss, timeout, engine busy. Retried.
    #[error("transient execution error: {0}")]
    Transient(String),

    /// Input-level: malformed model, invalid parameter. Never retried.
    #[error("fatal execution error: {0}")]
    Fatal(String),
}

impl ExecutionError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ExecutionError::Transient(_))
    }

    pub fn message(&self) -> &str {
        match self {
            ExecutionError::Transient(m) | ExecutionError::Fatal(m) => m,
        }
    }
}

/// What a backend can do, checked once when the scheduler is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendCapabilities {
    /// Accepts more than one parameter set per call.
    pub batch_execution: bool,
    /// Parameter sets the engine evaluates concurrently within one call.
    pub parallelism: usize,
}

impl Default for BackendCapabilities {
    fn default() -> Self {
        Self {
            batch_execution: true,
            parallelism: 1,
        }
    }
}

/// Runs parameter sets against a named model.
///
/// A call is atomic: it either returns one result per input set, in input
/// order, or fails as a whole.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Version tag of the engine; part of every cache key.
    fn engine_version(&self) -> String;

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities::default()
    }

    async fn execute(
        &self,
        model_id: &str,
        parameter_sets: &[Parameters],
    ) -> Result<Vec<ResultPayload>, ExecutionError>;
}
