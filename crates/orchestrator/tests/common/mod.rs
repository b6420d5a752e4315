//! Shared fixtures for the orchestrator integration tests.
//!
//! `StubBackend` stands in for the simulation engine: every call costs
//! `ceil(N / parallelism)` time units, failures can be scripted per call,
//! and an optional gate holds calls until the test releases them.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use batchsim_cache::{in_memory_store, CacheConfig, InMemoryModelSource, ResultCache};
use batchsim_core::Parameters;
use batchsim_orchestrator::{
    BackendCapabilities, ExecutionBackend, ExecutionError, ResultPayload, Scheduler,
    SchedulerConfig,
};
use serde_json::json;
use tokio::sync::{Notify, Semaphore};
use tokio::time::Instant;

pub const ENGINE_VERSION: &str = "sim-2.4";
pub const UNIT: Duration = Duration::from_millis(100);

/// One recorded backend call.
#[derive(Debug, Clone)]
pub struct Call {
    pub model_id: String,
    pub parameter_sets: Vec<Parameters>,
    pub at: Instant,
}

impl Call {
    /// Values of parameter `name` across the call, in order.
    pub fn values(&self, name: &str) -> Vec<f64> {
        self.parameter_sets
            .iter()
            .filter_map(|p| p.get(name))
            .collect()
    }
}

pub struct StubBackend {
    version: String,
    parallelism: usize,
    unit: Duration,
    /// Errors returned by the next calls, in order; empty = succeed.
    script: Mutex<VecDeque<ExecutionError>>,
    calls: Mutex<Vec<Call>>,
    entered: Arc<Notify>,
    gate: Option<Arc<Semaphore>>,
}

impl StubBackend {
    pub fn new() -> Self {
        Self {
            version: ENGINE_VERSION.to_string(),
            parallelism: 4,
            unit: UNIT,
            script: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            entered: Arc::new(Notify::new()),
            gate: None,
        }
    }

    pub fn with_version(mut self, version: &str) -> Self {
        self.version = version.to_string();
        self
    }

    pub fn with_unit(mut self, unit: Duration) -> Self {
        self.unit = unit;
        self
    }

    /// Fail the next calls with these errors, then succeed.
    pub fn failing_with(self, errors: impl IntoIterator<Item = ExecutionError>) -> Self {
        self.script.lock().unwrap().extend(errors);
        self
    }

    /// Hold every call until a permit is added to the returned semaphore.
    pub fn gated(mut self) -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        self.gate = Some(gate.clone());
        (self, gate)
    }

    /// Notified each time a call starts.
    pub fn entered(&self) -> Arc<Notify> {
        self.entered.clone()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Simulated cost of one call with `n` parameter sets.
    pub fn cost(&self, n: usize) -> Duration {
        let units = n.div_ceil(self.parallelism.max(1)) as u32;
        self.unit * units
    }
}

#[async_trait]
impl ExecutionBackend for StubBackend {
    fn engine_version(&self) -> String {
        self.version.clone()
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            batch_execution: true,
            parallelism: self.parallelism,
        }
    }

    async fn execute(
        &self,
        model_id: &str,
        parameter_sets: &[Parameters],
    ) -> Result<Vec<ResultPayload>, ExecutionError> {
        self.calls.lock().unwrap().push(Call {
            model_id: model_id.to_string(),
            parameter_sets: parameter_sets.to_vec(),
            at: Instant::now(),
        });
        self.entered.notify_one();

        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        tokio::time::sleep(self.cost(parameter_sets.len())).await;

        if let Some(error) = self.script.lock().unwrap().pop_front() {
            return Err(error);
        }
        Ok(parameter_sets
            .iter()
            .map(|p| {
                json!({
                    "model": model_id,
                    "engine": self.version,
                    "sum": p.iter().map(|(_, v)| v).sum::<f64>(),
                })
            })
            .collect())
    }
}

pub fn models() -> Arc<InMemoryModelSource> {
    Arc::new(
        InMemoryModelSource::new()
            .with_model("orbit", "orbit model v1")
            .with_model("climate", "climate model v1")
            .with_model("fluid", "fluid model v1"),
    )
}

pub fn memory_cache() -> Arc<ResultCache> {
    Arc::new(ResultCache::new(in_memory_store(), &CacheConfig::default()).unwrap())
}

/// Scheduler over a fresh in-memory cache and the default models.
pub fn scheduler(backend: Arc<StubBackend>, config: SchedulerConfig) -> Scheduler {
    Scheduler::new(config, backend, memory_cache(), models()).unwrap()
}

/// Sequential dispatch: one batch in flight at a time.
pub fn serial_config(max_batch_size: usize) -> SchedulerConfig {
    SchedulerConfig {
        max_batch_size,
        max_in_flight: 1,
        ..Default::default()
    }
}

pub fn params(pairs: &[(&str, f64)]) -> Parameters {
    pairs.iter().map(|(k, v)| (*k, *v)).collect()
}

pub fn init_tracing() {
    batchsim_core::logging::init_logging();
}
