//! Mock execution engine for testing
//!
//! Produces deterministic results without touching any ML runtime, and
//! records every call so tests can check what the dispatcher handed over.

use std::sync::Mutex;
use std::time::Duration;

use flotilla_protocol::digest::sha256_hex;
use flotilla_protocol::{Metrics, TaskKind};

use crate::engine::{
    BenchmarkOutcome, BenchmarkRequest, ExecutionEngine, TrainOutcome, TrainRequest,
    ValidateRequest,
};
use crate::error::EngineError;

/// Suffix appended to the input weights by a mock training run.
pub const MOCK_TRAINED_SUFFIX: &[u8] = b"+trained";

/// One engine invocation as observed by the mock.
#[derive(Debug, Clone, PartialEq)]
pub struct MockCall {
    pub kind: TaskKind,
    pub model_id: String,
    pub had_model_dir: bool,
    pub weights: Option<Vec<u8>>,
}

#[derive(Default)]
pub struct MockEngine {
    train_delay: Duration,
    train_failure: Option<String>,
    validate_failure: Option<String>,
    calls: Mutex<Vec<MockCall>>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block every training call for `delay`.
    pub fn with_train_delay(mut self, delay: Duration) -> Self {
        self.train_delay = delay;
        self
    }

    pub fn failing_train(mut self, message: impl Into<String>) -> Self {
        self.train_failure = Some(message.into());
        self
    }

    pub fn failing_validate(mut self, message: impl Into<String>) -> Self {
        self.validate_failure = Some(message.into());
        self
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn record(&self, call: MockCall) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }
}

impl ExecutionEngine for MockEngine {
    fn benchmark(&self, request: BenchmarkRequest) -> Result<BenchmarkOutcome, EngineError> {
        self.record(MockCall {
            kind: TaskKind::Benchmark,
            model_id: request.params.model_id.clone(),
            had_model_dir: request.model_dir.is_some(),
            weights: None,
        });
        if request.model_dir.is_none() {
            return Err(EngineError::ArtifactUnavailable(format!(
                "model '{}' is not cached",
                request.params.model_id
            )));
        }
        Ok(BenchmarkOutcome {
            model_hash: sha256_hex(request.params.model_id.as_bytes()),
            duration_s: 0.01,
            mini_batch_count: request.params.bench_minibatch_count.unwrap_or(10),
        })
    }

    fn train(&self, request: TrainRequest) -> Result<TrainOutcome, EngineError> {
        self.record(MockCall {
            kind: TaskKind::Train,
            model_id: request.params.model_id.clone(),
            had_model_dir: request.model_dir.is_some(),
            weights: request.initial_weights.clone(),
        });
        if !self.train_delay.is_zero() {
            std::thread::sleep(self.train_delay);
        }
        if let Some(message) = &self.train_failure {
            return Err(EngineError::Execution(message.clone()));
        }

        let mut weights = request.initial_weights.unwrap_or_default();
        weights.extend_from_slice(MOCK_TRAINED_SUFFIX);
        let mut metrics = Metrics::new();
        metrics.insert("loss".into(), serde_json::json!(0.5));
        metrics.insert("epochs".into(), serde_json::json!(request.params.num_epochs));
        Ok(TrainOutcome { metrics, weights })
    }

    fn validate(&self, request: ValidateRequest) -> Result<Metrics, EngineError> {
        self.record(MockCall {
            kind: TaskKind::Test,
            model_id: request.params.model_id.clone(),
            had_model_dir: request.model_dir.is_some(),
            weights: request.weights.clone(),
        });
        if let Some(message) = &self.validate_failure {
            return Err(EngineError::Execution(message.clone()));
        }
        let mut metrics = Metrics::new();
        metrics.insert("accuracy".into(), serde_json::json!(0.9));
        Ok(metrics)
    }
}
