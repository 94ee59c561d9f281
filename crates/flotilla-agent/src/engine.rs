//! Execution engine seam.
//!
//! The agent never interprets model weights or metrics; it hands each task
//! to an [`ExecutionEngine`] and forwards what comes back. Engine calls are
//! blocking and may run for minutes, so the dispatcher always invokes them
//! on the blocking thread pool.

use std::path::PathBuf;

use flotilla_protocol::{BenchmarkParams, Metrics, TestParams, TrainParams};

use crate::error::EngineError;

#[derive(Debug, Clone)]
pub struct BenchmarkRequest {
    pub params: BenchmarkParams,
    /// Cached model directory, if the model has been pushed to this agent.
    pub model_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct TrainRequest {
    pub params: TrainParams,
    pub model_dir: Option<PathBuf>,
    /// Weights from the current global model snapshot.
    pub initial_weights: Option<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub struct ValidateRequest {
    pub params: TestParams,
    pub model_dir: Option<PathBuf>,
    pub weights: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BenchmarkOutcome {
    /// Hash identifying the exact model code that was benchmarked.
    pub model_hash: String,
    pub duration_s: f64,
    pub mini_batch_count: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainOutcome {
    pub metrics: Metrics,
    pub weights: Vec<u8>,
}

/// Trait for running training workloads on local hardware.
pub trait ExecutionEngine: Send + Sync {
    fn benchmark(&self, request: BenchmarkRequest) -> Result<BenchmarkOutcome, EngineError>;

    fn train(&self, request: TrainRequest) -> Result<TrainOutcome, EngineError>;

    fn validate(&self, request: ValidateRequest) -> Result<Metrics, EngineError>;
}
