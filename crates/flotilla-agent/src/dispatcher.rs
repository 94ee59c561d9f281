//! Command dispatcher.
//!
//! Drives each command through its lifecycle:
//!
//! ```text
//! Idle ──▶ Started ──▶ Completed
//!   │          │
//!   └──────────┴─────▶ Failed
//! ```
//!
//! On the wire that is `<KIND>_STARTED`, then the result, then
//! `<KIND>_COMPLETED`; or `ERROR` in place of both the result and the
//! completion. Commands are handled one at a time in arrival order.

use std::sync::Arc;
use std::time::Duration;

use flotilla_bus::MessageBus;
use flotilla_protocol::{
    decode, encode, encode_blob, unix_timestamp, AgentId, BenchmarkResult, CommandEnvelope,
    CommandMessage, FlotillaTopics, StatusMessage, TaskAssignment, TaskKind, TaskStatus,
    TestResult, TrainResult,
};

use crate::artifact::ModelCache;
use crate::engine::{BenchmarkRequest, ExecutionEngine, TrainRequest, ValidateRequest};
use crate::error::{DispatchError, EngineError};
use crate::failure::{failure_status, TaskContext};
use crate::state::SnapshotStore;
use crate::tracker::{TaskPhase, TaskTracker};

/// What became of one inbound command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Completed { task_id: String, kind: TaskKind },
    Failed { task_id: Option<String> },
    Duplicate { task_id: String },
}

pub struct CommandDispatcher {
    agent_id: AgentId,
    topics: FlotillaTopics,
    bus: Arc<dyn MessageBus>,
    engine: Arc<dyn ExecutionEngine>,
    snapshots: SnapshotStore,
    cache: ModelCache,
    tracker: TaskTracker,
}

impl CommandDispatcher {
    pub fn new(
        agent_id: AgentId,
        topics: FlotillaTopics,
        bus: Arc<dyn MessageBus>,
        engine: Arc<dyn ExecutionEngine>,
        snapshots: SnapshotStore,
        cache: ModelCache,
        duplicate_window: Duration,
    ) -> Self {
        Self {
            agent_id,
            topics,
            bus,
            engine,
            snapshots,
            cache,
            tracker: TaskTracker::new(duplicate_window),
        }
    }

    /// Handle one payload from the command topic. Never fails: every error
    /// is turned into an ERROR status or a log line.
    pub async fn handle(&mut self, payload: &[u8]) -> DispatchOutcome {
        let command = match decode::<CommandEnvelope>(payload).and_then(CommandEnvelope::into_command)
        {
            Ok(command) => command,
            Err(e) => return self.reject(payload, DispatchError::Protocol(e)).await,
        };

        let ctx = TaskContext::from(&command);
        let task_id = command.task_id.clone();
        let kind = command.kind();
        if let Err(e) = self.tracker.admit(&task_id) {
            tracing::warn!(task_id = %task_id, error = %e, "Ignoring redelivered command");
            return DispatchOutcome::Duplicate { task_id };
        }
        tracing::info!(
            task_id = %task_id,
            kind = %kind,
            round_id = ?command.round_id,
            model_id = command.assignment.model_id(),
            "Command accepted"
        );

        match self.execute(&ctx, command).await {
            Ok(()) => {
                tracing::info!(task_id = %task_id, kind = %kind, "Task completed");
                DispatchOutcome::Completed { task_id, kind }
            }
            Err(e) => {
                self.report_failure(&ctx, &e).await;
                DispatchOutcome::Failed {
                    task_id: Some(task_id),
                }
            }
        }
    }

    /// Answer a command that failed validation.
    async fn reject(&mut self, payload: &[u8], error: DispatchError) -> DispatchOutcome {
        let ctx = TaskContext::peek(payload);
        tracing::warn!(task_id = ?ctx.task_id, error = %error, "Rejecting malformed command");
        if let Some(task_id) = &ctx.task_id {
            if self.tracker.admit(task_id).is_err() {
                tracing::warn!(task_id = %task_id, "Ignoring redelivered malformed command");
                return DispatchOutcome::Duplicate {
                    task_id: task_id.clone(),
                };
            }
        }
        self.report_failure(&ctx, &error).await;
        DispatchOutcome::Failed {
            task_id: ctx.task_id,
        }
    }

    async fn execute(&mut self, ctx: &TaskContext, command: CommandMessage) -> Result<(), DispatchError> {
        let kind = command.kind();
        self.publish_status(ctx, kind.started_status()).await?;

        let model_dir = self.cache.resolve(command.assignment.model_id());
        let topic = self.topics.result(kind, &self.agent_id);
        let result = match command.assignment {
            TaskAssignment::Benchmark(params) => {
                let model_id = params.model_id.clone();
                let outcome = self
                    .run_engine(move |engine| engine.benchmark(BenchmarkRequest { params, model_dir }))
                    .await?;
                encode(&BenchmarkResult {
                    session_id: command.session_id.clone(),
                    task_id: command.task_id.clone(),
                    model_id,
                    hash: outcome.model_hash,
                    bench_duration_s: outcome.duration_s,
                    num_mini_batches: outcome.mini_batch_count,
                    timestamp: unix_timestamp(),
                })?
            }
            TaskAssignment::Train(params) => {
                let initial_weights = self.snapshots.weights().await;
                let outcome = self
                    .run_engine(move |engine| {
                        engine.train(TrainRequest {
                            params,
                            model_dir,
                            initial_weights,
                        })
                    })
                    .await?;
                encode(&TrainResult {
                    session_id: command.session_id.clone(),
                    round_id: command.round_id,
                    task_id: command.task_id.clone(),
                    metrics: outcome.metrics,
                    weights_b64: encode_blob(&outcome.weights),
                    timestamp: unix_timestamp(),
                })?
            }
            TaskAssignment::Test(params) => {
                let weights = self.snapshots.weights().await;
                let metrics = self
                    .run_engine(move |engine| {
                        engine.validate(ValidateRequest {
                            params,
                            model_dir,
                            weights,
                        })
                    })
                    .await?;
                encode(&TestResult {
                    session_id: command.session_id.clone(),
                    round_id: command.round_id,
                    task_id: command.task_id.clone(),
                    metrics,
                    timestamp: unix_timestamp(),
                })?
            }
        };

        self.bus.publish(&topic, result).await?;
        self.publish_status(ctx, kind.completed_status()).await
    }

    async fn run_engine<T, F>(&self, call: F) -> Result<T, DispatchError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn ExecutionEngine) -> Result<T, EngineError> + Send + 'static,
    {
        let engine = Arc::clone(&self.engine);
        let outcome = tokio::task::spawn_blocking(move || call(engine.as_ref()))
            .await
            .map_err(|e| DispatchError::EngineAborted(e.to_string()))?;
        Ok(outcome?)
    }

    async fn publish_status(&mut self, ctx: &TaskContext, status: TaskStatus) -> Result<(), DispatchError> {
        self.send_status(ctx, ctx.status(status, None)).await
    }

    /// STARTED and ERROR are recorded before they are published, so nothing
    /// can follow an ERROR and a failed STARTED still allows one. COMPLETED
    /// is recorded only once published: until then the task stays Started
    /// and a failed completion can still be reported as ERROR.
    async fn send_status(&mut self, ctx: &TaskContext, message: StatusMessage) -> Result<(), DispatchError> {
        let phase = TaskPhase::for_status(message.status);
        let payload = encode(&message)?;
        let topic = self.topics.status(&self.agent_id);
        match ctx.task_id.as_deref() {
            Some(task_id) if phase == TaskPhase::Completed => {
                self.tracker.check(task_id, phase)?;
                self.bus.publish(&topic, payload).await?;
                self.tracker.advance(task_id, phase)?;
            }
            Some(task_id) => {
                self.tracker.advance(task_id, phase)?;
                self.bus.publish(&topic, payload).await?;
            }
            None => self.bus.publish(&topic, payload).await?,
        }
        tracing::debug!(task_id = ?ctx.task_id, status = ?message.status, "Status published");
        Ok(())
    }

    /// Best effort: a failure to publish the ERROR itself is only logged.
    async fn report_failure(&mut self, ctx: &TaskContext, error: &DispatchError) {
        tracing::error!(task_id = ?ctx.task_id, kind = ?ctx.kind, error = %error, "Task failed");
        let status = failure_status(ctx, error);
        if let Err(e) = self.send_status(ctx, status).await {
            tracing::error!(task_id = ?ctx.task_id, error = %e, "Could not report task failure");
        }
    }

    pub fn tracker(&self) -> &TaskTracker {
        &self.tracker
    }
}
