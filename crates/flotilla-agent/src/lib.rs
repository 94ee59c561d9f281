//! Flotilla agent.
//!
//! Joins a federated-learning session run by a remote controller, keeps it
//! informed of its liveness, executes BENCHMARK / TRAIN / TEST commands
//! through an [`ExecutionEngine`] and receives model weights and model code
//! pushed by the controller.

pub mod agent;
pub mod artifact;
pub mod config;
pub mod descriptor;
pub mod dispatcher;
pub mod distribution;
pub mod engine;
pub mod error;
pub mod failure;
pub mod handshake;
pub mod heartbeat;
pub mod mock_engine;
pub mod process_engine;
pub mod state;
pub mod tracker;

pub use agent::{AgentSettings, FlotillaAgent};
pub use artifact::ModelCache;
pub use config::{AgentConfig, ConfigError};
pub use descriptor::{AgentDescriptor, NetworkMode};
pub use dispatcher::{CommandDispatcher, DispatchOutcome};
pub use engine::{
    BenchmarkOutcome, BenchmarkRequest, ExecutionEngine, TrainOutcome, TrainRequest,
    ValidateRequest,
};
pub use error::{
    AgentError, ArtifactError, DispatchError, EngineError, HandshakeError, HeartbeatError,
};
pub use mock_engine::MockEngine;
pub use process_engine::ProcessEngine;
pub use state::{AgentState, GlobalModelSnapshot, MembershipState, SessionMembership, SnapshotStore};
