use std::time::Duration;

use flotilla_bus::BusError;
use flotilla_protocol::ProtocolError;

use crate::tracker::TaskPhase;

/// Failure raised by the execution engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Model code or weights required by the task are not cached locally.
    #[error("artifact unavailable: {0}")]
    ArtifactUnavailable(String),

    #[error("execution failed: {0}")]
    Execution(String),
}

/// Failure while installing a pushed model artifact. Never reported on the
/// status topic.
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("invalid model id '{0}'")]
    InvalidModelId(String),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("checksum mismatch for model '{model_id}': expected {expected}, got {actual}")]
    ChecksumMismatch {
        model_id: String,
        expected: String,
        actual: String,
    },

    #[error("archive entry '{0}' escapes the model directory")]
    UnsafeEntry(String),

    #[error("archive entry '{path}' has unsupported type {kind}")]
    UnsupportedEntry { path: String, kind: String },

    #[error("extraction aborted: {0}")]
    Aborted(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure while handling one command.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("invalid command: {0}")]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Transport(#[from] BusError),

    #[error("engine task aborted: {0}")]
    EngineAborted(String),

    #[error("duplicate delivery of task '{0}'")]
    Duplicate(String),

    #[error("illegal transition for task '{task_id}': {from:?} -> {to:?}")]
    IllegalTransition {
        task_id: String,
        from: Option<TaskPhase>,
        to: TaskPhase,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum HeartbeatError {
    #[error("heartbeat encoding failed: {0}")]
    Encode(#[from] ProtocolError),

    #[error(transparent)]
    Transport(#[from] BusError),
}

#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("no advertisement answered within {0:?}")]
    Timeout(Duration),

    #[error("shutdown requested before handshake completed")]
    ShutDown,

    #[error("bus closed before handshake completed")]
    BusClosed,

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Transport(#[from] BusError),
}

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    #[error(transparent)]
    Transport(#[from] BusError),

    #[error("inbound stream already consumed")]
    InboundConsumed,
}
