//! Mapping from dispatch failures to ERROR status reports.
//!
//! Every error raised while handling a command ends up here, and nowhere
//! else decides what the controller sees. Artifact installation failures
//! are not dispatch failures and never pass through this mapping.

use flotilla_protocol::{unix_timestamp, CommandMessage, StatusMessage, TaskKind, TaskStatus};

use crate::error::{DispatchError, EngineError};

/// Identity of the task a status report belongs to. Fields are optional
/// because a malformed command may not carry them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskContext {
    pub task_id: Option<String>,
    pub round_id: Option<i64>,
    pub session_id: Option<String>,
    pub kind: Option<TaskKind>,
}

impl TaskContext {
    /// Best-effort context from a payload that failed to decode.
    pub fn peek(payload: &[u8]) -> Self {
        let Ok(value) = serde_json::from_slice::<serde_json::Value>(payload) else {
            return Self::default();
        };
        let text = |field: &str| {
            value
                .get(field)
                .and_then(|v| v.as_str())
                .map(str::to_string)
        };
        Self {
            task_id: text("task_id").filter(|id| !id.trim().is_empty()),
            round_id: value.get("round_id").and_then(|v| v.as_i64()),
            session_id: text("session_id"),
            kind: text("task").and_then(|t| t.parse().ok()),
        }
    }

    pub fn status(&self, status: TaskStatus, message: Option<String>) -> StatusMessage {
        StatusMessage {
            session_id: self.session_id.clone(),
            round_id: self.round_id,
            task_id: self.task_id.clone(),
            status,
            timestamp: unix_timestamp(),
            message,
        }
    }
}

impl From<&CommandMessage> for TaskContext {
    fn from(command: &CommandMessage) -> Self {
        Self {
            task_id: Some(command.task_id.clone()),
            round_id: command.round_id,
            session_id: command.session_id.clone(),
            kind: Some(command.kind()),
        }
    }
}

/// Human-readable reason carried in the ERROR message field.
pub fn failure_message(error: &DispatchError) -> String {
    match error {
        DispatchError::Engine(EngineError::ArtifactUnavailable(detail)) => {
            format!("artifact missing: {detail}")
        }
        DispatchError::Engine(EngineError::Execution(detail)) => {
            format!("execution failed: {detail}")
        }
        DispatchError::Protocol(e) => format!("invalid command: {e}"),
        DispatchError::Transport(e) => format!("transport failure: {e}"),
        DispatchError::EngineAborted(detail) => format!("execution aborted: {detail}"),
        DispatchError::Duplicate(_) | DispatchError::IllegalTransition { .. } => error.to_string(),
    }
}

/// The ERROR status that reports `error` for the task in `ctx`.
pub fn failure_status(ctx: &TaskContext, error: &DispatchError) -> StatusMessage {
    ctx.status(TaskStatus::Error, Some(failure_message(error)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flotilla_protocol::ProtocolError;

    #[test]
    fn test_peek_extracts_context_from_bad_command() {
        let ctx = TaskContext::peek(
            br#"{"task": "AGGREGATE", "task_id": "t3", "round_id": 4, "session_id": "s"}"#,
        );
        assert_eq!(ctx.task_id.as_deref(), Some("t3"));
        assert_eq!(ctx.round_id, Some(4));
        assert_eq!(ctx.session_id.as_deref(), Some("s"));
        assert!(ctx.kind.is_none());
    }

    #[test]
    fn test_peek_on_garbage_is_empty() {
        assert_eq!(TaskContext::peek(b"\x00\x01"), TaskContext::default());
    }

    #[test]
    fn test_artifact_unavailable_mapping() {
        let ctx = TaskContext {
            task_id: Some("t1".into()),
            kind: Some(TaskKind::Benchmark),
            ..Default::default()
        };
        let status = failure_status(
            &ctx,
            &DispatchError::Engine(EngineError::ArtifactUnavailable("model 'm1'".into())),
        );
        assert_eq!(status.status, TaskStatus::Error);
        assert_eq!(status.task_id.as_deref(), Some("t1"));
        assert_eq!(status.message.as_deref(), Some("artifact missing: model 'm1'"));
    }

    #[test]
    fn test_unknown_kind_message_names_kind() {
        let status = failure_status(
            &TaskContext::default(),
            &DispatchError::Protocol(ProtocolError::UnknownTaskKind("AGGREGATE".into())),
        );
        assert!(status.task_id.is_none());
        assert!(status.message.unwrap().contains("AGGREGATE"));
    }
}
