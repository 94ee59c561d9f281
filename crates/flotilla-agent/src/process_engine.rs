//! Execution engine backed by an external program.
//!
//! Each call spawns the configured command, writes one JSON request to its
//! stdin and reads one JSON reply from its stdout:
//!
//! ```text
//! -> {"operation": "train", "params": {...}, "model_dir": "...", "weights_b64": "..."}
//! <- {"ok": {"metrics": {...}, "weights_b64": "..."}}
//! <- {"error": {"kind": "artifact_unavailable", "message": "..."}}
//! ```

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use flotilla_protocol::{decode_blob, encode_blob, Metrics};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::EngineSection;
use crate::engine::{
    BenchmarkOutcome, BenchmarkRequest, ExecutionEngine, TrainOutcome, TrainRequest,
    ValidateRequest,
};
use crate::error::EngineError;

pub struct ProcessEngine {
    command: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
}

#[derive(Serialize)]
struct EngineCall<'a, P: Serialize> {
    operation: &'a str,
    params: &'a P,
    #[serde(skip_serializing_if = "Option::is_none")]
    model_dir: Option<&'a Path>,
    #[serde(skip_serializing_if = "Option::is_none")]
    weights_b64: Option<String>,
}

#[derive(Deserialize)]
struct EngineReply {
    #[serde(default)]
    ok: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<EngineFailure>,
}

#[derive(Deserialize)]
struct EngineFailure {
    kind: String,
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct BenchmarkReply {
    model_hash: String,
    duration_s: f64,
    mini_batch_count: u64,
}

#[derive(Deserialize)]
struct TrainReply {
    #[serde(default)]
    metrics: Metrics,
    weights_b64: String,
}

#[derive(Deserialize)]
struct ValidateReply {
    #[serde(default)]
    metrics: Metrics,
}

impl ProcessEngine {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            working_dir: None,
        }
    }

    pub fn from_config(section: &EngineSection) -> Self {
        Self {
            command: section.command.clone(),
            args: section.args.clone(),
            working_dir: section.working_dir.clone(),
        }
    }

    fn invoke<P: Serialize, T: DeserializeOwned>(
        &self,
        call: &EngineCall<'_, P>,
    ) -> Result<T, EngineError> {
        let input = serde_json::to_vec(call)
            .map_err(|e| EngineError::Execution(format!("encoding engine request: {e}")))?;

        let mut command = Command::new(&self.command);
        command
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }
        let mut child = command
            .spawn()
            .map_err(|e| EngineError::Execution(format!("spawning '{}': {e}", self.command)))?;

        // Feed stdin from its own thread so a chatty engine cannot deadlock
        // against a full stdout pipe.
        let writer = child.stdin.take().map(|mut stdin| {
            std::thread::spawn(move || {
                let _ = stdin.write_all(&input);
            })
        });
        let output = child
            .wait_with_output()
            .map_err(|e| EngineError::Execution(format!("waiting for engine: {e}")))?;
        if let Some(writer) = writer {
            let _ = writer.join();
        }

        let reply: EngineReply = match serde_json::from_slice(&output.stdout) {
            Ok(reply) => reply,
            Err(_) if !output.status.success() => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Err(EngineError::Execution(format!(
                    "engine exited with {}: {}",
                    output.status,
                    stderr.trim()
                )));
            }
            Err(e) => {
                return Err(EngineError::Execution(format!("malformed engine reply: {e}")))
            }
        };

        match (reply.ok, reply.error) {
            (_, Some(failure)) if failure.kind == "artifact_unavailable" => {
                Err(EngineError::ArtifactUnavailable(failure.message))
            }
            (_, Some(failure)) => Err(EngineError::Execution(if failure.message.is_empty() {
                failure.kind
            } else {
                failure.message
            })),
            (Some(value), None) => serde_json::from_value(value)
                .map_err(|e| EngineError::Execution(format!("unexpected engine reply: {e}"))),
            (None, None) => Err(EngineError::Execution(
                "engine reply carried neither ok nor error".into(),
            )),
        }
    }
}

impl ExecutionEngine for ProcessEngine {
    fn benchmark(&self, request: BenchmarkRequest) -> Result<BenchmarkOutcome, EngineError> {
        let reply: BenchmarkReply = self.invoke(&EngineCall {
            operation: "benchmark",
            params: &request.params,
            model_dir: request.model_dir.as_deref(),
            weights_b64: None,
        })?;
        Ok(BenchmarkOutcome {
            model_hash: reply.model_hash,
            duration_s: reply.duration_s,
            mini_batch_count: reply.mini_batch_count,
        })
    }

    fn train(&self, request: TrainRequest) -> Result<TrainOutcome, EngineError> {
        let reply: TrainReply = self.invoke(&EngineCall {
            operation: "train",
            params: &request.params,
            model_dir: request.model_dir.as_deref(),
            weights_b64: request.initial_weights.as_deref().map(encode_blob),
        })?;
        let weights = decode_blob(&reply.weights_b64)
            .map_err(|e| EngineError::Execution(format!("engine weights: {e}")))?;
        Ok(TrainOutcome {
            metrics: reply.metrics,
            weights,
        })
    }

    fn validate(&self, request: ValidateRequest) -> Result<Metrics, EngineError> {
        let reply: ValidateReply = self.invoke(&EngineCall {
            operation: "validate",
            params: &request.params,
            model_dir: request.model_dir.as_deref(),
            weights_b64: request.weights.as_deref().map(encode_blob),
        })?;
        Ok(reply.metrics)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use flotilla_protocol::TestParams;

    fn validate_request() -> ValidateRequest {
        ValidateRequest {
            params: TestParams {
                model_id: "m1".into(),
                model_class: "Net".into(),
                model_config: None,
                dataset_id: "d1".into(),
                batch_size: 4,
            },
            model_dir: None,
            weights: Some(vec![1, 2, 3]),
        }
    }

    fn shell(script: &str) -> ProcessEngine {
        ProcessEngine::new("sh", vec!["-c".into(), script.into()])
    }

    #[test]
    fn test_ok_reply_is_parsed() {
        let engine = shell(r#"cat > /dev/null; echo '{"ok": {"metrics": {"accuracy": 0.75}}}'"#);
        let metrics = engine.validate(validate_request()).unwrap();
        assert_eq!(metrics["accuracy"], 0.75);
    }

    #[test]
    fn test_artifact_error_kind_is_mapped() {
        let engine = shell(
            r#"cat > /dev/null; echo '{"error": {"kind": "artifact_unavailable", "message": "no m1"}}'"#,
        );
        let err = engine.validate(validate_request()).unwrap_err();
        assert!(matches!(err, EngineError::ArtifactUnavailable(m) if m == "no m1"));
    }

    #[test]
    fn test_failed_process_reports_stderr() {
        let engine = shell("cat > /dev/null; echo kaboom >&2; exit 3");
        let err = engine.validate(validate_request()).unwrap_err();
        assert!(matches!(err, EngineError::Execution(m) if m.contains("kaboom")));
    }

    #[test]
    fn test_missing_binary_is_execution_error() {
        let engine = ProcessEngine::new("/nonexistent/flotilla-engine", vec![]);
        assert!(matches!(
            engine.validate(validate_request()),
            Err(EngineError::Execution(_))
        ));
    }

    #[test]
    fn test_request_reaches_engine_stdin() {
        // Echo the operation name back as a metric.
        let engine = shell(
            r#"op=$(sed -n 's/.*"operation":"\([a-z]*\)".*/\1/p'); echo "{\"ok\": {\"metrics\": {\"op\": \"$op\"}}}""#,
        );
        let metrics = engine.validate(validate_request()).unwrap();
        assert_eq!(metrics["op"], "validate");
    }
}
