//! Payloads as produced by existing flotilla controllers and clients must
//! decode into the typed envelopes unchanged.

use flotilla_protocol::*;

#[test]
fn test_decode_controller_benchmark_command() {
    let raw = br#"{
        "task": "BENCHMARK",
        "task_id": "bench-0",
        "round_id": -1,
        "session_id": "sess-42",
        "params": {
            "model_id": "m1",
            "model_class": "CNN",
            "model_config": {"channels": 3},
            "dataset_id": "cifar10",
            "batch_size": 16,
            "learning_rate": 0.001,
            "timeout_duration_s": 30.0,
            "bench_minibatch_count": 10
        }
    }"#;
    let envelope: CommandEnvelope = decode(raw).unwrap();
    let cmd = envelope.into_command().unwrap();
    assert_eq!(cmd.kind(), TaskKind::Benchmark);
    assert_eq!(cmd.session_id.as_deref(), Some("sess-42"));
    match cmd.assignment {
        TaskAssignment::Benchmark(p) => {
            assert_eq!(p.bench_minibatch_count, Some(10));
            assert_eq!(p.model_config, Some(serde_json::json!({"channels": 3})));
        }
        other => panic!("unexpected assignment {other:?}"),
    }
}

#[test]
fn test_decode_global_model_broadcast_with_weights() {
    let weights = encode_blob(b"\x80\x04weights");
    let raw = format!(r#"{{"round_id": 7, "weights_b64": "{weights}"}}"#);
    let msg: GlobalModelBroadcast = decode(raw.as_bytes()).unwrap();
    assert_eq!(msg.round_id, Some(7));
    let bytes = decode_blob(msg.weights_b64.as_deref().unwrap()).unwrap();
    assert_eq!(bytes, b"\x80\x04weights");
}

#[test]
fn test_decode_global_model_broadcast_without_fields() {
    let msg: GlobalModelBroadcast = decode(b"{}").unwrap();
    assert!(msg.round_id.is_none());
    assert!(msg.weights_b64.is_none());
}

#[test]
fn test_train_result_shape() {
    let mut metrics = Metrics::new();
    metrics.insert("loss".into(), serde_json::json!(0.5));
    let result = TrainResult {
        session_id: Some("s".into()),
        round_id: Some(2),
        task_id: "t".into(),
        metrics,
        weights_b64: encode_blob(b"w"),
        timestamp: 3.0,
    };
    let value = serde_json::to_value(&result).unwrap();
    assert_eq!(value["metrics"]["loss"], 0.5);
    assert_eq!(value["weights_b64"], "dw==");
}

#[test]
fn test_benchmark_result_field_names() {
    let result = BenchmarkResult {
        session_id: None,
        task_id: "b".into(),
        model_id: "m".into(),
        hash: "abc".into(),
        bench_duration_s: 1.25,
        num_mini_batches: 4,
        timestamp: 9.0,
    };
    let value = serde_json::to_value(&result).unwrap();
    for field in ["task_id", "model_id", "hash", "bench_duration_s", "num_mini_batches", "timestamp"] {
        assert!(value.get(field).is_some(), "missing {field}");
    }
}

#[test]
fn test_status_decodes_without_optional_context() {
    let status: StatusMessage =
        decode(br#"{"task_id": null, "status": "ERROR", "timestamp": 1.0, "message": "x"}"#)
            .unwrap();
    assert_eq!(status.status, TaskStatus::Error);
    assert!(status.task_id.is_none());
}
