//! Receivers for controller-pushed model state: global weight snapshots
//! and packaged model code.
//!
//! Failures here are logged by the caller and never reported on the status
//! topic; there is no task to attach them to.

use std::path::PathBuf;

use chrono::Utc;
use flotilla_protocol::digest::{matches_sha256, sha256_hex};
use flotilla_protocol::{
    decode, decode_blob, FlotillaTopics, GlobalModelBroadcast, ModelArtifactPush, ProtocolError,
};

use crate::artifact::{validate_model_id, ModelCache};
use crate::error::ArtifactError;
use crate::state::{GlobalModelSnapshot, SnapshotStore};

#[derive(Debug, Clone)]
pub struct ModelDistribution {
    topics: FlotillaTopics,
    snapshots: SnapshotStore,
    cache: ModelCache,
}

impl ModelDistribution {
    pub fn new(topics: FlotillaTopics, snapshots: SnapshotStore, cache: ModelCache) -> Self {
        Self {
            topics,
            snapshots,
            cache,
        }
    }

    /// Replace the current snapshot with the broadcast one.
    pub async fn on_global_model(&self, payload: &[u8]) -> Result<Option<i64>, ProtocolError> {
        let broadcast: GlobalModelBroadcast = decode(payload)?;
        let weights = broadcast
            .weights_b64
            .as_deref()
            .map(decode_blob)
            .transpose()?;

        if let Some(previous) = self.snapshots.current().await {
            if let (Some(prev), Some(next)) = (previous.round_id, broadcast.round_id) {
                if next < prev {
                    tracing::debug!(previous = prev, round_id = next, "Global model round moved backwards");
                }
            }
        }

        tracing::info!(
            round_id = ?broadcast.round_id,
            weight_bytes = weights.as_ref().map(Vec::len).unwrap_or(0),
            "Global model snapshot replaced"
        );
        self.snapshots
            .replace(GlobalModelSnapshot {
                round_id: broadcast.round_id,
                weights,
                received_at: Utc::now(),
            })
            .await;
        Ok(broadcast.round_id)
    }

    /// Verify and install a pushed model archive.
    pub async fn on_artifact(&self, topic: &str, payload: &[u8]) -> Result<PathBuf, ArtifactError> {
        let push: ModelArtifactPush = decode(payload)?;
        validate_model_id(&push.model_id)?;

        let filter = self.topics.model_artifact_filter();
        if let Some(segment) = FlotillaTopics::trailing_segment(&filter, topic) {
            if segment != push.model_id {
                tracing::warn!(
                    topic_model = segment,
                    model_id = %push.model_id,
                    "Artifact topic and body disagree on model id; using body"
                );
            }
        }

        let archive = decode_blob(&push.artifact_b64)?;
        if let Some(expected) = &push.sha256 {
            if !matches_sha256(&archive, expected) {
                return Err(ArtifactError::ChecksumMismatch {
                    model_id: push.model_id,
                    expected: expected.clone(),
                    actual: sha256_hex(&archive),
                });
            }
        }

        let cache = self.cache.clone();
        let model_id = push.model_id.clone();
        let size = archive.len();
        let installed = tokio::task::spawn_blocking(move || cache.install(&model_id, &archive))
            .await
            .map_err(|e| ArtifactError::Aborted(e.to_string()))??;

        tracing::info!(
            model_id = %push.model_id,
            archive_bytes = size,
            path = %installed.display(),
            "Model artifact installed"
        );
        Ok(installed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flotilla_protocol::{encode, encode_blob};

    fn distribution(dir: &std::path::Path) -> ModelDistribution {
        ModelDistribution::new(
            FlotillaTopics::default(),
            SnapshotStore::default(),
            ModelCache::under(dir),
        )
    }

    fn archive() -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_gnu();
        header.set_size(2);
        header.set_mode(0o644);
        builder.append_data(&mut header, "net.py", &b"ok"[..]).unwrap();
        builder.into_inner().unwrap()
    }

    #[tokio::test]
    async fn test_global_model_without_weights_clears_previous() {
        let dir = tempfile::tempdir().unwrap();
        let dist = distribution(dir.path());
        let first = encode(&GlobalModelBroadcast {
            round_id: Some(1),
            weights_b64: Some(encode_blob(b"w1")),
        })
        .unwrap();
        dist.on_global_model(&first).await.unwrap();
        assert_eq!(dist.snapshots.weights().await, Some(b"w1".to_vec()));

        dist.on_global_model(br#"{"round_id": 2}"#).await.unwrap();
        let current = dist.snapshots.current().await.unwrap();
        assert_eq!(current.round_id, Some(2));
        assert!(current.weights.is_none());
    }

    #[tokio::test]
    async fn test_bad_weights_leave_snapshot_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let dist = distribution(dir.path());
        dist.on_global_model(br#"{"round_id": 1, "weights_b64": "AAEC"}"#)
            .await
            .unwrap();
        assert!(dist
            .on_global_model(br#"{"round_id": 2, "weights_b64": "***"}"#)
            .await
            .is_err());
        assert_eq!(dist.snapshots.current().await.unwrap().round_id, Some(1));
    }

    #[tokio::test]
    async fn test_artifact_installed_with_matching_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let dist = distribution(dir.path());
        let archive = archive();
        let push = ModelArtifactPush {
            model_id: "m1".into(),
            artifact_b64: encode_blob(&archive),
            sha256: Some(sha256_hex(&archive).to_uppercase()),
        };
        let topic = FlotillaTopics::default().model_artifact("m1");
        let path = dist.on_artifact(&topic, &encode(&push).unwrap()).await.unwrap();
        assert!(path.join("net.py").is_file());
    }

    #[tokio::test]
    async fn test_artifact_checksum_mismatch_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let dist = distribution(dir.path());
        let push = ModelArtifactPush {
            model_id: "m1".into(),
            artifact_b64: encode_blob(&archive()),
            sha256: Some("00".repeat(32)),
        };
        let topic = FlotillaTopics::default().model_artifact("m1");
        let err = dist
            .on_artifact(&topic, &encode(&push).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, ArtifactError::ChecksumMismatch { .. }));
        assert!(dist.cache.resolve("m1").is_none());
    }

    #[tokio::test]
    async fn test_artifact_with_unsafe_model_id_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let dist = distribution(dir.path());
        let push = ModelArtifactPush {
            model_id: "..".into(),
            artifact_b64: encode_blob(&archive()),
            sha256: None,
        };
        let err = dist
            .on_artifact("flotilla/server/model/artifact/..", &encode(&push).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, ArtifactError::InvalidModelId(_)));
    }
}
