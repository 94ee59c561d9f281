//! Canonical topic strings.
//!
//! Agent ids and model ids are single path segments. Topics written by the
//! controller live under `<prefix>/server/...`, topics written by agents
//! under `<prefix>/client/...`.

use crate::constants::TOPIC_PREFIX;
use crate::types::{AgentId, TaskKind};

/// Builds every topic used by the protocol for one namespace prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlotillaTopics {
    prefix: String,
}

impl Default for FlotillaTopics {
    fn default() -> Self {
        Self::new(TOPIC_PREFIX)
    }
}

impl FlotillaTopics {
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        let prefix = prefix.trim_end_matches('/').to_string();
        Self { prefix }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// controller → all agents
    pub fn server_advertise(&self) -> String {
        format!("{}/server/advertise", self.prefix)
    }

    /// agent → controller; the payload is keyed by agent id.
    pub fn client_advertise(&self) -> String {
        format!("{}/client/advertise", self.prefix)
    }

    pub fn heartbeat(&self, agent_id: &AgentId) -> String {
        format!("{}/client/heartbeat/{}", self.prefix, agent_id)
    }

    pub fn heartbeat_filter(&self) -> String {
        format!("{}/client/heartbeat/+", self.prefix)
    }

    pub fn command(&self, agent_id: &AgentId) -> String {
        format!("{}/server/command/{}", self.prefix, agent_id)
    }

    pub fn status(&self, agent_id: &AgentId) -> String {
        format!("{}/client/status/{}", self.prefix, agent_id)
    }

    pub fn status_filter(&self) -> String {
        format!("{}/client/status/+", self.prefix)
    }

    pub fn result(&self, kind: TaskKind, agent_id: &AgentId) -> String {
        format!(
            "{}/client/result/{}/{}",
            self.prefix,
            kind.result_segment(),
            agent_id
        )
    }

    pub fn result_filter(&self) -> String {
        format!("{}/client/result/#", self.prefix)
    }

    /// controller → all agents
    pub fn model_global(&self) -> String {
        format!("{}/server/model/global", self.prefix)
    }

    pub fn model_artifact(&self, model_id: &str) -> String {
        format!("{}/server/model/artifact/{}", self.prefix, model_id)
    }

    pub fn model_artifact_filter(&self) -> String {
        format!("{}/server/model/artifact/+", self.prefix)
    }

    /// True when `value` can stand as one level of a concrete topic: not
    /// empty, no level separator, no wildcards, no NUL.
    pub fn is_topic_segment(value: &str) -> bool {
        !value.is_empty() && !value.contains(['/', '+', '#', '\0'])
    }

    /// Returns the trailing segment of `topic` when it sits directly under
    /// `base` (e.g. the agent id of a heartbeat or status topic).
    pub fn trailing_segment<'a>(base: &str, topic: &'a str) -> Option<&'a str> {
        let base = base.trim_end_matches("/+").trim_end_matches("/#");
        let rest = topic.strip_prefix(base)?.strip_prefix('/')?;
        if rest.is_empty() || rest.contains('/') {
            None
        } else {
            Some(rest)
        }
    }

    /// Splits a result topic into its task kind and agent id.
    pub fn parse_result_topic(&self, topic: &str) -> Option<(TaskKind, AgentId)> {
        let rest = topic
            .strip_prefix(&self.prefix)?
            .strip_prefix("/client/result/")?;
        let (segment, agent) = rest.split_once('/')?;
        if agent.is_empty() || agent.contains('/') {
            return None;
        }
        let kind = match segment {
            "benchmark" => TaskKind::Benchmark,
            "train" => TaskKind::Train,
            "test" => TaskKind::Test,
            _ => return None,
        };
        Some((kind, AgentId::new(agent)))
    }
}
