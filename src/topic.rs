//! Topic naming and access grants.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Hub → managed cluster topic.
pub const SPEC_TOPIC: &str = "spec";
/// Auxiliary bus topic, reserved for multi-subscriber use.
pub const EVENT_TOPIC: &str = "event";
/// Managed cluster → hub topics are `status.<identity>`.
pub const STATUS_TOPIC_PREFIX: &str = "status";
/// Pattern matching every status topic; used to scope offset recovery.
pub const STATUS_TOPIC_PATTERN: &str = "^status";

/// The three topics serving one logical cluster.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClusterTopicSet {
    pub spec_topic: String,
    pub status_topic: String,
    pub event_topic: String,
}

impl ClusterTopicSet {
    /// Derive the topic names for `cluster_identity`. Pure; same input, same names.
    pub fn for_cluster(cluster_identity: &str) -> Self {
        Self {
            spec_topic: SPEC_TOPIC.to_string(),
            status_topic: format!("{STATUS_TOPIC_PREFIX}.{cluster_identity}"),
            event_topic: EVENT_TOPIC.to_string(),
        }
    }

    /// All three names in creation order.
    pub fn all(&self) -> [&str; 3] {
        [&self.spec_topic, &self.status_topic, &self.event_topic]
    }
}

/// Access granted to a principal on a topic.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    Read,
    Write,
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessMode::Read => write!(f, "read"),
            AccessMode::Write => write!(f, "write"),
        }
    }
}

/// A (principal, topic, access-mode) triple. Grants are additive and idempotent.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Grant {
    pub principal: String,
    pub topic: String,
    pub mode: AccessMode,
}

impl Grant {
    pub fn new(principal: impl Into<String>, topic: impl Into<String>, mode: AccessMode) -> Self {
        Self { principal: principal.into(), topic: topic.into(), mode }
    }
}
