//! Recovery of a consumer's start position from persisted offset records.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::binding::StartPosition;
use crate::error::ConsumerError;
use crate::topic::STATUS_TOPIC_PATTERN;

/// Last consumed position for a topic partition, as persisted by the owner.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OffsetRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    #[serde(rename = "ownerIdentity")]
    pub owner_identity: String,
}

/// Read-only query against the external offset store.
#[async_trait]
pub trait OffsetStore: Send + Sync + std::fmt::Debug {
    /// Records owned by `owner_identity` whose topic matches the regex `topic_pattern`.
    async fn query(
        &self,
        owner_identity: &str,
        topic_pattern: &str,
    ) -> Result<Vec<OffsetRecord>, ConsumerError>;
}

/// In-memory offset store for embedding and tests.
#[derive(Clone, Debug, Default)]
pub struct InMemoryOffsetStore {
    records: Arc<RwLock<Vec<OffsetRecord>>>,
}

impl InMemoryOffsetStore {
    pub fn new(records: Vec<OffsetRecord>) -> Self {
        Self { records: Arc::new(RwLock::new(records)) }
    }

    pub fn insert(&self, record: OffsetRecord) {
        self.records.write().unwrap_or_else(|e| e.into_inner()).push(record);
    }
}

#[async_trait]
impl OffsetStore for InMemoryOffsetStore {
    async fn query(
        &self,
        owner_identity: &str,
        topic_pattern: &str,
    ) -> Result<Vec<OffsetRecord>, ConsumerError> {
        let pattern = regex::Regex::new(topic_pattern)
            .map_err(|e| ConsumerError::OffsetQuery(format!("bad topic pattern: {e}")))?;
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        Ok(records
            .iter()
            .filter(|r| !r.owner_identity.is_empty() && r.owner_identity == owner_identity)
            .filter(|r| pattern.is_match(&r.topic))
            .cloned()
            .collect())
    }
}

/// Start positions for `cluster_identity` across its status topics, sorted by topic/partition.
pub async fn initial_positions(
    store: &dyn OffsetStore,
    cluster_identity: &str,
) -> Result<Vec<StartPosition>, ConsumerError> {
    if cluster_identity.is_empty() {
        return Ok(Vec::new());
    }
    let records = store.query(cluster_identity, STATUS_TOPIC_PATTERN).await?;
    let mut positions: Vec<StartPosition> = records
        .into_iter()
        .map(|r| StartPosition { topic: r.topic, partition: r.partition, offset: r.offset })
        .collect();
    positions.sort();
    positions.dedup_by(|a, b| a.topic == b.topic && a.partition == b.partition);
    Ok(positions)
}
