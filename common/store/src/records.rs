use serde::{Deserialize, Serialize};

/// The durable record of a partition assignment attempt.
///
/// Logically keyed by `(topic, consumer_group, partition_id)`. Records are
/// created on first claim, rewritten by whichever processor wins a claim,
/// and never deleted: a dead owner is detected by record age, not by
/// absence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionOwnership {
    pub topic: String,
    pub consumer_group: String,
    pub partition_id: String,
    /// Stable id of the claiming processor instance.
    pub owner_id: String,
    /// Priority integer; 0 at this layer. Carried so stores or brokers that
    /// honor exclusive readers can act on it.
    pub owner_level: i64,
    /// Last checkpointed offset, if the partition has ever been
    /// checkpointed.
    pub offset: Option<i64>,
    /// Last checkpointed sequence number.
    pub sequence_number: Option<i64>,
    /// Epoch milliseconds of the last committed write. The liveness signal:
    /// a record older than the configured inactivity window is treated as
    /// abandoned.
    pub last_modified_ms: i64,
    /// Opaque version token minted by the store on every committed write.
    /// `None` on a first-claim request for a record that does not exist yet.
    pub etag: Option<String>,
}

impl PartitionOwnership {
    /// A first-claim request: no position, no eTag.
    pub fn new_claim(
        topic: impl Into<String>,
        consumer_group: impl Into<String>,
        partition_id: impl Into<String>,
        owner_id: impl Into<String>,
    ) -> Self {
        Self {
            topic: topic.into(),
            consumer_group: consumer_group.into(),
            partition_id: partition_id.into(),
            owner_id: owner_id.into(),
            owner_level: 0,
            offset: None,
            sequence_number: None,
            last_modified_ms: 0,
            etag: None,
        }
    }
}

/// A persisted progress marker, written only by the partition's owner.
///
/// The store does not enforce position order; a processor resuming from a
/// checkpoint restarts from whatever position is stored, which is why
/// delivery is at-least-once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub topic: String,
    pub consumer_group: String,
    pub owner_id: String,
    pub partition_id: String,
    pub offset: i64,
    pub sequence_number: i64,
    /// eTag of the ownership record this write expects to replace.
    pub etag: Option<String>,
}
