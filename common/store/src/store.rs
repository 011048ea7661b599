use async_trait::async_trait;

use crate::error::Result;
use crate::records::{Checkpoint, PartitionOwnership};

/// Contract for the durable ownership/checkpoint store.
///
/// Implementations must provide compare-and-set semantics keyed on the
/// record eTag: a write is accepted only when its eTag matches the stored
/// one, or when the record does not exist and the request carries no eTag.
/// Every accepted write updates `last_modified_ms` and returns a fresh eTag.
#[async_trait]
pub trait OwnershipStore: Send + Sync {
    /// All ownership records ever written for the `(topic, consumer_group)`
    /// pair. May be empty.
    async fn list_ownership(
        &self,
        topic: &str,
        consumer_group: &str,
    ) -> Result<Vec<PartitionOwnership>>;

    /// Attempt the given claims, returning the subset that was committed.
    ///
    /// A claim losing its eTag comparison is dropped from the result, not an
    /// error. Losing a race is normal operation.
    async fn claim_ownership(
        &self,
        requests: Vec<PartitionOwnership>,
    ) -> Result<Vec<PartitionOwnership>>;

    /// Persist a checkpoint under the same eTag discipline, returning the
    /// new eTag. A stale eTag here is [`StoreError::Conflict`]: the caller
    /// believed it owned the partition and should find out it does not.
    ///
    /// [`StoreError::Conflict`]: crate::error::StoreError::Conflict
    async fn update_checkpoint(&self, checkpoint: Checkpoint) -> Result<String>;
}
