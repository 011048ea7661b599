//! Partition identity and the checkpoint gateway.

use std::sync::{Arc, Mutex};

use ownership_store::{Checkpoint, OwnershipStore, StoreError};

/// Immutable identity of one partition assignment. Cheap to clone, handed
/// to user code by value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionContext {
    pub topic: String,
    pub consumer_group: String,
    pub partition_id: String,
}

/// The object user code records progress through.
///
/// Each write is a compare-and-set against the partition's ownership
/// record: the checkpointer carries the eTag minted by the winning claim and
/// refreshes it on every successful write. When ownership has moved in the
/// meantime the store answers [`StoreError::Conflict`], which is surfaced
/// unchanged as the caller's cue that it no longer owns the partition.
///
/// No coalescing or caching: every call is one store write, so checkpoint
/// cadence is entirely the user's decision.
pub struct Checkpointer {
    context: PartitionContext,
    store: Arc<dyn OwnershipStore>,
    owner_id: String,
    etag: Mutex<Option<String>>,
}

impl Checkpointer {
    pub(crate) fn new(
        context: PartitionContext,
        store: Arc<dyn OwnershipStore>,
        owner_id: String,
        initial_etag: Option<String>,
    ) -> Self {
        Self {
            context,
            store,
            owner_id,
            etag: Mutex::new(initial_etag),
        }
    }

    pub fn context(&self) -> &PartitionContext {
        &self.context
    }

    /// Persist a progress marker, returning the new eTag.
    pub async fn update_checkpoint(
        &self,
        offset: i64,
        sequence_number: i64,
    ) -> Result<String, StoreError> {
        let etag = self.etag.lock().expect("poisoned etag cell").clone();
        let checkpoint = Checkpoint {
            topic: self.context.topic.clone(),
            consumer_group: self.context.consumer_group.clone(),
            owner_id: self.owner_id.clone(),
            partition_id: self.context.partition_id.clone(),
            offset,
            sequence_number,
            etag,
        };

        let new_etag = self.store.update_checkpoint(checkpoint).await?;
        tracing::debug!(
            partition_id = %self.context.partition_id,
            sequence_number,
            "checkpoint persisted"
        );
        *self.etag.lock().expect("poisoned etag cell") = Some(new_etag.clone());
        Ok(new_etag)
    }
}
