//! In-memory [`OwnershipStore`] used by tests and single-process
//! deployments.
//!
//! Records are held as serialized JSON values, the same shape a networked
//! implementation keeps in its key-value store, so the (de)serialization
//! path is exercised here too. A mutex around the map plus a monotonically
//! increasing eTag counter is enough for the full compare-and-set
//! discipline.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{Result, StoreError};
use crate::records::{Checkpoint, PartitionOwnership};
use crate::store::OwnershipStore;
use crate::util::now_ms;

type RecordKey = (String, String, String);

#[derive(Default)]
pub struct InMemoryOwnershipStore {
    records: Mutex<HashMap<RecordKey, String>>,
    etag_counter: AtomicU64,
}

impl InMemoryOwnershipStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_etag(&self) -> String {
        self.etag_counter.fetch_add(1, Ordering::Relaxed).to_string()
    }

    fn key(topic: &str, consumer_group: &str, partition_id: &str) -> RecordKey {
        (
            topic.to_string(),
            consumer_group.to_string(),
            partition_id.to_string(),
        )
    }
}

#[async_trait]
impl OwnershipStore for InMemoryOwnershipStore {
    async fn list_ownership(
        &self,
        topic: &str,
        consumer_group: &str,
    ) -> Result<Vec<PartitionOwnership>> {
        let records = self.records.lock().expect("poisoned ownership map");
        records
            .iter()
            .filter(|((t, g, _), _)| t == topic && g == consumer_group)
            .map(|(_, value)| serde_json::from_str(value).map_err(StoreError::from))
            .collect()
    }

    async fn claim_ownership(
        &self,
        requests: Vec<PartitionOwnership>,
    ) -> Result<Vec<PartitionOwnership>> {
        let mut records = self.records.lock().expect("poisoned ownership map");
        let mut committed = Vec::with_capacity(requests.len());

        for request in requests {
            let key = Self::key(&request.topic, &request.consumer_group, &request.partition_id);
            let accepted = match records.get(&key) {
                Some(value) => {
                    let existing: PartitionOwnership = serde_json::from_str(value)?;
                    existing.etag == request.etag
                }
                None => request.etag.is_none(),
            };
            if !accepted {
                tracing::debug!(
                    partition_id = %request.partition_id,
                    owner_id = %request.owner_id,
                    "claim lost: eTag mismatch"
                );
                continue;
            }

            let mut record = request;
            record.last_modified_ms = now_ms();
            record.etag = Some(self.next_etag());
            records.insert(key, serde_json::to_string(&record)?);
            committed.push(record);
        }

        Ok(committed)
    }

    async fn update_checkpoint(&self, checkpoint: Checkpoint) -> Result<String> {
        let mut records = self.records.lock().expect("poisoned ownership map");
        let key = Self::key(
            &checkpoint.topic,
            &checkpoint.consumer_group,
            &checkpoint.partition_id,
        );
        let stored: Option<PartitionOwnership> = records
            .get(&key)
            .map(|value| serde_json::from_str(value))
            .transpose()?;

        match stored {
            Some(mut existing) => {
                if existing.etag != checkpoint.etag {
                    return Err(StoreError::Conflict {
                        partition_id: checkpoint.partition_id,
                    });
                }
                let etag = self.next_etag();
                existing.owner_id = checkpoint.owner_id;
                existing.offset = Some(checkpoint.offset);
                existing.sequence_number = Some(checkpoint.sequence_number);
                existing.last_modified_ms = now_ms();
                existing.etag = Some(etag.clone());
                records.insert(key, serde_json::to_string(&existing)?);
                Ok(etag)
            }
            None if checkpoint.etag.is_none() => {
                let etag = self.next_etag();
                let record = PartitionOwnership {
                    topic: checkpoint.topic,
                    consumer_group: checkpoint.consumer_group,
                    partition_id: checkpoint.partition_id,
                    owner_id: checkpoint.owner_id,
                    owner_level: 0,
                    offset: Some(checkpoint.offset),
                    sequence_number: Some(checkpoint.sequence_number),
                    last_modified_ms: now_ms(),
                    etag: Some(etag.clone()),
                };
                records.insert(key, serde_json::to_string(&record)?);
                Ok(etag)
            }
            None => Err(StoreError::Conflict {
                partition_id: checkpoint.partition_id,
            }),
        }
    }
}
