use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    /// The write carried an eTag that no longer matches the stored record.
    #[error("checkpoint conflict on partition {partition_id}: stale eTag")]
    Conflict { partition_id: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;
