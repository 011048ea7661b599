//! Contracts consumed from the broker transport layer.
//!
//! Connection establishment, authentication and the wire protocol live
//! outside this crate. The processor only needs two capabilities: the
//! partition id set, and a per-partition reader that yields event batches
//! from a given position.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// One event as handed to user code.
#[derive(Debug, Clone)]
pub struct ReceivedEvent {
    pub body: Bytes,
    pub offset: i64,
    pub sequence_number: i64,
    pub enqueued_time: DateTime<Utc>,
    pub properties: HashMap<String, serde_json::Value>,
    pub system_properties: HashMap<String, serde_json::Value>,
}

/// Where a freshly opened reader starts in the partition's log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartPosition {
    Earliest,
    Latest,
    Offset(i64),
    SequenceNumber(i64),
    EnqueuedTime(DateTime<Utc>),
}

impl FromStr for StartPosition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.to_lowercase().as_str() {
            "earliest" => return Ok(StartPosition::Earliest),
            "latest" => return Ok(StartPosition::Latest),
            _ => {}
        }
        if let Some(raw) = s.strip_prefix("offset:") {
            return raw
                .parse()
                .map(StartPosition::Offset)
                .map_err(|e| format!("invalid offset in start position {s:?}: {e}"));
        }
        if let Some(raw) = s.strip_prefix("sequence:") {
            return raw
                .parse()
                .map(StartPosition::SequenceNumber)
                .map_err(|e| format!("invalid sequence number in start position {s:?}: {e}"));
        }
        if let Some(raw) = s.strip_prefix("enqueued:") {
            return DateTime::parse_from_rfc3339(raw)
                .map(|t| StartPosition::EnqueuedTime(t.with_timezone(&Utc)))
                .map_err(|e| format!("invalid timestamp in start position {s:?}: {e}"));
        }
        Err(format!(
            "unknown start position {s:?}, expected earliest, latest, offset:N, sequence:N or enqueued:RFC3339"
        ))
    }
}

impl std::fmt::Display for StartPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StartPosition::Earliest => write!(f, "earliest"),
            StartPosition::Latest => write!(f, "latest"),
            StartPosition::Offset(n) => write!(f, "offset:{n}"),
            StartPosition::SequenceNumber(n) => write!(f, "sequence:{n}"),
            StartPosition::EnqueuedTime(t) => write!(f, "enqueued:{}", t.to_rfc3339()),
        }
    }
}

/// Broker failures, pre-classified by the transport layer.
///
/// The pump's reaction is a match on the variant: transient errors keep the
/// receive loop alive, fatal ones close the pump, and a disconnected
/// receiver means another processor took the partition over.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("transient broker failure: {0}")]
    Transient(String),

    #[error("broker failure: {0}")]
    Fatal(String),

    /// The broker dropped this reader in favor of a competing one.
    #[error("receiver disconnected: {0}")]
    ReceiverDisconnected(String),
}

impl BrokerError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, BrokerError::Transient(_))
    }
}

/// An established session to the broker, scoped to one topic.
#[async_trait]
pub trait BrokerSession: Send + Sync {
    /// Current partition id set of the topic.
    async fn partition_ids(&self) -> Result<Vec<String>, BrokerError>;

    /// Open a reader on one partition at the given position.
    async fn open_reader(
        &self,
        consumer_group: &str,
        partition_id: &str,
        start_position: StartPosition,
        owner_level: i64,
    ) -> Result<Box<dyn PartitionReader>, BrokerError>;
}

/// A per-partition reader borrowed from the session for a pump's lifetime.
#[async_trait]
pub trait PartitionReader: Send {
    /// Wait up to `max_wait` for events, returning at most `max_count`.
    /// An empty batch after the wait is not an error.
    async fn receive_batch(
        &mut self,
        max_count: usize,
        max_wait: Duration,
    ) -> Result<Vec<ReceivedEvent>, BrokerError>;

    /// Release the reader. Must be called on every pump exit path.
    async fn close(&mut self) -> Result<(), BrokerError>;
}
