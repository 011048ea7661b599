//! Shared fixtures: a scriptable in-memory broker, a recording handler and
//! polling assertions.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;

use event_processor::ownership_store::{
    Checkpoint, InMemoryOwnershipStore, OwnershipStore, PartitionOwnership,
    Result as StoreResult,
};
use event_processor::{
    BrokerError, BrokerSession, Checkpointer, CloseReason, PartitionContext, PartitionProcessor,
    PartitionReader, ProcessorConfig, ProcessorFactory, PumpError, ReceivedEvent, StartPosition,
};

pub const WAIT_TIMEOUT: Duration = Duration::from_secs(10);
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Poll `check` until it returns true or the timeout elapses (panics then).
pub async fn wait_for_condition<F, Fut>(timeout: Duration, poll: Duration, check: F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if check().await {
            return;
        }
        assert!(
            Instant::now() < deadline,
            "condition not met within {timeout:?}"
        );
        tokio::time::sleep(poll).await;
    }
}

/// Processor tuning used by the scenarios: fast ticks, and an inactivity
/// window long enough that ownership never expires mid-test. Failover
/// scenarios shorten the window explicitly.
pub fn test_config() -> ProcessorConfig {
    ProcessorConfig {
        max_batch_size: 8,
        max_wait_seconds: 1,
        load_balance_interval_ms: 10,
        partition_inactive_timeout_ms: 10_000,
        initial_position: StartPosition::Earliest,
    }
}

// ── Mock broker ──────────────────────────────────────────────────────

#[derive(Default)]
struct BrokerState {
    logs: HashMap<String, Vec<ReceivedEvent>>,
    next_sequence: HashMap<String, i64>,
    scripted_errors: HashMap<String, VecDeque<BrokerError>>,
    opened: Vec<(String, StartPosition)>,
}

/// Shared between the session and the readers it hands out.
#[derive(Default)]
struct BrokerShared {
    state: Mutex<BrokerState>,
}

impl BrokerShared {
    fn take_scripted_error(&self, partition_id: &str) -> Option<BrokerError> {
        self.state
            .lock()
            .unwrap()
            .scripted_errors
            .get_mut(partition_id)
            .and_then(|queue| queue.pop_front())
    }

    fn read_from(&self, partition_id: &str, cursor: usize, max_count: usize) -> Vec<ReceivedEvent> {
        let state = self.state.lock().unwrap();
        let Some(log) = state.logs.get(partition_id) else {
            return Vec::new();
        };
        log.iter().skip(cursor).take(max_count).cloned().collect()
    }

    fn cursor_for(&self, partition_id: &str, start_position: StartPosition) -> usize {
        let state = self.state.lock().unwrap();
        let Some(log) = state.logs.get(partition_id) else {
            return 0;
        };
        match start_position {
            StartPosition::Earliest => 0,
            StartPosition::Latest => log.len(),
            // Positional starts resume *after* the checkpointed event.
            StartPosition::Offset(offset) => log
                .iter()
                .position(|e| e.offset > offset)
                .unwrap_or(log.len()),
            StartPosition::SequenceNumber(sequence) => log
                .iter()
                .position(|e| e.sequence_number > sequence)
                .unwrap_or(log.len()),
            StartPosition::EnqueuedTime(time) => log
                .iter()
                .position(|e| e.enqueued_time >= time)
                .unwrap_or(log.len()),
        }
    }
}

/// In-memory broker: per-partition append-only logs, recorded reader opens,
/// and scriptable receive failures.
pub struct MockBroker {
    partitions: Vec<String>,
    shared: Arc<BrokerShared>,
}

impl MockBroker {
    pub fn new(partitions: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            partitions: partitions.iter().map(|p| p.to_string()).collect(),
            shared: Arc::new(BrokerShared::default()),
        })
    }

    /// Append one event, returning its sequence number.
    pub fn push_event(&self, partition_id: &str, body: &[u8]) -> i64 {
        let mut state = self.shared.state.lock().unwrap();
        let sequence = state
            .next_sequence
            .entry(partition_id.to_string())
            .or_insert(0);
        *sequence += 1;
        let sequence_number = *sequence;
        state
            .logs
            .entry(partition_id.to_string())
            .or_default()
            .push(ReceivedEvent {
                body: Bytes::copy_from_slice(body),
                offset: sequence_number * 100,
                sequence_number,
                enqueued_time: Utc::now(),
                properties: HashMap::new(),
                system_properties: HashMap::new(),
            });
        sequence_number
    }

    /// Fail the next receive on the partition with `error`.
    pub fn script_receive_error(&self, partition_id: &str, error: BrokerError) {
        self.shared
            .state
            .lock()
            .unwrap()
            .scripted_errors
            .entry(partition_id.to_string())
            .or_default()
            .push_back(error);
    }

    /// Every position a reader was opened at for the partition, in order.
    pub fn opened_positions(&self, partition_id: &str) -> Vec<StartPosition> {
        self.shared
            .state
            .lock()
            .unwrap()
            .opened
            .iter()
            .filter(|(p, _)| p == partition_id)
            .map(|(_, position)| *position)
            .collect()
    }

    pub fn open_count(&self, partition_id: &str) -> usize {
        self.opened_positions(partition_id).len()
    }
}

#[async_trait]
impl BrokerSession for MockBroker {
    async fn partition_ids(&self) -> Result<Vec<String>, BrokerError> {
        Ok(self.partitions.clone())
    }

    async fn open_reader(
        &self,
        _consumer_group: &str,
        partition_id: &str,
        start_position: StartPosition,
        _owner_level: i64,
    ) -> Result<Box<dyn PartitionReader>, BrokerError> {
        let cursor = self.shared.cursor_for(partition_id, start_position);
        self.shared
            .state
            .lock()
            .unwrap()
            .opened
            .push((partition_id.to_string(), start_position));
        Ok(Box::new(MockReader {
            shared: Arc::clone(&self.shared),
            partition_id: partition_id.to_string(),
            cursor,
        }))
    }
}

struct MockReader {
    shared: Arc<BrokerShared>,
    partition_id: String,
    cursor: usize,
}

#[async_trait]
impl PartitionReader for MockReader {
    async fn receive_batch(
        &mut self,
        max_count: usize,
        max_wait: Duration,
    ) -> Result<Vec<ReceivedEvent>, BrokerError> {
        let deadline = Instant::now() + max_wait;
        loop {
            if let Some(error) = self.shared.take_scripted_error(&self.partition_id) {
                return Err(error);
            }
            let events = self
                .shared
                .read_from(&self.partition_id, self.cursor, max_count);
            if !events.is_empty() {
                self.cursor += events.len();
                return Ok(events);
            }
            if Instant::now() >= deadline {
                return Ok(Vec::new());
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    async fn close(&mut self) -> Result<(), BrokerError> {
        Ok(())
    }
}

// ── Recording handler ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerEvent {
    Initialized {
        partition_id: String,
    },
    Batch {
        partition_id: String,
        sequences: Vec<i64>,
    },
    Error {
        partition_id: String,
        message: String,
    },
    Closed {
        partition_id: String,
        reason: CloseReason,
    },
}

/// Observations shared by every handler a factory produces.
#[derive(Default)]
pub struct HandlerLog {
    events: Mutex<Vec<HandlerEvent>>,
    pub fail_process_events: AtomicBool,
    pub checkpoint_every_batch: AtomicBool,
}

impl HandlerLog {
    pub fn events(&self) -> Vec<HandlerEvent> {
        self.events.lock().unwrap().clone()
    }

    fn push(&self, event: HandlerEvent) {
        self.events.lock().unwrap().push(event);
    }

    /// Flattened sequence numbers delivered for the partition, in order.
    pub fn sequences_for(&self, partition_id: &str) -> Vec<i64> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                HandlerEvent::Batch {
                    partition_id: p,
                    sequences,
                } if p == partition_id => Some(sequences),
                _ => None,
            })
            .flatten()
            .collect()
    }

    pub fn nonempty_batch_count(&self, partition_id: &str) -> usize {
        self.events()
            .iter()
            .filter(|event| {
                matches!(event, HandlerEvent::Batch { partition_id: p, sequences }
                    if p == partition_id && !sequences.is_empty())
            })
            .count()
    }

    pub fn error_count(&self, partition_id: &str) -> usize {
        self.events()
            .iter()
            .filter(
                |event| matches!(event, HandlerEvent::Error { partition_id: p, .. } if p == partition_id),
            )
            .count()
    }

    pub fn closes(&self) -> Vec<(String, CloseReason)> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                HandlerEvent::Closed {
                    partition_id,
                    reason,
                } => Some((partition_id, reason)),
                _ => None,
            })
            .collect()
    }

    pub fn initialized_count(&self, partition_id: &str) -> usize {
        self.events()
            .iter()
            .filter(
                |event| matches!(event, HandlerEvent::Initialized { partition_id: p } if p == partition_id),
            )
            .count()
    }
}

struct RecordingProcessor {
    partition_id: String,
    log: Arc<HandlerLog>,
    checkpointer: Checkpointer,
}

#[async_trait]
impl PartitionProcessor for RecordingProcessor {
    async fn initialize(&mut self, context: &PartitionContext) -> anyhow::Result<()> {
        self.log.push(HandlerEvent::Initialized {
            partition_id: context.partition_id.clone(),
        });
        Ok(())
    }

    async fn process_events(&mut self, events: Vec<ReceivedEvent>) -> anyhow::Result<()> {
        self.log.push(HandlerEvent::Batch {
            partition_id: self.partition_id.clone(),
            sequences: events.iter().map(|e| e.sequence_number).collect(),
        });

        if self.log.checkpoint_every_batch.load(Ordering::SeqCst) {
            if let Some(last) = events.last() {
                self.checkpointer
                    .update_checkpoint(last.offset, last.sequence_number)
                    .await?;
            }
        }

        if self.log.fail_process_events.load(Ordering::SeqCst) {
            anyhow::bail!("handler rejects batch");
        }
        Ok(())
    }

    async fn process_error(&mut self, error: &PumpError) -> anyhow::Result<()> {
        self.log.push(HandlerEvent::Error {
            partition_id: self.partition_id.clone(),
            message: error.to_string(),
        });
        Ok(())
    }

    async fn close(&mut self, reason: CloseReason) -> anyhow::Result<()> {
        self.log.push(HandlerEvent::Closed {
            partition_id: self.partition_id.clone(),
            reason,
        });
        Ok(())
    }
}

pub fn recording_factory(log: Arc<HandlerLog>) -> Arc<dyn ProcessorFactory> {
    Arc::new(
        move |context: PartitionContext, checkpointer: Checkpointer| -> Box<dyn PartitionProcessor> {
            Box::new(RecordingProcessor {
                partition_id: context.partition_id.clone(),
                log: Arc::clone(&log),
                checkpointer,
            })
        },
    )
}

// ── Racing store ─────────────────────────────────────────────────────

/// Store decorator that lets a competing "ghost" processor win the next
/// claim right before it is applied, making the caller's eTag stale.
pub struct RacingStore {
    inner: Arc<InMemoryOwnershipStore>,
    steal_next_claim: AtomicBool,
}

impl RacingStore {
    pub fn new(inner: Arc<InMemoryOwnershipStore>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            steal_next_claim: AtomicBool::new(false),
        })
    }

    pub fn arm(&self) {
        self.steal_next_claim.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl OwnershipStore for RacingStore {
    async fn list_ownership(
        &self,
        topic: &str,
        consumer_group: &str,
    ) -> StoreResult<Vec<PartitionOwnership>> {
        self.inner.list_ownership(topic, consumer_group).await
    }

    async fn claim_ownership(
        &self,
        requests: Vec<PartitionOwnership>,
    ) -> StoreResult<Vec<PartitionOwnership>> {
        if self.steal_next_claim.swap(false, Ordering::SeqCst) {
            for request in &requests {
                let current = self
                    .inner
                    .list_ownership(&request.topic, &request.consumer_group)
                    .await?
                    .into_iter()
                    .find(|record| record.partition_id == request.partition_id);
                let mut ghost = PartitionOwnership::new_claim(
                    request.topic.clone(),
                    request.consumer_group.clone(),
                    request.partition_id.clone(),
                    "ghost",
                );
                ghost.etag = current.and_then(|record| record.etag);
                self.inner.claim_ownership(vec![ghost]).await?;
            }
        }
        self.inner.claim_ownership(requests).await
    }

    async fn update_checkpoint(&self, checkpoint: Checkpoint) -> StoreResult<String> {
        self.inner.update_checkpoint(checkpoint).await
    }
}
