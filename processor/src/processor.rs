//! The outer control loop: snapshot ownership, pick a claim, start pumps.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use ownership_store::{OwnershipStore, PartitionOwnership};

use crate::balancer::PartitionLoadBalancer;
use crate::broker::{BrokerSession, StartPosition};
use crate::checkpoint::{Checkpointer, PartitionContext};
use crate::config::ProcessorConfig;
use crate::error::TickError;
use crate::handler::{CloseReason, ProcessorFactory};
use crate::metrics_consts::{
    CLAIMS_ATTEMPTED_COUNTER, CLAIMS_LOST_COUNTER, CLAIMS_WON_COUNTER, TICK_ERRORS_COUNTER,
};
use crate::pump_manager::PumpManager;

/// Priority carried in ownership records and reader opens. Exclusive
/// consumers are not expressible at this layer.
const OWNER_LEVEL: i64 = 0;

/// One processor instance in a cooperating fleet.
///
/// Every instance runs the same loop: list ownership, ask the balancer for
/// at most one partition to claim, claim it with optimistic concurrency,
/// and hand the partition to a pump. Instances never talk to each other;
/// a fleet converges purely through the shared store.
pub struct EventProcessor {
    inner: Arc<Inner>,
    run: tokio::sync::Mutex<Option<RunState>>,
}

struct RunState {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

struct Inner {
    topic: String,
    consumer_group: String,
    owner_id: String,
    config: ProcessorConfig,
    session: Arc<dyn BrokerSession>,
    store: Arc<dyn OwnershipStore>,
    factory: Arc<dyn ProcessorFactory>,
    balancer: PartitionLoadBalancer,
    pumps: PumpManager,
}

impl EventProcessor {
    pub fn new(
        topic: impl Into<String>,
        consumer_group: impl Into<String>,
        session: Arc<dyn BrokerSession>,
        factory: Arc<dyn ProcessorFactory>,
        store: Arc<dyn OwnershipStore>,
        config: ProcessorConfig,
    ) -> Self {
        let owner_id = Uuid::new_v4().to_string();
        let balancer =
            PartitionLoadBalancer::new(owner_id.clone(), config.partition_inactive_timeout());
        Self {
            inner: Arc::new(Inner {
                topic: topic.into(),
                consumer_group: consumer_group.into(),
                owner_id,
                config,
                session,
                store,
                factory,
                balancer,
                pumps: PumpManager::new(),
            }),
            run: tokio::sync::Mutex::new(None),
        }
    }

    /// Identity under which this instance claims partitions. Fresh per
    /// construction.
    pub fn owner_id(&self) -> &str {
        &self.inner.owner_id
    }

    /// Number of pumps currently tracked, including ones mid-teardown.
    pub async fn pump_count(&self) -> usize {
        self.inner.pumps.pump_count().await
    }

    /// Launch the control loop. Idempotent: calling `start` on a running
    /// processor does nothing.
    pub async fn start(&self) {
        let mut run = self.run.lock().await;
        if run.is_some() {
            debug!(owner_id = %self.inner.owner_id, "processor already running");
            return;
        }

        info!(
            owner_id = %self.inner.owner_id,
            topic = %self.inner.topic,
            consumer_group = %self.inner.consumer_group,
            "starting event processor"
        );
        let cancel = CancellationToken::new();
        let task = tokio::spawn(Arc::clone(&self.inner).run(cancel.clone()));
        *run = Some(RunState { cancel, task });
    }

    /// Stop the control loop and close every pump with
    /// [`CloseReason::Shutdown`]. Idempotent. Shutdown failures are logged,
    /// never returned.
    pub async fn stop(&self) {
        let Some(RunState { cancel, task }) = self.run.lock().await.take() else {
            return;
        };

        cancel.cancel();
        // The in-flight tick may still be starting a pump; let the loop wind
        // down before draining the pump set so nothing slips in after it.
        if let Err(error) = task.await {
            warn!(
                owner_id = %self.inner.owner_id,
                error = %error,
                "control loop did not shut down cleanly"
            );
        }
        self.inner
            .pumps
            .remove_all_pumps(CloseReason::Shutdown)
            .await;
        info!(owner_id = %self.inner.owner_id, "event processor stopped");
    }
}

impl Inner {
    async fn run(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            if cancel.is_cancelled() {
                break;
            }
            // A failing store or broker must never end the loop; log and
            // try again next tick.
            if let Err(error) = self.tick(&cancel).await {
                metrics::counter!(TICK_ERRORS_COUNTER).increment(1);
                warn!(
                    owner_id = %self.owner_id,
                    error = %error,
                    "load-balancing tick failed, will retry"
                );
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.load_balance_interval()) => {}
            }
        }
        debug!(owner_id = %self.owner_id, "control loop exited");
    }

    async fn tick(&self, cancel: &CancellationToken) -> Result<(), TickError> {
        self.pumps.prune_finished().await;

        let ownership = self
            .store
            .list_ownership(&self.topic, &self.consumer_group)
            .await?;
        if cancel.is_cancelled() {
            return Ok(());
        }
        let partition_ids = self.session.partition_ids().await?;
        if cancel.is_cancelled() {
            return Ok(());
        }
        if partition_ids.is_empty() {
            debug!(topic = %self.topic, "topic reports no partitions");
            return Ok(());
        }

        let ownership: HashMap<String, PartitionOwnership> = ownership
            .into_iter()
            .map(|record| (record.partition_id.clone(), record))
            .collect();

        let Some(target) = self.balancer.select_claim(&ownership, &partition_ids) else {
            return Ok(());
        };

        metrics::counter!(CLAIMS_ATTEMPTED_COUNTER).increment(1);
        self.claim_partition(&ownership, target, cancel).await
    }

    async fn claim_partition(
        &self,
        ownership: &HashMap<String, PartitionOwnership>,
        partition_id: String,
        cancel: &CancellationToken,
    ) -> Result<(), TickError> {
        let mut request = PartitionOwnership::new_claim(
            self.topic.clone(),
            self.consumer_group.clone(),
            partition_id.clone(),
            self.owner_id.clone(),
        );
        request.owner_level = OWNER_LEVEL;
        // Carry the previous position and eTag so the store can detect a
        // lost race, and so the new pump resumes where the last owner left
        // off.
        if let Some(previous) = ownership.get(&partition_id) {
            request.offset = previous.offset;
            request.sequence_number = previous.sequence_number;
            request.etag = previous.etag.clone();
        }

        let mut committed = self.store.claim_ownership(vec![request]).await?;
        let Some(owned) = committed.pop() else {
            metrics::counter!(CLAIMS_LOST_COUNTER).increment(1);
            debug!(
                owner_id = %self.owner_id,
                partition_id = %partition_id,
                "claim lost to another processor"
            );
            return Ok(());
        };

        metrics::counter!(CLAIMS_WON_COUNTER).increment(1);
        info!(
            owner_id = %self.owner_id,
            partition_id = %partition_id,
            "claimed partition"
        );
        if cancel.is_cancelled() {
            return Ok(());
        }

        let start_position = match owned.sequence_number {
            Some(sequence_number) => StartPosition::SequenceNumber(sequence_number),
            None => self.config.initial_position,
        };

        let context = PartitionContext {
            topic: self.topic.clone(),
            consumer_group: self.consumer_group.clone(),
            partition_id,
        };
        let checkpointer = Checkpointer::new(
            context.clone(),
            Arc::clone(&self.store),
            self.owner_id.clone(),
            owned.etag.clone(),
        );
        let handler = self.factory.create(context.clone(), checkpointer);

        self.pumps
            .create_pump(
                Arc::clone(&self.session),
                context,
                start_position,
                owned.owner_level,
                self.config.max_batch_size,
                self.config.max_wait(),
                handler,
            )
            .await;
        Ok(())
    }
}
