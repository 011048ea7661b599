//! Supervisor for the set of live partition pumps.
//!
//! All map access goes through this type and is serialized by one async
//! mutex; the lock is never held across a pump stop, so a pump finishing
//! its own teardown can never wedge the manager.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, info};

use crate::broker::{BrokerSession, StartPosition};
use crate::checkpoint::PartitionContext;
use crate::handler::{CloseReason, PartitionProcessor};
use crate::pump::{PartitionPump, PumpState};

#[derive(Default)]
pub struct PumpManager {
    pumps: tokio::sync::Mutex<HashMap<String, Arc<PartitionPump>>>,
}

impl PumpManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a pump for a freshly claimed partition.
    ///
    /// At most one pump exists per partition id: an existing pump is fully
    /// stopped with [`CloseReason::Shutdown`] before its replacement is
    /// spawned.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_pump(
        &self,
        session: Arc<dyn BrokerSession>,
        context: PartitionContext,
        start_position: StartPosition,
        owner_level: i64,
        max_batch_size: usize,
        max_wait: Duration,
        handler: Box<dyn PartitionProcessor>,
    ) {
        let existing = self.pumps.lock().await.remove(&context.partition_id);
        if let Some(previous) = existing {
            debug!(
                partition_id = %context.partition_id,
                "replacing existing pump after stop"
            );
            previous.stop(CloseReason::Shutdown).await;
        }

        let partition_id = context.partition_id.clone();
        let pump = PartitionPump::spawn(
            session,
            context,
            start_position,
            owner_level,
            max_batch_size,
            max_wait,
            handler,
        );
        self.pumps.lock().await.insert(partition_id, pump);
    }

    /// Stop one pump and forget it. No-op for unknown partition ids.
    pub async fn remove_pump(&self, partition_id: &str, reason: CloseReason) {
        let pump = self.pumps.lock().await.remove(partition_id);
        if let Some(pump) = pump {
            pump.stop(reason).await;
        }
    }

    /// Stop every pump concurrently; returns once all are closed.
    pub async fn remove_all_pumps(&self, reason: CloseReason) {
        let pumps: Vec<Arc<PartitionPump>> =
            self.pumps.lock().await.drain().map(|(_, p)| p).collect();
        if pumps.is_empty() {
            return;
        }
        info!(count = pumps.len(), ?reason, "stopping all partition pumps");
        join_all(pumps.iter().map(|pump| pump.stop(reason))).await;
    }

    /// Forget pumps that stopped themselves (ownership lost, fatal broker
    /// failure). The control loop calls this at the top of every tick, which
    /// is what lets a dead partition be claimed and pumped again later.
    pub async fn prune_finished(&self) {
        self.pumps.lock().await.retain(|partition_id, pump| {
            let closed = pump.state() == PumpState::Closed;
            if closed {
                debug!(partition_id = %partition_id, "pruning finished pump");
            }
            !closed
        });
    }

    /// Number of tracked pumps, including ones mid-teardown.
    pub async fn pump_count(&self) -> usize {
        self.pumps.lock().await.len()
    }
}
