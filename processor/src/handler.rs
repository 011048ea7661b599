//! The user-facing processing contract.

use async_trait::async_trait;

use crate::broker::ReceivedEvent;
use crate::checkpoint::{Checkpointer, PartitionContext};
use crate::error::PumpError;

/// Why a partition's pump was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The processor is shutting down or released the partition on purpose.
    Shutdown,
    /// Another processor claimed the partition away.
    OwnershipLost,
    /// An unrecoverable broker failure stopped the pump.
    BrokerFailure,
}

/// User-supplied handler for one owned partition.
///
/// One instance is created per successful claim and driven by that
/// partition's pump task only, so no two methods ever run concurrently.
/// Within a partition, `initialize` completes before the first
/// `process_events`, and `close` runs exactly once after the reader has been
/// released. Errors returned from any method are contained by the pump:
/// `process_events` failures are routed to `process_error`, everything else
/// is logged and dropped.
#[async_trait]
pub trait PartitionProcessor: Send {
    /// Called once before the first batch. Failures do not stop the pump.
    async fn initialize(&mut self, _context: &PartitionContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called for every received batch, including empty ones: an empty
    /// batch after the receive wait gives the handler a chance to do
    /// time-based work.
    async fn process_events(&mut self, events: Vec<ReceivedEvent>) -> anyhow::Result<()>;

    /// Called for every receive failure and for every `process_events`
    /// failure.
    async fn process_error(&mut self, error: &PumpError) -> anyhow::Result<()>;

    /// Called exactly once when the pump shuts down.
    async fn close(&mut self, _reason: CloseReason) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Builds one [`PartitionProcessor`] per claimed partition.
pub trait ProcessorFactory: Send + Sync {
    fn create(
        &self,
        context: PartitionContext,
        checkpointer: Checkpointer,
    ) -> Box<dyn PartitionProcessor>;
}

impl<F> ProcessorFactory for F
where
    F: Fn(PartitionContext, Checkpointer) -> Box<dyn PartitionProcessor> + Send + Sync,
{
    fn create(
        &self,
        context: PartitionContext,
        checkpointer: Checkpointer,
    ) -> Box<dyn PartitionProcessor> {
        self(context, checkpointer)
    }
}
