use thiserror::Error;

use crate::broker::BrokerError;

/// The failure value handed to a handler's `process_error`.
#[derive(Debug, Error)]
pub enum PumpError {
    #[error("broker receive failure: {0}")]
    Broker(#[from] BrokerError),

    /// The handler's own `process_events` failed; routed back to the same
    /// handler's `process_error`.
    #[error("event handler failure: {0}")]
    Handler(#[source] anyhow::Error),
}

/// Faults that abort a single control-loop tick. Always logged and retried
/// on the next tick, never fatal to the processor.
#[derive(Debug, Error)]
pub(crate) enum TickError {
    #[error(transparent)]
    Store(#[from] ownership_store::StoreError),

    #[error(transparent)]
    Broker(#[from] BrokerError),
}
