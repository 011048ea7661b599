//! The per-partition pump: one task that owns a broker reader and a user
//! handler, and shuttles batches from one to the other until it is stopped
//! or the broker turns it away.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broker::{BrokerError, BrokerSession, PartitionReader, StartPosition};
use crate::checkpoint::PartitionContext;
use crate::error::PumpError;
use crate::handler::{CloseReason, PartitionProcessor};
use crate::metrics_consts::{
    BATCHES_RECEIVED_COUNTER, EVENTS_DISPATCHED_COUNTER, HANDLER_ERRORS_COUNTER,
    PUMPS_CLOSED_COUNTER, PUMPS_STARTED_COUNTER, RECEIVE_ERRORS_COUNTER,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PumpState {
    Created,
    Initializing,
    Running,
    Stopping,
    Closed,
}

/// Handle to one running pump task.
///
/// Teardown (close the reader, then `close(reason)` on the handler) runs
/// exactly once, inside the task, on every exit path. External stops and
/// internal failures agree on the close reason through a first-writer-wins
/// cell.
pub(crate) struct PartitionPump {
    context: PartitionContext,
    cancel: CancellationToken,
    closed: CancellationToken,
    is_receiving: Arc<AtomicBool>,
    state: Mutex<PumpState>,
    close_reason: Mutex<Option<CloseReason>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PartitionPump {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn spawn(
        session: Arc<dyn BrokerSession>,
        context: PartitionContext,
        start_position: StartPosition,
        owner_level: i64,
        max_batch_size: usize,
        max_wait: Duration,
        handler: Box<dyn PartitionProcessor>,
    ) -> Arc<Self> {
        let pump = Arc::new(Self {
            context,
            cancel: CancellationToken::new(),
            closed: CancellationToken::new(),
            is_receiving: Arc::new(AtomicBool::new(true)),
            state: Mutex::new(PumpState::Created),
            close_reason: Mutex::new(None),
            task: Mutex::new(None),
        });

        metrics::counter!(PUMPS_STARTED_COUNTER).increment(1);
        let task = tokio::spawn(Arc::clone(&pump).run(
            session,
            start_position,
            owner_level,
            max_batch_size,
            max_wait,
            handler,
        ));
        *pump.task.lock().expect("poisoned pump task cell") = Some(task);
        pump
    }

    pub(crate) fn state(&self) -> PumpState {
        *self.state.lock().expect("poisoned pump state")
    }

    /// Stop the pump and wait until teardown has finished. Idempotent; the
    /// first caller's reason wins over later ones but never over a reason
    /// the pump already chose for itself.
    pub(crate) async fn stop(&self, reason: CloseReason) {
        self.set_reason_if_unset(reason);
        self.is_receiving.store(false, Ordering::SeqCst);
        self.cancel.cancel();

        let task = self.task.lock().expect("poisoned pump task cell").take();
        match task {
            Some(task) => {
                if let Err(error) = task.await {
                    warn!(
                        partition_id = %self.context.partition_id,
                        error = %error,
                        "pump task did not shut down cleanly"
                    );
                }
                // Normally redundant; releases concurrent stoppers if the
                // task panicked before reporting closure.
                self.closed.cancel();
            }
            None => self.closed.cancelled().await,
        }
    }

    fn set_state(&self, state: PumpState) {
        debug!(partition_id = %self.context.partition_id, ?state, "pump state change");
        *self.state.lock().expect("poisoned pump state") = state;
    }

    fn set_reason_if_unset(&self, reason: CloseReason) {
        let mut cell = self.close_reason.lock().expect("poisoned close reason");
        if cell.is_none() {
            *cell = Some(reason);
        }
    }

    async fn run(
        self: Arc<Self>,
        session: Arc<dyn BrokerSession>,
        start_position: StartPosition,
        owner_level: i64,
        max_batch_size: usize,
        max_wait: Duration,
        mut handler: Box<dyn PartitionProcessor>,
    ) {
        self.set_state(PumpState::Initializing);
        if let Err(error) = handler.initialize(&self.context).await {
            warn!(
                partition_id = %self.context.partition_id,
                error = %error,
                "handler initialize failed, pump continues"
            );
        }

        let reader = tokio::select! {
            _ = self.cancel.cancelled() => None,
            result = session.open_reader(
                &self.context.consumer_group,
                &self.context.partition_id,
                start_position,
                owner_level,
            ) => match result {
                Ok(reader) => Some(reader),
                Err(error) => {
                    warn!(
                        partition_id = %self.context.partition_id,
                        error = %error,
                        "failed to open partition reader"
                    );
                    self.set_reason_if_unset(match error {
                        BrokerError::ReceiverDisconnected(_) => CloseReason::OwnershipLost,
                        _ => CloseReason::BrokerFailure,
                    });
                    let error = PumpError::Broker(error);
                    dispatch_error(&self.context, handler.as_mut(), &error).await;
                    None
                }
            },
        };
        let Some(mut reader) = reader else {
            self.teardown(handler, None).await;
            return;
        };

        self.set_state(PumpState::Running);
        info!(
            partition_id = %self.context.partition_id,
            start_position = %start_position,
            "partition pump running"
        );

        loop {
            if !self.is_receiving.load(Ordering::SeqCst) {
                break;
            }

            let received = tokio::select! {
                _ = self.cancel.cancelled() => break,
                received = reader.receive_batch(max_batch_size, max_wait) => received,
            };
            // Stop may have been requested while we were waiting; do not
            // dispatch what we got.
            if !self.is_receiving.load(Ordering::SeqCst) {
                break;
            }

            match received {
                Ok(events) => {
                    metrics::counter!(BATCHES_RECEIVED_COUNTER).increment(1);
                    metrics::counter!(EVENTS_DISPATCHED_COUNTER).increment(events.len() as u64);
                    if let Err(error) = handler.process_events(events).await {
                        metrics::counter!(HANDLER_ERRORS_COUNTER).increment(1);
                        let error = PumpError::Handler(error);
                        dispatch_error(&self.context, handler.as_mut(), &error).await;
                    }
                }
                Err(error) => {
                    metrics::counter!(RECEIVE_ERRORS_COUNTER).increment(1);
                    let retryable = error.is_retryable();
                    let ownership_lost = matches!(error, BrokerError::ReceiverDisconnected(_));
                    let error = PumpError::Broker(error);
                    dispatch_error(&self.context, handler.as_mut(), &error).await;

                    if ownership_lost {
                        self.set_reason_if_unset(CloseReason::OwnershipLost);
                        break;
                    }
                    if !retryable {
                        self.set_reason_if_unset(CloseReason::BrokerFailure);
                        break;
                    }
                }
            }
        }

        self.teardown(handler, Some(reader)).await;
    }

    async fn teardown(
        &self,
        mut handler: Box<dyn PartitionProcessor>,
        reader: Option<Box<dyn PartitionReader>>,
    ) {
        self.set_state(PumpState::Stopping);
        self.is_receiving.store(false, Ordering::SeqCst);

        if let Some(mut reader) = reader {
            if let Err(error) = reader.close().await {
                warn!(
                    partition_id = %self.context.partition_id,
                    error = %error,
                    "failed to close partition reader"
                );
            }
        }

        let reason = self
            .close_reason
            .lock()
            .expect("poisoned close reason")
            .unwrap_or(CloseReason::Shutdown);
        if let Err(error) = handler.close(reason).await {
            warn!(
                partition_id = %self.context.partition_id,
                error = %error,
                "handler close failed"
            );
        }

        self.set_state(PumpState::Closed);
        metrics::counter!(PUMPS_CLOSED_COUNTER).increment(1);
        info!(partition_id = %self.context.partition_id, ?reason, "partition pump closed");
        self.closed.cancel();
    }
}

async fn dispatch_error(
    context: &PartitionContext,
    handler: &mut dyn PartitionProcessor,
    error: &PumpError,
) {
    if let Err(nested) = handler.process_error(error).await {
        warn!(
            partition_id = %context.partition_id,
            error = %nested,
            "process_error itself failed"
        );
    }
}
