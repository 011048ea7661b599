//! Metric names recorded by the processor. Exporter wiring is the
//! embedding service's responsibility.

pub const CLAIMS_ATTEMPTED_COUNTER: &str = "event_processor_claims_attempted_total";
pub const CLAIMS_WON_COUNTER: &str = "event_processor_claims_won_total";
pub const CLAIMS_LOST_COUNTER: &str = "event_processor_claims_lost_total";
pub const TICK_ERRORS_COUNTER: &str = "event_processor_tick_errors_total";

pub const BATCHES_RECEIVED_COUNTER: &str = "event_processor_batches_received_total";
pub const EVENTS_DISPATCHED_COUNTER: &str = "event_processor_events_dispatched_total";
pub const RECEIVE_ERRORS_COUNTER: &str = "event_processor_receive_errors_total";
pub const HANDLER_ERRORS_COUNTER: &str = "event_processor_handler_errors_total";

pub const PUMPS_STARTED_COUNTER: &str = "event_processor_pumps_started_total";
pub const PUMPS_CLOSED_COUNTER: &str = "event_processor_pumps_closed_total";
