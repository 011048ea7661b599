use std::time::Duration;

use envconfig::Envconfig;

use crate::broker::StartPosition;

/// Processor tuning knobs. Every field has a default, so
/// `ProcessorConfig::init_from_env()` works in an empty environment.
#[derive(Envconfig, Debug, Clone)]
pub struct ProcessorConfig {
    /// Upper bound on events per dispatched batch.
    #[envconfig(from = "MAX_BATCH_SIZE", default = "32")]
    pub max_batch_size: usize,

    /// How long a receive waits for events before dispatching an empty
    /// batch.
    #[envconfig(from = "MAX_WAIT_SECONDS", default = "60")]
    pub max_wait_seconds: u64,

    /// Pause between load-balancing ticks.
    #[envconfig(from = "LOAD_BALANCE_INTERVAL_MS", default = "10000")]
    pub load_balance_interval_ms: u64,

    /// Ownership records older than this are treated as abandoned.
    #[envconfig(from = "PARTITION_INACTIVE_TIMEOUT_MS", default = "60000")]
    pub partition_inactive_timeout_ms: u64,

    /// Where a reader starts on a partition that has never been
    /// checkpointed.
    #[envconfig(from = "INITIAL_POSITION", default = "earliest")]
    pub initial_position: StartPosition,
}

impl ProcessorConfig {
    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_seconds)
    }

    pub fn load_balance_interval(&self) -> Duration {
        Duration::from_millis(self.load_balance_interval_ms)
    }

    pub fn partition_inactive_timeout(&self) -> Duration {
        Duration::from_millis(self.partition_inactive_timeout_ms)
    }
}
