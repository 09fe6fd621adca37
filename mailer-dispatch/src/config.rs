use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{error::DispatchError, queue::BackpressurePolicy, retry::RetryPolicy};

const fn default_workers() -> usize {
    5
}

const fn default_queue_capacity() -> usize {
    100
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_retry_delay() -> u64 {
    5
}

const fn default_retry_permanent() -> bool {
    true
}

const fn default_shutdown_timeout() -> u64 {
    30
}

/// Sizing and retry settings for the dispatch core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Number of delivery workers.
    ///
    /// Default: 5
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Jobs the queue holds before backpressure applies.
    ///
    /// Default: 100
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Default: `block`
    #[serde(default)]
    pub backpressure: BackpressurePolicy,

    /// Retries after the first attempt.
    ///
    /// Default: 3
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Fixed delay between attempts (in seconds).
    ///
    /// Default: 5 seconds
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,

    /// Keep retrying after a 5xx or other permanent failure.
    ///
    /// Default: `true`
    #[serde(default = "default_retry_permanent")]
    pub retry_permanent: bool,

    /// How long shutdown waits for queued work before cancelling it.
    ///
    /// Default: 30 seconds
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            backpressure: BackpressurePolicy::default(),
            max_retries: default_max_retries(),
            retry_delay_secs: default_retry_delay(),
            retry_permanent: default_retry_permanent(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

impl DispatchConfig {
    /// # Errors
    ///
    /// Returns `DispatchError::InvalidConfig` for a pool without workers or
    /// a queue without capacity.
    pub fn validate(&self) -> Result<(), DispatchError> {
        if self.workers == 0 {
            return Err(DispatchError::InvalidConfig(
                "workers must be at least 1".to_string(),
            ));
        }

        if self.queue_capacity == 0 {
            return Err(DispatchError::InvalidConfig(
                "queue_capacity must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_secs(self.retry_delay_secs))
            .with_retry_permanent(self.retry_permanent)
    }

    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}
