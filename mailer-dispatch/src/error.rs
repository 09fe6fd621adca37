//! Errors raised by the dispatch lifecycle.
//!
//! Delivery failures never surface here: they stay inside the workers and
//! are reported through [`crate::outcome::DeliveryObserver`].

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatchError {
    /// The dispatch configuration cannot be used to start a pool.
    #[error("Invalid dispatch configuration: {0}")]
    InvalidConfig(String),

    /// Workers did not drain the queue in time and were cancelled.
    #[error("Shutdown timed out after {timeout:?}; {dropped} queued job(s) dropped")]
    ShutdownTimeout { timeout: Duration, dropped: usize },

    /// The drain was cut short by the caller and in-flight deliveries were
    /// cancelled.
    #[error("Shutdown interrupted; {dropped} queued job(s) dropped")]
    ShutdownInterrupted { dropped: usize },

    /// One or more worker tasks panicked, leaving `dropped` jobs unprocessed.
    #[error("{count} worker task(s) panicked; {dropped} queued job(s) dropped")]
    WorkerPanic { count: usize, dropped: usize },
}
