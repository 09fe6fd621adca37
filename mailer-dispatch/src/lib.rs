//! Asynchronous outbound mail dispatch.
//!
//! Accepted messages become [`Job`]s in a bounded [`DispatchQueue`]. A
//! fixed [`WorkerPool`] drains the queue and runs each job through the
//! [`RetryEngine`], which calls a [`Transport`] (normally [`SmtpTransport`])
//! until it succeeds or the [`RetryPolicy`] gives up. The submitter only
//! learns whether the job was queued.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod job;
pub mod message;
pub mod outcome;
pub mod pool;
pub mod queue;
pub mod retry;
pub mod smtp;
pub mod transport;

pub use config::DispatchConfig;
pub use dispatcher::Dispatcher;
pub use error::DispatchError;
pub use job::Job;
pub use message::Message;
pub use outcome::{DeliveryObserver, DeliveryOutcome, DeliveryReport, NoopObserver};
pub use pool::WorkerPool;
pub use queue::{BackpressurePolicy, DispatchQueue, QueueError, Submitter};
pub use retry::{RetryEngine, RetryPolicy};
pub use smtp::{SmtpTimeouts, SmtpTransport, SmtpTransportConfig, TlsPolicy};
pub use transport::{FailureKind, Transport, TransportError};
