//! Fixed-delay retries around a [`Transport`].
//!
//! A job gets `max_retries + 1` attempts. The first is immediate, every
//! later attempt waits `retry_delay`. There is no jitter, so jobs that fail
//! together retry together.

use std::{sync::Arc, time::Duration};

use mailer_common::{Signal, tracing};
use tokio::{
    sync::broadcast,
    task::{JoinError, JoinHandle},
};

use crate::{
    job::Job,
    outcome::{DeliveryOutcome, DeliveryReport},
    transport::{FailureKind, Transport, TransportError},
};

/// Retry behaviour for a single job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    ///
    /// Default: 3
    pub max_retries: u32,

    /// Wait between attempts.
    ///
    /// Default: 5 seconds
    pub retry_delay: Duration,

    /// Keep retrying after a permanent failure.
    ///
    /// Default: `true`
    pub retry_permanent: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(5),
            retry_permanent: true,
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub const fn new(max_retries: u32, retry_delay: Duration) -> Self {
        Self {
            max_retries,
            retry_delay,
            retry_permanent: true,
        }
    }

    #[must_use]
    pub const fn with_retry_permanent(mut self, retry_permanent: bool) -> Self {
        self.retry_permanent = retry_permanent;
        self
    }

    #[must_use]
    pub const fn total_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Whether a job that has already failed `attempt` times, most recently
    /// with `kind`, gets another try.
    #[must_use]
    pub fn should_retry(&self, attempt: u32, kind: FailureKind) -> bool {
        attempt < self.max_retries && (self.retry_permanent || kind != FailureKind::Permanent)
    }
}

/// Resolves once `Signal::Finalised` arrives. Never resolves if the sender
/// is gone.
pub(crate) async fn finalised(signal: &mut broadcast::Receiver<Signal>) {
    loop {
        match signal.recv().await {
            Ok(Signal::Finalised) => return,
            Ok(Signal::Shutdown) | Err(broadcast::error::RecvError::Lagged(_)) => {}
            Err(broadcast::error::RecvError::Closed) => std::future::pending::<()>().await,
        }
    }
}

/// Runs jobs against a transport under a [`RetryPolicy`].
pub struct RetryEngine {
    policy: RetryPolicy,
    transport: Arc<dyn Transport>,
}

impl RetryEngine {
    #[must_use]
    pub fn new(policy: RetryPolicy, transport: Arc<dyn Transport>) -> Self {
        Self { policy, transport }
    }

    #[must_use]
    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Attempt delivery until it succeeds, the attempts run out, or the
    /// pool is finalised.
    ///
    /// The outcome is terminal; the job is never queued again.
    pub async fn deliver(
        &self,
        mut job: Job,
        signal: &mut broadcast::Receiver<Signal>,
    ) -> DeliveryReport {
        let mut attempts = 0;

        loop {
            if job.attempt() > 0 {
                tokio::select! {
                    biased;
                    () = finalised(signal) => return self.cancelled(&job, attempts),
                    () = tokio::time::sleep(self.policy.retry_delay) => {}
                }
            }

            attempts += 1;
            let mut attempt = self.spawn_attempt(&job);
            let result = tokio::select! {
                biased;
                () = finalised(signal) => {
                    attempt.abort();
                    return self.cancelled(&job, attempts);
                }
                joined = &mut attempt => joined.unwrap_or_else(|err| Err(join_failure(&err))),
            };

            let error = match result {
                Ok(()) => {
                    tracing::info!(
                        job_id = %job.id(),
                        attempt = attempts,
                        to = job.message().to(),
                        "Message delivered"
                    );
                    return report(&job, attempts, DeliveryOutcome::Delivered);
                }
                Err(error) => error,
            };

            tracing::warn!(
                job_id = %job.id(),
                attempt = attempts,
                max_attempts = self.policy.total_attempts(),
                to = job.message().to(),
                kind = %error.kind(),
                error = %error,
                "Delivery attempt failed"
            );

            if !self.policy.should_retry(job.attempt(), error.kind()) {
                tracing::error!(
                    job_id = %job.id(),
                    attempts,
                    to = job.message().to(),
                    kind = %error.kind(),
                    error = %error,
                    "Delivery failed permanently, dropping message"
                );
                return report(&job, attempts, DeliveryOutcome::Failed(error));
            }

            job.record_failure();
        }
    }

    /// Run one `Transport::send` on its own task, so a panicking transport
    /// fails the attempt rather than the worker.
    fn spawn_attempt(&self, job: &Job) -> JoinHandle<Result<(), TransportError>> {
        let transport = Arc::clone(&self.transport);
        let message = job.message().clone();
        tokio::spawn(async move { transport.send(&message).await })
    }

    fn cancelled(&self, job: &Job, attempts: u32) -> DeliveryReport {
        tracing::warn!(
            job_id = %job.id(),
            attempts,
            remaining = self.policy.total_attempts().saturating_sub(attempts),
            to = job.message().to(),
            "Delivery cancelled by shutdown"
        );
        report(job, attempts, DeliveryOutcome::Cancelled)
    }
}

fn join_failure(err: &JoinError) -> TransportError {
    if err.is_panic() {
        tracing::error!(error = %err, "Transport panicked during a delivery attempt");
        TransportError::other(FailureKind::Unknown, "Transport panicked")
    } else {
        TransportError::other(FailureKind::Unknown, "Delivery attempt was aborted")
    }
}

fn report(job: &Job, attempts: u32, outcome: DeliveryOutcome) -> DeliveryReport {
    DeliveryReport {
        job_id: job.id(),
        to: job.message().to().to_string(),
        attempts,
        outcome,
    }
}
