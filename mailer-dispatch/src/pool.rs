//! Fixed-size pool of delivery workers.
//!
//! Each worker takes one job at a time from the [`DispatchQueue`], runs it
//! through the [`RetryEngine`] and reports the outcome to the
//! [`DeliveryObserver`].
//!
//! ## Graceful Shutdown
//!
//! [`WorkerPool::shutdown`]:
//! 1. Closes the queue, so every further submission fails with
//!    `QueueError::Closed`
//! 2. Waits for the workers to drain what is already queued
//! 3. If that takes longer than the timeout, or the caller interrupts it
//!    through [`WorkerPool::shutdown_or_cancel`], broadcasts
//!    `Signal::Finalised`, which cancels in-flight retry sequences
//! 4. Drops and logs whatever is still queued, which only happens after a
//!    timeout or when workers died

use std::{future::Future, sync::Arc, time::Duration};

use async_channel::Receiver;
use mailer_common::{Signal, internal, tracing};
use tokio::{sync::broadcast, task::JoinSet};

use crate::{
    error::DispatchError,
    job::Job,
    outcome::{DeliveryObserver, DeliveryOutcome},
    queue::DispatchQueue,
    retry::{RetryEngine, finalised},
};

pub struct WorkerPool {
    queue: DispatchQueue,
    workers: JoinSet<()>,
    signal: broadcast::Sender<Signal>,
    size: usize,
}

impl WorkerPool {
    /// Spawn `size` workers on the current runtime.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::InvalidConfig` if `size` is zero.
    pub fn start(
        size: usize,
        queue: &DispatchQueue,
        engine: Arc<RetryEngine>,
        observer: Arc<dyn DeliveryObserver>,
    ) -> Result<Self, DispatchError> {
        if size == 0 {
            return Err(DispatchError::InvalidConfig(
                "worker pool needs at least one worker".to_string(),
            ));
        }

        let (signal, _) = broadcast::channel(4);
        let mut workers = JoinSet::new();

        for id in 0..size {
            workers.spawn(run_worker(
                id,
                queue.receiver(),
                Arc::clone(&engine),
                Arc::clone(&observer),
                signal.subscribe(),
            ));
        }

        internal!(level = INFO, "Started {size} delivery workers");

        Ok(Self {
            queue: queue.clone(),
            workers,
            signal,
            size,
        })
    }

    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Stop the pool, giving queued work up to `timeout` to finish.
    ///
    /// # Errors
    ///
    /// * `DispatchError::WorkerPanic` if any worker panicked. A panicking
    ///   transport does not count; it only fails the attempt.
    /// * `DispatchError::ShutdownTimeout` if workers had to be cancelled.
    pub async fn shutdown(self, timeout: Duration) -> Result<(), DispatchError> {
        self.shutdown_or_cancel(timeout, std::future::pending()).await
    }

    /// [`WorkerPool::shutdown`] that also gives up draining once `cancel`
    /// resolves.
    ///
    /// # Errors
    ///
    /// As [`WorkerPool::shutdown`], plus `DispatchError::ShutdownInterrupted`
    /// if `cancel` fired before the queue was drained.
    pub async fn shutdown_or_cancel<F>(
        mut self,
        timeout: Duration,
        cancel: F,
    ) -> Result<(), DispatchError>
    where
        F: Future<Output = ()> + Send,
    {
        self.queue.close();
        internal!(
            level = INFO,
            "Worker pool shutting down, draining {} queued job(s)",
            self.queue.len()
        );

        let mut panics = 0;
        let mut interrupted = false;
        let drained = tokio::select! {
            joined = tokio::time::timeout(timeout, join_all(&mut self.workers, &mut panics)) => {
                if joined.is_err() {
                    tracing::warn!(
                        ?timeout,
                        remaining = self.queue.len(),
                        "Shutdown timeout exceeded, cancelling in-flight deliveries"
                    );
                }
                joined.is_ok()
            }
            () = cancel => {
                tracing::warn!(
                    remaining = self.queue.len(),
                    "Shutdown interrupted, cancelling in-flight deliveries"
                );
                interrupted = true;
                false
            }
        };

        if !drained {
            let _ = self.signal.send(Signal::Finalised);
            join_all(&mut self.workers, &mut panics).await;
        }

        // Anything still queued has no worker left to take it
        let leftover = self.queue.drain();
        for job in &leftover {
            tracing::warn!(
                job_id = %job.id(),
                to = job.message().to(),
                "Dropping undelivered job"
            );
        }
        let dropped = leftover.len();

        if panics > 0 {
            return Err(DispatchError::WorkerPanic {
                count: panics,
                dropped,
            });
        }

        if interrupted {
            return Err(DispatchError::ShutdownInterrupted { dropped });
        }

        if !drained {
            return Err(DispatchError::ShutdownTimeout { timeout, dropped });
        }

        internal!(level = INFO, "Worker pool shutdown complete");
        Ok(())
    }
}

async fn join_all(workers: &mut JoinSet<()>, panics: &mut usize) {
    while let Some(result) = workers.join_next().await {
        if let Err(err) = result {
            if err.is_panic() {
                *panics += 1;
            }
            tracing::error!(error = %err, "Delivery worker terminated abnormally");
        }
    }
}

async fn run_worker(
    id: usize,
    jobs: Receiver<Job>,
    engine: Arc<RetryEngine>,
    observer: Arc<dyn DeliveryObserver>,
    mut signal: broadcast::Receiver<Signal>,
) {
    internal!("Worker {id} started");

    loop {
        let job = tokio::select! {
            biased;
            () = finalised(&mut signal) => break,
            job = jobs.recv() => match job {
                Ok(job) => job,
                // Closed and empty
                Err(_) => break,
            },
        };

        tracing::debug!(worker = id, job_id = %job.id(), "Picked up job");
        let report = engine.deliver(job, &mut signal).await;
        observer.on_complete(&report);

        if matches!(report.outcome, DeliveryOutcome::Cancelled) {
            break;
        }
    }

    internal!("Worker {id} stopped");
}
