use std::{future::Future, sync::Arc};

use mailer_common::internal;
use ulid::Ulid;

use crate::{
    config::DispatchConfig,
    error::DispatchError,
    message::Message,
    outcome::{DeliveryObserver, NoopObserver},
    pool::WorkerPool,
    queue::{DispatchQueue, QueueError, Submitter},
    retry::RetryEngine,
    transport::Transport,
};

/// Queue, workers and retry engine wired together from a [`DispatchConfig`].
pub struct Dispatcher {
    queue: DispatchQueue,
    submitter: Submitter,
    pool: WorkerPool,
    config: DispatchConfig,
}

impl Dispatcher {
    /// Start dispatching through `transport`.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::InvalidConfig` if the configuration is invalid.
    pub fn start(config: DispatchConfig, transport: Arc<dyn Transport>) -> Result<Self, DispatchError> {
        Self::start_with_observer(config, transport, Arc::new(NoopObserver))
    }

    /// Like [`Self::start`], reporting every terminal outcome to `observer`.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::InvalidConfig` if the configuration is invalid.
    pub fn start_with_observer(
        config: DispatchConfig,
        transport: Arc<dyn Transport>,
        observer: Arc<dyn DeliveryObserver>,
    ) -> Result<Self, DispatchError> {
        config.validate()?;

        internal!(
            level = INFO,
            "Dispatcher starting: workers={}, queue_capacity={}, backpressure={:?}, max_retries={}, retry_delay={}s",
            config.workers,
            config.queue_capacity,
            config.backpressure,
            config.max_retries,
            config.retry_delay_secs
        );

        let queue = DispatchQueue::bounded(config.queue_capacity);
        let engine = Arc::new(RetryEngine::new(config.retry_policy(), transport));
        let pool = WorkerPool::start(config.workers, &queue, engine, observer)?;
        let submitter = queue.submitter(config.backpressure);

        Ok(Self {
            queue,
            submitter,
            pool,
            config,
        })
    }

    /// A cloneable handle for other tasks to submit through.
    #[must_use]
    pub fn submitter(&self) -> Submitter {
        self.submitter.clone()
    }

    /// Accept a message for delivery.
    ///
    /// # Errors
    ///
    /// See [`Submitter::submit`].
    pub async fn submit(&self, message: Message) -> Result<Ulid, QueueError> {
        self.submitter.submit(message).await
    }

    #[must_use]
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    #[must_use]
    pub const fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Stop accepting messages and drain the queue, waiting at most the
    /// configured shutdown timeout.
    ///
    /// # Errors
    ///
    /// See [`WorkerPool::shutdown`].
    pub async fn shutdown(self) -> Result<(), DispatchError> {
        let timeout = self.config.shutdown_timeout();
        self.pool.shutdown(timeout).await
    }

    /// [`Self::shutdown`] that cancels in-flight deliveries as soon as
    /// `cancel` resolves, without waiting out the timeout.
    ///
    /// # Errors
    ///
    /// See [`WorkerPool::shutdown_or_cancel`].
    pub async fn shutdown_or_cancel<F>(self, cancel: F) -> Result<(), DispatchError>
    where
        F: Future<Output = ()> + Send,
    {
        let timeout = self.config.shutdown_timeout();
        self.pool.shutdown_or_cancel(timeout, cancel).await
    }
}
