//! Bounded in-memory job queue.
//!
//! Submitters push [`Job`]s into a fixed-capacity FIFO; each job is handed to
//! exactly one worker. Nothing is persisted, so queued jobs are lost if the
//! process exits.

use std::time::Duration;

use async_channel::{Receiver, Sender, TrySendError};
use mailer_common::tracing;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use ulid::Ulid;

use crate::{job::Job, message::Message};

/// What `submit` does when the queue is full.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackpressurePolicy {
    /// Wait for a worker to free a slot.
    #[default]
    Block,
    /// Fail straight away with [`QueueError::Full`].
    Reject,
}

impl std::str::FromStr for BackpressurePolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "block" => Ok(Self::Block),
            "reject" => Ok(Self::Reject),
            other => Err(format!("unknown backpressure policy '{other}'")),
        }
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    #[error("Dispatch queue is full")]
    Full,

    #[error("Timed out after {0:?} waiting for queue capacity")]
    Timeout(Duration),

    #[error("Dispatch queue is closed")]
    Closed,
}

/// The shared queue between submitters and the worker pool.
#[derive(Debug, Clone)]
pub struct DispatchQueue {
    sender: Sender<Job>,
    receiver: Receiver<Job>,
}

impl DispatchQueue {
    /// Create a queue holding at most `capacity` jobs.
    ///
    /// A capacity of zero is raised to one.
    #[must_use]
    pub fn bounded(capacity: usize) -> Self {
        let (sender, receiver) = async_channel::bounded(capacity.max(1));
        Self { sender, receiver }
    }

    /// A handle for submitting messages under `policy`.
    #[must_use]
    pub fn submitter(&self, policy: BackpressurePolicy) -> Submitter {
        Submitter {
            sender: self.sender.clone(),
            policy,
        }
    }

    pub(crate) fn receiver(&self) -> Receiver<Job> {
        self.receiver.clone()
    }

    /// Stop accepting jobs. Jobs already queued can still be taken.
    pub fn close(&self) -> bool {
        self.sender.close()
    }

    /// Remove every job still queued.
    pub(crate) fn drain(&self) -> Vec<Job> {
        std::iter::from_fn(|| self.receiver.try_recv().ok()).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sender.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sender.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.sender.capacity().unwrap_or_default()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Cloneable submission handle.
///
/// Success from any `submit` variant means the message was accepted for
/// delivery, not that it was sent.
#[derive(Debug, Clone)]
pub struct Submitter {
    sender: Sender<Job>,
    policy: BackpressurePolicy,
}

impl Submitter {
    /// Queue a message according to the configured backpressure policy.
    ///
    /// # Errors
    ///
    /// * [`QueueError::Full`] under [`BackpressurePolicy::Reject`] when there
    ///   is no free slot.
    /// * [`QueueError::Closed`] once shutdown has begun.
    pub async fn submit(&self, message: Message) -> Result<Ulid, QueueError> {
        match self.policy {
            BackpressurePolicy::Reject => self.try_submit(message),
            BackpressurePolicy::Block => {
                let job = Job::new(message);
                let id = job.id();
                self.sender
                    .send(job)
                    .await
                    .map_err(|_| QueueError::Closed)?;
                tracing::debug!(job_id = %id, queued = self.sender.len(), "Job queued");
                Ok(id)
            }
        }
    }

    /// Queue a message without waiting.
    ///
    /// # Errors
    ///
    /// [`QueueError::Full`] when there is no free slot and
    /// [`QueueError::Closed`] once shutdown has begun.
    pub fn try_submit(&self, message: Message) -> Result<Ulid, QueueError> {
        let job = Job::new(message);
        let id = job.id();

        match self.sender.try_send(job) {
            Ok(()) => {
                tracing::debug!(job_id = %id, queued = self.sender.len(), "Job queued");
                Ok(id)
            }
            Err(TrySendError::Full(_)) => {
                tracing::warn!(capacity = self.capacity(), "Dispatch queue full, rejecting job");
                Err(QueueError::Full)
            }
            Err(TrySendError::Closed(_)) => Err(QueueError::Closed),
        }
    }

    /// Queue a message, waiting at most `limit` for a free slot.
    ///
    /// # Errors
    ///
    /// [`QueueError::Timeout`] when no slot frees up in time and
    /// [`QueueError::Closed`] once shutdown has begun.
    pub async fn submit_timeout(&self, message: Message, limit: Duration) -> Result<Ulid, QueueError> {
        let job = Job::new(message);
        let id = job.id();

        match tokio::time::timeout(limit, self.sender.send(job)).await {
            Ok(Ok(())) => {
                tracing::debug!(job_id = %id, queued = self.sender.len(), "Job queued");
                Ok(id)
            }
            Ok(Err(_)) => Err(QueueError::Closed),
            Err(_) => {
                tracing::warn!(?limit, "Timed out waiting for dispatch queue capacity");
                Err(QueueError::Timeout(limit))
            }
        }
    }

    #[must_use]
    pub const fn policy(&self) -> BackpressurePolicy {
        self.policy
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sender.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sender.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.sender.capacity().unwrap_or_default()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}
