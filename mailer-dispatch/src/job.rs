use ulid::Ulid;

use crate::message::Message;

/// A message waiting for, or going through, delivery.
///
/// `attempt` counts failed sends so far and is only advanced by the retry
/// engine.
#[derive(Debug, Clone)]
pub struct Job {
    id: Ulid,
    message: Message,
    attempt: u32,
}

impl Job {
    #[must_use]
    pub fn new(message: Message) -> Self {
        Self {
            id: Ulid::new(),
            message,
            attempt: 0,
        }
    }

    #[must_use]
    pub const fn id(&self) -> Ulid {
        self.id
    }

    #[must_use]
    pub const fn message(&self) -> &Message {
        &self.message
    }

    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    pub(crate) const fn record_failure(&mut self) {
        self.attempt += 1;
    }
}
