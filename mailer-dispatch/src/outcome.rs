use ulid::Ulid;

use crate::transport::TransportError;

/// How a job left the retry engine.
#[derive(Debug)]
pub enum DeliveryOutcome {
    Delivered,
    /// Every allowed attempt failed; the job has been dropped.
    Failed(TransportError),
    /// The pool was finalised before the job finished.
    Cancelled,
}

/// Terminal record for one job.
#[derive(Debug)]
pub struct DeliveryReport {
    pub job_id: Ulid,
    pub to: String,
    /// Number of `Transport::send` calls made for the job.
    pub attempts: u32,
    pub outcome: DeliveryOutcome,
}

impl DeliveryReport {
    #[must_use]
    pub const fn is_delivered(&self) -> bool {
        matches!(self.outcome, DeliveryOutcome::Delivered)
    }
}

/// Receives every terminal delivery report.
///
/// Called from worker tasks, so implementations should return quickly.
pub trait DeliveryObserver: Send + Sync {
    fn on_complete(&self, report: &DeliveryReport);
}

/// Discards reports; logging already covers them.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl DeliveryObserver for NoopObserver {
    fn on_complete(&self, _report: &DeliveryReport) {}
}
