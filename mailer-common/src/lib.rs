pub mod logging;

pub use tracing;

/// Lifecycle signals broadcast to long-running tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Stop accepting new work and let queued work drain.
    Shutdown,
    /// Abandon whatever is still in flight and exit.
    Finalised,
}
