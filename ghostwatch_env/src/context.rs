//! Clock abstraction for the GhostWatch pipeline.

use async_trait::async_trait;
use std::time::{Duration, SystemTime};

/// The pipeline's view of time.
///
/// Staleness detection and disconnect policies only ever ask "how long ago",
/// so the same runtime code can be driven by the wall clock in production
/// and by a manually advanced clock in the scenario runner.
///
/// # Implementations
///
/// - **Production**: `TokioContext` - wraps `std::time::Instant` and `tokio::time`
/// - **Simulation**: `SimContext` (in `ghostwatch_sim`) - virtual clock advanced by the runner
#[async_trait]
pub trait FeedContext: Send + Sync + 'static {
    /// Returns the monotonic time since context creation.
    ///
    /// In simulation, this is the virtual clock time.
    fn now(&self) -> Duration;

    /// Returns the wall-clock time, used to stamp received messages.
    fn system_time(&self) -> SystemTime;

    /// Suspends execution for the given duration.
    ///
    /// In production: wraps `tokio::time::sleep`
    /// In simulation: advances the virtual clock
    async fn sleep(&self, duration: Duration);

    /// Milliseconds since the Unix epoch according to `system_time()`.
    fn unix_millis(&self) -> u64 {
        self.system_time()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}
