//! External cancellation of running attempts.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Default time a worker gets to stop after cancellation is requested.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(30);

/// Delivers a cancellation request to every attempt registered with it.
///
/// Cloning shares the underlying signal, so a handle kept by a signal
/// handler cancels attempts started from another clone.
#[derive(Debug, Clone)]
pub struct CancellationHandler {
    token: CancellationToken,
    grace_period: Duration,
}

impl CancellationHandler {
    #[must_use]
    pub fn new(grace_period: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            grace_period,
        }
    }

    /// Token for one attempt. Cancelled when the handler is.
    #[must_use]
    pub fn register(&self) -> CancellationToken {
        self.token.child_token()
    }

    pub fn cancel(&self) {
        tracing::info!("Cancellation requested");
        self.token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    #[must_use]
    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }
}

impl Default for CancellationHandler {
    fn default() -> Self {
        Self::new(DEFAULT_GRACE_PERIOD)
    }
}
