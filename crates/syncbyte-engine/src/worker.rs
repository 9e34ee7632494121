//! The worker abstraction run by [`AttemptExecution`](crate::attempt::AttemptExecution).

use std::path::Path;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{PartialProgress, WorkerError};

/// A unit of attempt work: replication or normalization.
///
/// `run` is called at most once per instance. Implementations must observe
/// `cancel` at every blocking point and kill any processes they started
/// before returning [`WorkerError::Cancelled`].
#[async_trait]
pub trait Worker<I: Send + 'static, O: Send + 'static>: Send {
    async fn run(&mut self, input: I, job_root: &Path, cancel: CancellationToken) -> Result<O, WorkerError>;

    /// Progress made so far. Read after an unresponsive `run` was abandoned.
    fn progress(&self) -> Option<PartialProgress> {
        None
    }
}

/// Deferred worker construction, invoked only after input validation.
pub type WorkerFactory<I, O> = Box<dyn FnOnce() -> anyhow::Result<Box<dyn Worker<I, O>>> + Send>;
