//! Sync orchestrator: replication, then normalization, strictly in sequence.
//!
//! The two activities run through [`SyncActivities`], the boundary to whatever
//! substrate executes them (in-process via
//! [`LocalActivities`](crate::activities::LocalActivities), or a durable
//! workflow engine). Each activity gets one attempt under a long deadline;
//! retrying a failed sync is the caller's decision.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

use syncbyte_types::job::{IntegrationLauncherConfig, JobRunConfig};
use syncbyte_types::sync::{NormalizationInput, StandardSyncInput, StandardSyncOutput};

use crate::error::WorkerError;

/// Default schedule-to-close deadline of one activity.
pub const DEFAULT_ACTIVITY_TIMEOUT: Duration = Duration::from_secs(3 * 24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncPhase {
    Replicating,
    Normalizing,
    Done,
    Failed,
}

impl SyncPhase {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Replicating => "replicating",
            Self::Normalizing => "normalizing",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The two activities of a sync.
#[async_trait]
pub trait SyncActivities: Send + Sync {
    async fn replicate(
        &self,
        job: JobRunConfig,
        source: &IntegrationLauncherConfig,
        destination: &IntegrationLauncherConfig,
        input: &StandardSyncInput,
    ) -> Result<StandardSyncOutput, WorkerError>;

    async fn normalize(
        &self,
        job: JobRunConfig,
        destination: &IntegrationLauncherConfig,
        input: NormalizationInput,
    ) -> Result<(), WorkerError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivityOptions {
    /// Overall deadline of one activity, including time spent queued.
    pub schedule_to_close_timeout: Duration,
}

impl Default for ActivityOptions {
    fn default() -> Self {
        Self {
            schedule_to_close_timeout: DEFAULT_ACTIVITY_TIMEOUT,
        }
    }
}

/// A sync that ended in [`SyncPhase::Failed`].
#[derive(Debug, thiserror::Error)]
#[error("sync failed while {phase}: {error}")]
pub struct SyncFailure {
    /// Phase that failed.
    pub phase: SyncPhase,
    #[source]
    pub error: WorkerError,
    /// Replication's result when normalization was the phase that failed.
    /// The destination holds this data loaded but not normalized.
    pub replication: Option<StandardSyncOutput>,
}

impl SyncFailure {
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.error.is_cancelled()
    }
}

enum Step {
    Replicating,
    Normalizing(StandardSyncOutput),
    Done(StandardSyncOutput),
    Failed(SyncFailure),
}

impl Step {
    fn phase(&self) -> SyncPhase {
        match self {
            Self::Replicating => SyncPhase::Replicating,
            Self::Normalizing(_) => SyncPhase::Normalizing,
            Self::Done(_) => SyncPhase::Done,
            Self::Failed(_) => SyncPhase::Failed,
        }
    }
}

pub struct SyncOrchestrator<A> {
    activities: A,
    options: ActivityOptions,
}

impl<A: SyncActivities> SyncOrchestrator<A> {
    pub fn new(activities: A) -> Self {
        Self::with_options(activities, ActivityOptions::default())
    }

    pub fn with_options(activities: A, options: ActivityOptions) -> Self {
        Self { activities, options }
    }

    pub fn activities(&self) -> &A {
        &self.activities
    }

    /// Replicate, then normalize against replication's output catalog.
    ///
    /// Returns replication's output unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`SyncFailure`] naming the phase that failed. A replication
    /// failure means normalization never ran.
    pub async fn run(
        &self,
        job: JobRunConfig,
        source: &IntegrationLauncherConfig,
        destination: &IntegrationLauncherConfig,
        sync_input: &StandardSyncInput,
    ) -> Result<StandardSyncOutput, SyncFailure> {
        let mut step = Step::Replicating;
        loop {
            tracing::info!(
                job_id = job.job_id,
                attempt_id = job.attempt_id,
                phase = %step.phase(),
                "Sync phase"
            );
            step = match step {
                Step::Replicating => {
                    let replicated = self
                        .with_deadline(
                            SyncPhase::Replicating,
                            self.activities.replicate(job, source, destination, sync_input),
                        )
                        .await;
                    match replicated {
                        Ok(output) => Step::Normalizing(output),
                        Err(error) => Step::Failed(SyncFailure {
                            phase: SyncPhase::Replicating,
                            error,
                            replication: None,
                        }),
                    }
                }
                Step::Normalizing(output) => {
                    let input = NormalizationInput::from_replication(sync_input, &output);
                    let normalized = self
                        .with_deadline(
                            SyncPhase::Normalizing,
                            self.activities.normalize(job, destination, input),
                        )
                        .await;
                    match normalized {
                        Ok(()) => Step::Done(output),
                        Err(error) => Step::Failed(SyncFailure {
                            phase: SyncPhase::Normalizing,
                            error,
                            replication: Some(output),
                        }),
                    }
                }
                Step::Done(output) => return Ok(output),
                Step::Failed(failure) => {
                    tracing::error!(
                        job_id = job.job_id,
                        attempt_id = job.attempt_id,
                        phase = %failure.phase,
                        status = %failure.error.status(),
                        "Sync failed: {}",
                        failure.error
                    );
                    return Err(failure);
                }
            };
        }
    }

    async fn with_deadline<T>(
        &self,
        phase: SyncPhase,
        activity: impl Future<Output = Result<T, WorkerError>>,
    ) -> Result<T, WorkerError> {
        let timeout = self.options.schedule_to_close_timeout;
        tokio::time::timeout(timeout, activity).await.unwrap_or_else(|_| {
            Err(WorkerError::runtime(anyhow::anyhow!(
                "{phase} activity exceeded its deadline of {}s",
                timeout.as_secs()
            )))
        })
    }
}
