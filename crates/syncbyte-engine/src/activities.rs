//! In-process implementation of the sync activities.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use syncbyte_types::job::{IntegrationLauncherConfig, JobRunConfig};
use syncbyte_types::sync::{NormalizationInput, StandardSyncInput, StandardSyncOutput};

use crate::attempt::AttemptExecution;
use crate::cancellation::CancellationHandler;
use crate::config::types::WorkerConfig;
use crate::destination::ConnectorDestination;
use crate::error::WorkerError;
use crate::normalization::{create_runner, NormalizationWorker};
use crate::orchestrator::SyncActivities;
use crate::process::{check_image_reference, IntegrationLauncher, ProcessLauncher};
use crate::replication::ReplicationWorker;
use crate::source::SyncSource;
use crate::worker::{Worker, WorkerFactory};
use crate::workspace::RetentionPolicy;

/// Runs each activity as an [`AttemptExecution`] in the current process.
pub struct LocalActivities {
    launcher: Arc<dyn ProcessLauncher>,
    workspace_root: PathBuf,
    normalization_image: String,
    retention: RetentionPolicy,
    cancellation: CancellationHandler,
}

impl LocalActivities {
    pub fn new(
        launcher: Arc<dyn ProcessLauncher>,
        workspace_root: impl Into<PathBuf>,
        normalization_image: impl Into<String>,
        cancellation: CancellationHandler,
    ) -> Self {
        Self {
            launcher,
            workspace_root: workspace_root.into(),
            normalization_image: normalization_image.into(),
            retention: RetentionPolicy::default(),
            cancellation,
        }
    }

    pub fn from_config(
        config: &WorkerConfig,
        launcher: Arc<dyn ProcessLauncher>,
        cancellation: CancellationHandler,
    ) -> Self {
        Self::new(
            launcher,
            &config.workspace_root,
            &config.normalization_image,
            cancellation,
        )
        .with_retention(config.workspace_retention)
    }

    #[must_use]
    pub fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = retention;
        self
    }

    #[must_use]
    pub fn cancellation(&self) -> &CancellationHandler {
        &self.cancellation
    }
}

#[async_trait]
impl SyncActivities for LocalActivities {
    async fn replicate(
        &self,
        job: JobRunConfig,
        source: &IntegrationLauncherConfig,
        destination: &IntegrationLauncherConfig,
        input: &StandardSyncInput,
    ) -> Result<StandardSyncOutput, WorkerError> {
        let launcher = Arc::clone(&self.launcher);
        let source = source.clone();
        let destination = destination.clone();
        let factory: WorkerFactory<StandardSyncInput, StandardSyncOutput> = Box::new(move || {
            ensure_same_attempt(job, &source)?;
            ensure_same_attempt(job, &destination)?;
            check_image_reference(&source.docker_image)?;
            check_image_reference(&destination.docker_image)?;

            let sync_source = SyncSource::for_launcher(&source, Arc::clone(&launcher));
            let sync_destination = ConnectorDestination::new(IntegrationLauncher::new(
                job,
                destination.docker_image,
                launcher,
            ));
            let worker: Box<dyn Worker<StandardSyncInput, StandardSyncOutput>> =
                Box::new(ReplicationWorker::new(job, sync_source, sync_destination));
            Ok(worker)
        });

        let input = input.clone();
        AttemptExecution::new(
            &self.workspace_root,
            job,
            factory,
            Box::new(move || Ok(input)),
            self.cancellation.clone(),
        )
        .with_retention(self.retention)
        .execute()
        .await
    }

    async fn normalize(
        &self,
        job: JobRunConfig,
        destination: &IntegrationLauncherConfig,
        input: NormalizationInput,
    ) -> Result<(), WorkerError> {
        let launcher = Arc::clone(&self.launcher);
        let destination = destination.clone();
        let normalization_image = self.normalization_image.clone();
        let factory: WorkerFactory<NormalizationInput, ()> = Box::new(move || {
            ensure_same_attempt(job, &destination)?;
            check_image_reference(&normalization_image)?;
            let runner = create_runner(job, &destination.docker_image, &normalization_image, launcher);
            let worker: Box<dyn Worker<NormalizationInput, ()>> =
                Box::new(NormalizationWorker::new(job, runner));
            Ok(worker)
        });

        AttemptExecution::new(
            &self.workspace_root,
            job,
            factory,
            Box::new(move || Ok(input)),
            self.cancellation.clone(),
        )
        .with_retention(self.retention)
        .execute()
        .await
    }
}

fn ensure_same_attempt(job: JobRunConfig, launcher: &IntegrationLauncherConfig) -> anyhow::Result<()> {
    if launcher.job_run() != job {
        anyhow::bail!(
            "launcher config for '{}' belongs to {}, not {job}",
            launcher.docker_image,
            launcher.job_run()
        );
    }
    Ok(())
}
