//! Generic attempt execution: validate, scope a workspace, build and run a
//! worker under cooperative cancellation.

use std::path::{Path, PathBuf};

use syncbyte_types::job::JobRunConfig;
use syncbyte_types::stats::AttemptStatus;
use tokio_util::sync::CancellationToken;

use crate::cancellation::CancellationHandler;
use crate::error::WorkerError;
use crate::validation::{validate, ValidatedInput};
use crate::worker::WorkerFactory;
use crate::workspace::{AttemptWorkspace, RetentionPolicy};

/// Produces the attempt's input. Called once, before anything else happens.
pub type InputSupplier<I> = Box<dyn FnOnce() -> Result<I, WorkerError> + Send>;

/// One attempt of one worker. Reports exactly one outcome and never retries.
pub struct AttemptExecution<I, O> {
    workspace_root: PathBuf,
    job: JobRunConfig,
    worker_factory: WorkerFactory<I, O>,
    input_supplier: InputSupplier<I>,
    cancellation: CancellationHandler,
    retention: RetentionPolicy,
}

impl<I, O> AttemptExecution<I, O>
where
    I: ValidatedInput + Send + 'static,
    O: Send + 'static,
{
    pub fn new(
        workspace_root: impl Into<PathBuf>,
        job: JobRunConfig,
        worker_factory: WorkerFactory<I, O>,
        input_supplier: InputSupplier<I>,
        cancellation: CancellationHandler,
    ) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            job,
            worker_factory,
            input_supplier,
            cancellation,
            retention: RetentionPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = retention;
        self
    }

    /// Run the attempt to completion.
    ///
    /// # Errors
    ///
    /// * [`WorkerError::Validation`] if the input does not match its schema;
    ///   nothing is launched.
    /// * [`WorkerError::Launch`] if the workspace cannot be claimed or the
    ///   worker cannot be built.
    /// * [`WorkerError::Cancelled`] if cancellation was requested.
    /// * Any error the worker itself returned.
    pub async fn execute(self) -> Result<O, WorkerError> {
        let Self {
            workspace_root,
            job,
            worker_factory,
            input_supplier,
            cancellation,
            retention,
        } = self;

        let input = input_supplier()?;
        validate(&input)?;

        let workspace = tokio::task::spawn_blocking(move || {
            AttemptWorkspace::claim(&workspace_root, job, retention)
        })
        .await
        .map_err(|e| WorkerError::Launch(anyhow::Error::new(e).context("workspace claim task failed")))?
        .map_err(|e| WorkerError::Launch(e.into()))?;
        let token = cancellation.register();
        let result = run_worker(worker_factory, input, workspace.path(), token.clone(), &cancellation).await;

        let path = workspace.path().to_path_buf();
        match tokio::task::spawn_blocking(move || workspace.release()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(path = %path.display(), "Failed to release workspace: {}", e),
            Err(e) => tracing::warn!(path = %path.display(), "Workspace release task failed: {}", e),
        }

        let result = match result {
            Err(err) if token.is_cancelled() && !err.is_cancelled() => Err(err.into_cancelled()),
            other => other,
        };
        log_outcome(job, &result);
        result
    }
}

async fn run_worker<I, O>(
    worker_factory: WorkerFactory<I, O>,
    input: I,
    job_root: &Path,
    token: CancellationToken,
    cancellation: &CancellationHandler,
) -> Result<O, WorkerError>
where
    I: Send + 'static,
    O: Send + 'static,
{
    if token.is_cancelled() {
        return Err(WorkerError::cancelled());
    }
    let mut worker = worker_factory().map_err(WorkerError::Launch)?;

    let finished = {
        let run = worker.run(input, job_root, token.clone());
        tokio::pin!(run);
        tokio::select! {
            result = &mut run => Some(result),
            () = token.cancelled() => {
                tokio::time::timeout(cancellation.grace_period(), &mut run).await.ok()
            }
        }
    };
    if let Some(result) = finished {
        return result;
    }

    tracing::warn!(
        grace_period_secs = cancellation.grace_period().as_secs_f64(),
        "Worker did not stop within the grace period, abandoning it"
    );
    let error = WorkerError::cancelled();
    // Dropping the worker releases whatever processes it still holds.
    Err(match worker.progress() {
        Some(progress) => error.with_partial(progress),
        None => error,
    })
}

fn log_outcome<O>(job: JobRunConfig, result: &Result<O, WorkerError>) {
    match result {
        Ok(_) => tracing::info!(
            job_id = job.job_id,
            attempt_id = job.attempt_id,
            status = %AttemptStatus::Succeeded,
            "Attempt finished"
        ),
        Err(err) => tracing::warn!(
            job_id = job.job_id,
            attempt_id = job.attempt_id,
            status = %err.status(),
            "Attempt finished: {}",
            err
        ),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::json;
    use syncbyte_types::catalog::ConfiguredCatalog;
    use syncbyte_types::stats::SyncStats;
    use syncbyte_types::sync::NormalizationInput;
    use tempfile::tempdir;

    use super::*;
    use crate::error::PartialProgress;
    use crate::worker::Worker;

    enum Behaviour {
        Succeed,
        Fail,
        StopOnCancel,
        IgnoreCancel,
    }

    struct FakeWorker(Behaviour);

    #[async_trait]
    impl Worker<NormalizationInput, String> for FakeWorker {
        async fn run(
            &mut self,
            _input: NormalizationInput,
            job_root: &Path,
            cancel: CancellationToken,
        ) -> Result<String, WorkerError> {
            match self.0 {
                Behaviour::Succeed => Ok(job_root.display().to_string()),
                Behaviour::Fail => Err(WorkerError::runtime(anyhow::anyhow!("boom"))),
                Behaviour::StopOnCancel => {
                    cancel.cancelled().await;
                    Err(WorkerError::runtime(anyhow::anyhow!("process killed")))
                }
                Behaviour::IgnoreCancel => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(String::new())
                }
            }
        }

        fn progress(&self) -> Option<PartialProgress> {
            matches!(self.0, Behaviour::IgnoreCancel).then(|| PartialProgress {
                stats: SyncStats {
                    records_synced: 5,
                    ..SyncStats::default()
                },
                state: None,
            })
        }
    }

    fn input(config: serde_json::Value) -> InputSupplier<NormalizationInput> {
        Box::new(move || -> Result<NormalizationInput, WorkerError> {
            Ok(NormalizationInput {
                destination_configuration: config,
                catalog: ConfiguredCatalog { streams: vec![] },
            })
        })
    }

    fn factory(behaviour: Behaviour, built: Arc<AtomicBool>) -> WorkerFactory<NormalizationInput, String> {
        Box::new(move || -> anyhow::Result<Box<dyn Worker<NormalizationInput, String>>> {
            built.store(true, Ordering::SeqCst);
            Ok(Box::new(FakeWorker(behaviour)))
        })
    }

    fn execution(
        root: &Path,
        behaviour: Behaviour,
        config: serde_json::Value,
        cancellation: CancellationHandler,
    ) -> (AttemptExecution<NormalizationInput, String>, Arc<AtomicBool>) {
        let built = Arc::new(AtomicBool::new(false));
        let execution = AttemptExecution::new(
            root,
            JobRunConfig::new(7, 1),
            factory(behaviour, built.clone()),
            input(config),
            cancellation,
        );
        (execution, built)
    }

    #[tokio::test]
    async fn worker_runs_inside_attempt_workspace() {
        let root = tempdir().unwrap();
        let (execution, _) = execution(root.path(), Behaviour::Succeed, json!({}), CancellationHandler::default());
        let job_root = execution.execute().await.unwrap();
        assert_eq!(job_root, root.path().join("7").join("1").display().to_string());
    }

    #[tokio::test]
    async fn invalid_input_never_builds_worker() {
        let root = tempdir().unwrap();
        let (execution, built) =
            execution(root.path(), Behaviour::Succeed, json!("bad"), CancellationHandler::default());
        let err = execution.execute().await.unwrap_err();
        assert!(matches!(err, WorkerError::Validation { .. }));
        assert!(!built.load(Ordering::SeqCst));
        assert!(!root.path().join("7").exists());
    }

    #[tokio::test]
    async fn factory_failure_is_launch_error_and_releases_workspace() {
        let root = tempdir().unwrap();
        let execution = AttemptExecution::<NormalizationInput, String>::new(
            root.path(),
            JobRunConfig::new(7, 1),
            Box::new(|| -> anyhow::Result<Box<dyn Worker<NormalizationInput, String>>> {
                Err(anyhow::anyhow!("bad docker image name"))
            }),
            input(json!({})),
            CancellationHandler::default(),
        );
        let err = execution.execute().await.unwrap_err();
        assert!(matches!(err, WorkerError::Launch(_)));
        AttemptWorkspace::claim(root.path(), JobRunConfig::new(7, 1), RetentionPolicy::Retain).unwrap();
    }

    #[tokio::test]
    async fn workspace_in_use_is_launch_error() {
        let root = tempdir().unwrap();
        let _held =
            AttemptWorkspace::claim(root.path(), JobRunConfig::new(7, 1), RetentionPolicy::Retain).unwrap();
        let (execution, built) = execution(root.path(), Behaviour::Succeed, json!({}), CancellationHandler::default());
        let err = execution.execute().await.unwrap_err();
        assert!(matches!(err, WorkerError::Launch(_)));
        assert!(!built.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn worker_failure_is_reported_as_is() {
        let root = tempdir().unwrap();
        let (execution, _) = execution(root.path(), Behaviour::Fail, json!({}), CancellationHandler::default());
        let err = execution.execute().await.unwrap_err();
        assert_eq!(err.status(), AttemptStatus::Failed);
    }

    #[tokio::test]
    async fn cancellation_before_start_skips_worker() {
        let root = tempdir().unwrap();
        let handler = CancellationHandler::default();
        handler.cancel();
        let (execution, built) = execution(root.path(), Behaviour::Succeed, json!({}), handler);
        let err = execution.execute().await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(!built.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn cooperative_worker_reports_cancelled() {
        let root = tempdir().unwrap();
        let handler = CancellationHandler::new(Duration::from_secs(5));
        let (execution, _) = execution(root.path(), Behaviour::StopOnCancel, json!({}), handler.clone());
        let task = tokio::spawn(execution.execute());
        tokio::time::sleep(Duration::from_millis(20)).await;
        handler.cancel();
        let err = task.await.unwrap().unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn unresponsive_worker_is_abandoned_after_grace_period() {
        let root = tempdir().unwrap();
        let handler = CancellationHandler::new(Duration::from_secs(2));
        let (execution, built) = execution(root.path(), Behaviour::IgnoreCancel, json!({}), handler.clone());
        let task = tokio::spawn(execution.execute());
        while !built.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        handler.cancel();
        let started = tokio::time::Instant::now();
        let err = task.await.unwrap().unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(err.partial().unwrap().stats.records_synced, 5);
        assert!(started.elapsed() >= Duration::from_secs(2));
        assert!(started.elapsed() < Duration::from_secs(3600));
    }
}
