//! Normalization worker and its destination-specific runners.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use syncbyte_types::catalog::ConfiguredCatalog;
use syncbyte_types::job::{ConnectorRole, JobRunConfig};
use syncbyte_types::sync::NormalizationInput;

use crate::destination::{DESTINATION_CATALOG_FILE, DESTINATION_CONFIG_FILE};
use crate::error::WorkerError;
use crate::messages::{MessageStream, ReadError};
use crate::process::{IntegrationLauncher, ProcessControl, ProcessLauncher, ProcessOutput};
use crate::worker::Worker;
use crate::workspace::write_job_file;

/// Destination repositories with a normalization integration.
const INTEGRATION_TYPES: &[(&str, &str)] = &[
    ("airbyte/destination-bigquery", "bigquery"),
    ("airbyte/destination-postgres", "postgres"),
    ("airbyte/destination-redshift", "redshift"),
    ("airbyte/destination-snowflake", "snowflake"),
];

/// Transforms raw loaded tables into the modelled schema of a catalog.
#[async_trait]
pub trait NormalizationRunner: Send {
    async fn normalize(
        &mut self,
        job_root: &Path,
        config: &serde_json::Value,
        catalog: &ConfiguredCatalog,
        cancel: &CancellationToken,
    ) -> Result<(), WorkerError>;
}

/// Normalization integration type of a destination image, if it has one.
#[must_use]
pub fn integration_type_for(destination_image: &str) -> Option<&'static str> {
    let repository = image_repository(destination_image);
    INTEGRATION_TYPES
        .iter()
        .find(|(repo, _)| *repo == repository)
        .map(|(_, integration_type)| *integration_type)
}

/// Image reference without tag or digest.
fn image_repository(image: &str) -> &str {
    let image = image.split('@').next().unwrap_or(image);
    let name_start = image.rfind('/').map_or(0, |i| i + 1);
    match image[name_start..].find(':') {
        Some(colon) => &image[..name_start + colon],
        None => image,
    }
}

/// Pick the runner for a destination image.
pub fn create_runner(
    job: JobRunConfig,
    destination_image: &str,
    normalization_image: &str,
    launcher: Arc<dyn ProcessLauncher>,
) -> Box<dyn NormalizationRunner> {
    match integration_type_for(destination_image) {
        Some(integration_type) => Box::new(DefaultNormalizationRunner::new(
            integration_type,
            IntegrationLauncher::new(job, normalization_image, launcher),
        )),
        None => Box::new(NoOpNormalizationRunner::new(destination_image)),
    }
}

/// Runs the normalization image with `run --integration-type <type>`.
pub struct DefaultNormalizationRunner {
    integration_type: &'static str,
    launcher: IntegrationLauncher,
}

impl DefaultNormalizationRunner {
    pub fn new(integration_type: &'static str, launcher: IntegrationLauncher) -> Self {
        Self {
            integration_type,
            launcher,
        }
    }
}

#[async_trait]
impl NormalizationRunner for DefaultNormalizationRunner {
    async fn normalize(
        &mut self,
        job_root: &Path,
        config: &serde_json::Value,
        catalog: &ConfiguredCatalog,
        cancel: &CancellationToken,
    ) -> Result<(), WorkerError> {
        write_job_file(job_root, DESTINATION_CONFIG_FILE, config).await?;
        write_job_file(job_root, DESTINATION_CATALOG_FILE, catalog).await?;

        let process = self
            .launcher
            .normalize(
                job_root,
                self.integration_type,
                DESTINATION_CONFIG_FILE,
                DESTINATION_CATALOG_FILE,
            )
            .await
            .map_err(WorkerError::Launch)?;
        drop(process.stdin);
        let mut output = MessageStream::new(process.stdout, ConnectorRole::Normalization);
        let mut control = process.control;

        let exit_code = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                if let Err(e) = control.kill().await {
                    tracing::warn!(image = self.launcher.image(), "Failed to kill normalization: {:#}", e);
                }
                return Err(WorkerError::cancelled());
            }
            result = run_to_exit(&mut output, control.as_mut()) => result,
        };

        match exit_code {
            Ok(0) => Ok(()),
            Ok(code) => Err(WorkerError::runtime(anyhow::anyhow!(
                "normalization process '{}' exited with code {code}",
                self.launcher.image()
            ))),
            Err(err) => {
                if let Err(e) = control.kill().await {
                    tracing::warn!(image = self.launcher.image(), "Failed to kill normalization: {:#}", e);
                }
                Err(err)
            }
        }
    }
}

/// Drain normalization output to EOF, then wait for the exit code.
async fn run_to_exit(
    output: &mut MessageStream<ProcessOutput>,
    control: &mut dyn ProcessControl,
) -> Result<i32, WorkerError> {
    loop {
        match output.next_message().await {
            Ok(Some(message)) => {
                tracing::debug!(
                    message_type = %message.message_type(),
                    "Ignoring message from normalization"
                );
            }
            Ok(None) => break,
            Err(ReadError::Protocol(e)) => {
                return Err(WorkerError::protocol(ConnectorRole::Normalization, e.to_string()));
            }
            Err(e @ ReadError::Io { .. }) => return Err(WorkerError::runtime(e)),
        }
    }
    control.wait().await.map_err(WorkerError::runtime)
}

/// Used for destinations without a normalization integration.
#[derive(Debug)]
pub struct NoOpNormalizationRunner {
    destination_image: String,
}

impl NoOpNormalizationRunner {
    pub fn new(destination_image: impl Into<String>) -> Self {
        Self {
            destination_image: destination_image.into(),
        }
    }
}

#[async_trait]
impl NormalizationRunner for NoOpNormalizationRunner {
    async fn normalize(
        &mut self,
        _job_root: &Path,
        _config: &serde_json::Value,
        _catalog: &ConfiguredCatalog,
        _cancel: &CancellationToken,
    ) -> Result<(), WorkerError> {
        tracing::info!(
            destination = self.destination_image,
            "Destination has no normalization integration, skipping"
        );
        Ok(())
    }
}

pub struct NormalizationWorker {
    job: JobRunConfig,
    runner: Box<dyn NormalizationRunner>,
}

impl NormalizationWorker {
    pub fn new(job: JobRunConfig, runner: Box<dyn NormalizationRunner>) -> Self {
        Self { job, runner }
    }
}

#[async_trait]
impl Worker<NormalizationInput, ()> for NormalizationWorker {
    async fn run(
        &mut self,
        input: NormalizationInput,
        job_root: &Path,
        cancel: CancellationToken,
    ) -> Result<(), WorkerError> {
        tracing::info!(
            job_id = self.job.job_id,
            attempt_id = self.job.attempt_id,
            streams = input.catalog.streams.len(),
            "Starting normalization"
        );
        self.runner
            .normalize(
                job_root,
                &input.destination_configuration,
                &input.catalog,
                &cancel,
            )
            .await?;
        tracing::info!(
            job_id = self.job.job_id,
            attempt_id = self.job.attempt_id,
            "Normalization finished"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("airbyte/destination-postgres:0.3.5", Some("postgres"))]
    #[case("airbyte/destination-bigquery", Some("bigquery"))]
    #[case("airbyte/destination-snowflake@sha256:abc", Some("snowflake"))]
    #[case("airbyte/destination-redshift:dev", Some("redshift"))]
    #[case("airbyte/destination-csv:0.2.0", None)]
    #[case("registry:5000/airbyte/destination-postgres:1.0", None)]
    fn integration_type_from_image(#[case] image: &str, #[case] expected: Option<&str>) {
        assert_eq!(integration_type_for(image), expected);
    }

    #[test]
    fn image_repository_strips_tag_but_keeps_registry_port() {
        assert_eq!(image_repository("registry:5000/org/img:1.0"), "registry:5000/org/img");
        assert_eq!(image_repository("img"), "img");
    }

    #[tokio::test]
    async fn noop_runner_succeeds_without_launching() {
        let mut runner = NoOpNormalizationRunner::new("airbyte/destination-csv:0.2.0");
        let catalog = ConfiguredCatalog { streams: vec![] };
        runner
            .normalize(
                Path::new("/nonexistent"),
                &serde_json::json!({}),
                &catalog,
                &CancellationToken::new(),
            )
            .await
            .unwrap();
    }
}
