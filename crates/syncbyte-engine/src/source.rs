//! Replication sources: a real connector process or the empty reset stub.

use std::path::Path;
use std::sync::Arc;

use syncbyte_types::job::{ConnectorRole, IntegrationLauncherConfig};
use syncbyte_types::protocol::ProtocolMessage;
use syncbyte_types::sync::StandardSyncInput;

use crate::error::WorkerError;
use crate::messages::{MessageStream, ReadError};
use crate::process::{IntegrationLauncher, ProcessControl, ProcessLauncher, ProcessOutput};
use crate::workspace::write_job_file;

/// Image name that selects [`SyncSource::Empty`] for reset jobs.
pub const RESET_JOB_SOURCE_IMAGE: &str = "airbyte_empty";

pub const SOURCE_CONFIG_FILE: &str = "source_config.json";
pub const SOURCE_CATALOG_FILE: &str = "source_catalog.json";
pub const INPUT_STATE_FILE: &str = "input_state.json";

/// Where replicated messages come from.
pub enum SyncSource {
    Connector(ConnectorSource),
    /// Ends immediately; drives the destination to reset its streams.
    Empty(EmptySource),
}

impl SyncSource {
    /// Pick the source variant for a launcher config.
    pub fn for_launcher(
        config: &IntegrationLauncherConfig,
        launcher: Arc<dyn ProcessLauncher>,
    ) -> Self {
        if config.docker_image == RESET_JOB_SOURCE_IMAGE {
            Self::Empty(EmptySource::default())
        } else {
            Self::Connector(ConnectorSource::new(IntegrationLauncher::new(
                config.job_run(),
                config.docker_image.clone(),
                launcher,
            )))
        }
    }

    #[must_use]
    pub fn is_reset(&self) -> bool {
        matches!(self, Self::Empty(_))
    }

    /// # Errors
    ///
    /// Returns [`WorkerError::Launch`] if the connector cannot be started.
    pub async fn start(&mut self, input: &StandardSyncInput, job_root: &Path) -> Result<(), WorkerError> {
        match self {
            Self::Connector(source) => source.start(input, job_root).await,
            Self::Empty(_) => Ok(()),
        }
    }

    /// Next RECORD or STATE message; `None` at end of stream.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::Protocol`] for malformed output and
    /// [`WorkerError::Runtime`] for I/O failures.
    pub async fn next_message(&mut self) -> Result<Option<ProtocolMessage>, WorkerError> {
        match self {
            Self::Connector(source) => source.next_message().await,
            Self::Empty(_) => Ok(None),
        }
    }

    /// Wait for the source to exit after end of stream.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::Runtime`] on a non-zero exit code.
    pub async fn close(&mut self) -> Result<(), WorkerError> {
        match self {
            Self::Connector(source) => source.close().await,
            Self::Empty(_) => Ok(()),
        }
    }

    /// Kill the source process if it is still running.
    pub async fn cancel(&mut self) {
        if let Self::Connector(source) = self {
            source.cancel().await;
        }
    }
}

#[derive(Debug, Default)]
pub struct EmptySource;

struct RunningSource {
    messages: MessageStream<ProcessOutput>,
    control: Box<dyn ProcessControl>,
}

/// A source connector launched with `read`.
pub struct ConnectorSource {
    launcher: IntegrationLauncher,
    running: Option<RunningSource>,
}

impl ConnectorSource {
    pub fn new(launcher: IntegrationLauncher) -> Self {
        Self {
            launcher,
            running: None,
        }
    }

    async fn start(&mut self, input: &StandardSyncInput, job_root: &Path) -> Result<(), WorkerError> {
        write_job_file(job_root, SOURCE_CONFIG_FILE, &input.source_configuration).await?;
        write_job_file(job_root, SOURCE_CATALOG_FILE, &input.catalog).await?;
        let state_file = match &input.state {
            Some(state) => {
                write_job_file(job_root, INPUT_STATE_FILE, &state.data).await?;
                Some(INPUT_STATE_FILE)
            }
            None => None,
        };

        let process = self
            .launcher
            .read(job_root, SOURCE_CONFIG_FILE, SOURCE_CATALOG_FILE, state_file)
            .await
            .map_err(WorkerError::Launch)?;

        // Sources never read input.
        drop(process.stdin);
        self.running = Some(RunningSource {
            messages: MessageStream::new(process.stdout, ConnectorRole::Source),
            control: process.control,
        });
        Ok(())
    }

    async fn next_message(&mut self) -> Result<Option<ProtocolMessage>, WorkerError> {
        let Some(running) = self.running.as_mut() else {
            return Err(WorkerError::runtime(anyhow::anyhow!("source read before start")));
        };
        running.messages.next_message().await.map_err(|e| match e {
            ReadError::Protocol(e) => WorkerError::protocol(ConnectorRole::Source, e.to_string()),
            ReadError::Io { .. } => WorkerError::runtime(e),
        })
    }

    async fn close(&mut self) -> Result<(), WorkerError> {
        let Some(mut running) = self.running.take() else {
            return Ok(());
        };
        let exit_code = running.control.wait().await.map_err(WorkerError::runtime)?;
        if exit_code != 0 {
            return Err(WorkerError::runtime(anyhow::anyhow!(
                "source process '{}' exited with code {exit_code}",
                self.launcher.image()
            )));
        }
        tracing::debug!(image = self.launcher.image(), "Source process exited cleanly");
        Ok(())
    }

    async fn cancel(&mut self) {
        if let Some(mut running) = self.running.take() {
            if let Err(e) = running.control.kill().await {
                tracing::warn!(image = self.launcher.image(), "Failed to kill source: {:#}", e);
            }
        }
    }
}
