//! Destination connector handle.

use std::path::Path;

use tokio::io::{AsyncRead, AsyncWriteExt, BufWriter};

use syncbyte_types::catalog::ConfiguredCatalog;
use syncbyte_types::job::ConnectorRole;
use syncbyte_types::protocol::ProtocolMessage;

use crate::error::WorkerError;
use crate::messages::{MessageStream, ReadError};
use crate::process::{IntegrationLauncher, ProcessControl, ProcessInput, ProcessOutput};
use crate::workspace::write_job_file;

pub const DESTINATION_CONFIG_FILE: &str = "destination_config.json";
pub const DESTINATION_CATALOG_FILE: &str = "destination_catalog.json";

/// A destination connector launched with `write`.
///
/// Messages go in through [`accept`](Self::accept); the connector's own output
/// (state acks, logs) is handed off with [`take_output`](Self::take_output) and
/// must be drained concurrently so the process never blocks on a full pipe.
pub struct ConnectorDestination {
    launcher: IntegrationLauncher,
    stdin: Option<BufWriter<ProcessInput>>,
    stdout: Option<ProcessOutput>,
    control: Option<Box<dyn ProcessControl>>,
}

impl ConnectorDestination {
    pub fn new(launcher: IntegrationLauncher) -> Self {
        Self {
            launcher,
            stdin: None,
            stdout: None,
            control: None,
        }
    }

    /// Write the connector files and launch the destination.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::Launch`] if the files cannot be written or the
    /// process cannot be started.
    pub async fn start(
        &mut self,
        config: &serde_json::Value,
        catalog: &ConfiguredCatalog,
        job_root: &Path,
    ) -> Result<(), WorkerError> {
        write_job_file(job_root, DESTINATION_CONFIG_FILE, config).await?;
        write_job_file(job_root, DESTINATION_CATALOG_FILE, catalog).await?;

        let process = self
            .launcher
            .write(job_root, DESTINATION_CONFIG_FILE, DESTINATION_CATALOG_FILE)
            .await
            .map_err(WorkerError::Launch)?;
        let stdin = process.stdin.ok_or_else(|| {
            WorkerError::Launch(anyhow::anyhow!(
                "destination '{}' was launched without stdin",
                self.launcher.image()
            ))
        })?;

        self.stdin = Some(BufWriter::new(stdin));
        self.stdout = Some(process.stdout);
        self.control = Some(process.control);
        Ok(())
    }

    /// Forward one message. Blocks while the destination applies backpressure.
    ///
    /// The line is flushed before returning, so a message counts as forwarded
    /// only once the destination's input pipe holds it.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::DestinationWrite`] if the destination's input is
    /// closed or broken.
    pub async fn accept(&mut self, message: &ProtocolMessage) -> Result<(), WorkerError> {
        let Some(stdin) = self.stdin.as_mut() else {
            return Err(WorkerError::destination_write("destination input is not open"));
        };
        let mut line = message
            .to_line()
            .map_err(|e| WorkerError::runtime(anyhow::Error::new(e).context("failed to encode message")))?;
        line.push('\n');
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| WorkerError::destination_write(format!("failed to write to destination: {e}")))?;
        stdin
            .flush()
            .await
            .map_err(|e| WorkerError::destination_write(format!("failed to flush destination input: {e}")))
    }

    /// Flush and close the destination's input.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::DestinationWrite`] if buffered messages cannot
    /// be flushed.
    pub async fn notify_end_of_stream(&mut self) -> Result<(), WorkerError> {
        let Some(mut stdin) = self.stdin.take() else {
            return Ok(());
        };
        stdin
            .flush()
            .await
            .map_err(|e| WorkerError::destination_write(format!("failed to flush destination input: {e}")))?;
        stdin
            .shutdown()
            .await
            .map_err(|e| WorkerError::destination_write(format!("failed to close destination input: {e}")))?;
        tracing::debug!(image = self.launcher.image(), "Destination input closed");
        Ok(())
    }

    /// Hand off the destination's output stream. Only the first call returns it.
    pub fn take_output(&mut self) -> Option<MessageStream<ProcessOutput>> {
        self.stdout
            .take()
            .map(|stdout| MessageStream::new(stdout, ConnectorRole::Destination))
    }

    /// Wait for the destination to exit after its output closed.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::DestinationWrite`] on a non-zero exit code.
    pub async fn close(&mut self) -> Result<(), WorkerError> {
        let Some(mut control) = self.control.take() else {
            return Ok(());
        };
        let exit_code = control.wait().await.map_err(WorkerError::runtime)?;
        if exit_code != 0 {
            return Err(WorkerError::destination_write(format!(
                "destination process '{}' exited with code {exit_code}",
                self.launcher.image()
            )));
        }
        tracing::debug!(image = self.launcher.image(), "Destination process exited cleanly");
        Ok(())
    }

    /// Kill the destination process if it is still running.
    pub async fn cancel(&mut self) {
        self.stdin = None;
        if let Some(mut control) = self.control.take() {
            if let Err(e) = control.kill().await {
                tracing::warn!(image = self.launcher.image(), "Failed to kill destination: {:#}", e);
            }
        }
    }
}

/// Consume the destination's output until it closes. Returns the number of
/// state messages the destination acknowledged.
///
/// # Errors
///
/// Returns [`WorkerError::Protocol`] if the destination emits a record or a
/// malformed message, and [`WorkerError::Runtime`] on read failures.
pub async fn drain_output<R: AsyncRead + Unpin>(
    mut output: MessageStream<R>,
) -> Result<u64, WorkerError> {
    let mut acks = 0u64;
    loop {
        let message = output.next_message().await.map_err(|e| match e {
            ReadError::Protocol(e) => WorkerError::protocol(ConnectorRole::Destination, e.to_string()),
            ReadError::Io { .. } => WorkerError::runtime(e),
        })?;
        match message {
            None => return Ok(acks),
            Some(ProtocolMessage::State(_)) => {
                acks += 1;
                tracing::debug!(acks, "Destination committed state");
            }
            Some(other) => {
                return Err(WorkerError::protocol(
                    ConnectorRole::Destination,
                    format!("destination emitted unexpected {} message", other.message_type()),
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(text: &'static str) -> MessageStream<&'static [u8]> {
        MessageStream::new(text.as_bytes(), ConnectorRole::Destination)
    }

    #[tokio::test]
    async fn drain_counts_state_acks() {
        let acks = drain_output(output(concat!(
            r#"{"type":"LOG","log":{"level":"INFO","message":"loading"}}"#, "\n",
            r#"{"type":"STATE","state":{"data":{"checkpoint":1}}}"#, "\n",
            r#"{"type":"STATE","state":{"data":{"checkpoint":2}}}"#, "\n",
        )))
        .await
        .unwrap();
        assert_eq!(acks, 2);
    }

    #[tokio::test]
    async fn record_from_destination_is_protocol_error() {
        let err = drain_output(output(concat!(
            r#"{"type":"RECORD","record":{"stream":"users","data":{},"emitted_at":0}}"#,
            "\n"
        )))
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            WorkerError::Protocol {
                role: ConnectorRole::Destination,
                ..
            }
        ));
    }
}
