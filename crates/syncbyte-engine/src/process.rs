//! Connector process launching.
//!
//! [`ProcessLauncher`] is the seam to whatever actually runs connector
//! images. [`DockerProcessLauncher`] runs them with `docker run` through
//! `tokio::process`; tests substitute an in-memory launcher.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};

use syncbyte_types::job::{ConnectorRole, JobRunConfig};

/// Mount point of the attempt workspace inside connector containers.
pub const CONTAINER_JOB_ROOT: &str = "/data/job";

/// Everything needed to start one connector process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    pub job: JobRunConfig,
    pub role: ConnectorRole,
    pub image: String,
    pub args: Vec<String>,
    /// Attempt workspace; connector-visible files live here.
    pub job_root: PathBuf,
}

pub type ProcessInput = Box<dyn AsyncWrite + Send + Unpin>;
pub type ProcessOutput = Box<dyn AsyncRead + Send + Unpin>;

/// Lifecycle control of a launched process.
#[async_trait]
pub trait ProcessControl: Send {
    /// Wait for exit and return the exit code.
    async fn wait(&mut self) -> Result<i32>;
    /// Terminate the process. Idempotent.
    async fn kill(&mut self) -> Result<()>;
}

/// A running connector: line-delimited protocol on stdin/stdout.
pub struct ConnectorProcess {
    pub stdin: Option<ProcessInput>,
    pub stdout: ProcessOutput,
    pub control: Box<dyn ProcessControl>,
}

impl std::fmt::Debug for ConnectorProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorProcess")
            .field("stdin_open", &self.stdin.is_some())
            .finish_non_exhaustive()
    }
}

/// Starts connector processes.
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if the process could not be started.
    async fn launch(&self, request: LaunchRequest) -> Result<ConnectorProcess>;
}

/// Reject image references no launcher could run.
///
/// # Errors
///
/// Returns an error if `image` is empty or contains whitespace.
pub fn check_image_reference(image: &str) -> Result<()> {
    if image.is_empty() {
        anyhow::bail!("docker image name is empty");
    }
    if image.chars().any(char::is_whitespace) {
        anyhow::bail!("invalid docker image name '{image}'");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// IntegrationLauncher: connector command lines for one image
// ---------------------------------------------------------------------------

/// Builds the connector command lines for one image of one attempt.
#[derive(Clone)]
pub struct IntegrationLauncher {
    job: JobRunConfig,
    image: String,
    launcher: Arc<dyn ProcessLauncher>,
}

impl IntegrationLauncher {
    pub fn new(job: JobRunConfig, image: impl Into<String>, launcher: Arc<dyn ProcessLauncher>) -> Self {
        Self {
            job,
            image: image.into(),
            launcher,
        }
    }

    #[must_use]
    pub fn image(&self) -> &str {
        &self.image
    }

    /// `read --config <config> --catalog <catalog> [--state <state>]`
    ///
    /// # Errors
    ///
    /// Returns an error if the launcher fails to start the process.
    pub async fn read(
        &self,
        job_root: &Path,
        config_file: &str,
        catalog_file: &str,
        state_file: Option<&str>,
    ) -> Result<ConnectorProcess> {
        let mut args = vec![
            "read".to_string(),
            "--config".to_string(),
            config_file.to_string(),
            "--catalog".to_string(),
            catalog_file.to_string(),
        ];
        if let Some(state_file) = state_file {
            args.push("--state".to_string());
            args.push(state_file.to_string());
        }
        self.launch(ConnectorRole::Source, job_root, args).await
    }

    /// `write --config <config> --catalog <catalog>`
    ///
    /// # Errors
    ///
    /// Returns an error if the launcher fails to start the process.
    pub async fn write(
        &self,
        job_root: &Path,
        config_file: &str,
        catalog_file: &str,
    ) -> Result<ConnectorProcess> {
        let args = vec![
            "write".to_string(),
            "--config".to_string(),
            config_file.to_string(),
            "--catalog".to_string(),
            catalog_file.to_string(),
        ];
        self.launch(ConnectorRole::Destination, job_root, args).await
    }

    /// `run --integration-type <type> --config <config> --catalog <catalog>`
    ///
    /// # Errors
    ///
    /// Returns an error if the launcher fails to start the process.
    pub async fn normalize(
        &self,
        job_root: &Path,
        integration_type: &str,
        config_file: &str,
        catalog_file: &str,
    ) -> Result<ConnectorProcess> {
        let args = vec![
            "run".to_string(),
            "--integration-type".to_string(),
            integration_type.to_string(),
            "--config".to_string(),
            config_file.to_string(),
            "--catalog".to_string(),
            catalog_file.to_string(),
        ];
        self.launch(ConnectorRole::Normalization, job_root, args).await
    }

    async fn launch(
        &self,
        role: ConnectorRole,
        job_root: &Path,
        args: Vec<String>,
    ) -> Result<ConnectorProcess> {
        tracing::info!(
            job_id = self.job.job_id,
            attempt_id = self.job.attempt_id,
            role = %role,
            image = self.image,
            "Launching connector process"
        );
        self.launcher
            .launch(LaunchRequest {
                job: self.job,
                role,
                image: self.image.clone(),
                args,
                job_root: job_root.to_path_buf(),
            })
            .await
            .with_context(|| format!("failed to launch {role} image '{}'", self.image))
    }
}

// ---------------------------------------------------------------------------
// DockerProcessLauncher
// ---------------------------------------------------------------------------

static CONTAINER_SEQ: AtomicU64 = AtomicU64::new(0);

/// Runs connector images as `docker run -i` containers with the attempt
/// workspace mounted at [`CONTAINER_JOB_ROOT`].
#[derive(Debug, Clone)]
pub struct DockerProcessLauncher {
    docker_binary: String,
    network: Option<String>,
}

impl DockerProcessLauncher {
    pub fn new(docker_binary: impl Into<String>, network: Option<String>) -> Self {
        Self {
            docker_binary: docker_binary.into(),
            network,
        }
    }

    fn container_name(request: &LaunchRequest) -> String {
        let seq = CONTAINER_SEQ.fetch_add(1, Ordering::Relaxed);
        format!(
            "syncbyte-{}-{}-{}-{seq}",
            request.role, request.job.job_id, request.job.attempt_id
        )
    }

    fn docker_args(&self, request: &LaunchRequest, container_name: &str) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "--rm".to_string(),
            "-i".to_string(),
            "--init".to_string(),
            "--name".to_string(),
            container_name.to_string(),
            "-v".to_string(),
            format!("{}:{CONTAINER_JOB_ROOT}", request.job_root.display()),
            "-w".to_string(),
            CONTAINER_JOB_ROOT.to_string(),
        ];
        if let Some(network) = &self.network {
            args.push("--network".to_string());
            args.push(network.clone());
        }
        args.push(request.image.clone());
        args.extend(request.args.iter().cloned());
        args
    }
}

impl Default for DockerProcessLauncher {
    fn default() -> Self {
        Self::new("docker", None)
    }
}

#[async_trait]
impl ProcessLauncher for DockerProcessLauncher {
    async fn launch(&self, request: LaunchRequest) -> Result<ConnectorProcess> {
        let container_name = Self::container_name(&request);
        let args = self.docker_args(&request, &container_name);
        tracing::debug!(
            role = %request.role,
            container = %container_name,
            args = ?args,
            "Spawning docker process"
        );

        let mut child = tokio::process::Command::new(&self.docker_binary)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn '{}'", self.docker_binary))?;

        let stdin = child.stdin.take().context("child stdin not captured")?;
        let stdout = child.stdout.take().context("child stdout not captured")?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_stderr(stderr, request.role));
        }

        Ok(ConnectorProcess {
            stdin: Some(Box::new(stdin)),
            stdout: Box::new(stdout),
            control: Box::new(DockerContainer {
                child,
                docker_binary: self.docker_binary.clone(),
                container_name,
                finished: false,
            }),
        })
    }
}

async fn forward_stderr(stderr: tokio::process::ChildStderr, role: ConnectorRole) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::warn!(role = %role, "{}", line);
    }
}

struct DockerContainer {
    child: tokio::process::Child,
    docker_binary: String,
    container_name: String,
    /// Exited or removed; nothing left to clean up on drop.
    finished: bool,
}

fn removal_command(docker_binary: &str, container_name: &str) -> std::process::Command {
    let mut command = std::process::Command::new(docker_binary);
    command
        .args(["rm", "-f", container_name])
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    command
}

#[async_trait]
impl ProcessControl for DockerContainer {
    async fn wait(&mut self) -> Result<i32> {
        let status = self.child.wait().await.context("failed to wait for docker process")?;
        self.finished = true;
        Ok(status.code().unwrap_or(-1))
    }

    async fn kill(&mut self) -> Result<()> {
        // Killing the docker client does not stop the container.
        let removed = tokio::process::Command::from(removal_command(&self.docker_binary, &self.container_name))
            .status()
            .await;
        if let Err(e) = removed {
            tracing::warn!(container = %self.container_name, "docker rm -f failed: {}", e);
        }
        self.finished = true;
        match self.child.kill().await {
            Ok(()) => Ok(()),
            // Already exited.
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
            Err(e) => Err(e).context("failed to kill docker process"),
        }
    }
}

impl Drop for DockerContainer {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        // `kill_on_drop` only stops the client; remove the container as well.
        tracing::warn!(container = %self.container_name, "Removing abandoned container");
        let command = removal_command(&self.docker_binary, &self.container_name);
        let container = self.container_name.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = tokio::process::Command::from(command).status().await {
                        tracing::warn!(container = %container, "docker rm -f failed: {}", e);
                    }
                });
            }
            Err(_) => {
                let mut command = command;
                if let Err(e) = command.spawn() {
                    tracing::warn!(container = %container, "docker rm -f failed: {}", e);
                }
            }
        }
    }
}
