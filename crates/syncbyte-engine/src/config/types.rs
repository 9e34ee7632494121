//! Configuration types deserialized from YAML.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use syncbyte_types::catalog::ConfiguredCatalog;
use syncbyte_types::job::{IntegrationLauncherConfig, JobRunConfig};
use syncbyte_types::protocol::State;
use syncbyte_types::sync::StandardSyncInput;

use crate::orchestrator::{ActivityOptions, DEFAULT_ACTIVITY_TIMEOUT};
use crate::workspace::RetentionPolicy;

// ---------------------------------------------------------------------------
// Worker configuration
// ---------------------------------------------------------------------------

/// Settings of the process that runs sync attempts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Attempt workspaces live under `<workspace_root>/<job_id>/<attempt_id>`.
    #[serde(default = "default_workspace_root")]
    pub workspace_root: PathBuf,
    #[serde(default)]
    pub docker: DockerConfig,
    #[serde(default = "default_normalization_image")]
    pub normalization_image: String,
    #[serde(default = "default_grace_period_secs")]
    pub cancellation_grace_period_secs: u64,
    #[serde(default = "default_activity_timeout_secs")]
    pub activity_timeout_secs: u64,
    #[serde(default)]
    pub workspace_retention: RetentionPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DockerConfig {
    #[serde(default = "default_docker_binary")]
    pub binary: String,
    /// Network connector containers join, e.g. `host`.
    #[serde(default)]
    pub network: Option<String>,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            binary: default_docker_binary(),
            network: None,
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            workspace_root: default_workspace_root(),
            docker: DockerConfig::default(),
            normalization_image: default_normalization_image(),
            cancellation_grace_period_secs: default_grace_period_secs(),
            activity_timeout_secs: default_activity_timeout_secs(),
            workspace_retention: RetentionPolicy::default(),
        }
    }
}

impl WorkerConfig {
    #[must_use]
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.cancellation_grace_period_secs)
    }

    #[must_use]
    pub fn activity_options(&self) -> ActivityOptions {
        ActivityOptions {
            schedule_to_close_timeout: Duration::from_secs(self.activity_timeout_secs),
        }
    }
}

fn default_workspace_root() -> PathBuf {
    std::env::temp_dir().join("syncbyte").join("workspace")
}

fn default_docker_binary() -> String {
    "docker".to_string()
}

fn default_normalization_image() -> String {
    "airbyte/normalization:0.1.0".to_string()
}

fn default_grace_period_secs() -> u64 {
    30
}

fn default_activity_timeout_secs() -> u64 {
    DEFAULT_ACTIVITY_TIMEOUT.as_secs()
}

// ---------------------------------------------------------------------------
// Job file
// ---------------------------------------------------------------------------

/// One connector of a job: image plus resolved configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorSpec {
    pub image: String,
    #[serde(default = "empty_object")]
    pub config: serde_json::Value,
}

/// One sync attempt described as a file, as run by the CLI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    pub job_id: i64,
    #[serde(default)]
    pub attempt_id: i32,
    pub source: ConnectorSpec,
    pub destination: ConnectorSpec,
    pub catalog: ConfiguredCatalog,
    #[serde(default)]
    pub namespace_prefix: Option<String>,
    /// Checkpoint handed to the source.
    #[serde(default)]
    pub state: Option<serde_json::Value>,
}

impl JobSpec {
    #[must_use]
    pub fn job_run(&self) -> JobRunConfig {
        JobRunConfig::new(self.job_id, self.attempt_id)
    }

    #[must_use]
    pub fn source_launcher(&self) -> IntegrationLauncherConfig {
        IntegrationLauncherConfig::new(self.job_run(), self.source.image.clone())
    }

    #[must_use]
    pub fn destination_launcher(&self) -> IntegrationLauncherConfig {
        IntegrationLauncherConfig::new(self.job_run(), self.destination.image.clone())
    }

    #[must_use]
    pub fn sync_input(&self) -> StandardSyncInput {
        StandardSyncInput {
            source_configuration: self.source.config.clone(),
            destination_configuration: self.destination.config.clone(),
            catalog: self.catalog.clone(),
            namespace_prefix: self.namespace_prefix.clone(),
            state: self.state.clone().map(|data| State { data }),
        }
    }
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}
