//! Attempt identity types.

use serde::{Deserialize, Serialize};

/// Identifies one attempt of one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobRunConfig {
    pub job_id: i64,
    pub attempt_id: i32,
}

impl JobRunConfig {
    #[must_use]
    pub fn new(job_id: i64, attempt_id: i32) -> Self {
        Self { job_id, attempt_id }
    }
}

impl std::fmt::Display for JobRunConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "job {} attempt {}", self.job_id, self.attempt_id)
    }
}

/// Which connector image to launch for one role of one attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrationLauncherConfig {
    pub job_id: i64,
    pub attempt_id: i32,
    pub docker_image: String,
}

impl IntegrationLauncherConfig {
    #[must_use]
    pub fn new(job: JobRunConfig, docker_image: impl Into<String>) -> Self {
        Self {
            job_id: job.job_id,
            attempt_id: job.attempt_id,
            docker_image: docker_image.into(),
        }
    }

    /// The attempt this launcher config belongs to.
    #[must_use]
    pub fn job_run(&self) -> JobRunConfig {
        JobRunConfig::new(self.job_id, self.attempt_id)
    }
}

/// Role a connector process plays within a sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorRole {
    Source,
    Destination,
    Normalization,
}

impl ConnectorRole {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Source => "source",
            Self::Destination => "destination",
            Self::Normalization => "normalization",
        }
    }
}

impl std::fmt::Display for ConnectorRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_run_config_display() {
        assert_eq!(JobRunConfig::new(12, 3).to_string(), "job 12 attempt 3");
    }

    #[test]
    fn launcher_config_carries_attempt_identity() {
        let job = JobRunConfig::new(7, 1);
        let launcher = IntegrationLauncherConfig::new(job, "airbyte/source-faker:0.1");
        assert_eq!(launcher.job_run(), job);
        assert_eq!(launcher.docker_image, "airbyte/source-faker:0.1");
    }

    #[test]
    fn connector_role_serde() {
        let json = serde_json::to_string(&ConnectorRole::Destination).unwrap();
        assert_eq!(json, "\"destination\"");
        assert_eq!(ConnectorRole::Source.to_string(), "source");
    }
}
