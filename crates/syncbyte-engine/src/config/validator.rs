//! Semantic validation of parsed configuration, reporting every problem.

use std::collections::HashSet;

use anyhow::{bail, Result};

use syncbyte_types::catalog::{DestinationSyncMode, SyncMode};

use crate::config::types::{JobSpec, WorkerConfig};
use crate::process::check_image_reference;
use crate::source::RESET_JOB_SOURCE_IMAGE;

/// # Errors
///
/// Returns an error listing every invalid worker setting.
pub fn validate_worker_config(config: &WorkerConfig) -> Result<()> {
    let mut errors = Vec::new();

    if config.workspace_root.as_os_str().is_empty() {
        errors.push("workspace_root must not be empty".to_string());
    }
    if config.docker.binary.trim().is_empty() {
        errors.push("docker.binary must not be empty".to_string());
    }
    if let Err(e) = check_image_reference(&config.normalization_image) {
        errors.push(format!("normalization_image: {e}"));
    }
    if config.cancellation_grace_period_secs == 0 {
        errors.push("cancellation_grace_period_secs must be > 0".to_string());
    }
    if config.activity_timeout_secs == 0 {
        errors.push("activity_timeout_secs must be > 0".to_string());
    }

    finish("Worker config", errors)
}

/// # Errors
///
/// Returns an error listing every problem with the job definition.
pub fn validate_job(job: &JobSpec) -> Result<()> {
    let mut errors = Vec::new();

    if job.job_id < 0 {
        errors.push(format!("job_id must not be negative, got {}", job.job_id));
    }
    if job.attempt_id < 0 {
        errors.push(format!("attempt_id must not be negative, got {}", job.attempt_id));
    }
    if let Err(e) = check_image_reference(&job.source.image) {
        errors.push(format!("source.image: {e}"));
    }
    if let Err(e) = check_image_reference(&job.destination.image) {
        errors.push(format!("destination.image: {e}"));
    }
    if job.destination.image == RESET_JOB_SOURCE_IMAGE {
        errors.push(format!("'{RESET_JOB_SOURCE_IMAGE}' can only be used as a source"));
    }

    if job.catalog.streams.is_empty() {
        errors.push("catalog must configure at least one stream".to_string());
    }
    let mut seen = HashSet::new();
    for (i, configured) in job.catalog.streams.iter().enumerate() {
        let name = configured.stream.name.as_str();
        if name.trim().is_empty() {
            errors.push(format!("Stream {i} has an empty name"));
            continue;
        }
        if !seen.insert(name) {
            errors.push(format!("Stream '{name}' is configured more than once"));
        }
        if configured.sync_mode == SyncMode::Incremental
            && configured.cursor_field.is_empty()
            && configured.stream.source_defined_cursor != Some(true)
        {
            errors.push(format!(
                "Stream '{name}' uses incremental sync but has no cursor_field"
            ));
        }
        if configured.destination_sync_mode == DestinationSyncMode::AppendDedup
            && configured.primary_key.is_empty()
        {
            errors.push(format!(
                "Stream '{name}' uses append_dedup but has no primary_key"
            ));
        }
    }

    finish("Job", errors)
}

fn finish(what: &str, errors: Vec<String>) -> Result<()> {
    if errors.is_empty() {
        Ok(())
    } else {
        bail!("{what} validation failed:\n  - {}", errors.join("\n  - "));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parser::{parse_job_str, parse_worker_config_str};

    fn valid_job_yaml() -> &'static str {
        r"
job_id: 1
source:
  image: airbyte/source-faker:0.1.0
destination:
  image: airbyte/destination-postgres:0.3.0
catalog:
  streams:
    - stream:
        name: users
      sync_mode: full_refresh
      destination_sync_mode: overwrite
"
    }

    #[test]
    fn valid_job_passes() {
        let job = parse_job_str(valid_job_yaml()).unwrap();
        validate_job(&job).unwrap();
    }

    #[test]
    fn reset_stub_is_a_valid_source() {
        let yaml = valid_job_yaml().replace("airbyte/source-faker:0.1.0", "airbyte_empty");
        let job = parse_job_str(&yaml).unwrap();
        validate_job(&job).unwrap();
    }

    #[test]
    fn incremental_without_cursor_fails() {
        let yaml = valid_job_yaml().replace("full_refresh", "incremental");
        let job = parse_job_str(&yaml).unwrap();
        let err = validate_job(&job).unwrap_err().to_string();
        assert!(err.contains("no cursor_field"));
    }

    #[test]
    fn all_job_errors_reported_together() {
        let yaml = valid_job_yaml()
            .replace("job_id: 1", "job_id: -1")
            .replace("overwrite", "append_dedup")
            .replace("airbyte/destination-postgres:0.3.0", "\"\"");
        let job = parse_job_str(&yaml).unwrap();
        let err = validate_job(&job).unwrap_err().to_string();
        assert!(err.contains("job_id must not be negative"));
        assert!(err.contains("destination.image"));
        assert!(err.contains("no primary_key"));
    }

    #[test]
    fn duplicate_streams_fail() {
        let mut job = parse_job_str(valid_job_yaml()).unwrap();
        job.catalog.streams.push(job.catalog.streams[0].clone());
        let err = validate_job(&job).unwrap_err().to_string();
        assert!(err.contains("configured more than once"));
    }

    #[test]
    fn zero_grace_period_fails() {
        let config = parse_worker_config_str("cancellation_grace_period_secs: 0").unwrap();
        let err = validate_worker_config(&config).unwrap_err().to_string();
        assert!(err.contains("cancellation_grace_period_secs must be > 0"));
    }

    #[test]
    fn default_worker_config_is_valid() {
        validate_worker_config(&WorkerConfig::default()).unwrap();
    }
}
