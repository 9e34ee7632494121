//! YAML parsing with environment variable substitution.

use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;

use crate::config::types::{JobSpec, WorkerConfig};

static ENV_VAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid env var regex"));

/// Substitute `${VAR_NAME}` patterns with environment variable values.
///
/// # Errors
///
/// Returns an error naming every referenced variable that is not set.
pub fn substitute_env_vars(input: &str) -> Result<String> {
    let mut missing = Vec::new();
    let result = ENV_VAR_RE.replace_all(input, |cap: &regex::Captures<'_>| {
        std::env::var(&cap[1]).unwrap_or_else(|_| {
            missing.push(cap[1].to_string());
            String::new()
        })
    });

    if !missing.is_empty() {
        anyhow::bail!("Missing environment variable(s): {}", missing.join(", "));
    }
    Ok(result.into_owned())
}

/// Parse worker configuration YAML (after env var substitution).
///
/// # Errors
///
/// Returns an error if substitution fails or the YAML is invalid.
pub fn parse_worker_config_str(yaml_str: &str) -> Result<WorkerConfig> {
    let substituted = substitute_env_vars(yaml_str)?;
    serde_yaml::from_str(&substituted).context("Failed to parse worker config YAML")
}

/// # Errors
///
/// Returns an error if the file cannot be read or the YAML is invalid.
pub fn parse_worker_config(path: &Path) -> Result<WorkerConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read worker config file: {}", path.display()))?;
    parse_worker_config_str(&content)
}

/// Parse a job YAML string (after env var substitution).
///
/// # Errors
///
/// Returns an error if substitution fails or the YAML is invalid.
pub fn parse_job_str(yaml_str: &str) -> Result<JobSpec> {
    let substituted = substitute_env_vars(yaml_str)?;
    serde_yaml::from_str(&substituted).context("Failed to parse job YAML")
}

/// # Errors
///
/// Returns an error if the file cannot be read or the YAML is invalid.
pub fn parse_job(path: &Path) -> Result<JobSpec> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read job file: {}", path.display()))?;
    parse_job_str(&content)
}
