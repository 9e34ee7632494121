use std::path::Path;

use anyhow::{Context, Result};

use syncbyte_engine::config::{parser, validator};
use syncbyte_engine::validation::validate;

/// Execute the `validate` command: parse the job and check its sync input.
pub fn execute(job_path: &Path) -> Result<()> {
    let job = parser::parse_job(job_path)
        .with_context(|| format!("Failed to parse job: {}", job_path.display()))?;

    validator::validate_job(&job)?;
    println!("Job definition:    OK");

    validate(&job.sync_input())?;
    println!("Sync input schema: OK");

    println!(
        "\nJob {} attempt {}: {} -> {} ({} streams)",
        job.job_id,
        job.attempt_id,
        job.source.image,
        job.destination.image,
        job.catalog.streams.len()
    );
    Ok(())
}
