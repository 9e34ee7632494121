use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use syncbyte_engine::config::types::WorkerConfig;
use syncbyte_engine::config::{parser, validator};
use syncbyte_engine::process::DockerProcessLauncher;
use syncbyte_engine::{CancellationHandler, LocalActivities, SyncOrchestrator};
use syncbyte_types::stats::SyncStats;

/// Execute the `sync` command: parse, validate, and run one attempt.
pub async fn execute(job_path: &Path, worker_config_path: Option<&Path>) -> Result<()> {
    // 1. Load configuration
    let worker_config = match worker_config_path {
        Some(path) => parser::parse_worker_config(path)
            .with_context(|| format!("Failed to parse worker config: {}", path.display()))?,
        None => WorkerConfig::default(),
    };
    validator::validate_worker_config(&worker_config)?;

    let job = parser::parse_job(job_path)
        .with_context(|| format!("Failed to parse job: {}", job_path.display()))?;
    validator::validate_job(&job)?;

    tracing::info!(
        job_id = job.job_id,
        attempt_id = job.attempt_id,
        source = %job.source.image,
        destination = %job.destination.image,
        streams = job.catalog.streams.len(),
        "Job validated"
    );

    // 2. Wire cancellation to Ctrl-C
    let cancellation = CancellationHandler::new(worker_config.grace_period());
    let on_signal = cancellation.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Received Ctrl-C, cancelling sync...");
            on_signal.cancel();
        }
    });

    // 3. Run
    let launcher = Arc::new(DockerProcessLauncher::new(
        worker_config.docker.binary.clone(),
        worker_config.docker.network.clone(),
    ));
    let activities = LocalActivities::from_config(&worker_config, launcher, cancellation);
    let orchestrator = SyncOrchestrator::with_options(activities, worker_config.activity_options());

    let result = orchestrator
        .run(
            job.job_run(),
            &job.source_launcher(),
            &job.destination_launcher(),
            &job.sync_input(),
        )
        .await;

    match result {
        Ok(output) => {
            println!("Sync job {} attempt {} succeeded.", job.job_id, job.attempt_id);
            print_stats(&output.stats);
            if let Some(state) = &output.state {
                println!("  Final state:     {}", state.data);
            }
            Ok(())
        }
        Err(failure) => {
            println!(
                "Sync job {} attempt {} {} while {}.",
                job.job_id,
                job.attempt_id,
                failure.error.status(),
                failure.phase
            );
            if let Some(replication) = &failure.replication {
                println!("  Replication completed; destination data is loaded but not normalized.");
                print_stats(&replication.stats);
            } else if let Some(partial) = failure.error.partial() {
                print_stats(&partial.stats);
                if let Some(state) = &partial.state {
                    println!("  Last state:      {}", state.data);
                }
            }
            Err(failure.into())
        }
    }
}

fn print_stats(stats: &SyncStats) {
    println!("  Records synced:  {}", stats.records_synced);
    println!("  Bytes synced:    {}", format_bytes(stats.bytes_synced));
    println!("  State messages:  {}", stats.state_messages);
    println!("  State acks:      {}", stats.destination_state_acks);
    if let Some(duration) = stats.duration_secs() {
        println!("  Duration:        {duration:.2}s");
    }
    for (stream, stream_stats) in &stats.streams {
        println!(
            "    {stream}: {} records, {}",
            stream_stats.records,
            format_bytes(stream_stats.bytes)
        );
    }
}

#[allow(clippy::cast_precision_loss)]
fn format_bytes(bytes: u64) -> String {
    if bytes >= 1_073_741_824 {
        format!("{:.2} GB", bytes as f64 / 1_073_741_824.0)
    } else if bytes >= 1_048_576 {
        format!("{:.2} MB", bytes as f64 / 1_048_576.0)
    } else if bytes >= 1024 {
        format!("{:.2} KB", bytes as f64 / 1024.0)
    } else {
        format!("{bytes} B")
    }
}
