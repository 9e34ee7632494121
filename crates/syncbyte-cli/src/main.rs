mod commands;
mod logging;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "syncbyte",
    version,
    about = "Run connector-to-connector sync attempts"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Replicate and normalize one sync attempt
    Sync {
        /// Path to job YAML file
        job: PathBuf,
        /// Path to worker config YAML file (defaults apply when omitted)
        #[arg(long)]
        worker_config: Option<PathBuf>,
    },
    /// Validate a job file without launching any connector
    Validate {
        /// Path to job YAML file
        job: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init(&cli.log_level);

    match cli.command {
        Commands::Sync { job, worker_config } => {
            commands::sync::execute(&job, worker_config.as_deref()).await
        }
        Commands::Validate { job } => commands::validate::execute(&job),
    }
}
