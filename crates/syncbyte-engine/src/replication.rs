//! Replication worker: pumps protocol messages from a source to a destination.
//!
//! One task reads the source, maps each message and writes it to the
//! destination, so per-stream order is preserved and destination backpressure
//! propagates straight to the source read. A second task drains the
//! destination's output (state acks, logs). Every blocking step is raced
//! against the attempt's cancellation token.

use std::future::Future;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

use syncbyte_types::catalog::ConfiguredCatalog;
use syncbyte_types::job::JobRunConfig;
use syncbyte_types::sync::{StandardSyncInput, StandardSyncOutput};

use crate::destination::{drain_output, ConnectorDestination};
use crate::error::{PartialProgress, WorkerError};
use crate::mapper::NamespacingMapper;
use crate::source::SyncSource;
use crate::tracker::MessageTracker;
use crate::worker::Worker;

pub struct ReplicationWorker {
    job: JobRunConfig,
    source: SyncSource,
    destination: ConnectorDestination,
    tracker: MessageTracker,
    started_at: Option<DateTime<Utc>>,
}

impl ReplicationWorker {
    pub fn new(job: JobRunConfig, source: SyncSource, destination: ConnectorDestination) -> Self {
        Self {
            job,
            source,
            destination,
            tracker: MessageTracker::new(),
            started_at: None,
        }
    }

    /// What the tracker has seen so far, stamped with the run's start and now.
    fn partial_progress(&self) -> PartialProgress {
        let mut progress = self.tracker.snapshot();
        progress.stats.started_at = self.started_at;
        progress.stats.ended_at = Some(Utc::now());
        progress
    }

    async fn replicate(
        &mut self,
        input: &StandardSyncInput,
        mapper: &NamespacingMapper,
        output_catalog: &ConfiguredCatalog,
        job_root: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), WorkerError> {
        self.destination
            .start(&input.destination_configuration, output_catalog, job_root)
            .await?;
        self.source.start(input, job_root).await?;

        let output = self
            .destination
            .take_output()
            .ok_or_else(|| WorkerError::runtime(anyhow::anyhow!("destination output already taken")))?;
        // Dropping the set aborts the drain task on early return.
        let mut drain = JoinSet::new();
        drain.spawn(drain_output(output));
        let mut acks: Option<u64> = None;

        loop {
            let message = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(WorkerError::cancelled()),
                Some(joined) = drain.join_next(), if acks.is_none() => {
                    // Destination closed its output early; keep pumping and let
                    // the next write surface any failure.
                    acks = Some(drain_result(joined)?);
                    continue;
                }
                message = self.source.next_message() => message?,
            };
            let Some(message) = message else {
                break;
            };

            let mapped = mapper.map_message(&message);
            until_cancelled(cancel, self.destination.accept(&mapped)).await?;
            self.tracker.observe(&message);
        }

        until_cancelled(cancel, self.source.close()).await?;
        until_cancelled(cancel, self.destination.notify_end_of_stream()).await?;

        let acks = match acks {
            Some(acks) => acks,
            None => {
                let joined = until_cancelled(cancel, async {
                    drain.join_next().await.ok_or_else(|| {
                        WorkerError::runtime(anyhow::anyhow!("destination drain task missing"))
                    })
                })
                .await?;
                drain_result(joined)?
            }
        };
        self.tracker.observe_destination_acks(acks);

        until_cancelled(cancel, self.destination.close()).await
    }

    async fn kill_all(&mut self) {
        self.source.cancel().await;
        self.destination.cancel().await;
    }
}

#[async_trait]
impl Worker<StandardSyncInput, StandardSyncOutput> for ReplicationWorker {
    async fn run(
        &mut self,
        input: StandardSyncInput,
        job_root: &Path,
        cancel: CancellationToken,
    ) -> Result<StandardSyncOutput, WorkerError> {
        let started_at = Utc::now();
        self.started_at = Some(started_at);
        let mapper = NamespacingMapper::new(input.namespace_prefix.clone());
        let output_catalog = mapper.map_catalog(&input.catalog);
        tracing::info!(
            job_id = self.job.job_id,
            attempt_id = self.job.attempt_id,
            streams = input.catalog.streams.len(),
            prefix = mapper.prefix().unwrap_or(""),
            reset = self.source.is_reset(),
            "Starting replication"
        );

        match self
            .replicate(&input, &mapper, &output_catalog, job_root, &cancel)
            .await
        {
            Ok(()) => {
                let (state, mut stats) = std::mem::take(&mut self.tracker).finalize();
                stats.started_at = Some(started_at);
                stats.ended_at = Some(Utc::now());
                tracing::info!(
                    job_id = self.job.job_id,
                    attempt_id = self.job.attempt_id,
                    records = stats.records_synced,
                    bytes = stats.bytes_synced,
                    state_messages = stats.state_messages,
                    destination_acks = stats.destination_state_acks,
                    "Replication finished"
                );
                Ok(StandardSyncOutput {
                    output_catalog,
                    state,
                    stats,
                })
            }
            Err(err) => {
                self.kill_all().await;
                let progress = self.partial_progress();
                tracing::warn!(
                    job_id = self.job.job_id,
                    attempt_id = self.job.attempt_id,
                    records = progress.stats.records_synced,
                    "Replication stopped: {}",
                    err
                );
                Err(err.with_partial(progress))
            }
        }
    }

    fn progress(&self) -> Option<PartialProgress> {
        self.started_at.map(|_| self.partial_progress())
    }
}

async fn until_cancelled<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T, WorkerError>>,
) -> Result<T, WorkerError> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(WorkerError::cancelled()),
        result = fut => result,
    }
}

fn drain_result(joined: Result<Result<u64, WorkerError>, JoinError>) -> Result<u64, WorkerError> {
    joined.map_err(|e| WorkerError::runtime(anyhow::anyhow!("destination drain task failed: {e}")))?
}
