//! Main consumption pipeline.
//!
//! Connects a stream source, the columnar writer, an object publisher and an
//! offset committer into two tasks joined by a bounded channel:
//!
//! - **Reader**: polls, validates and accumulates events, sealing a batch
//!   every `batch.size` accepted events.
//! - **Coordinator**: serializes each sealed batch, uploads it and only then
//!   commits the batch's offsets.
//!
//! When the coordinator falls behind the channel fills and the reader stops
//! polling. Shutdown is driven by a shared `CancellationToken`.

mod backoff;
mod signal;
mod tasks;

use snafu::prelude::*;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::Config;
use crate::error::{PipelineError, PipelineStorageSnafu, TaskJoinSnafu};
use crate::sink::{ObjectPublisher, StoragePublisher};
use crate::source::{OffsetCommitter, StreamSource};
use crate::storage::StorageProvider;

pub use backoff::Backoff;
pub use signal::shutdown_signal;
pub use tasks::{CommitCoordinator, CoordinatorStats, FlushState, ReaderStats, StreamReader};

/// Statistics about the pipeline run.
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    pub messages_consumed: usize,
    pub events_accepted: usize,
    pub events_rejected: usize,
    pub poll_errors: usize,
    pub batches_sealed: usize,
    pub artifacts_uploaded: usize,
    pub bytes_uploaded: u64,
    pub flush_failures: usize,
    pub batches_committed: usize,
    pub commit_failures: usize,
    pub batches_dead_lettered: usize,
    pub events_discarded: usize,
}

impl PipelineStats {
    fn combine(reader: ReaderStats, coordinator: CoordinatorStats) -> Self {
        Self {
            messages_consumed: reader.messages_consumed,
            events_accepted: reader.events_accepted,
            events_rejected: reader.decode_failures + reader.validation_failures,
            poll_errors: reader.poll_errors,
            batches_sealed: reader.batches_sealed,
            artifacts_uploaded: coordinator.artifacts_uploaded,
            bytes_uploaded: coordinator.bytes_uploaded,
            flush_failures: coordinator.flush_failures,
            batches_committed: coordinator.commits,
            commit_failures: coordinator.commit_failures,
            batches_dead_lettered: coordinator.batches_dead_lettered,
            events_discarded: reader.events_discarded + coordinator.events_discarded,
        }
    }
}

/// The consumption pipeline.
pub struct Pipeline {
    config: Config,
    source: Box<dyn StreamSource>,
    committer: Arc<dyn OffsetCommitter>,
    publisher: Arc<dyn ObjectPublisher>,
    shutdown: CancellationToken,
}

impl Pipeline {
    /// Create a pipeline from already-constructed collaborators.
    pub fn new(
        config: Config,
        source: Box<dyn StreamSource>,
        committer: Arc<dyn OffsetCommitter>,
        publisher: Arc<dyn ObjectPublisher>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config,
            source,
            committer,
            publisher,
            shutdown,
        }
    }

    /// Create a pipeline that publishes to the storage named by `config.sink`.
    pub async fn with_storage(
        config: Config,
        source: Box<dyn StreamSource>,
        committer: Arc<dyn OffsetCommitter>,
        shutdown: CancellationToken,
    ) -> Result<Self, PipelineError> {
        let storage = StorageProvider::for_sink(&config.sink)
            .await
            .context(PipelineStorageSnafu)?;
        info!(url = storage.canonical_url(), "Sink storage ready");

        let publisher = Arc::new(StoragePublisher::new(Arc::new(storage)));
        Ok(Self::new(config, source, committer, publisher, shutdown))
    }

    /// Run until shutdown is requested or the coordinator fails.
    ///
    /// A coordinator error cancels the reader and is returned after both
    /// tasks have stopped. The source is closed last.
    pub async fn run(self) -> Result<PipelineStats, PipelineError> {
        let Self {
            config,
            source,
            committer,
            publisher,
            shutdown,
        } = self;

        info!(
            topic = %config.source.topic,
            group_id = %config.source.group_id,
            batch_size = config.batch.size,
            max_pending_batches = config.batch.max_pending_batches,
            "Starting pipeline"
        );

        let (tx, rx) = mpsc::channel(config.batch.max_pending_batches);

        let reader = StreamReader::new(
            source,
            config.batch.size,
            config.source.poll_timeout(),
            tx,
            shutdown.clone(),
        )
        .spawn();
        let coordinator =
            CommitCoordinator::new(&config, publisher, committer, shutdown.clone()).spawn(rx);

        let coordinator_result = coordinator.await.context(TaskJoinSnafu)?;
        if let Err(ref error) = coordinator_result {
            error!(%error, "Coordinator failed, stopping reader");
        }
        // The coordinator only returns early on shutdown or a fatal error.
        shutdown.cancel();

        let (reader_stats, mut source) = reader.await.context(TaskJoinSnafu)?;
        // Both tasks are done, so no commit can race the unsubscribe.
        source.close().await;
        let stats = PipelineStats::combine(reader_stats, coordinator_result?);

        info!(?stats, "Pipeline stopped");
        Ok(stats)
    }
}

/// Connect to Kafka and storage, then run until a shutdown signal arrives.
#[cfg(feature = "kafka")]
pub async fn run_pipeline(config: Config) -> Result<PipelineStats, PipelineError> {
    use crate::error::SourceSnafu;
    use crate::source::kafka::KafkaSource;

    let shutdown = CancellationToken::new();

    // Set up signal handler for graceful shutdown
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            signal::shutdown_signal().await;
            shutdown.cancel();
        }
    });

    let (source, committer) = KafkaSource::connect(&config.source)
        .await
        .context(SourceSnafu)?;

    let pipeline = Pipeline::with_storage(
        config,
        Box::new(source),
        Arc::new(committer),
        shutdown,
    )
    .await?;
    pipeline.run().await
}
