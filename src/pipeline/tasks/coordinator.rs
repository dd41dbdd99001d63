//! Serialize, upload, then commit.
//!
//! Offsets for a batch are committed only after its artifact is stored.
//! A failed upload keeps the batch here and retries it with backoff; the
//! reader keeps filling the channel meanwhile and blocks once it is full.

use bytes::Bytes;
use chrono::Utc;
use object_store::PutPayload;
use object_store::path::Path;
use snafu::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::batch::{Batch, CommitPoint};
use crate::config::{Config, RetryConfig};
use crate::emit;
use crate::error::{
    PipelineError, PublishError, RetriesExhaustedSnafu, SerializeError, SerializeTaskSnafu,
    UnserializableSnafu,
};
use crate::metrics::events::{
    BatchDeadLettered, EventsDiscarded, FlushFailed, FlushRetryScheduled, FlushStage,
    OffsetsCommitted, PendingBatches,
};
use crate::pipeline::backoff::Backoff;
use crate::sink::{Artifact, ArtifactKeyGenerator, ColumnarWriter, ObjectPublisher, encode_ndjson};
use crate::source::OffsetCommitter;

/// Where the coordinator is in handling the current batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushState {
    Accumulating,
    Flushing,
    Committed,
    FlushFailed,
}

impl FlushState {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlushState::Accumulating => "accumulating",
            FlushState::Flushing => "flushing",
            FlushState::Committed => "committed",
            FlushState::FlushFailed => "flush_failed",
        }
    }
}

/// Counters from the coordinator task.
#[derive(Debug, Clone, Default)]
pub struct CoordinatorStats {
    pub artifacts_uploaded: usize,
    pub bytes_uploaded: u64,
    pub flush_failures: usize,
    pub commits: usize,
    pub commit_failures: usize,
    pub batches_dead_lettered: usize,
    pub events_discarded: usize,
}

/// Serialized form of the batch being flushed.
enum Prepared {
    Parquet(Artifact),
    DeadLetter(Bytes),
}

/// Why a single flush attempt did not store the batch.
enum AttemptError {
    /// Worth retrying after a delay.
    Failed {
        stage: FlushStage,
        kind: &'static str,
        message: String,
    },
    Cancelled,
    Fatal(PipelineError),
}

impl From<PublishError> for AttemptError {
    fn from(error: PublishError) -> Self {
        AttemptError::Failed {
            stage: FlushStage::Upload,
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

/// Owns every sealed batch from receipt until its offsets are committed.
pub struct CommitCoordinator {
    writer: ColumnarWriter,
    publisher: Arc<dyn ObjectPublisher>,
    committer: Arc<dyn OffsetCommitter>,
    keys: ArtifactKeyGenerator,
    dead_letter_prefix: Option<String>,
    upload_timeout: Duration,
    retry: RetryConfig,
    max_pending: usize,
    shutdown: CancellationToken,
    /// Offsets from persisted batches whose commit has not gone through yet.
    uncommitted: CommitPoint,
    state: FlushState,
    stats: CoordinatorStats,
}

impl CommitCoordinator {
    pub fn new(
        config: &Config,
        publisher: Arc<dyn ObjectPublisher>,
        committer: Arc<dyn OffsetCommitter>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            writer: ColumnarWriter::from_config(&config.sink),
            publisher,
            committer,
            keys: ArtifactKeyGenerator::new(&config.sink.namespace),
            dead_letter_prefix: config.sink.dead_letter_prefix.clone(),
            upload_timeout: config.sink.upload_timeout(),
            retry: config.retry.clone(),
            max_pending: config.batch.max_pending_batches,
            shutdown,
            uncommitted: CommitPoint::default(),
            state: FlushState::Accumulating,
            stats: CoordinatorStats::default(),
        }
    }

    pub fn spawn(self, rx: mpsc::Receiver<Batch>) -> JoinHandle<Result<CoordinatorStats, PipelineError>> {
        tokio::spawn(self.run(rx))
    }

    /// Process batches in arrival order until cancelled or the reader hangs up.
    pub async fn run(
        mut self,
        mut rx: mpsc::Receiver<Batch>,
    ) -> Result<CoordinatorStats, PipelineError> {
        let result = loop {
            let batch = tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => break Ok(()),
                batch = rx.recv() => match batch {
                    Some(batch) => batch,
                    None => break Ok(()),
                },
            };
            emit!(PendingBatches { count: rx.len() });

            match self.flush(batch).await {
                Ok(true) => {}
                Ok(false) => break Ok(()),
                Err(error) => break Err(error),
            }
        };

        rx.close();
        let mut queued = 0;
        while let Ok(batch) = rx.try_recv() {
            queued += batch.len();
        }
        if queued > 0 {
            self.stats.events_discarded += queued;
            emit!(EventsDiscarded {
                count: queued as u64
            });
            info!(events = queued, "Discarded queued batches on shutdown");
        }
        emit!(PendingBatches { count: 0 });

        result.map(|()| self.stats)
    }

    fn transition(&mut self, next: FlushState) {
        debug!(from = self.state.as_str(), to = next.as_str(), "Flush state");
        self.state = next;
    }

    /// Persist one batch and commit its offsets. Returns false if cancelled
    /// before the batch was stored.
    async fn flush(&mut self, batch: Batch) -> Result<bool, PipelineError> {
        self.transition(FlushState::Flushing);
        let batch = Arc::new(batch);
        let mut backoff = Backoff::new(&self.retry);
        let mut prepared = None;

        let (key, bytes) = loop {
            match self.attempt(&batch, &mut prepared).await {
                Ok(stored) => break stored,
                Err(AttemptError::Cancelled) => {
                    self.stats.events_discarded += batch.len();
                    info!(
                        sequence = batch.sequence,
                        events = batch.len(),
                        "Flush abandoned on shutdown; offsets not committed"
                    );
                    return Ok(false);
                }
                Err(AttemptError::Fatal(error)) => return Err(error),
                Err(AttemptError::Failed {
                    stage,
                    kind,
                    message,
                }) => {
                    self.transition(FlushState::FlushFailed);
                    self.stats.flush_failures += 1;
                    emit!(FlushFailed { stage, kind });
                    error!(
                        event = "s3_write_failed",
                        stage = stage.as_str(),
                        kind,
                        sequence = batch.sequence,
                        batch_size = batch.len(),
                        attempt = backoff.failures() + 1,
                        error = %message,
                        "Flush attempt failed; batch retained"
                    );

                    let Some(delay) = backoff.on_failure() else {
                        return RetriesExhaustedSnafu {
                            attempts: backoff.failures(),
                        }
                        .fail();
                    };
                    emit!(FlushRetryScheduled {
                        attempt: backoff.failures(),
                        delay,
                    });

                    tokio::select! {
                        biased;

                        _ = self.shutdown.cancelled() => {
                            self.stats.events_discarded += batch.len();
                            info!(sequence = batch.sequence, "Retry abandoned on shutdown");
                            return Ok(false);
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                    self.transition(FlushState::Flushing);
                }
            }
        };

        match prepared {
            Some(Prepared::DeadLetter(_)) => {
                self.stats.batches_dead_lettered += 1;
                emit!(BatchDeadLettered {
                    events: batch.len()
                });
                warn!(
                    event = "batch_dead_lettered",
                    key = %key,
                    batch_size = batch.len(),
                    "Unserializable batch written to dead-letter prefix"
                );
            }
            _ => {
                self.stats.artifacts_uploaded += 1;
                self.stats.bytes_uploaded += bytes;
                info!(
                    event = "batch_written",
                    key = %key,
                    batch_size = batch.len(),
                    bytes,
                    "Batch written"
                );
            }
        }

        let commit = Arc::try_unwrap(batch)
            .map(|batch| batch.commit)
            .unwrap_or_else(|shared| shared.commit.clone());
        self.commit(commit).await;
        self.transition(FlushState::Accumulating);
        Ok(true)
    }

    /// One upload attempt, serializing first if no earlier attempt did.
    async fn attempt(
        &mut self,
        batch: &Arc<Batch>,
        slot: &mut Option<Prepared>,
    ) -> Result<(Path, u64), AttemptError> {
        let prepared = match slot.take() {
            Some(prepared) => prepared,
            None => self.prepare(batch).await?,
        };

        let now = Utc::now();
        let (key, payload, bytes) = match slot.insert(prepared) {
            Prepared::Parquet(artifact) => {
                let payload = artifact.payload().await.map_err(|e| AttemptError::Failed {
                    stage: FlushStage::Upload,
                    kind: "staging",
                    message: e.to_string(),
                })?;
                (self.keys.artifact_key(now), payload, artifact.size)
            }
            Prepared::DeadLetter(body) => {
                let prefix = self.dead_letter_prefix.as_deref().unwrap_or_default();
                let key = self.keys.dead_letter_key(prefix, now);
                (key, PutPayload::from(body.clone()), body.len() as u64)
            }
        };

        self.upload(&key, payload).await?;
        Ok((key, bytes))
    }

    /// Serialize the batch, diverting permanent failures to the dead-letter form.
    async fn prepare(&self, batch: &Arc<Batch>) -> Result<Prepared, AttemptError> {
        match self.serialize(batch).await {
            Ok(artifact) => Ok(Prepared::Parquet(artifact)),
            Err(error) if error.is_permanent() => {
                if self.dead_letter_prefix.is_none() {
                    return Err(AttemptError::Fatal(PipelineError::Unserializable {
                        events: batch.len(),
                        source: error,
                    }));
                }
                warn!(
                    sequence = batch.sequence,
                    %error,
                    "Batch cannot be serialized; diverting to dead-letter prefix"
                );
                let body = encode_ndjson(&batch.events)
                    .context(UnserializableSnafu {
                        events: batch.len(),
                    })
                    .map_err(AttemptError::Fatal)?;
                Ok(Prepared::DeadLetter(body))
            }
            Err(error) => Err(AttemptError::Failed {
                stage: FlushStage::Serialize,
                kind: "serialize",
                message: error.to_string(),
            }),
        }
    }

    async fn serialize(&self, batch: &Arc<Batch>) -> Result<Artifact, SerializeError> {
        let writer = self.writer.clone();
        let batch = batch.clone();
        tokio::task::spawn_blocking(move || writer.write(&batch.events))
            .await
            .context(SerializeTaskSnafu)?
    }

    /// Upload under a deadline, abandoning it on shutdown.
    async fn upload(&self, key: &Path, payload: PutPayload) -> Result<(), AttemptError> {
        let upload = tokio::time::timeout(self.upload_timeout, self.publisher.publish(key, payload));

        tokio::select! {
            biased;

            _ = self.shutdown.cancelled() => Err(AttemptError::Cancelled),
            result = upload => match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(error)) => Err(error.into()),
                Err(_) => Err(PublishError::Timeout {
                    key: key.to_string(),
                    seconds: self.upload_timeout.as_secs(),
                }
                .into()),
            },
        }
    }

    /// Commit everything persisted so far. A failed commit is retried with
    /// the next batch's offsets.
    async fn commit(&mut self, point: CommitPoint) {
        self.uncommitted.merge(point);
        if self.uncommitted.is_empty() {
            return;
        }

        match self.committer.commit(&self.uncommitted).await {
            Ok(()) => {
                let partitions = self.uncommitted.len();
                self.uncommitted = CommitPoint::default();
                self.stats.commits += 1;
                emit!(OffsetsCommitted { partitions });
                self.transition(FlushState::Committed);
            }
            Err(error) => {
                self.stats.commit_failures += 1;
                emit!(FlushFailed {
                    stage: FlushStage::Commit,
                    kind: "commit",
                });
                warn!(
                    event = "commit_failed",
                    %error,
                    partitions = self.uncommitted.len(),
                    "Offset commit failed; will retry with the next batch"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SourceError;
    use crate::event::NormalizedEvent;
    use async_trait::async_trait;
    use serde_json::{Map, json};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording {
        keys: Mutex<Vec<String>>,
        commits: Mutex<Vec<CommitPoint>>,
    }

    #[async_trait]
    impl ObjectPublisher for Recording {
        async fn publish(&self, key: &Path, _payload: PutPayload) -> Result<(), PublishError> {
            self.keys.lock().unwrap().push(key.to_string());
            Ok(())
        }
    }

    #[async_trait]
    impl OffsetCommitter for Recording {
        async fn commit(&self, point: &CommitPoint) -> Result<(), SourceError> {
            self.commits.lock().unwrap().push(point.clone());
            Ok(())
        }
    }

    fn batch(sequence: u64, events: usize, next_offset: i64) -> Batch {
        let now = Utc::now();
        let mut commit = CommitPoint::default();
        commit.track("clickstream_events", 0, next_offset - 1);
        Batch {
            sequence,
            events: (0..events)
                .map(|n| NormalizedEvent {
                    user_id: json!(n),
                    event_type: "checkout".to_string(),
                    timestamp: now,
                    ingestion_timestamp: now,
                    attributes: Map::new(),
                })
                .collect(),
            commit,
        }
    }

    fn coordinator(recording: &Arc<Recording>, shutdown: CancellationToken) -> CommitCoordinator {
        CommitCoordinator::new(
            &Config::with_bucket("clickstream-bucket"),
            recording.clone(),
            recording.clone(),
            shutdown,
        )
    }

    #[tokio::test]
    async fn test_batches_are_committed_in_order() {
        let recording = Arc::new(Recording::default());
        let (tx, rx) = mpsc::channel(4);
        tx.send(batch(1, 3, 3)).await.unwrap();
        tx.send(batch(2, 3, 6)).await.unwrap();
        drop(tx);

        let stats = coordinator(&recording, CancellationToken::new())
            .run(rx)
            .await
            .unwrap();

        assert_eq!(stats.artifacts_uploaded, 2);
        assert_eq!(stats.commits, 2);
        let keys = recording.keys.lock().unwrap().clone();
        assert_eq!(keys.len(), 2);
        assert_ne!(keys[0], keys[1]);
        let commits = recording.commits.lock().unwrap().clone();
        assert_eq!(commits[0].get("clickstream_events", 0), Some(3));
        assert_eq!(commits[1].get("clickstream_events", 0), Some(6));
    }

    #[tokio::test]
    async fn test_queued_batches_are_discarded_on_shutdown() {
        let recording = Arc::new(Recording::default());
        let shutdown = CancellationToken::new();
        let (tx, rx) = mpsc::channel(4);
        tx.send(batch(1, 5, 5)).await.unwrap();
        tx.send(batch(2, 5, 10)).await.unwrap();
        shutdown.cancel();

        let stats = coordinator(&recording, shutdown).run(rx).await.unwrap();

        assert_eq!(stats.events_discarded, 10);
        assert!(recording.keys.lock().unwrap().is_empty());
        assert!(recording.commits.lock().unwrap().is_empty());
        assert!(tx.is_closed());
    }

    #[test]
    fn test_flush_state_labels() {
        assert_eq!(FlushState::Accumulating.as_str(), "accumulating");
        assert_eq!(FlushState::FlushFailed.as_str(), "flush_failed");
    }
}
