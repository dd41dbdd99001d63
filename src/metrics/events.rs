//! Internal events for metrics emission.
//!
//! Each event struct represents a measurable occurrence in the pipeline.
//! Events implement the `InternalEvent` trait which records the matching
//! Prometheus metric.

use metrics::{counter, gauge, histogram};
use std::time::Duration;
use tracing::trace;

/// Trait for internal events that can be emitted as metrics.
pub trait InternalEvent {
    /// Emit this event as a metric.
    fn emit(self);
}

// ============================================================================
// Consumption
// ============================================================================

/// Event emitted for every message returned by a poll.
pub struct MessagesConsumed {
    pub count: u64,
}

impl InternalEvent for MessagesConsumed {
    fn emit(self) {
        trace!(count = self.count, "Messages consumed");
        counter!("clickstream_messages_consumed_total").increment(self.count);
    }
}

/// Event emitted when a poll fails at the delivery layer.
pub struct PollFailed;

impl InternalEvent for PollFailed {
    fn emit(self) {
        trace!("Poll failed");
        counter!("clickstream_poll_errors_total").increment(1);
    }
}

/// Stage at which a consumed message was dropped.
#[derive(Debug, Clone, Copy)]
pub enum RejectStage {
    Decode,
    Validate,
}

impl RejectStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectStage::Decode => "decode",
            RejectStage::Validate => "validate",
        }
    }
}

/// Event emitted when a consumed message is dropped.
pub struct EventRejected {
    pub stage: RejectStage,
    pub reason: &'static str,
}

impl InternalEvent for EventRejected {
    fn emit(self) {
        trace!(
            stage = self.stage.as_str(),
            reason = self.reason,
            "Event rejected"
        );
        counter!(
            "clickstream_events_rejected_total",
            "stage" => self.stage.as_str(),
            "reason" => self.reason
        )
        .increment(1);
    }
}

/// Event emitted when a normalized event enters the accumulator.
pub struct EventsAccepted {
    pub count: u64,
}

impl InternalEvent for EventsAccepted {
    fn emit(self) {
        trace!(count = self.count, "Events accepted");
        counter!("clickstream_events_accepted_total").increment(self.count);
    }
}

/// Event emitted when the accumulator length changes.
pub struct AccumulatorDepth {
    pub count: usize,
}

impl InternalEvent for AccumulatorDepth {
    fn emit(self) {
        trace!(count = self.count, "Accumulator depth");
        gauge!("clickstream_accumulator_events").set(self.count as f64);
    }
}

/// Event emitted when buffered events are dropped during shutdown.
pub struct EventsDiscarded {
    pub count: u64,
}

impl InternalEvent for EventsDiscarded {
    fn emit(self) {
        trace!(count = self.count, "Events discarded");
        counter!("clickstream_events_discarded_total").increment(self.count);
    }
}

// ============================================================================
// Batching and flushing
// ============================================================================

/// Event emitted when a full accumulator is sealed into a batch.
pub struct BatchSealed {
    pub events: usize,
}

impl InternalEvent for BatchSealed {
    fn emit(self) {
        trace!(events = self.events, "Batch sealed");
        counter!("clickstream_batches_sealed_total").increment(1);
        histogram!("clickstream_batch_events").record(self.events as f64);
    }
}

/// Event emitted when the number of sealed batches awaiting flush changes.
pub struct PendingBatches {
    pub count: usize,
}

impl InternalEvent for PendingBatches {
    fn emit(self) {
        trace!(count = self.count, "Pending batches");
        gauge!("clickstream_pending_batches").set(self.count as f64);
    }
}

/// Event emitted when a Parquet artifact is serialized.
pub struct ParquetWriteCompleted {
    pub duration: Duration,
    pub bytes: usize,
}

impl InternalEvent for ParquetWriteCompleted {
    fn emit(self) {
        trace!(
            duration_ms = self.duration.as_millis(),
            bytes = self.bytes,
            "Parquet write completed"
        );
        histogram!("clickstream_parquet_write_duration_seconds")
            .record(self.duration.as_secs_f64());
    }
}

/// Event emitted when an artifact is durably stored.
pub struct ArtifactUploaded {
    pub bytes: u64,
    pub duration: Duration,
}

impl InternalEvent for ArtifactUploaded {
    fn emit(self) {
        trace!(
            bytes = self.bytes,
            duration_ms = self.duration.as_millis(),
            "Artifact uploaded"
        );
        counter!("clickstream_artifacts_uploaded_total").increment(1);
        counter!("clickstream_bytes_uploaded_total").increment(self.bytes);
        histogram!("clickstream_upload_duration_seconds").record(self.duration.as_secs_f64());
    }
}

/// Stage at which a flush attempt failed.
#[derive(Debug, Clone, Copy)]
pub enum FlushStage {
    Serialize,
    Upload,
    Commit,
}

impl FlushStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlushStage::Serialize => "serialize",
            FlushStage::Upload => "upload",
            FlushStage::Commit => "commit",
        }
    }
}

/// Event emitted when a flush attempt fails.
pub struct FlushFailed {
    pub stage: FlushStage,
    pub kind: &'static str,
}

impl InternalEvent for FlushFailed {
    fn emit(self) {
        trace!(
            stage = self.stage.as_str(),
            kind = self.kind,
            "Flush failed"
        );
        counter!(
            "clickstream_flush_failures_total",
            "stage" => self.stage.as_str(),
            "kind" => self.kind
        )
        .increment(1);
    }
}

/// Event emitted before sleeping between flush attempts.
pub struct FlushRetryScheduled {
    pub attempt: u32,
    pub delay: Duration,
}

impl InternalEvent for FlushRetryScheduled {
    fn emit(self) {
        trace!(
            attempt = self.attempt,
            delay_ms = self.delay.as_millis(),
            "Flush retry scheduled"
        );
        counter!("clickstream_flush_retries_total").increment(1);
        gauge!("clickstream_flush_retry_backoff_seconds").set(self.delay.as_secs_f64());
    }
}

/// Event emitted when stream offsets are committed.
pub struct OffsetsCommitted {
    pub partitions: usize,
}

impl InternalEvent for OffsetsCommitted {
    fn emit(self) {
        trace!(partitions = self.partitions, "Offsets committed");
        counter!("clickstream_offset_commits_total").increment(1);
    }
}

/// Event emitted when an unserializable batch is diverted.
pub struct BatchDeadLettered {
    pub events: usize,
}

impl InternalEvent for BatchDeadLettered {
    fn emit(self) {
        trace!(events = self.events, "Batch dead-lettered");
        counter!("clickstream_batches_dead_lettered_total").increment(1);
        counter!("clickstream_events_dead_lettered_total").increment(self.events as u64);
    }
}

// ============================================================================
// Storage operation events
// ============================================================================

/// Storage operation types.
#[derive(Debug, Clone, Copy)]
pub enum StorageOperation {
    Get,
    Put,
    List,
}

impl StorageOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageOperation::Get => "get",
            StorageOperation::Put => "put",
            StorageOperation::List => "list",
        }
    }
}

/// Status of a storage request.
#[derive(Debug, Clone, Copy)]
pub enum RequestStatus {
    Success,
    Error,
}

impl RequestStatus {
    fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Success => "success",
            RequestStatus::Error => "error",
        }
    }
}

/// Event emitted when a storage request completes.
pub struct StorageRequest {
    pub operation: StorageOperation,
    pub status: RequestStatus,
    pub duration: Duration,
}

impl InternalEvent for StorageRequest {
    fn emit(self) {
        trace!(
            operation = self.operation.as_str(),
            status = self.status.as_str(),
            duration_ms = self.duration.as_millis(),
            "Storage request"
        );
        counter!(
            "clickstream_storage_requests_total",
            "operation" => self.operation.as_str(),
            "status" => self.status.as_str()
        )
        .increment(1);
        histogram!(
            "clickstream_storage_request_duration_seconds",
            "operation" => self.operation.as_str()
        )
        .record(self.duration.as_secs_f64());
    }
}
