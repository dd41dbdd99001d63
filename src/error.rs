//! Error types for the clickstream sink using snafu.
//!
//! One enum per concern, with context selectors, plus the top-level
//! `PipelineError` returned from `main`.

use snafu::prelude::*;

// ============ Config Errors ============

/// Errors that can occur while loading or validating configuration.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[snafu(display("Required environment variable {name} is not set"))]
    MissingVar { name: String },

    /// An environment variable holds a value that cannot be parsed.
    #[snafu(display("Invalid value for {name}: {value:?}"))]
    InvalidVar { name: String, value: String },

    /// A configuration value failed validation.
    #[snafu(display("Invalid configuration: {message}"))]
    Invalid { message: String },

    /// Environment variable interpolation failed.
    #[snafu(display("Environment variable interpolation failed:\n{message}"))]
    EnvInterpolation { message: String },

    /// Failed to parse YAML configuration.
    #[snafu(display("Failed to parse YAML configuration"))]
    YamlParse { source: serde_yaml::Error },

    /// Failed to read configuration file.
    #[snafu(display("Failed to read configuration file"))]
    ReadFile { source: std::io::Error },
}

// ============ Validation Errors ============

/// Reasons an incoming event is rejected by the validator.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum ValidationError {
    /// A mandatory field is absent.
    #[snafu(display("Missing required field '{field}'"))]
    MissingField { field: &'static str },

    /// `user_id` is an object or array.
    #[snafu(display("Field 'user_id' must be a scalar"))]
    UserIdNotScalar,

    /// `event_type` is present but not a string.
    #[snafu(display("Field 'event_type' must be a string"))]
    EventTypeNotString,

    /// `timestamp` is present but not a parseable ISO-8601 instant.
    #[snafu(display("Field 'timestamp' is not an ISO-8601 instant: {value}"))]
    InvalidTimestamp { value: String },
}

impl ValidationError {
    /// Short label used for metrics and structured logs.
    pub fn reason(&self) -> &'static str {
        match self {
            ValidationError::MissingField { .. } => "missing_field",
            ValidationError::UserIdNotScalar => "user_id_not_scalar",
            ValidationError::EventTypeNotString => "event_type_not_string",
            ValidationError::InvalidTimestamp { .. } => "invalid_timestamp",
        }
    }
}

// ============ Serialization Errors ============

/// Errors that can occur while turning a batch into a Parquet artifact.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SerializeError {
    /// Two rows disagree on the type of one column.
    #[snafu(display("Column '{column}' has incompatible types: {expected} and {found}"))]
    SchemaConflict {
        column: String,
        expected: &'static str,
        found: &'static str,
    },

    /// Building the Arrow record batch failed.
    #[snafu(display("Failed to build record batch"))]
    RecordBatch { source: arrow::error::ArrowError },

    /// Parquet write error.
    #[snafu(display("Parquet write error"))]
    ParquetWrite {
        source: parquet::errors::ParquetError,
    },

    /// Failed to create or read the local staging file.
    #[snafu(display("Staging file error"))]
    Staging { source: std::io::Error },

    /// Failed to encode a batch as NDJSON for the dead-letter prefix.
    #[snafu(display("Failed to encode dead-letter batch"))]
    DeadLetterEncode { source: serde_json::Error },

    /// The blocking serialization task panicked or was cancelled.
    #[snafu(display("Serialization task failed"))]
    SerializeTask { source: tokio::task::JoinError },
}

impl SerializeError {
    /// True when retrying the same batch can never succeed.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            SerializeError::SchemaConflict { .. } | SerializeError::RecordBatch { .. }
        )
    }
}

// ============ Storage Errors ============

/// Errors that can occur during storage operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StorageError {
    /// Invalid storage URL format.
    #[snafu(display("Invalid storage URL: {url}"))]
    InvalidUrl { url: String },

    /// Object store operation failed.
    #[snafu(display("Storage operation failed"))]
    ObjectStore { source: object_store::Error },

    /// IO error during storage operations.
    #[snafu(display("IO error"))]
    Io { source: std::io::Error },

    /// S3 configuration error.
    #[snafu(display("S3 configuration error"))]
    S3Config { source: object_store::Error },
}

// ============ Publish Errors ============

/// Typed upload failures reported by an `ObjectPublisher`.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PublishError {
    /// Transport-level failure reaching the storage endpoint.
    #[snafu(display("Network error uploading {key}"))]
    Network { key: String, source: StorageError },

    /// Credentials were rejected.
    #[snafu(display("Authentication error uploading {key}"))]
    Authentication { key: String, source: StorageError },

    /// The store asked us to slow down.
    #[snafu(display("Throttled uploading {key}"))]
    Throttled { key: String, source: StorageError },

    /// The upload did not finish within the deadline.
    #[snafu(display("Upload of {key} timed out after {seconds}s"))]
    Timeout { key: String, seconds: u64 },

    /// Any other storage failure.
    #[snafu(display("Failed to upload {key}"))]
    Upload { key: String, source: StorageError },
}

impl PublishError {
    /// Short label used for metrics and structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            PublishError::Network { .. } => "network",
            PublishError::Authentication { .. } => "authentication",
            PublishError::Throttled { .. } => "throttled",
            PublishError::Timeout { .. } => "timeout",
            PublishError::Upload { .. } => "other",
        }
    }
}

// ============ Source Errors ============

/// Errors raised by the stream source.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SourceError {
    /// Delivery-layer error while polling.
    #[snafu(display("Poll failed: {message}"))]
    Poll { message: String },

    /// Offset commit was rejected.
    #[snafu(display("Offset commit failed: {message}"))]
    Commit { message: String },

    /// The client could not be created or subscribed.
    #[snafu(display("Failed to connect to stream: {message}"))]
    Connect { message: String },

    /// Producing a message failed.
    #[snafu(display("Failed to produce message: {message}"))]
    Produce { message: String },
}

/// Errors raised while decoding a polled message into a raw event.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum DecodeError {
    /// The message had no payload.
    #[snafu(display("Message has an empty payload"))]
    EmptyPayload,

    /// The payload is not valid JSON.
    #[snafu(display("Payload is not valid JSON"))]
    Json { source: serde_json::Error },

    /// The payload is JSON but not an object.
    #[snafu(display("Payload is not a JSON object"))]
    NotAnObject,
}

impl DecodeError {
    /// Short label used for metrics and structured logs.
    pub fn reason(&self) -> &'static str {
        match self {
            DecodeError::EmptyPayload => "empty_payload",
            DecodeError::Json { .. } => "invalid_json",
            DecodeError::NotAnObject => "not_an_object",
        }
    }
}

// ============ Metrics Errors ============

/// Errors that can occur during metrics initialization.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum MetricsError {
    /// Failed to initialize Prometheus recorder.
    #[snafu(display("Failed to initialize Prometheus recorder"))]
    PrometheusInit {
        source: metrics_exporter_prometheus::BuildError,
    },

    /// The metrics listener could not be bound.
    #[snafu(display("Failed to bind metrics endpoint to {addr}"))]
    Bind {
        addr: std::net::SocketAddr,
        source: std::io::Error,
    },
}

// ============ Pipeline Error (top-level) ============

/// Top-level pipeline errors that aggregate all error types.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PipelineError {
    /// Configuration error.
    #[snafu(display("Configuration error"))]
    Config { source: ConfigError },

    /// Storage error.
    #[snafu(display("Storage error"))]
    PipelineStorage { source: StorageError },

    /// Stream source error.
    #[snafu(display("Stream source error"))]
    Source { source: SourceError },

    /// A batch could not be serialized and there is nowhere to divert it.
    #[snafu(display("Batch of {events} events cannot be serialized"))]
    Unserializable {
        events: usize,
        source: SerializeError,
    },

    /// Upload retries are exhausted; offsets stay uncommitted.
    #[snafu(display("Giving up on batch after {attempts} failed flush attempts"))]
    RetriesExhausted { attempts: u32 },

    /// Task join error.
    #[snafu(display("Task join error"))]
    TaskJoin { source: tokio::task::JoinError },

    /// Address parsing error.
    #[snafu(display("Failed to parse address"))]
    AddressParse { source: std::net::AddrParseError },

    /// Metrics error.
    #[snafu(display("Metrics error"))]
    Metrics { source: MetricsError },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_conflict_is_permanent() {
        let err = SerializeError::SchemaConflict {
            column: "product_id".to_string(),
            expected: "int64",
            found: "string",
        };
        assert!(err.is_permanent());
        assert!(err.to_string().contains("product_id"));
    }

    #[test]
    fn test_staging_error_is_transient() {
        let err = SerializeError::Staging {
            source: std::io::Error::other("disk full"),
        };
        assert!(!err.is_permanent());
    }

    #[test]
    fn test_publish_error_kind() {
        let err = PublishError::Timeout {
            key: "clickstream/x".to_string(),
            seconds: 30,
        };
        assert_eq!(err.kind(), "timeout");
        assert!(err.to_string().contains("30s"));
    }
}
