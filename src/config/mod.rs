//! Configuration loading and validation.
//!
//! The whole process is driven by one `Config` value, built once at startup
//! and passed by reference to each component. It can come from the
//! environment (the deployment surface) or from a YAML file with
//! `${VAR}` interpolation.

mod env;
mod vars;

use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConfigError, EnvInterpolationSnafu, InvalidSnafu, ReadFileSnafu, YamlParseSnafu};

pub use env::EnvLookup;

/// Main configuration structure for the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub source: SourceConfig,
    pub sink: SinkConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Stream source settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Comma-separated broker list.
    #[serde(default = "default_brokers")]
    pub brokers: String,

    #[serde(default = "default_topic")]
    pub topic: String,

    #[serde(default = "default_group_id")]
    pub group_id: String,

    /// Where a new consumer group starts reading.
    #[serde(default)]
    pub offset_reset: OffsetReset,

    /// Upper bound on a single poll wait, in milliseconds.
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,

    /// Extra librdkafka client properties.
    #[serde(default)]
    pub client_options: HashMap<String, String>,
}

impl SourceConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    /// Load only the stream settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&env::ProcessEnv)
    }

    pub fn from_lookup(lookup: &dyn EnvLookup) -> Result<Self, ConfigError> {
        let mut source = Self::default();
        env::apply_source(lookup, &mut source)?;
        ensure!(
            !source.brokers.trim().is_empty() && !source.topic.trim().is_empty(),
            InvalidSnafu { message: "source.brokers and source.topic cannot be empty" }
        );
        Ok(source)
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            brokers: default_brokers(),
            topic: default_topic(),
            group_id: default_group_id(),
            offset_reset: OffsetReset::default(),
            poll_timeout_ms: default_poll_timeout_ms(),
            client_options: HashMap::new(),
        }
    }
}

/// Offset reset policy for a consumer group without committed offsets.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OffsetReset {
    #[default]
    Earliest,
    Latest,
}

impl OffsetReset {
    pub fn as_str(&self) -> &'static str {
        match self {
            OffsetReset::Earliest => "earliest",
            OffsetReset::Latest => "latest",
        }
    }
}

fn default_brokers() -> String {
    "kafka:9092".to_string()
}

fn default_topic() -> String {
    "clickstream_events".to_string()
}

fn default_group_id() -> String {
    "clickstream-consumer-group".to_string()
}

fn default_poll_timeout_ms() -> u64 {
    1000
}

/// Blob storage target settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    /// Bucket name, `s3://bucket[/prefix]` URL, or a local path.
    pub bucket: String,

    /// Leading key segment for every artifact.
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Endpoint override (e.g. a LocalStack or MinIO URL).
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default)]
    pub region: Option<String>,

    #[serde(default)]
    pub access_key_id: Option<String>,

    #[serde(default)]
    pub secret_access_key: Option<String>,

    /// Extra object_store options (`aws_*` keys).
    #[serde(default)]
    pub storage_options: HashMap<String, String>,

    #[serde(default)]
    pub compression: ParquetCompression,

    /// Directory for transient staging files. In-memory when unset.
    #[serde(default)]
    pub staging_dir: Option<PathBuf>,

    /// Deadline for a single upload, in seconds.
    #[serde(default = "default_upload_timeout_secs")]
    pub upload_timeout_secs: u64,

    /// Key segment (under the namespace) for batches that cannot be
    /// serialized. `None` makes such a batch fatal.
    #[serde(default = "default_dead_letter_prefix")]
    pub dead_letter_prefix: Option<String>,
}

impl SinkConfig {
    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_secs)
    }
}

fn default_namespace() -> String {
    "clickstream".to_string()
}

fn default_upload_timeout_secs() -> u64 {
    30
}

fn default_dead_letter_prefix() -> Option<String> {
    Some("_dead_letter".to_string())
}

/// Parquet compression codec.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ParquetCompression {
    Uncompressed,
    #[default]
    Snappy,
    Gzip,
    Zstd,
    Lz4,
}

impl ParquetCompression {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "uncompressed" | "none" => Some(Self::Uncompressed),
            "snappy" => Some(Self::Snappy),
            "gzip" => Some(Self::Gzip),
            "zstd" => Some(Self::Zstd),
            "lz4" => Some(Self::Lz4),
            _ => None,
        }
    }
}

/// Accumulator and hand-off settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Events per artifact.
    #[serde(default = "default_batch_size")]
    pub size: usize,

    /// Sealed batches that may wait for upload before consumption blocks.
    #[serde(default = "default_max_pending_batches")]
    pub max_pending_batches: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            size: default_batch_size(),
            max_pending_batches: default_max_pending_batches(),
        }
    }
}

fn default_batch_size() -> usize {
    50
}

fn default_max_pending_batches() -> usize {
    4
}

/// Backoff between failed flush attempts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Attempts per batch before giving up (0 = unlimited).
    #[serde(default)]
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            multiplier: default_multiplier(),
            max_attempts: 0,
        }
    }
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_multiplier() -> f64 {
    2.0
}

/// Metrics configuration for the Prometheus endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_address")]
    pub address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: default_metrics_address(),
        }
    }
}

fn default_metrics_address() -> String {
    "0.0.0.0:9090".to_string()
}

impl Config {
    /// Build a configuration for `bucket` with every other setting defaulted.
    pub fn with_bucket(bucket: impl Into<String>) -> Self {
        Self {
            source: SourceConfig::default(),
            sink: SinkConfig {
                bucket: bucket.into(),
                namespace: default_namespace(),
                endpoint: None,
                region: None,
                access_key_id: None,
                secret_access_key: None,
                storage_options: HashMap::new(),
                compression: ParquetCompression::default(),
                staging_dir: None,
                upload_timeout_secs: default_upload_timeout_secs(),
                dead_letter_prefix: default_dead_letter_prefix(),
            },
            batch: BatchConfig::default(),
            retry: RetryConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }

    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&env::ProcessEnv)
    }

    /// Load configuration from any variable lookup.
    pub fn from_lookup(lookup: &dyn EnvLookup) -> Result<Self, ConfigError> {
        let config = env::load(lookup)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file, interpolating environment variables.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).context(ReadFileSnafu)?;
        Self::from_yaml(&content, &env::ProcessEnv)
    }

    /// Parse YAML text after interpolating variables from `lookup`.
    pub fn from_yaml(content: &str, lookup: &dyn EnvLookup) -> Result<Self, ConfigError> {
        let content = vars::interpolate(content, lookup)
            .map_err(|errors| EnvInterpolationSnafu { message: errors.join("\n") }.build())?;

        let config: Config = serde_yaml::from_str(&content).context(YamlParseSnafu)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure!(
            !self.source.brokers.trim().is_empty(),
            InvalidSnafu { message: "source.brokers cannot be empty" }
        );
        ensure!(
            !self.source.topic.trim().is_empty(),
            InvalidSnafu { message: "source.topic cannot be empty" }
        );
        ensure!(
            !self.source.group_id.trim().is_empty(),
            InvalidSnafu { message: "source.group_id cannot be empty" }
        );
        ensure!(
            self.source.poll_timeout_ms > 0,
            InvalidSnafu { message: "source.poll_timeout_ms must be positive" }
        );
        ensure!(
            !self.sink.bucket.trim().is_empty(),
            InvalidSnafu { message: "sink.bucket cannot be empty" }
        );
        ensure!(
            !self.sink.namespace.contains("//") && !self.sink.namespace.starts_with('/'),
            InvalidSnafu { message: "sink.namespace must be a relative key prefix" }
        );
        ensure!(
            self.sink.upload_timeout_secs > 0,
            InvalidSnafu { message: "sink.upload_timeout_secs must be positive" }
        );
        ensure!(
            self.batch.size > 0,
            InvalidSnafu { message: "batch.size must be positive" }
        );
        ensure!(
            self.batch.max_pending_batches > 0,
            InvalidSnafu { message: "batch.max_pending_batches must be positive" }
        );
        ensure!(
            self.retry.multiplier >= 1.0,
            InvalidSnafu { message: "retry.multiplier must be at least 1.0" }
        );
        ensure!(
            self.retry.initial_backoff_ms <= self.retry.max_backoff_ms,
            InvalidSnafu { message: "retry.initial_backoff_ms exceeds retry.max_backoff_ms" }
        );
        Ok(())
    }
}
