//! Environment-style configuration surface.
//!
//! Deployment variables:
//! - `KAFKA_BROKER` (default `kafka:9092`)
//! - `S3_BUCKET` (required)
//! - `AWS_ENDPOINT_URL`, `AWS_DEFAULT_REGION`
//! - `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`
//!
//! Tunables use the `CLICKSTREAM_` prefix, e.g. `CLICKSTREAM_BATCH_SIZE`.

use snafu::prelude::*;
use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;

use super::{Config, OffsetReset, ParquetCompression, SourceConfig};
use crate::error::{ConfigError, InvalidVarSnafu, MissingVarSnafu};

/// Source of configuration variables.
pub trait EnvLookup {
    fn get(&self, name: &str) -> Option<String>;
}

/// Reads from the process environment.
pub(super) struct ProcessEnv;

impl EnvLookup for ProcessEnv {
    fn get(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

impl EnvLookup for HashMap<String, String> {
    fn get(&self, name: &str) -> Option<String> {
        HashMap::get(self, name).cloned()
    }
}

/// Non-empty value of `name`, if any.
fn var(lookup: &dyn EnvLookup, name: &str) -> Option<String> {
    lookup.get(name).filter(|v| !v.trim().is_empty())
}

fn parsed<T: FromStr>(lookup: &dyn EnvLookup, name: &str) -> Result<Option<T>, ConfigError> {
    match var(lookup, name) {
        None => Ok(None),
        Some(value) => match value.trim().parse() {
            Ok(v) => Ok(Some(v)),
            Err(_) => InvalidVarSnafu { name, value }.fail(),
        },
    }
}

/// Apply the stream variables to `source`.
pub(super) fn apply_source(lookup: &dyn EnvLookup, source: &mut SourceConfig) -> Result<(), ConfigError> {
    if let Some(brokers) = var(lookup, "KAFKA_BROKER") {
        source.brokers = brokers;
    }
    if let Some(topic) = var(lookup, "CLICKSTREAM_TOPIC") {
        source.topic = topic;
    }
    if let Some(group_id) = var(lookup, "CLICKSTREAM_GROUP_ID") {
        source.group_id = group_id;
    }
    if let Some(value) = var(lookup, "CLICKSTREAM_OFFSET_RESET") {
        source.offset_reset = match value.to_ascii_lowercase().as_str() {
            "earliest" => OffsetReset::Earliest,
            "latest" => OffsetReset::Latest,
            _ => {
                return InvalidVarSnafu {
                    name: "CLICKSTREAM_OFFSET_RESET",
                    value,
                }
                .fail();
            }
        };
    }
    if let Some(ms) = parsed(lookup, "CLICKSTREAM_POLL_TIMEOUT_MS")? {
        source.poll_timeout_ms = ms;
    }
    Ok(())
}

pub(super) fn load(lookup: &dyn EnvLookup) -> Result<Config, ConfigError> {
    let bucket = var(lookup, "S3_BUCKET").context(MissingVarSnafu { name: "S3_BUCKET" })?;
    let mut config = Config::with_bucket(bucket);

    apply_source(lookup, &mut config.source)?;

    let sink = &mut config.sink;
    sink.endpoint = var(lookup, "AWS_ENDPOINT_URL");
    sink.region = var(lookup, "AWS_DEFAULT_REGION");
    sink.access_key_id = var(lookup, "AWS_ACCESS_KEY_ID");
    sink.secret_access_key = var(lookup, "AWS_SECRET_ACCESS_KEY");
    if let Some(namespace) = var(lookup, "CLICKSTREAM_NAMESPACE") {
        sink.namespace = namespace;
    }
    if let Some(value) = var(lookup, "CLICKSTREAM_COMPRESSION") {
        sink.compression = ParquetCompression::parse(&value).context(InvalidVarSnafu {
            name: "CLICKSTREAM_COMPRESSION",
            value,
        })?;
    }
    if let Some(dir) = var(lookup, "CLICKSTREAM_STAGING_DIR") {
        sink.staging_dir = Some(PathBuf::from(dir));
    }
    if let Some(secs) = parsed(lookup, "CLICKSTREAM_UPLOAD_TIMEOUT_SECS")? {
        sink.upload_timeout_secs = secs;
    }
    if let Some(prefix) = lookup.get("CLICKSTREAM_DEAD_LETTER_PREFIX") {
        // An explicitly empty value disables the dead-letter prefix.
        sink.dead_letter_prefix = Some(prefix).filter(|p| !p.trim().is_empty());
    }

    if let Some(size) = parsed(lookup, "CLICKSTREAM_BATCH_SIZE")? {
        config.batch.size = size;
    }
    if let Some(pending) = parsed(lookup, "CLICKSTREAM_MAX_PENDING_BATCHES")? {
        config.batch.max_pending_batches = pending;
    }

    if let Some(ms) = parsed(lookup, "CLICKSTREAM_RETRY_INITIAL_MS")? {
        config.retry.initial_backoff_ms = ms;
    }
    if let Some(ms) = parsed(lookup, "CLICKSTREAM_RETRY_MAX_MS")? {
        config.retry.max_backoff_ms = ms;
    }
    if let Some(attempts) = parsed(lookup, "CLICKSTREAM_RETRY_MAX_ATTEMPTS")? {
        config.retry.max_attempts = attempts;
    }

    if let Some(address) = var(lookup, "CLICKSTREAM_METRICS_ADDRESS") {
        config.metrics.enabled = true;
        config.metrics.address = address;
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_minimal_environment() {
        let config = Config::from_lookup(&vars(&[("S3_BUCKET", "clickstream-bucket")])).unwrap();

        assert_eq!(config.sink.bucket, "clickstream-bucket");
        assert_eq!(config.source.brokers, "kafka:9092");
        assert_eq!(config.source.topic, "clickstream_events");
        assert_eq!(config.batch.size, 50);
        assert!(config.sink.endpoint.is_none());
    }

    #[test]
    fn test_full_environment() {
        let config = Config::from_lookup(&vars(&[
            ("S3_BUCKET", "clickstream-bucket"),
            ("KAFKA_BROKER", "localhost:29092"),
            ("AWS_ENDPOINT_URL", "http://localhost:4566"),
            ("AWS_ACCESS_KEY_ID", "test"),
            ("AWS_SECRET_ACCESS_KEY", "test"),
            ("AWS_DEFAULT_REGION", "us-east-1"),
            ("CLICKSTREAM_BATCH_SIZE", "200"),
            ("CLICKSTREAM_OFFSET_RESET", "Latest"),
            ("CLICKSTREAM_COMPRESSION", "zstd"),
            ("CLICKSTREAM_DEAD_LETTER_PREFIX", ""),
        ]))
        .unwrap();

        assert_eq!(config.source.brokers, "localhost:29092");
        assert_eq!(config.source.offset_reset, OffsetReset::Latest);
        assert_eq!(config.sink.endpoint.as_deref(), Some("http://localhost:4566"));
        assert_eq!(config.sink.region.as_deref(), Some("us-east-1"));
        assert_eq!(config.sink.access_key_id.as_deref(), Some("test"));
        assert_eq!(config.sink.compression, ParquetCompression::Zstd);
        assert_eq!(config.sink.dead_letter_prefix, None);
        assert_eq!(config.batch.size, 200);
    }

    #[test]
    fn test_source_only_environment() {
        let source = SourceConfig::from_lookup(&vars(&[
            ("KAFKA_BROKER", "localhost:29092"),
            ("CLICKSTREAM_TOPIC", "clicks"),
        ]))
        .unwrap();

        assert_eq!(source.brokers, "localhost:29092");
        assert_eq!(source.topic, "clicks");
        assert_eq!(source.group_id, "clickstream-consumer-group");
    }

    #[test]
    fn test_missing_bucket() {
        let err = Config::from_lookup(&vars(&[("KAFKA_BROKER", "localhost:9092")])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar { .. }));
        assert!(err.to_string().contains("S3_BUCKET"));
    }

    #[test]
    fn test_unparseable_number() {
        let err = Config::from_lookup(&vars(&[
            ("S3_BUCKET", "bucket"),
            ("CLICKSTREAM_BATCH_SIZE", "fifty"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidVar { .. }));
    }

    #[test]
    fn test_zero_batch_size_fails_validation() {
        let err = Config::from_lookup(&vars(&[
            ("S3_BUCKET", "bucket"),
            ("CLICKSTREAM_BATCH_SIZE", "0"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }
}
