//! S3 storage backend implementation.

use object_store::aws::{AmazonS3Builder, AmazonS3ConfigKey};
use object_store::path::Path;
use object_store::{ObjectStore, RetryConfig};
use snafu::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{S3ConfigSnafu, StorageError};

use super::{BackendConfig, StorageProvider};

/// S3 storage configuration, taken entirely from the sink settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Config {
    pub bucket: String,
    pub key: Option<Path>,
    pub endpoint: Option<String>,
    pub region: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub options: HashMap<String, String>,
}

impl StorageProvider {
    pub(super) fn construct_s3(config: S3Config) -> Result<Self, StorageError> {
        // Retries here cover a single request; batch-level retry lives in the coordinator.
        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(&config.bucket)
            .with_retry(RetryConfig::default());

        for (key, value) in &config.options {
            let key: AmazonS3ConfigKey = key.parse().context(S3ConfigSnafu)?;
            builder = builder.with_config(key, value.clone());
        }

        if let Some(region) = &config.region {
            builder = builder.with_region(region);
        }
        if let Some(access_key_id) = &config.access_key_id {
            builder = builder.with_access_key_id(access_key_id);
        }
        if let Some(secret) = &config.secret_access_key {
            builder = builder.with_secret_access_key(secret);
        }
        if let Some(endpoint) = &config.endpoint {
            builder = builder
                .with_endpoint(endpoint)
                .with_virtual_hosted_style_request(false)
                .with_allow_http(true);
        }

        let mut canonical_url = match (&config.endpoint, &config.region) {
            (Some(endpoint), _) => format!("s3::{}/{}", endpoint, config.bucket),
            (None, Some(region)) => format!("https://s3.{}.amazonaws.com/{}", region, config.bucket),
            (None, None) => format!("s3://{}", config.bucket),
        };
        if let Some(key) = &config.key {
            canonical_url = format!("{canonical_url}/{key}");
        }

        let object_store: Arc<dyn ObjectStore> = Arc::new(builder.build().context(S3ConfigSnafu)?);

        Ok(Self {
            config: BackendConfig::S3(config),
            object_store,
            canonical_url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> S3Config {
        S3Config {
            bucket: "clickstream".to_string(),
            key: None,
            endpoint: Some("http://localhost:4566".to_string()),
            region: Some("us-east-1".to_string()),
            access_key_id: Some("test".to_string()),
            secret_access_key: Some("test".to_string()),
            options: HashMap::new(),
        }
    }

    #[test]
    fn test_endpoint_override_url() {
        let storage = StorageProvider::construct_s3(config()).unwrap();
        assert_eq!(storage.canonical_url(), "s3::http://localhost:4566/clickstream");
    }

    #[test]
    fn test_unknown_option_rejected() {
        let mut config = config();
        config
            .options
            .insert("not_a_real_key".to_string(), "x".to_string());
        assert!(matches!(
            StorageProvider::construct_s3(config),
            Err(StorageError::S3Config { .. })
        ));
    }
}
