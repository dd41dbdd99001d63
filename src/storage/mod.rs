//! Blob storage behind one provider type.
//!
//! Supports S3 (and S3-compatible endpoints) and the local filesystem.

mod local;
mod s3;

use bytes::Bytes;
use futures::TryStreamExt;
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};
use regex::Regex;
use snafu::prelude::*;
use std::borrow::Cow;
use std::sync::{Arc, LazyLock};
use std::time::Instant;

use crate::config::SinkConfig;
use crate::emit;
use crate::error::{InvalidUrlSnafu, ObjectStoreSnafu, StorageError};
use crate::metrics::events::{RequestStatus, StorageOperation, StorageRequest};

pub use local::LocalConfig;
pub use s3::S3Config;

/// A reference-counted storage provider.
pub type StorageProviderRef = Arc<StorageProvider>;

/// Storage provider over an `object_store` backend, rooted at an optional key prefix.
#[derive(Clone)]
pub struct StorageProvider {
    pub(crate) config: BackendConfig,
    pub(crate) object_store: Arc<dyn ObjectStore>,
    pub(crate) canonical_url: String,
}

impl std::fmt::Debug for StorageProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StorageProvider<{}>", self.canonical_url)
    }
}

const S3_URL: &str = r"^[sS]3[aA]?://(?P<bucket>[a-z0-9\-\.]+)(/(?P<key>.+?))?/?$";
const BUCKET_NAME: &str = r"^(?P<bucket>[a-z0-9][a-z0-9\-\.]{1,61}[a-z0-9])$";
const FILE_URI: &str = r"^file://(?P<path>.+)$";
const FILE_PATH: &str = r"^(?P<path>\.{0,2}/.*)$";

static S3_PATTERNS: LazyLock<[Regex; 2]> = LazyLock::new(|| {
    [
        Regex::new(S3_URL).expect("valid S3 URL pattern"),
        Regex::new(BUCKET_NAME).expect("valid bucket pattern"),
    ]
});

static LOCAL_PATTERNS: LazyLock<[Regex; 2]> = LazyLock::new(|| {
    [
        Regex::new(FILE_URI).expect("valid file URI pattern"),
        Regex::new(FILE_PATH).expect("valid file path pattern"),
    ]
});

/// Where artifacts land.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendConfig {
    S3(S3Config),
    Local(LocalConfig),
}

impl BackendConfig {
    /// Resolve the sink target: an `s3://` URL, a bare bucket name, a
    /// `file://` URL, or a filesystem path.
    pub fn parse(sink: &SinkConfig) -> Result<Self, StorageError> {
        let target = sink.bucket.trim();

        if let Some(caps) = LOCAL_PATTERNS.iter().find_map(|r| r.captures(target)) {
            return Ok(BackendConfig::Local(LocalConfig {
                path: caps["path"].to_string(),
            }));
        }

        if let Some(caps) = S3_PATTERNS.iter().find_map(|r| r.captures(target)) {
            return Ok(BackendConfig::S3(S3Config {
                bucket: caps["bucket"].to_string(),
                key: caps.name("key").map(|k| Path::from(k.as_str())),
                endpoint: sink.endpoint.clone(),
                region: sink.region.clone(),
                access_key_id: sink.access_key_id.clone(),
                secret_access_key: sink.secret_access_key.clone(),
                options: sink.storage_options.clone(),
            }));
        }

        InvalidUrlSnafu { url: target }.fail()
    }

    pub(crate) fn key(&self) -> Option<&Path> {
        match self {
            BackendConfig::S3(s3) => s3.key.as_ref(),
            BackendConfig::Local(_) => None,
        }
    }
}

impl StorageProvider {
    /// Build the provider for the configured sink target.
    pub async fn for_sink(sink: &SinkConfig) -> Result<Self, StorageError> {
        match BackendConfig::parse(sink)? {
            BackendConfig::S3(config) => Self::construct_s3(config),
            BackendConfig::Local(config) => Self::construct_local(config).await,
        }
    }

    /// Human-readable location of the store.
    pub fn canonical_url(&self) -> &str {
        &self.canonical_url
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    /// Qualify a path with the configured key prefix.
    pub fn qualify_path<'a>(&self, path: &'a Path) -> Cow<'a, Path> {
        match self.config.key() {
            Some(prefix) => Cow::Owned(prefix.parts().chain(path.parts()).collect()),
            None => Cow::Borrowed(path),
        }
    }

    /// Put a payload to a path.
    pub async fn put_payload(&self, path: &Path, payload: PutPayload) -> Result<(), StorageError> {
        let path = self.qualify_path(path);
        let start = Instant::now();
        let result = self.object_store.put(&path, payload).await;

        emit!(StorageRequest {
            operation: StorageOperation::Put,
            status: status_of(&result),
            duration: start.elapsed(),
        });

        result.context(ObjectStoreSnafu)?;
        Ok(())
    }

    /// Get the contents of an object.
    pub async fn get(&self, path: &Path) -> Result<Bytes, StorageError> {
        let path = self.qualify_path(path);
        let start = Instant::now();
        let result = self.object_store.get(&path).await;

        emit!(StorageRequest {
            operation: StorageOperation::Get,
            status: status_of(&result),
            duration: start.elapsed(),
        });

        result
            .context(ObjectStoreSnafu)?
            .bytes()
            .await
            .context(ObjectStoreSnafu)
    }

    /// List every object under `prefix`, returned relative to the provider root
    /// and sorted.
    pub async fn list(&self, prefix: Option<&Path>) -> Result<Vec<Path>, StorageError> {
        let full_prefix = prefix.map(|p| self.qualify_path(p).into_owned());
        let skip = self.config.key().map(|k| k.parts().count()).unwrap_or_default();
        let start = Instant::now();

        let result: Result<Vec<_>, _> = self
            .object_store
            .list(full_prefix.as_ref())
            .map_ok(|meta| meta.location.parts().skip(skip).collect::<Path>())
            .try_collect()
            .await;

        emit!(StorageRequest {
            operation: StorageOperation::List,
            status: status_of(&result),
            duration: start.elapsed(),
        });

        let mut paths = result.context(ObjectStoreSnafu)?;
        paths.sort();
        Ok(paths)
    }
}

fn status_of<T, E>(result: &Result<T, E>) -> RequestStatus {
    if result.is_ok() {
        RequestStatus::Success
    } else {
        RequestStatus::Error
    }
}
