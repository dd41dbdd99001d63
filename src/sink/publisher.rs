//! Artifact upload.

use async_trait::async_trait;
use object_store::PutPayload;
use object_store::path::Path;
use regex::Regex;
use std::error::Error;
use std::sync::LazyLock;
use std::time::Instant;

use crate::emit;
use crate::error::{PublishError, StorageError};
use crate::metrics::events::ArtifactUploaded;
use crate::storage::StorageProviderRef;

/// Uploads serialized artifacts to a key.
#[async_trait]
pub trait ObjectPublisher: Send + Sync {
    /// Store `payload` under `key`. Returns once the write is durable.
    async fn publish(&self, key: &Path, payload: PutPayload) -> Result<(), PublishError>;
}

/// Publisher backed by a `StorageProvider`.
#[derive(Debug, Clone)]
pub struct StoragePublisher {
    storage: StorageProviderRef,
}

impl StoragePublisher {
    pub fn new(storage: StorageProviderRef) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl ObjectPublisher for StoragePublisher {
    async fn publish(&self, key: &Path, payload: PutPayload) -> Result<(), PublishError> {
        let bytes = payload.content_length() as u64;
        let start = Instant::now();

        match self.storage.put_payload(key, payload).await {
            Ok(()) => {
                emit!(ArtifactUploaded {
                    bytes,
                    duration: start.elapsed(),
                });
                Ok(())
            }
            Err(source) => Err(classify(key.to_string(), source)),
        }
    }
}

/// An HTTP status as the store clients render it, e.g. `status 503` or
/// `status code: 403`. Bare digits are ignored since keys carry epoch seconds.
static HTTP_STATUS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bstatus(?:\s+code)?:?\s*(\d{3})\b").expect("status pattern is valid")
});

const THROTTLE_STATUSES: &[u16] = &[429, 503];
const AUTH_STATUSES: &[u16] = &[401, 403];

const THROTTLE_MARKERS: &[&str] = &["SlowDown", "Too Many Requests", "RequestLimitExceeded"];
const AUTH_MARKERS: &[&str] = &[
    "Forbidden",
    "InvalidAccessKeyId",
    "SignatureDoesNotMatch",
    "ExpiredToken",
];

enum Failure {
    Authentication,
    Throttled,
    Network,
    Other,
}

/// Map a storage failure onto the publish error kinds.
pub fn classify(key: String, source: StorageError) -> PublishError {
    let text = error_chain(&source);
    let statuses: Vec<u16> = HTTP_STATUS
        .captures_iter(&text)
        .filter_map(|caps| caps[1].parse().ok())
        .collect();
    let has = |codes: &[u16], markers: &[&str]| {
        statuses.iter().any(|status| codes.contains(status))
            || markers.iter().any(|m| text.contains(m))
    };

    let failure = match &source {
        StorageError::ObjectStore {
            source:
                object_store::Error::Unauthenticated { .. }
                | object_store::Error::PermissionDenied { .. },
        } => Failure::Authentication,
        StorageError::ObjectStore { .. } if has(THROTTLE_STATUSES, THROTTLE_MARKERS) => Failure::Throttled,
        StorageError::ObjectStore { .. } if has(AUTH_STATUSES, AUTH_MARKERS) => Failure::Authentication,
        StorageError::ObjectStore {
            source: object_store::Error::Generic { .. },
        } => Failure::Network,
        _ => Failure::Other,
    };

    match failure {
        Failure::Authentication => PublishError::Authentication { key, source },
        Failure::Throttled => PublishError::Throttled { key, source },
        Failure::Network => PublishError::Network { key, source },
        Failure::Other => PublishError::Upload { key, source },
    }
}

fn error_chain(err: &dyn Error) -> String {
    let mut text = err.to_string();
    let mut current = err.source();
    while let Some(cause) = current {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        current = cause.source();
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::storage::StorageProvider;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn object_store_error(message: &str) -> StorageError {
        StorageError::ObjectStore {
            source: object_store::Error::Generic {
                store: "S3",
                source: message.to_string().into(),
            },
        }
    }

    #[test]
    fn test_classify_kinds() {
        let key = "clickstream/k".to_string();

        let throttled = classify(key.clone(), object_store_error("status 503 SlowDown"));
        assert_eq!(throttled.kind(), "throttled");

        let auth = classify(key.clone(), object_store_error("403 Forbidden: InvalidAccessKeyId"));
        assert_eq!(auth.kind(), "authentication");

        let denied = classify(
            key.clone(),
            StorageError::ObjectStore {
                source: object_store::Error::PermissionDenied {
                    path: "k".to_string(),
                    source: "denied".into(),
                },
            },
        );
        assert_eq!(denied.kind(), "authentication");

        let network = classify(key.clone(), object_store_error("error sending request"));
        assert_eq!(network.kind(), "network");

        let other = classify(key, StorageError::Io { source: std::io::Error::other("disk") });
        assert_eq!(other.kind(), "other");
    }

    #[test]
    fn test_classify_reads_status_not_key_digits() {
        let key = "clickstream/year=2026/month=01/day=18/hour=10/1768730403-batch.parquet";

        let network = classify(
            key.to_string(),
            object_store_error(&format!("error sending request for url (http://s3/bucket/{key})")),
        );
        assert_eq!(network.kind(), "network");

        let throttled = classify(
            key.to_string(),
            object_store_error(&format!("PUT {key}: Client error with status 429: slow")),
        );
        assert_eq!(throttled.kind(), "throttled");

        let auth = classify(
            key.to_string(),
            object_store_error(&format!("PUT {key}: status code: 401")),
        );
        assert_eq!(auth.kind(), "authentication");
    }

    #[tokio::test]
    async fn test_publish_to_local_storage() {
        let dir = TempDir::new().unwrap();
        let sink = Config::with_bucket(dir.path().to_str().unwrap()).sink;
        let storage = Arc::new(StorageProvider::for_sink(&sink).await.unwrap());
        let publisher = StoragePublisher::new(storage.clone());

        let key = Path::from("clickstream/year=2026/month=01/day=18/hour=10/1-batch.parquet");
        publisher
            .publish(&key, PutPayload::from_static(b"PAR1"))
            .await
            .unwrap();

        assert_eq!(storage.get(&key).await.unwrap().as_ref(), b"PAR1");
    }
}
