//! Time-partitioned object keys.

use chrono::{DateTime, Utc};
use object_store::path::Path;

const PARTITION_TEMPLATE: &str = "year=%Y/month=%m/day=%d/hour=%H";

/// Renders `<namespace>/year=YYYY/month=MM/day=DD/hour=HH/<token>-batch.<ext>`.
///
/// The token is the epoch seconds of the supplied instant, bumped past the
/// previous token so that keys from one generator never collide.
#[derive(Debug, Clone)]
pub struct ArtifactKeyGenerator {
    namespace: String,
    last_token: Option<i64>,
}

impl ArtifactKeyGenerator {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into().trim_matches('/').to_string(),
            last_token: None,
        }
    }

    /// Key for a Parquet artifact written at `at`.
    pub fn artifact_key(&mut self, at: DateTime<Utc>) -> Path {
        self.render(None, at, "parquet")
    }

    /// Key for a dead-lettered batch under `prefix`.
    pub fn dead_letter_key(&mut self, prefix: &str, at: DateTime<Utc>) -> Path {
        self.render(Some(prefix), at, "ndjson")
    }

    /// The hour partition for `at`, e.g. `year=2026/month=01/day=18/hour=10`.
    pub fn partition(at: DateTime<Utc>) -> String {
        at.format(PARTITION_TEMPLATE).to_string()
    }

    fn next_token(&mut self, at: DateTime<Utc>) -> i64 {
        let seconds = at.timestamp();
        let token = match self.last_token {
            Some(last) if seconds <= last => last + 1,
            _ => seconds,
        };
        self.last_token = Some(token);
        token
    }

    fn render(&mut self, segment: Option<&str>, at: DateTime<Utc>, extension: &str) -> Path {
        let token = self.next_token(at);
        let file = format!("{token}-batch.{extension}");
        let partition = Self::partition(at);

        let parts = [
            Some(self.namespace.as_str()),
            segment.map(|s| s.trim_matches('/')),
            Some(partition.as_str()),
            Some(file.as_str()),
        ];
        let key = parts
            .into_iter()
            .flatten()
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>()
            .join("/");
        Path::from(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_key_layout() {
        let at = Utc.with_ymd_and_hms(2026, 1, 18, 9, 5, 0).unwrap();
        let mut keys = ArtifactKeyGenerator::new("clickstream");
        assert_eq!(
            keys.artifact_key(at).as_ref(),
            format!("clickstream/year=2026/month=01/day=18/hour=09/{}-batch.parquet", at.timestamp())
        );
    }

    #[test]
    fn test_same_second_keys_distinct() {
        let at = Utc.with_ymd_and_hms(2026, 1, 18, 10, 0, 0).unwrap();
        let mut keys = ArtifactKeyGenerator::new("clickstream");
        let first = keys.artifact_key(at);
        let second = keys.artifact_key(at);
        let third = keys.artifact_key(at - chrono::Duration::seconds(30));

        assert_ne!(first, second);
        assert_ne!(second, third);
        assert!(second.as_ref().ends_with(&format!("{}-batch.parquet", at.timestamp() + 1)));
        assert!(third.as_ref().ends_with(&format!("{}-batch.parquet", at.timestamp() + 2)));
    }

    #[test]
    fn test_dead_letter_key() {
        let at = Utc.with_ymd_and_hms(2026, 12, 31, 23, 59, 59).unwrap();
        let mut keys = ArtifactKeyGenerator::new("clickstream/");
        let key = keys.dead_letter_key("_dead_letter", at);
        assert_eq!(
            key.as_ref(),
            format!(
                "clickstream/_dead_letter/year=2026/month=12/day=31/hour=23/{}-batch.ndjson",
                at.timestamp()
            )
        );
    }

    #[test]
    fn test_empty_namespace() {
        let at = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let mut keys = ArtifactKeyGenerator::new("");
        assert!(keys.artifact_key(at).as_ref().starts_with("year=2026/month=01/day=01/hour=00/"));
    }
}
