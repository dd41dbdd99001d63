use std::collections::BTreeMap;

/// Next offset to consume for each `(topic, partition)`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitPoint {
    offsets: BTreeMap<(String, i32), i64>,
}

impl CommitPoint {
    /// Note that `offset` was consumed on `topic`/`partition`.
    pub fn track(&mut self, topic: &str, partition: i32, offset: i64) {
        self.advance(topic.to_string(), partition, offset + 1);
    }

    /// Fold `other` into `self`, keeping the furthest position per partition.
    pub fn merge(&mut self, other: CommitPoint) {
        for ((topic, partition), next) in other.offsets {
            self.advance(topic, partition, next);
        }
    }

    fn advance(&mut self, topic: String, partition: i32, next: i64) {
        self.offsets
            .entry((topic, partition))
            .and_modify(|current| *current = (*current).max(next))
            .or_insert(next);
    }

    pub fn get(&self, topic: &str, partition: i32) -> Option<i64> {
        self.offsets.get(&(topic.to_string(), partition)).copied()
    }

    /// `(topic, partition, next_offset)` in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, i32, i64)> {
        self.offsets
            .iter()
            .map(|((topic, partition), next)| (topic.as_str(), *partition, *next))
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_keeps_highest() {
        let mut point = CommitPoint::default();
        point.track("t", 0, 7);
        point.track("t", 0, 3);
        point.track("t", 1, 0);

        assert_eq!(point.get("t", 0), Some(8));
        assert_eq!(point.get("t", 1), Some(1));
        assert_eq!(point.get("t", 2), None);
        assert_eq!(point.len(), 2);
    }

    #[test]
    fn test_merge_supersedes_per_partition() {
        let mut pending = CommitPoint::default();
        pending.track("t", 0, 9);
        pending.track("t", 1, 4);

        let mut later = CommitPoint::default();
        later.track("t", 0, 19);
        later.track("t", 2, 0);

        pending.merge(later);
        let entries: Vec<_> = pending.iter().collect();
        assert_eq!(entries, [("t", 0, 20), ("t", 1, 5), ("t", 2, 1)]);
    }
}
