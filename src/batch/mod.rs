//! In-memory accumulation of normalized events and the offsets they cover.

mod commit;

use crate::event::NormalizedEvent;

pub use commit::CommitPoint;

/// An ordered, sealed group of events handed off for persistence.
///
/// `commit` covers every message consumed while the batch was filling,
/// including messages that were dropped before reaching the accumulator.
#[derive(Debug, Clone)]
pub struct Batch {
    pub sequence: u64,
    pub events: Vec<NormalizedEvent>,
    pub commit: CommitPoint,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Bounded, ordered buffer owned by the reader task.
#[derive(Debug)]
pub struct BatchAccumulator {
    capacity: usize,
    events: Vec<NormalizedEvent>,
    commit: CommitPoint,
    sealed: u64,
}

impl BatchAccumulator {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            events: Vec::with_capacity(capacity),
            commit: CommitPoint::default(),
            sealed: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Add an event at the tail. Never rejects.
    pub fn append(&mut self, event: NormalizedEvent) {
        self.events.push(event);
    }

    /// Record that the message at `offset` was consumed, whatever its fate.
    pub fn track(&mut self, topic: &str, partition: i32, offset: i64) {
        self.commit.track(topic, partition, offset);
    }

    pub fn is_full(&self) -> bool {
        self.events.len() >= self.capacity
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Seal the current contents and start a new, empty batch.
    pub fn drain(&mut self) -> Batch {
        self.sealed += 1;
        Batch {
            sequence: self.sealed,
            events: std::mem::replace(&mut self.events, Vec::with_capacity(self.capacity)),
            commit: std::mem::take(&mut self.commit),
        }
    }

    /// Drop buffered events and their offsets. Returns the number of events dropped.
    pub fn discard(&mut self) -> usize {
        let dropped = self.events.len();
        self.events.clear();
        self.commit = CommitPoint::default();
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::{Map, json};

    fn event(n: usize) -> NormalizedEvent {
        NormalizedEvent {
            user_id: json!(format!("user-{n}")),
            event_type: "view_product".to_string(),
            timestamp: Utc::now(),
            ingestion_timestamp: Utc::now(),
            attributes: Map::new(),
        }
    }

    #[test]
    fn test_full_exactly_at_capacity() {
        let mut acc = BatchAccumulator::new(3);
        for n in 0..2 {
            acc.append(event(n));
            assert!(!acc.is_full());
        }
        acc.append(event(2));
        assert!(acc.is_full());
    }

    #[test]
    fn test_drain_empties_and_preserves_order() {
        let mut acc = BatchAccumulator::new(50);
        for n in 0..50 {
            acc.track("clickstream_events", 0, n as i64);
            acc.append(event(n));
        }
        let batch = acc.drain();

        assert_eq!(batch.len(), 50);
        assert_eq!(batch.sequence, 1);
        assert_eq!(batch.events[0].user_id, json!("user-0"));
        assert_eq!(batch.events[49].user_id, json!("user-49"));
        assert_eq!(batch.commit.get("clickstream_events", 0), Some(50));
        assert!(acc.is_empty());
        assert!(acc.drain().commit.is_empty());
    }

    #[test]
    fn test_rejected_messages_still_tracked() {
        let mut acc = BatchAccumulator::new(2);
        acc.track("t", 1, 10);
        acc.track("t", 1, 11);
        acc.append(event(0));
        acc.track("t", 1, 12);
        acc.append(event(1));

        let batch = acc.drain();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.commit.get("t", 1), Some(13));
    }

    #[test]
    fn test_discard() {
        let mut acc = BatchAccumulator::new(10);
        acc.track("t", 0, 5);
        acc.append(event(0));
        acc.append(event(1));

        assert_eq!(acc.discard(), 2);
        assert!(acc.is_empty());
        assert!(acc.drain().commit.is_empty());
    }
}
