//! In-process stream for tests and local runs.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::{OffsetCommitter, SourceMessage, StreamSource};
use crate::batch::CommitPoint;
use crate::error::SourceError;

enum Entry {
    Message(SourceMessage),
    PollError(String),
}

#[derive(Default)]
struct State {
    queue: VecDeque<Entry>,
    next_offsets: HashMap<i32, i64>,
    commits: Vec<CommitPoint>,
    failing_commits: usize,
    closed: bool,
}

struct Shared {
    topic: String,
    state: Mutex<State>,
    available: Notify,
}

/// Handle to an in-memory topic. Clones share the same topic.
#[derive(Clone)]
pub struct MemoryStream {
    shared: Arc<Shared>,
}

impl MemoryStream {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(Shared {
                topic: topic.into(),
                state: Mutex::new(State::default()),
                available: Notify::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // A poisoned lock only means a test thread panicked; the data is still usable.
        self.shared
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn push(&self, entry: Entry) {
        self.state().queue.push_back(entry);
        self.shared.available.notify_one();
    }

    /// Append a message to `partition`. Returns its offset.
    pub fn send(&self, partition: i32, payload: Option<Vec<u8>>) -> i64 {
        let offset = {
            let mut state = self.state();
            let next = state.next_offsets.entry(partition).or_insert(0);
            let offset = *next;
            *next += 1;
            offset
        };
        self.push(Entry::Message(SourceMessage {
            topic: self.shared.topic.clone(),
            partition,
            offset,
            payload,
        }));
        offset
    }

    /// Append a JSON message to partition 0.
    pub fn send_json(&self, value: &Value) -> i64 {
        self.send(0, Some(value.to_string().into_bytes()))
    }

    /// Make one future poll fail with a delivery error.
    pub fn inject_poll_error(&self, message: impl Into<String>) {
        self.push(Entry::PollError(message.into()));
    }

    /// Reject the next `count` commit calls.
    pub fn fail_next_commits(&self, count: usize) {
        self.state().failing_commits = count;
    }

    /// Messages not yet polled.
    pub fn pending(&self) -> usize {
        self.state().queue.len()
    }

    /// Every accepted commit, in order.
    pub fn commits(&self) -> Vec<CommitPoint> {
        self.state().commits.clone()
    }

    /// Furthest committed position per partition.
    pub fn committed(&self) -> CommitPoint {
        let mut merged = CommitPoint::default();
        for commit in self.state().commits.iter().cloned() {
            merged.merge(commit);
        }
        merged
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    pub fn source(&self) -> MemorySource {
        MemorySource {
            stream: self.clone(),
        }
    }

    pub fn committer(&self) -> MemoryCommitter {
        MemoryCommitter {
            stream: self.clone(),
        }
    }
}

/// Reading side of a `MemoryStream`.
pub struct MemorySource {
    stream: MemoryStream,
}

#[async_trait]
impl StreamSource for MemorySource {
    async fn poll(&mut self, timeout: Duration) -> Result<Option<SourceMessage>, SourceError> {
        let deadline = Instant::now() + timeout;
        loop {
            let entry = self.stream.state().queue.pop_front();
            match entry {
                Some(Entry::Message(message)) => return Ok(Some(message)),
                Some(Entry::PollError(message)) => return Err(SourceError::Poll { message }),
                None => {}
            }
            let notified = self.stream.shared.available.notified();
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn close(&mut self) {
        self.stream.state().closed = true;
    }
}

/// Commit side of a `MemoryStream`.
pub struct MemoryCommitter {
    stream: MemoryStream,
}

#[async_trait]
impl OffsetCommitter for MemoryCommitter {
    async fn commit(&self, point: &CommitPoint) -> Result<(), SourceError> {
        let mut state = self.stream.state();
        if state.failing_commits > 0 {
            state.failing_commits -= 1;
            return Err(SourceError::Commit {
                message: "injected commit failure".to_string(),
            });
        }
        state.commits.push(point.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_poll_in_order_then_timeout() {
        let stream = MemoryStream::new("clickstream_events");
        assert_eq!(stream.send_json(&json!({"n": 1})), 0);
        assert_eq!(stream.send_json(&json!({"n": 2})), 1);
        assert_eq!(stream.send(3, None), 0);

        let mut source = stream.source();
        let timeout = Duration::from_millis(10);
        assert_eq!(source.poll(timeout).await.unwrap().unwrap().offset, 0);
        assert_eq!(source.poll(timeout).await.unwrap().unwrap().offset, 1);
        let third = source.poll(timeout).await.unwrap().unwrap();
        assert_eq!((third.partition, third.payload), (3, None));
        assert!(source.poll(timeout).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_poll_wakes_on_send() {
        let stream = MemoryStream::new("t");
        let mut source = stream.source();

        let sender = stream.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            sender.send_json(&json!({}));
        });

        let message = source.poll(Duration::from_secs(5)).await.unwrap();
        assert!(message.is_some());
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let stream = MemoryStream::new("t");
        stream.inject_poll_error("broker down");
        assert!(matches!(
            stream.source().poll(Duration::from_millis(1)).await,
            Err(SourceError::Poll { .. })
        ));

        let mut point = CommitPoint::default();
        point.track("t", 0, 4);
        stream.fail_next_commits(1);
        let committer = stream.committer();
        assert!(committer.commit(&point).await.is_err());
        committer.commit(&point).await.unwrap();
        assert_eq!(stream.commits(), vec![point]);
    }
}
