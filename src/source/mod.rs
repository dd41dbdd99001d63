//! Stream sources and offset committers.
//!
//! The reader task owns a `StreamSource`; the coordinator task owns an
//! `OffsetCommitter`. Both sides of a Kafka consumer share one client.

#[cfg(feature = "kafka")]
pub mod kafka;
pub mod memory;

use async_trait::async_trait;
use std::time::Duration;

use crate::batch::CommitPoint;
use crate::error::SourceError;

pub use memory::{MemoryCommitter, MemorySource, MemoryStream};

/// One message as delivered by the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub payload: Option<Vec<u8>>,
}

/// Polls messages from a stream.
#[async_trait]
pub trait StreamSource: Send {
    /// Wait up to `timeout` for the next message. `Ok(None)` means nothing arrived.
    async fn poll(&mut self, timeout: Duration) -> Result<Option<SourceMessage>, SourceError>;

    /// Release the client. Called once after the read loop ends.
    async fn close(&mut self) {}
}

/// Acknowledges consumption progress to the stream.
#[async_trait]
pub trait OffsetCommitter: Send + Sync {
    async fn commit(&self, point: &CommitPoint) -> Result<(), SourceError>;
}
