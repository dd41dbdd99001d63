//! Poll, validate, accumulate.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::batch::{Batch, BatchAccumulator};
use crate::emit;
use crate::event::{Validator, decode};
use crate::metrics::events::{
    AccumulatorDepth, BatchSealed, EventRejected, EventsAccepted, EventsDiscarded,
    MessagesConsumed, PendingBatches, PollFailed, RejectStage,
};
use crate::source::{SourceMessage, StreamSource};

/// Counters from the reader task.
#[derive(Debug, Clone, Default)]
pub struct ReaderStats {
    pub messages_consumed: usize,
    pub events_accepted: usize,
    pub decode_failures: usize,
    pub validation_failures: usize,
    pub poll_errors: usize,
    pub batches_sealed: usize,
    pub events_discarded: usize,
}

/// Reads the stream into sealed batches.
pub struct StreamReader {
    source: Box<dyn StreamSource>,
    validator: Validator,
    accumulator: BatchAccumulator,
    poll_timeout: Duration,
    max_pending: usize,
    tx: mpsc::Sender<Batch>,
    shutdown: CancellationToken,
    stats: ReaderStats,
}

impl StreamReader {
    pub fn new(
        source: Box<dyn StreamSource>,
        batch_size: usize,
        poll_timeout: Duration,
        tx: mpsc::Sender<Batch>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            source,
            validator: Validator::new(),
            accumulator: BatchAccumulator::new(batch_size),
            poll_timeout,
            max_pending: tx.max_capacity(),
            tx,
            shutdown,
            stats: ReaderStats::default(),
        }
    }

    pub fn spawn(self) -> JoinHandle<(ReaderStats, Box<dyn StreamSource>)> {
        tokio::spawn(self.run())
    }

    /// Runs until cancelled or until the coordinator stops receiving.
    ///
    /// The source is handed back open. Commits may still be in flight on a
    /// client it shares, so closing it is left to the caller.
    pub async fn run(mut self) -> (ReaderStats, Box<dyn StreamSource>) {
        info!(
            batch_size = self.accumulator.capacity(),
            poll_timeout_ms = self.poll_timeout.as_millis() as u64,
            "Reader started"
        );

        loop {
            let polled = tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => break,
                polled = self.source.poll(self.poll_timeout) => polled,
            };

            match polled {
                Ok(None) => continue,
                Ok(Some(message)) => self.handle_message(message),
                Err(error) => {
                    self.stats.poll_errors += 1;
                    emit!(PollFailed);
                    warn!(event = "consumer_error", %error, "Poll failed");
                    continue;
                }
            }

            if self.accumulator.is_full() && !self.hand_off().await {
                break;
            }
        }

        let dropped = self.accumulator.discard();
        if dropped > 0 {
            self.stats.events_discarded += dropped;
            emit!(EventsDiscarded {
                count: dropped as u64
            });
            info!(events = dropped, "Discarded unsealed events on shutdown");
        }
        emit!(AccumulatorDepth { count: 0 });

        info!(stats = ?self.stats, "Reader stopped");
        (self.stats, self.source)
    }

    fn handle_message(&mut self, message: SourceMessage) {
        self.stats.messages_consumed += 1;
        emit!(MessagesConsumed { count: 1 });

        // Every consumed message moves the commit point, even if it is dropped.
        self.accumulator
            .track(&message.topic, message.partition, message.offset);

        let raw = match decode(message.payload.as_deref()) {
            Ok(raw) => raw,
            Err(error) => {
                self.stats.decode_failures += 1;
                emit!(EventRejected {
                    stage: RejectStage::Decode,
                    reason: error.reason(),
                });
                warn!(
                    event = "json_deserialization_failed",
                    topic = %message.topic,
                    partition = message.partition,
                    offset = message.offset,
                    %error,
                    payload = %payload_text(&message),
                    "Dropping undecodable message"
                );
                return;
            }
        };

        match self.validator.validate(raw) {
            Ok(event) => {
                self.accumulator.append(event);
                self.stats.events_accepted += 1;
                emit!(EventsAccepted { count: 1 });
                emit!(AccumulatorDepth {
                    count: self.accumulator.len()
                });
            }
            Err(error) => {
                self.stats.validation_failures += 1;
                emit!(EventRejected {
                    stage: RejectStage::Validate,
                    reason: error.reason(),
                });
                warn!(
                    event = "invalid_message",
                    topic = %message.topic,
                    partition = message.partition,
                    offset = message.offset,
                    %error,
                    payload = %payload_text(&message),
                    "Dropping invalid event"
                );
            }
        }
    }

    /// Seal the accumulator and send it on. Waits while the channel is full.
    /// Returns false when the reader should stop.
    async fn hand_off(&mut self) -> bool {
        let batch = self.accumulator.drain();
        let events = batch.len();
        self.stats.batches_sealed += 1;
        emit!(BatchSealed { events });
        emit!(AccumulatorDepth { count: 0 });
        debug!(sequence = batch.sequence, events, "Batch sealed");

        let sent = tokio::select! {
            biased;

            _ = self.shutdown.cancelled() => {
                self.stats.events_discarded += events;
                emit!(EventsDiscarded { count: events as u64 });
                info!(events, "Discarded sealed batch on shutdown");
                return false;
            }
            sent = self.tx.send(batch) => sent,
        };

        match sent {
            Ok(()) => {
                emit!(PendingBatches {
                    count: self.max_pending - self.tx.capacity()
                });
                true
            }
            Err(mpsc::error::SendError(batch)) => {
                self.stats.events_discarded += batch.len();
                warn!("Coordinator stopped; reader exiting");
                false
            }
        }
    }
}

fn payload_text(message: &SourceMessage) -> String {
    message
        .payload
        .as_deref()
        .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
        .unwrap_or_default()
}
