//! Kafka consumer and producer.

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use rdkafka::{Offset, TopicPartitionList};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::{OffsetCommitter, SourceMessage, StreamSource};
use crate::batch::CommitPoint;
use crate::config::SourceConfig;
use crate::error::SourceError;

const METADATA_TIMEOUT: Duration = Duration::from_secs(10);

fn client_config(config: &SourceConfig) -> ClientConfig {
    let mut client = ClientConfig::new();
    client.set("bootstrap.servers", &config.brokers);
    for (key, value) in &config.client_options {
        client.set(key, value);
    }
    client
}

fn connect_error(err: KafkaError) -> SourceError {
    SourceError::Connect {
        message: err.to_string(),
    }
}

/// Reading side of a Kafka consumer group member.
pub struct KafkaSource {
    consumer: Arc<StreamConsumer>,
}

/// Commit side sharing the source's consumer.
pub struct KafkaCommitter {
    consumer: Arc<StreamConsumer>,
}

impl KafkaSource {
    /// Create the consumer, confirm the topic is reachable, and subscribe.
    ///
    /// Auto-commit is always off; offsets move only through `KafkaCommitter`.
    pub async fn connect(config: &SourceConfig) -> Result<(Self, KafkaCommitter), SourceError> {
        let consumer: StreamConsumer = client_config(config)
            .set("group.id", &config.group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", config.offset_reset.as_str())
            .create()
            .map_err(connect_error)?;
        let consumer = Arc::new(consumer);

        let probe = consumer.clone();
        let topic = config.topic.clone();
        let partitions = tokio::task::spawn_blocking(move || {
            let metadata = probe
                .fetch_metadata(Some(topic.as_str()), METADATA_TIMEOUT)
                .map_err(connect_error)?;
            match metadata.topics().first() {
                Some(found) if found.error().is_none() => Ok(found.partitions().len()),
                Some(found) => Err(SourceError::Connect {
                    message: format!("topic {topic} unavailable: {:?}", found.error()),
                }),
                None => Err(SourceError::Connect {
                    message: format!("topic {topic} not found"),
                }),
            }
        })
        .await
        .map_err(|e| SourceError::Connect {
            message: e.to_string(),
        })??;

        consumer
            .subscribe(&[config.topic.as_str()])
            .map_err(connect_error)?;

        info!(
            brokers = %config.brokers,
            topic = %config.topic,
            group_id = %config.group_id,
            partitions,
            "Subscribed to topic"
        );

        Ok((
            Self {
                consumer: consumer.clone(),
            },
            KafkaCommitter { consumer },
        ))
    }
}

#[async_trait]
impl StreamSource for KafkaSource {
    async fn poll(&mut self, timeout: Duration) -> Result<Option<SourceMessage>, SourceError> {
        match tokio::time::timeout(timeout, self.consumer.recv()).await {
            Err(_) => Ok(None),
            Ok(Err(err)) => Err(SourceError::Poll {
                message: err.to_string(),
            }),
            Ok(Ok(message)) => Ok(Some(SourceMessage {
                topic: message.topic().to_string(),
                partition: message.partition(),
                offset: message.offset(),
                payload: message.payload().map(<[u8]>::to_vec),
            })),
        }
    }

    async fn close(&mut self) {
        self.consumer.unsubscribe();
        debug!("Consumer unsubscribed");
    }
}

#[async_trait]
impl OffsetCommitter for KafkaCommitter {
    async fn commit(&self, point: &CommitPoint) -> Result<(), SourceError> {
        let mut partitions = TopicPartitionList::new();
        for (topic, partition, next) in point.iter() {
            partitions
                .add_partition_offset(topic, partition, Offset::Offset(next))
                .map_err(|e| SourceError::Commit {
                    message: e.to_string(),
                })?;
        }

        let consumer = self.consumer.clone();
        tokio::task::spawn_blocking(move || consumer.commit(&partitions, CommitMode::Sync))
            .await
            .map_err(|e| SourceError::Commit {
                message: e.to_string(),
            })?
            .map_err(|e| SourceError::Commit {
                message: e.to_string(),
            })
    }
}

/// Publishes generated events to a topic.
pub struct KafkaProducer {
    producer: FutureProducer,
    topic: String,
}

impl KafkaProducer {
    pub fn connect(config: &SourceConfig) -> Result<Self, SourceError> {
        let producer: FutureProducer = client_config(config)
            .set("message.timeout.ms", "10000")
            .create()
            .map_err(connect_error)?;
        Ok(Self {
            producer,
            topic: config.topic.clone(),
        })
    }

    /// Send one message and wait for delivery.
    pub async fn send(&self, key: &str, payload: &[u8]) -> Result<(), SourceError> {
        let record = FutureRecord::to(&self.topic).key(key).payload(payload);
        self.producer
            .send(record, Timeout::After(Duration::from_secs(10)))
            .await
            .map(|_| ())
            .map_err(|(err, _)| SourceError::Produce {
                message: err.to_string(),
            })
    }

    /// Wait for in-flight messages.
    pub fn flush(&self, timeout: Duration) -> Result<(), SourceError> {
        self.producer
            .flush(Timeout::After(timeout))
            .map_err(|e| SourceError::Produce {
                message: e.to_string(),
            })
    }
}
