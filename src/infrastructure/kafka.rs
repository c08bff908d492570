//! rdkafka adapters: the acknowledged publisher used by the outbox relay and
//! the manually committed consumer loop.

use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use rdkafka::{Offset, TopicPartitionList};

use crate::application::consumer::EventDispatcher;
use crate::domain::errors::DomainError;
use crate::domain::ports::EventPublisher;

/// Pause after a failed receive before polling again.
const RECEIVE_RETRY_DELAY: Duration = Duration::from_secs(1);

impl From<KafkaError> for DomainError {
    fn from(e: KafkaError) -> Self {
        DomainError::Broker(e.to_string())
    }
}

pub struct KafkaPublisher {
    producer: FutureProducer,
    timeout: Duration,
}

impl KafkaPublisher {
    /// `timeout` bounds how long a send may wait for the leader's ack.
    pub fn new(brokers: &str, timeout: Duration) -> Result<Self, DomainError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("acks", "all")
            .set("enable.idempotence", "true")
            .set("message.timeout.ms", timeout.as_millis().to_string())
            .create()?;
        Ok(Self { producer, timeout })
    }
}

#[async_trait]
impl EventPublisher for KafkaPublisher {
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> Result<(), DomainError> {
        let record = FutureRecord::to(topic).key(key).payload(payload);
        let (partition, offset) = self
            .producer
            .send(record, Timeout::After(self.timeout))
            .await
            .map_err(|(e, _)| DomainError::from(e))?;
        debug!("Published to {topic} [{partition}] @ {offset} (key {key})");
        Ok(())
    }
}

/// A consumer in `group` subscribed to `topics`. Offsets are committed by
/// [`run_consumer`] only, after each message is settled.
pub fn subscribe(brokers: &str, group: &str, topics: &[&str]) -> Result<StreamConsumer, DomainError> {
    let consumer: StreamConsumer = ClientConfig::new()
        .set("bootstrap.servers", brokers)
        .set("group.id", group)
        .set("enable.auto.commit", "false")
        .set("auto.offset.reset", "earliest")
        .create()?;
    consumer.subscribe(topics)?;
    info!("Subscribed group {group} to {}", topics.join(", "));
    Ok(consumer)
}

/// Runs for the life of the process.
pub async fn run_consumer(consumer: StreamConsumer, dispatcher: EventDispatcher) {
    loop {
        let (topic, partition, offset, key, payload) = match consumer.recv().await {
            Ok(msg) => (
                msg.topic().to_string(),
                msg.partition(),
                msg.offset(),
                msg.key()
                    .map(|k| String::from_utf8_lossy(k).into_owned())
                    .unwrap_or_default(),
                msg.payload().unwrap_or_default().to_vec(),
            ),
            Err(e) => {
                warn!("Kafka receive failed: {e}");
                tokio::time::sleep(RECEIVE_RETRY_DELAY).await;
                continue;
            }
        };

        let disposition = dispatcher.dispatch(&topic, &key, &payload).await;
        debug!("{topic} [{partition}] @ {offset}: {disposition:?}");

        let mut position = TopicPartitionList::new();
        let committed = position
            .add_partition_offset(&topic, partition, Offset::Offset(offset + 1))
            .and_then(|()| consumer.commit(&position, CommitMode::Async));
        if let Err(e) = committed {
            // The message may be redelivered; handlers are idempotent.
            warn!("Could not commit {topic} [{partition}] @ {offset}: {e}");
        }
    }
}
