// Per-workflow streaming topic clients.
//
// One topic per workflow; the partition key is the producing task's name, so
// records from one task are delivered in production order. Consumers always
// read from the earliest offset under a throwaway group id: the topic is the
// source of truth, not consumer offsets.

use std::time::Duration;

use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::ClientConfig;
use rdkafka::Message;
use uuid::Uuid;

use maestro_core::config::Settings;
use maestro_core::error::{MaestroError, Result};

const SEND_TIMEOUT: Duration = Duration::from_secs(30);

/// One record read off a workflow topic.
#[derive(Debug, Clone)]
pub struct TopicRecord {
    /// Producing task name, utf-8 bytes.
    pub key: Vec<u8>,
    pub payload: Vec<u8>,
}

pub struct TopicProducer {
    producer: FutureProducer,
}

impl TopicProducer {
    pub fn new(settings: &Settings) -> Result<Self> {
        let producer = ClientConfig::new()
            .set("bootstrap.servers", settings.kafka_conn())
            .set("message.timeout.ms", "30000")
            .create()
            .map_err(MaestroError::bus)?;
        Ok(Self { producer })
    }

    /// Publish one record keyed by the producing task name.
    pub async fn send(&self, topic: &str, key: &[u8], payload: &[u8]) -> Result<()> {
        let record = FutureRecord::to(topic).key(key).payload(payload);
        self.producer
            .send(record, SEND_TIMEOUT)
            .await
            .map_err(|(err, _)| MaestroError::bus(err))?;
        Ok(())
    }

    /// Publish one record without a partition key, for auxiliary topics.
    pub async fn send_unkeyed(&self, topic: &str, payload: &[u8]) -> Result<()> {
        let record = FutureRecord::<(), _>::to(topic).payload(payload);
        self.producer
            .send(record, SEND_TIMEOUT)
            .await
            .map_err(|(err, _)| MaestroError::bus(err))?;
        Ok(())
    }
}

pub struct TopicConsumer {
    consumer: StreamConsumer,
}

impl TopicConsumer {
    /// Subscribe to a topic from the earliest offset.
    pub fn new(settings: &Settings, topic: &str) -> Result<Self> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", settings.kafka_conn())
            .set("group.id", format!("maestro-{}", Uuid::new_v4().simple()))
            .set("auto.offset.reset", "earliest")
            .set("enable.auto.commit", "false")
            .create()
            .map_err(MaestroError::bus)?;
        consumer.subscribe(&[topic]).map_err(MaestroError::bus)?;
        Ok(Self { consumer })
    }

    /// Wait for the next record.
    pub async fn recv(&self) -> Result<TopicRecord> {
        let message = self.consumer.recv().await.map_err(MaestroError::bus)?;
        Ok(TopicRecord {
            key: message.key().unwrap_or_default().to_vec(),
            payload: message.payload().unwrap_or_default().to_vec(),
        })
    }

    /// Wait for the next record, giving up after `timeout`.
    pub async fn recv_timeout(&self, timeout: Duration) -> Result<Option<TopicRecord>> {
        match tokio::time::timeout(timeout, self.recv()).await {
            Ok(record) => record.map(Some),
            Err(_) => Ok(None),
        }
    }
}
