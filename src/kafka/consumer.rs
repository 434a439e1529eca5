use crate::{BookingError, Result};
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::Headers;
use rdkafka::{ClientConfig, Message, TopicPartitionList};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::timeout;

pub struct KafkaConsumer {
    consumer: StreamConsumer,
}

impl KafkaConsumer {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let consumer: StreamConsumer = config.create()?;
        Ok(Self { consumer })
    }

    pub fn subscribe(&self, topics: &[&str]) -> Result<()> {
        self.consumer.subscribe(topics)?;
        Ok(())
    }

    pub async fn recv_message(&self, timeout_duration: Duration) -> Result<Option<KafkaMessage>> {
        match timeout(timeout_duration, self.consumer.recv()).await {
            Ok(Ok(message)) => {
                let key = message.key()
                    .map(|k| String::from_utf8_lossy(k).to_string());

                let payload = message.payload().map(|p| p.to_vec());

                let headers = message
                    .headers()
                    .map(|headers| {
                        headers
                            .iter()
                            .filter_map(|header| {
                                header.value.map(|value| {
                                    (header.key.to_string(), String::from_utf8_lossy(value).to_string())
                                })
                            })
                            .collect()
                    })
                    .unwrap_or_default();

                Ok(Some(KafkaMessage {
                    topic: message.topic().to_string(),
                    partition: message.partition(),
                    offset: message.offset(),
                    key,
                    payload,
                    headers,
                }))
            }
            Ok(Err(e)) => Err(BookingError::Kafka(e)),
            Err(_) => Ok(None), // Timeout
        }
    }

    pub fn commit_message(&self, message: &KafkaMessage) -> Result<()> {
        self.commit_offset(&message.topic, message.partition, message.offset)
    }

    /// Commit past `offset`, marking it and everything before it consumed.
    pub fn commit_offset(&self, topic: &str, partition: i32, offset: i64) -> Result<()> {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(topic, partition, rdkafka::Offset::Offset(offset + 1))?;
        self.consumer.commit(&tpl, rdkafka::consumer::CommitMode::Async)?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct KafkaMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub payload: Option<Vec<u8>>,
    pub headers: HashMap<String, String>,
}

impl KafkaMessage {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}
