use crate::{BookingError, Result};
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::ClientConfig;
use std::time::Duration;

#[derive(Clone)]
pub struct KafkaProducer {
    producer: FutureProducer,
}

impl KafkaProducer {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let producer: FutureProducer = config.create()?;
        Ok(Self { producer })
    }

    pub async fn send(
        &self,
        topic: &str,
        key: Option<&str>,
        payload: &[u8],
        headers: &[(&str, &str)],
    ) -> Result<()> {
        let mut record = FutureRecord::<str, [u8]>::to(topic).payload(payload);

        if let Some(key) = key {
            record = record.key(key);
        }

        if !headers.is_empty() {
            let owned = headers.iter().fold(OwnedHeaders::new(), |acc, (name, value)| {
                acc.insert(Header {
                    key: *name,
                    value: Some(*value),
                })
            });
            record = record.headers(owned);
        }

        self.producer
            .send(record, Duration::from_secs(10))
            .await
            .map_err(|(kafka_err, _)| BookingError::Kafka(kafka_err))?;

        Ok(())
    }

    pub async fn flush(&self, timeout: Duration) -> Result<()> {
        self.producer.flush(timeout)?;
        Ok(())
    }
}
