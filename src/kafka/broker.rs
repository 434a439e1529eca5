use super::{KafkaConsumer, KafkaMessage, KafkaProducer};
use crate::{
    BookingError, Delivery, InboundMessage, PendingReplies, ReplyAddress, ReplyHeaders, Result, ServiceConfig,
    Subscription, Transport, SUBSCRIPTION_BUFFER,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Kafka-backed transport. Subjects are topics. Requests carry
/// `correlation_id` and `reply_to` headers; replies land on one shared reply
/// topic that every requesting process reads with its own consumer group and
/// matches against its pending map.
///
/// A request's offset is committed only after its reply has been produced;
/// other messages are committed once handed to the subscriber.
pub struct KafkaTransport {
    config: ServiceConfig,
    producer: KafkaProducer,
    pending: PendingReplies,
    reply_listener: Mutex<Option<JoinHandle<()>>>,
    subscriptions: Mutex<HashMap<u64, SubscriptionPump>>,
    next_subscription: AtomicU64,
    closed: AtomicBool,
}

struct SubscriptionPump {
    consumer: Arc<KafkaConsumer>,
    task: JoinHandle<()>,
}

impl KafkaTransport {
    pub fn connect(config: &ServiceConfig) -> Result<Self> {
        info!("Connecting to Kafka at {}", config.kafka.bootstrap_servers);
        let producer = KafkaProducer::new(config.to_producer_config())?;

        Ok(Self {
            config: config.clone(),
            producer,
            pending: PendingReplies::new(),
            reply_listener: Mutex::new(None),
            subscriptions: Mutex::new(HashMap::new()),
            next_subscription: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        })
    }

    /// Start reading the reply topic. Called eagerly by requesters at
    /// startup so the consumer is assigned before the first reply is due.
    pub fn start_reply_listener(&self) -> Result<()> {
        let mut listener = self
            .reply_listener
            .lock()
            .map_err(|_| BookingError::Transport("reply listener lock poisoned".to_string()))?;

        if listener.is_some() {
            return Ok(());
        }

        let group_id = format!("{}-replies-{}", self.config.application_id, Uuid::new_v4());
        let consumer = KafkaConsumer::new(self.config.to_consumer_config(&group_id, "latest"))?;
        consumer.subscribe(&[self.config.booking.reply_topic.as_str()])?;

        let pending = self.pending.clone();
        let reply_topic = self.config.booking.reply_topic.clone();
        info!("Listening for replies on {} (group {})", reply_topic, group_id);

        *listener = Some(tokio::spawn(async move {
            loop {
                match consumer.recv_message(POLL_INTERVAL).await {
                    Ok(Some(message)) => {
                        match (message.header(ReplyHeaders::CORRELATION_ID), message.payload.clone()) {
                            (Some(correlation_id), Some(payload)) => {
                                pending.resolve(correlation_id, payload);
                            }
                            _ => debug!("Ignoring uncorrelated message on {}", reply_topic),
                        }
                    }
                    Ok(None) => continue,
                    Err(e) => {
                        error!("Error receiving reply: {}", e);
                        tokio::time::sleep(ERROR_BACKOFF).await;
                    }
                }
            }
        }));

        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BookingError::Transport("transport closed".to_string()));
        }
        Ok(())
    }

    fn inbound_from(message: KafkaMessage, subscription_id: u64) -> InboundMessage {
        let reply_to = match (
            message.header(ReplyHeaders::REPLY_TO),
            message.header(ReplyHeaders::CORRELATION_ID),
        ) {
            (Some(subject), Some(correlation_id)) => Some(
                ReplyAddress::new(subject, correlation_id).with_delivery(Delivery {
                    subscription_id,
                    topic: message.topic.clone(),
                    partition: message.partition,
                    offset: message.offset,
                }),
            ),
            _ => None,
        };

        InboundMessage {
            subject: message.topic,
            payload: message.payload.unwrap_or_default(),
            reply_to,
        }
    }

    fn acknowledge(&self, delivery: &Delivery) {
        let consumer = match self.subscriptions.lock() {
            Ok(subscriptions) => subscriptions
                .get(&delivery.subscription_id)
                .map(|pump| Arc::clone(&pump.consumer)),
            Err(_) => None,
        };

        match consumer {
            Some(consumer) => {
                if let Err(e) = consumer.commit_offset(&delivery.topic, delivery.partition, delivery.offset) {
                    warn!("Error committing {}@{} on {}: {}", delivery.offset, delivery.partition, delivery.topic, e);
                }
            }
            None => debug!("Subscription for {} is gone, offset {} left uncommitted", delivery.topic, delivery.offset),
        }
    }
}

#[async_trait]
impl Transport for KafkaTransport {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<()> {
        self.ensure_open()?;
        self.producer.send(subject, None, &payload, &[]).await?;
        debug!("Published message to subject: {}", subject);
        Ok(())
    }

    async fn request(&self, subject: &str, payload: Vec<u8>, timeout: Duration) -> Result<Vec<u8>> {
        self.ensure_open()?;
        self.start_reply_listener()?;

        let correlation_id = Uuid::new_v4().to_string();
        let receiver = self.pending.register(&correlation_id);

        let headers = [
            (ReplyHeaders::CORRELATION_ID, correlation_id.as_str()),
            (ReplyHeaders::REPLY_TO, self.config.booking.reply_topic.as_str()),
        ];

        if let Err(e) = self
            .producer
            .send(subject, Some(&correlation_id), &payload, &headers)
            .await
        {
            self.pending.abandon(&correlation_id);
            return Err(e);
        }

        self.pending.wait(&correlation_id, receiver, subject, timeout).await
    }

    async fn subscribe(&self, subject: &str) -> Result<Subscription> {
        self.ensure_open()?;

        let consumer = Arc::new(KafkaConsumer::new(
            self.config.to_consumer_config(&self.config.application_id, "earliest"),
        )?);
        consumer.subscribe(&[subject])?;

        let subscription_id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let topic = subject.to_string();
        let pump_consumer = Arc::clone(&consumer);

        let task = tokio::spawn(async move {
            loop {
                match pump_consumer.recv_message(POLL_INTERVAL).await {
                    Ok(Some(message)) => {
                        let commit_ref = message.clone();
                        let inbound = Self::inbound_from(message, subscription_id);
                        let awaits_reply = inbound.reply_to.is_some();

                        if tx.send(inbound).await.is_err() {
                            debug!("Subscription to {} dropped, stopping consumer", topic);
                            break;
                        }

                        // Requests are committed by `reply`.
                        if !awaits_reply {
                            if let Err(e) = pump_consumer.commit_message(&commit_ref) {
                                warn!("Error committing message on {}: {}", topic, e);
                            }
                        }
                    }
                    Ok(None) => continue,
                    Err(e) => {
                        error!("Error receiving message on {}: {}", topic, e);
                        tokio::time::sleep(ERROR_BACKOFF).await;
                    }
                }
            }
        });

        self.subscriptions
            .lock()
            .map_err(|_| BookingError::Transport("subscription registry poisoned".to_string()))?
            .insert(subscription_id, SubscriptionPump { consumer, task });

        info!("Subscribed to subject: {}", subject);
        Ok(Subscription::new(subject, rx))
    }

    async fn reply(&self, address: ReplyAddress, payload: Vec<u8>) -> Result<()> {
        self.ensure_open()?;

        let headers = [(ReplyHeaders::CORRELATION_ID, address.correlation_id.as_str())];
        self.producer
            .send(&address.subject, Some(&address.correlation_id), &payload, &headers)
            .await?;

        if let Some(delivery) = &address.delivery {
            self.acknowledge(delivery);
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        info!("Closing Kafka transport...");

        if let Ok(mut listener) = self.reply_listener.lock() {
            if let Some(handle) = listener.take() {
                handle.abort();
            }
        }

        if let Ok(mut subscriptions) = self.subscriptions.lock() {
            for (_, pump) in subscriptions.drain() {
                pump.task.abort();
            }
        }

        self.pending.clear();
        self.producer.flush(Duration::from_secs(10)).await?;

        info!("Kafka transport closed");
        Ok(())
    }

    fn name(&self) -> &str {
        "kafka-transport"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(headers: &[(&str, &str)]) -> KafkaMessage {
        KafkaMessage {
            topic: "booking.reserve".to_string(),
            partition: 2,
            offset: 41,
            key: None,
            payload: Some(b"{}".to_vec()),
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn requests_carry_their_log_position_for_acknowledgement() {
        let inbound = KafkaTransport::inbound_from(
            message(&[
                (ReplyHeaders::CORRELATION_ID, "c-1"),
                (ReplyHeaders::REPLY_TO, "booking.reserve.replies"),
            ]),
            7,
        );

        let reply_to = inbound.reply_to.unwrap();
        assert_eq!(reply_to.subject, "booking.reserve.replies");
        assert_eq!(reply_to.correlation_id, "c-1");
        assert_eq!(
            reply_to.delivery,
            Some(Delivery {
                subscription_id: 7,
                topic: "booking.reserve".to_string(),
                partition: 2,
                offset: 41,
            })
        );
    }

    #[test]
    fn plain_messages_have_no_reply_address() {
        let inbound = KafkaTransport::inbound_from(message(&[]), 0);

        assert!(inbound.reply_to.is_none());
        assert_eq!(inbound.payload, b"{}".to_vec());
    }
}
