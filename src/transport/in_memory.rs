use super::{InboundMessage, PendingReplies, ReplyAddress, Subscription, Transport, SUBSCRIPTION_BUFFER};
use crate::{BookingError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct PublishedMessage {
    pub subject: String,
    pub payload: Vec<u8>,
}

struct Inner {
    subscribers: DashMap<String, Vec<mpsc::Sender<InboundMessage>>>,
    pending: PendingReplies,
    published: Mutex<Vec<PublishedMessage>>,
    next_responder: AtomicUsize,
    closed: AtomicBool,
}

/// Process-local broker. Published messages fan out to every subscriber of
/// the subject; requests go to one subscriber, round robin, like a queue
/// group.
#[derive(Clone)]
pub struct InMemoryTransport {
    inner: Arc<Inner>,
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                subscribers: DashMap::new(),
                pending: PendingReplies::new(),
                published: Mutex::new(Vec::new()),
                next_responder: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Everything published (not requested) on `subject`, oldest first.
    pub fn published(&self, subject: &str) -> Vec<Vec<u8>> {
        self.inner
            .published
            .lock()
            .map(|log| {
                log.iter()
                    .filter(|m| m.subject == subject)
                    .map(|m| m.payload.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn pending_requests(&self) -> usize {
        self.inner.pending.len()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(BookingError::Transport("transport closed".to_string()));
        }
        Ok(())
    }

    fn live_subscribers(&self, subject: &str) -> Vec<mpsc::Sender<InboundMessage>> {
        match self.inner.subscribers.get_mut(subject) {
            Some(mut senders) => {
                senders.retain(|s| !s.is_closed());
                senders.clone()
            }
            None => Vec::new(),
        }
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<()> {
        self.ensure_open()?;

        if let Ok(mut log) = self.inner.published.lock() {
            log.push(PublishedMessage {
                subject: subject.to_string(),
                payload: payload.clone(),
            });
        }

        for sender in self.live_subscribers(subject) {
            let message = InboundMessage {
                subject: subject.to_string(),
                payload: payload.clone(),
                reply_to: None,
            };
            if sender.send(message).await.is_err() {
                debug!("Subscriber for '{}' went away during publish", subject);
            }
        }

        Ok(())
    }

    async fn request(&self, subject: &str, payload: Vec<u8>, timeout: Duration) -> Result<Vec<u8>> {
        self.ensure_open()?;

        let subscribers = self.live_subscribers(subject);
        if subscribers.is_empty() {
            return Err(BookingError::Transport(format!("no responders for '{}'", subject)));
        }
        let index = self.inner.next_responder.fetch_add(1, Ordering::Relaxed) % subscribers.len();

        let correlation_id = Uuid::new_v4().to_string();
        let inbox = format!("_INBOX.{}", correlation_id);
        let receiver = self.inner.pending.register(&correlation_id);

        let message = InboundMessage {
            subject: subject.to_string(),
            payload,
            reply_to: Some(ReplyAddress::new(inbox, correlation_id.clone())),
        };

        if subscribers[index].send(message).await.is_err() {
            self.inner.pending.abandon(&correlation_id);
            return Err(BookingError::Transport(format!("responder for '{}' went away", subject)));
        }

        self.inner.pending.wait(&correlation_id, receiver, subject, timeout).await
    }

    async fn subscribe(&self, subject: &str) -> Result<Subscription> {
        self.ensure_open()?;

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        self.inner
            .subscribers
            .entry(subject.to_string())
            .or_default()
            .push(tx);

        debug!("Subscribed to subject: {}", subject);
        Ok(Subscription::new(subject, rx))
    }

    async fn reply(&self, address: ReplyAddress, payload: Vec<u8>) -> Result<()> {
        self.ensure_open()?;

        if !self.inner.pending.resolve(&address.correlation_id, payload) {
            warn!("Requester for {} is gone, reply discarded", address.subject);
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.inner.subscribers.clear();
        self.inner.pending.clear();
        Ok(())
    }

    fn name(&self) -> &str {
        "in-memory-transport"
    }
}
