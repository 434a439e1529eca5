//! Subject-addressed publish/subscribe with correlated request/reply.
//!
//! Both the gateway and the reservation service talk to the broker only
//! through [`Transport`]; the Kafka and in-memory implementations are
//! interchangeable.

pub mod in_memory;
pub mod pending;

pub use in_memory::*;
pub use pending::*;

use crate::Result;
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;

/// Where the answer to one inbound request must go.
///
/// Deliberately not `Clone`: [`Transport::reply`] consumes it, so a request
/// can be answered at most once.
#[derive(Debug, PartialEq, Eq)]
pub struct ReplyAddress {
    pub subject: String,
    pub correlation_id: String,
    /// Broker position of the request, acknowledged once the reply is sent.
    pub delivery: Option<Delivery>,
}

impl ReplyAddress {
    pub fn new(subject: impl Into<String>, correlation_id: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            correlation_id: correlation_id.into(),
            delivery: None,
        }
    }

    pub fn with_delivery(mut self, delivery: Delivery) -> Self {
        self.delivery = Some(delivery);
        self
    }
}

/// Where a request sat in the log of the subscription that received it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub subscription_id: u64,
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

#[derive(Debug)]
pub struct InboundMessage {
    pub subject: String,
    pub payload: Vec<u8>,
    pub reply_to: Option<ReplyAddress>,
}

/// Stream of inbound messages for one subject. Ends when the transport is
/// closed.
pub struct Subscription {
    subject: String,
    receiver: mpsc::Receiver<InboundMessage>,
}

impl Subscription {
    pub fn new(subject: &str, receiver: mpsc::Receiver<InboundMessage>) -> Self {
        Self {
            subject: subject.to_string(),
            receiver,
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub async fn next(&mut self) -> Option<InboundMessage> {
        self.receiver.recv().await
    }

    /// Stop accepting new messages. Those already buffered are still yielded
    /// by [`next`](Self::next), after which it returns `None`.
    pub fn close(&mut self) {
        self.receiver.close();
    }
}

pub const SUBSCRIPTION_BUFFER: usize = 1024;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Fire-and-forget, at-most-once.
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<()>;

    /// Send `payload` and wait for exactly one correlated reply.
    async fn request(&self, subject: &str, payload: Vec<u8>, timeout: Duration) -> Result<Vec<u8>>;

    async fn subscribe(&self, subject: &str) -> Result<Subscription>;

    async fn reply(&self, address: ReplyAddress, payload: Vec<u8>) -> Result<()>;

    /// Release the connection. Outstanding requests fail and subscriptions end.
    async fn close(&self) -> Result<()>;

    fn name(&self) -> &str;
}
