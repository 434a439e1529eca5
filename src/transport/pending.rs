use crate::{BookingError, Result};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::debug;

/// Requests waiting for their reply, keyed by correlation id.
#[derive(Clone, Default)]
pub struct PendingReplies {
    waiters: Arc<DashMap<String, oneshot::Sender<Vec<u8>>>>,
}

impl PendingReplies {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, correlation_id: &str) -> oneshot::Receiver<Vec<u8>> {
        let (tx, rx) = oneshot::channel();
        self.waiters.insert(correlation_id.to_string(), tx);
        rx
    }

    /// Hand a reply to its waiter. Returns `false` when nobody is waiting any
    /// more (timed out or never registered); the payload is dropped.
    pub fn resolve(&self, correlation_id: &str, payload: Vec<u8>) -> bool {
        match self.waiters.remove(correlation_id) {
            Some((_, waiter)) => waiter.send(payload).is_ok(),
            None => {
                debug!("Discarding reply for unknown correlation id {}", correlation_id);
                false
            }
        }
    }

    pub fn abandon(&self, correlation_id: &str) {
        self.waiters.remove(correlation_id);
    }

    pub async fn wait(
        &self,
        correlation_id: &str,
        receiver: oneshot::Receiver<Vec<u8>>,
        subject: &str,
        timeout: Duration,
    ) -> Result<Vec<u8>> {
        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(payload)) => Ok(payload),
            Ok(Err(_)) => Err(BookingError::Transport(format!(
                "reply channel for '{}' closed before a reply arrived",
                subject
            ))),
            Err(_) => {
                self.abandon(correlation_id);
                Err(BookingError::Timeout {
                    subject: subject.to_string(),
                    timeout_ms: timeout.as_millis(),
                })
            }
        }
    }

    /// Drop every waiter; their calls fail with a transport error.
    pub fn clear(&self) {
        self.waiters.clear();
    }

    pub fn len(&self) -> usize {
        self.waiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }
}
