//! In-memory transport for tests and single-host deployments.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use recall_core::TransportError;

use crate::message::InvalidationMessage;
use crate::transport::{InvalidationTransport, LocalInvalidator};

/// Loopback transport delivering messages to registered subscribers.
///
/// Used in tests as a stand-in for a real message bus. Sent messages are
/// recorded so tests can assert on the wire traffic, and `deliver_again`
/// simulates at-least-once redelivery.
#[derive(Default)]
pub struct InMemoryTransport {
    subscribers: RwLock<Vec<Arc<dyn LocalInvalidator>>>,
    sent: Mutex<Vec<InvalidationMessage>>,
}

impl InMemoryTransport {
    /// Create a transport with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a receiving instance.
    pub async fn subscribe(&self, subscriber: Arc<dyn LocalInvalidator>) {
        self.subscribers.write().await.push(subscriber);
    }

    /// Messages sent so far, in send order.
    pub async fn sent(&self) -> Vec<InvalidationMessage> {
        self.sent.lock().await.clone()
    }

    /// Redeliver an already-sent message to every subscriber.
    ///
    /// Simulates the transport's at-least-once guarantee; receivers must
    /// tolerate this.
    pub async fn deliver_again(&self, message: &InvalidationMessage) -> Result<(), TransportError> {
        self.deliver(message).await.map(|_| ())
    }

    async fn deliver(&self, message: &InvalidationMessage) -> Result<usize, TransportError> {
        let subscribers = self.subscribers.read().await;
        let mut delivered = 0;
        for subscriber in subscribers.iter() {
            subscriber
                .apply(&message.descriptor)
                .await
                .map_err(|e| TransportError::SendFailed {
                    message_id: message.id,
                    reason: e.to_string(),
                })?;
            delivered += 1;
        }
        Ok(delivered)
    }
}

#[async_trait]
impl InvalidationTransport for InMemoryTransport {
    async fn send(&self, message: &InvalidationMessage) -> Result<(), TransportError> {
        self.sent.lock().await.push(message.clone());
        let delivered = self.deliver(message).await?;
        debug!(message_id = %message.id, delivered, "In-memory transport delivered");
        Ok(())
    }

    async fn send_acknowledged(
        &self,
        message: &InvalidationMessage,
    ) -> Result<(), TransportError> {
        self.sent.lock().await.push(message.clone());
        let expected = self.subscribers.read().await.len();
        let received = self.deliver(message).await?;
        if received < expected {
            return Err(TransportError::NotAcknowledged {
                message_id: message.id,
                expected,
                received,
            });
        }
        Ok(())
    }
}
