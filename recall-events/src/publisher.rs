//! Invalidation publisher: local-first fan-out of mutation descriptors.

use std::sync::Arc;

use tracing::{debug, warn};

use recall_core::{MutationDescriptor, RecallResult};

use crate::message::InvalidationMessage;
use crate::transport::{InvalidationTransport, LocalInvalidator};

/// How the publisher hands messages to the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryMode {
    /// Block until all known instances acknowledge. Transport failures
    /// surface to the caller since the mutation's durability guarantee is
    /// reduced.
    Synchronous,
    /// Fire-and-forget. Lower mutation latency; cross-instance staleness is
    /// bounded only by the transport's delivery time. Failures are logged
    /// and swallowed since local invalidation has already occurred.
    #[default]
    Asynchronous,
}

/// Fans a local invalidation decision out to the local cache and, through
/// the transport, to other instances.
pub struct InvalidationPublisher<T, L> {
    transport: Arc<T>,
    local: Arc<L>,
    mode: DeliveryMode,
}

impl<T, L> InvalidationPublisher<T, L>
where
    T: InvalidationTransport + 'static,
    L: LocalInvalidator,
{
    /// Create a publisher with the given delivery mode.
    pub fn new(transport: Arc<T>, local: Arc<L>, mode: DeliveryMode) -> Self {
        Self {
            transport,
            local,
            mode,
        }
    }

    /// The configured delivery mode.
    pub fn mode(&self) -> DeliveryMode {
        self.mode
    }

    /// Publish a mutation: apply locally first, then send to other instances.
    ///
    /// Local application always precedes the send, so the originating
    /// instance never serves stale data while the message is in flight.
    pub async fn publish(&self, descriptor: MutationDescriptor) -> RecallResult<()> {
        self.local.apply(&descriptor).await?;

        let message = InvalidationMessage::new(descriptor);
        debug!(message_id = %message.id, mode = ?self.mode, "Publishing invalidation");

        match self.mode {
            DeliveryMode::Synchronous => {
                self.transport.send_acknowledged(&message).await?;
                Ok(())
            }
            DeliveryMode::Asynchronous => {
                let transport = Arc::clone(&self.transport);
                tokio::spawn(async move {
                    if let Err(error) = transport.send(&message).await {
                        warn!(
                            message_id = %message.id,
                            %error,
                            "Asynchronous invalidation publish failed"
                        );
                    }
                });
                Ok(())
            }
        }
    }
}
