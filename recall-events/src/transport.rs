//! Transport and local-invalidation seams.

use async_trait::async_trait;

use recall_core::{MutationDescriptor, RecallResult, TransportError};

use crate::message::InvalidationMessage;

/// Asynchronous, at-least-once message transport for cross-instance
/// invalidation.
///
/// No ordering is guaranteed across instances. Implementations must tolerate
/// redelivery; receivers apply messages through an idempotent routine.
#[async_trait]
pub trait InvalidationTransport: Send + Sync {
    /// Fire-and-forget send. Delivery time bounds the cross-instance
    /// staleness window.
    async fn send(&self, message: &InvalidationMessage) -> Result<(), TransportError>;

    /// Send and block until all known instances acknowledge.
    ///
    /// Guarantees cross-instance consistency at the cost of mutation
    /// latency. Partial acknowledgement is an error.
    async fn send_acknowledged(&self, message: &InvalidationMessage)
        -> Result<(), TransportError>;
}

/// The seam through which received descriptors reach a cache instance.
///
/// Implemented by the cache engine; both the originating instance and every
/// receiver run descriptors through the same routine.
#[async_trait]
pub trait LocalInvalidator: Send + Sync {
    /// Apply a mutation descriptor to this instance's cache.
    async fn apply(&self, descriptor: &MutationDescriptor) -> RecallResult<()>;
}
