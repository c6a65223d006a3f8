//! Invalidation message carried by the transport.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use recall_core::MutationDescriptor;

/// A mutation descriptor wrapped for transport.
///
/// The id gives receivers an idempotency handle under at-least-once
/// delivery; applying the same message twice must be harmless regardless,
/// since local invalidation is idempotent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvalidationMessage {
    /// Unique identifier for idempotency.
    pub id: Uuid,
    /// The mutation to apply on every instance.
    pub descriptor: MutationDescriptor,
    /// When the originating instance issued the message.
    pub issued_at: DateTime<Utc>,
}

impl InvalidationMessage {
    /// Wrap a descriptor for transport.
    pub fn new(descriptor: MutationDescriptor) -> Self {
        Self {
            id: Uuid::new_v4(),
            descriptor,
            issued_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_serde_roundtrip() {
        let message =
            InvalidationMessage::new(MutationDescriptor::updated("contact", Uuid::new_v4()));

        let json = serde_json::to_string(&message).unwrap();
        let parsed: InvalidationMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, message);
    }

    #[test]
    fn test_messages_get_distinct_ids() {
        let descriptor = MutationDescriptor::updated("contact", Uuid::new_v4());
        let a = InvalidationMessage::new(descriptor.clone());
        let b = InvalidationMessage::new(descriptor);
        assert_ne!(a.id, b.id);
    }
}
