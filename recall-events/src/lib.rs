//! RECALL Events - Distributed Invalidation
//!
//! This crate defines the contract for fanning a local invalidation decision
//! out to other cache instances, without providing a production transport.
//!
//! # Architecture
//!
//! A mutation produces one [`recall_core::MutationDescriptor`]. The
//! [`InvalidationPublisher`] always applies it locally first, so the
//! originating instance never serves stale data longer than necessary, then
//! serializes the same descriptor onto the transport. Every receiving
//! instance applies it through the identical local invalidation routine.
//!
//! ```text
//! mutation → publisher → local invalidator
//!                      → transport → instance B → local invalidator
//!                                  → instance C → local invalidator
//! ```
//!
//! Delivery is at-least-once with no ordering guarantee; local invalidation
//! is idempotent so duplicate delivery is harmless.
//!
//! # Traits
//!
//! - [`InvalidationTransport`]: fire-and-forget and acknowledged sends
//! - [`LocalInvalidator`]: the seam the cache engine implements

mod in_memory;
mod message;
mod publisher;
mod transport;

pub use in_memory::InMemoryTransport;
pub use message::InvalidationMessage;
pub use publisher::{DeliveryMode, InvalidationPublisher};
pub use transport::{InvalidationTransport, LocalInvalidator};

// Re-export core types for convenience
pub use recall_core::{Change, GlobalSignal, MutationDescriptor};
