//! RECALL Cache - Dependency-Aware Read-Through Cache Engine
//!
//! Sits in front of a remote entity data service and serves reads from a
//! keyed store while tracking, per entry, exactly which entity types,
//! records, and tags the cached result depends on. Mutations resolve to
//! those same dependency keys, so invalidation touches only the entries a
//! change can actually affect.
//!
//! Module map:
//! - [`dependency`]: pure extraction of dependency keys from requests,
//!   responses, and mutations
//! - [`key`]: deterministic cache key construction
//! - [`entry`]: entries and the Current/Dirty/BeingProcessed state machine
//! - [`store`]: the [`ObjectStore`] seam plus an in-memory implementation
//! - [`orchestrator`]: the read-through path with stale-while-revalidate
//! - [`invalidation`]: routing mutations to the entries they disturb
//! - [`config`]: runtime options

pub mod config;
pub mod dependency;
pub mod entry;
pub mod invalidation;
pub mod key;
pub mod orchestrator;
pub mod store;

pub use config::{CacheOptions, DEFAULT_KEY_PREFIX, DEFAULT_LOCK_TIMEOUT, DEFAULT_REFRESH_LEASE};
pub use dependency::{
    DependencyCalculator, DependencyKey, MAX_ENTITY_DEPTH, TAG_FETCH, TAG_METADATA,
    TAG_SINGLE_RESULT,
};
pub use entry::{CacheEntry, EntryStatus, InsertTelemetry};
pub use invalidation::{SAVED_VIEW_ENTITY, SYSTEM_FORM_ENTITY};
pub use key::CacheKeyBuilder;
pub use orchestrator::{Backend, CallContext, ServiceCache};
pub use store::{MemoryStore, ObjectStore, Region};
