//! RECALL Core - Entity Service Data Types
//!
//! Pure data structures shared by every RECALL crate: the entity model, the
//! closed request/response sums, query expressions, mutation descriptors,
//! and error types. No I/O and no business logic live here.
//!
//! # Architecture
//!
//! RECALL caches results from a remote entity data service. Requests against
//! that service are modeled as one closed sum type ([`Request`]) that may be
//! wrapped in decorator layers ([`Envelope`]) carrying caching flags. The
//! cache engine in `recall-cache` matches exhaustively over these sums, so
//! adding a request kind without teaching the dependency calculator about it
//! is a compile error rather than a silent staleness bug.

pub mod classify;
pub mod entities;
pub mod error;
pub mod mutation;
pub mod query;
pub mod request;
pub mod response;

pub use classify::{OperationClass, classify, is_cacheable, is_metadata_read};
pub use entities::{
    ACTIVITY_ENTITY, ACTIVITY_ID_ATTRIBUTE, AliasedValue, AttributeValue, Entity,
    EntityCollection, EntityId, EntityReference,
};
pub use error::{
    BackendError, ConfigError, RecallError, RecallResult, RequestError, StoreError,
    TransportError,
};
pub use mutation::{Change, GlobalSignal, MutationDescriptor};
pub use query::{
    AttributeQuery, ColumnSet, FilterExpr, FilterOperator, LinkEntity, Query, QueryExpression,
    parse_raw,
};
pub use request::{
    Envelope, MAX_WRAP_DEPTH, Relationship, RelationshipQuery, RelationshipRole, Request,
    RequestFlags,
};
pub use response::Response;

use uuid::Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Identifier for a logical caller session.
///
/// Sessions drive stale-read fairness: the session that dirtied an entry
/// must never be served its own stale write.
pub type SessionId = Uuid;

/// Generate a new random session identifier.
pub fn new_session_id() -> SessionId {
    Uuid::new_v4()
}
