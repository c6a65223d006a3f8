//! Request model: the closed operation sum and its wrapper layers.
//!
//! A request against the entity service is exactly one terminal [`Request`]
//! kind, possibly wrapped in decorator layers ([`Envelope`]) that carry
//! caching flags. Wrapping is an explicit `inner` field rather than
//! inheritance, and unwrapping is a loop bounded by [`MAX_WRAP_DEPTH`] so
//! termination is checkable.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::entities::{AttributeValue, Entity, EntityReference};
use crate::error::RequestError;
use crate::query::{ColumnSet, Query, QueryExpression};
use crate::Timestamp;

/// Maximum number of wrapper layers an envelope may carry.
pub const MAX_WRAP_DEPTH: usize = 8;

/// Which side of a relationship the target plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelationshipRole {
    Referencing,
    Referenced,
}

/// A named relationship between entity types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    /// Schema name of the relationship.
    pub schema_name: String,
    /// Role the target plays, when the relationship is self-referential.
    pub role: Option<RelationshipRole>,
    /// For many-to-many relationships, the underlying intersect storage
    /// entity. Cached related-record queries are keyed against this type
    /// rather than the logical relationship name.
    pub intersect_entity: Option<String>,
}

impl Relationship {
    /// Create a one-to-many relationship.
    pub fn new(schema_name: impl Into<String>) -> Self {
        Self {
            schema_name: schema_name.into(),
            role: None,
            intersect_entity: None,
        }
    }

    /// Create a many-to-many relationship backed by an intersect entity.
    pub fn many_to_many(
        schema_name: impl Into<String>,
        intersect_entity: impl Into<String>,
    ) -> Self {
        Self {
            schema_name: schema_name.into(),
            role: None,
            intersect_entity: Some(intersect_entity.into()),
        }
    }
}

/// A related-records query attached to a retrieve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipQuery {
    /// The relationship being traversed.
    pub relationship: Relationship,
    /// The query run against the related type.
    pub query: QueryExpression,
}

/// The closed set of terminal operation kinds.
///
/// The dependency calculator and cache key builder match exhaustively over
/// this sum; a new kind added here without handling there fails to compile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Request {
    /// Create a new record.
    Create { entity: Entity },
    /// Retrieve one record by id.
    Retrieve {
        target: EntityReference,
        columns: ColumnSet,
    },
    /// Retrieve all records matching a query.
    RetrieveMultiple { query: Query },
    /// Retrieve a query result expected to contain at most one row.
    RetrieveSingle { query: Query },
    /// Retrieve one record together with a related-records query.
    RetrieveWithRelated {
        target: EntityReference,
        columns: ColumnSet,
        related: RelationshipQuery,
    },
    /// Update an existing record.
    Update { entity: Entity },
    /// Delete a record by id.
    Delete { target: EntityReference },
    /// Associate records through a relationship.
    Associate {
        target: EntityReference,
        relationship: Relationship,
        related: Vec<EntityReference>,
    },
    /// Disassociate records through a relationship.
    Disassociate {
        target: EntityReference,
        relationship: Relationship,
        related: Vec<EntityReference>,
    },
    /// A generic named request with loose parameters.
    Named {
        name: String,
        parameters: BTreeMap<String, AttributeValue>,
    },
}

impl Request {
    /// True for operations that read rather than mutate.
    ///
    /// Named requests count as reads only when they appear in the fixed
    /// metadata-read table; unknown named requests are treated as mutations
    /// so they are never cached.
    pub fn is_read(&self) -> bool {
        match self {
            Request::Retrieve { .. }
            | Request::RetrieveMultiple { .. }
            | Request::RetrieveSingle { .. }
            | Request::RetrieveWithRelated { .. } => true,
            Request::Named { name, .. } => crate::classify::is_metadata_read(name),
            Request::Create { .. }
            | Request::Update { .. }
            | Request::Delete { .. }
            | Request::Associate { .. }
            | Request::Disassociate { .. } => false,
        }
    }
}

/// Flags accumulated while unwrapping an envelope.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestFlags {
    /// Serving a stale value for this request is acceptable.
    pub allow_stale: bool,
    /// Skip the cache entirely for this request.
    pub bypass_cache: bool,
    /// Do not calculate or register dependencies on insert.
    pub skip_dependencies: bool,
    /// Explicit expiration for the resulting entry.
    pub expires: Option<Timestamp>,
    /// Caller-supplied cache key, used verbatim.
    pub explicit_key: Option<String>,
    /// The result is known to contain at most one row.
    pub single_result: bool,
    /// Caller identity for telemetry.
    pub caller: Option<String>,
}

/// A request with zero or more wrapper layers.
///
/// Each wrapper holds its inner envelope explicitly; there is no cycle to
/// chase and unwrapping always terminates within [`MAX_WRAP_DEPTH`] layers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Envelope {
    /// The terminal request with no further wrapping.
    Terminal(Request),
    /// Telemetry decoration recording the caller.
    Telemetry {
        inner: Box<Envelope>,
        caller: Option<String>,
    },
    /// Caller-supplied cache key plus per-request cache flags.
    ExplicitKey {
        inner: Box<Envelope>,
        key: String,
        allow_stale: bool,
        bypass_cache: bool,
        skip_dependencies: bool,
        expires: Option<Timestamp>,
    },
    /// Marks the result as expected to contain at most one row.
    SingleResult { inner: Box<Envelope> },
    /// Bulk-query decoration.
    Bulk {
        inner: Box<Envelope>,
        allow_stale: bool,
    },
}

impl Envelope {
    /// Wrap a terminal request with no decoration.
    pub fn terminal(request: Request) -> Self {
        Envelope::Terminal(request)
    }

    /// Wrap in a single-result marker.
    pub fn single_result(self) -> Self {
        Envelope::SingleResult {
            inner: Box::new(self),
        }
    }

    /// Wrap in a telemetry layer.
    pub fn with_caller(self, caller: impl Into<String>) -> Self {
        Envelope::Telemetry {
            inner: Box::new(self),
            caller: Some(caller.into()),
        }
    }

    /// Wrap in an explicit-key layer with default flags.
    pub fn with_explicit_key(self, key: impl Into<String>) -> Self {
        Envelope::ExplicitKey {
            inner: Box::new(self),
            key: key.into(),
            allow_stale: false,
            bypass_cache: false,
            skip_dependencies: false,
            expires: None,
        }
    }

    /// Unwrap to the terminal request, accumulating flags across layers.
    ///
    /// Returns an error when more than [`MAX_WRAP_DEPTH`] layers are
    /// traversed without reaching a terminal request.
    pub fn unwrap_terminal(&self) -> Result<(&Request, RequestFlags), RequestError> {
        let mut flags = RequestFlags::default();
        let mut current = self;

        for _ in 0..=MAX_WRAP_DEPTH {
            match current {
                Envelope::Terminal(request) => {
                    if let Request::RetrieveSingle { .. } = request {
                        flags.single_result = true;
                    }
                    return Ok((request, flags));
                }
                Envelope::Telemetry { inner, caller } => {
                    if flags.caller.is_none() {
                        flags.caller = caller.clone();
                    }
                    current = inner;
                }
                Envelope::ExplicitKey {
                    inner,
                    key,
                    allow_stale,
                    bypass_cache,
                    skip_dependencies,
                    expires,
                } => {
                    if flags.explicit_key.is_none() {
                        flags.explicit_key = Some(key.clone());
                    }
                    flags.allow_stale |= allow_stale;
                    flags.bypass_cache |= bypass_cache;
                    flags.skip_dependencies |= skip_dependencies;
                    if flags.expires.is_none() {
                        flags.expires = *expires;
                    }
                    current = inner;
                }
                Envelope::SingleResult { inner } => {
                    flags.single_result = true;
                    current = inner;
                }
                Envelope::Bulk { inner, allow_stale } => {
                    flags.allow_stale |= allow_stale;
                    current = inner;
                }
            }
        }

        Err(RequestError::WrapDepthExceeded {
            max: MAX_WRAP_DEPTH,
        })
    }
}
