//! Mutation descriptors: what changed, for invalidation matching.
//!
//! Descriptors are serde-serializable because they cross the distributed
//! invalidation transport unchanged; every instance applies the same
//! descriptor through the identical local invalidation routine.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::{EntityId, EntityReference};
use crate::request::Relationship;
use crate::SessionId;

/// A system-wide change signal not tied to one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GlobalSignal {
    /// Customizations were published.
    Publish,
    /// All schema/definition data changed.
    MetadataChanged,
    /// All row-level data changed.
    ContentChanged,
    /// A relationship cardinality definition changed.
    RelationshipDefinitionChanged,
}

/// The change itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Change {
    Created {
        entity_name: String,
        id: EntityId,
    },
    Updated {
        entity_name: String,
        id: EntityId,
    },
    Deleted {
        entity_name: String,
        id: EntityId,
    },
    Associated {
        target: EntityReference,
        relationship: Relationship,
        related: Vec<EntityReference>,
    },
    Disassociated {
        target: EntityReference,
        relationship: Relationship,
        related: Vec<EntityReference>,
    },
    Signal(GlobalSignal),
}

/// A mutation plus the logical session that performed it.
///
/// The session drives stale-read fairness: the session that dirtied an entry
/// must never be served its own stale write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationDescriptor {
    /// What changed.
    pub change: Change,
    /// The session that performed the mutation, when known.
    pub session: Option<SessionId>,
}

impl MutationDescriptor {
    /// Describe a record creation.
    pub fn created(entity_name: impl Into<String>, id: EntityId) -> Self {
        Self {
            change: Change::Created {
                entity_name: entity_name.into(),
                id,
            },
            session: None,
        }
    }

    /// Describe a record update.
    pub fn updated(entity_name: impl Into<String>, id: EntityId) -> Self {
        Self {
            change: Change::Updated {
                entity_name: entity_name.into(),
                id,
            },
            session: None,
        }
    }

    /// Describe a record deletion.
    pub fn deleted(entity_name: impl Into<String>, id: EntityId) -> Self {
        Self {
            change: Change::Deleted {
                entity_name: entity_name.into(),
                id,
            },
            session: None,
        }
    }

    /// Describe an association.
    pub fn associated(
        target: EntityReference,
        relationship: Relationship,
        related: Vec<EntityReference>,
    ) -> Self {
        Self {
            change: Change::Associated {
                target,
                relationship,
                related,
            },
            session: None,
        }
    }

    /// Describe a disassociation.
    pub fn disassociated(
        target: EntityReference,
        relationship: Relationship,
        related: Vec<EntityReference>,
    ) -> Self {
        Self {
            change: Change::Disassociated {
                target,
                relationship,
                related,
            },
            session: None,
        }
    }

    /// Describe a system-wide signal.
    pub fn signal(signal: GlobalSignal) -> Self {
        Self {
            change: Change::Signal(signal),
            session: None,
        }
    }

    /// Attach the performing session (builder style).
    pub fn with_session(mut self, session: Uuid) -> Self {
        self.session = Some(session);
        self
    }
}
