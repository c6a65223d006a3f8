//! Response model paired with the request sum.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::entities::{AttributeValue, Entity, EntityCollection, EntityId};

/// The closed set of response kinds, paired with [`crate::Request`] kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Response {
    /// Result of a create: the new record's id.
    Created { id: EntityId },
    /// Result of a retrieve-by-id.
    Retrieved { entity: Entity },
    /// Result of a multi-row query.
    RetrievedMultiple { entities: EntityCollection },
    /// Result of a single-row-expected query.
    RetrievedSingle { entity: Option<Entity> },
    /// Result of a retrieve with a related-records query; the related rows
    /// hang off the primary entity's related-collection map.
    RetrievedWithRelated { entity: Entity },
    Updated,
    Deleted,
    Associated,
    Disassociated,
    /// Result of a generic named request.
    Named {
        name: String,
        results: BTreeMap<String, AttributeValue>,
    },
}

impl Response {
    /// The primary entity carried by this response, when there is one.
    pub fn entity(&self) -> Option<&Entity> {
        match self {
            Response::Retrieved { entity } | Response::RetrievedWithRelated { entity } => {
                Some(entity)
            }
            Response::RetrievedSingle { entity } => entity.as_ref(),
            _ => None,
        }
    }

    /// The entity collection carried by this response, when there is one.
    pub fn entities(&self) -> Option<&EntityCollection> {
        match self {
            Response::RetrievedMultiple { entities } => Some(entities),
            _ => None,
        }
    }
}
