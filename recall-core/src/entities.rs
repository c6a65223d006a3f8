//! Entity model for the remote entity service.
//!
//! Attribute and related-collection maps are `BTreeMap`s so traversal order
//! is deterministic, which keeps dependency extraction order-independent.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for an entity instance.
pub type EntityId = Uuid;

/// Logical name of the shared activity supertype.
///
/// Records carrying an activity-style identifier are also visible through
/// queries against this type, even when their own entity name differs.
pub const ACTIVITY_ENTITY: &str = "activity";

/// Attribute name holding the activity-style identifier.
pub const ACTIVITY_ID_ATTRIBUTE: &str = "activityid";

/// A (type, id) pointer to one entity instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityReference {
    /// Logical name of the referenced entity type.
    pub entity_name: String,
    /// Unique identifier of the referenced record.
    pub id: EntityId,
    /// Display name of the referenced record, when known.
    pub name: Option<String>,
}

impl EntityReference {
    /// Create a reference to the given record.
    pub fn new(entity_name: impl Into<String>, id: EntityId) -> Self {
        Self {
            entity_name: entity_name.into(),
            id,
            name: None,
        }
    }

    /// Create a reference carrying a display name.
    pub fn named(entity_name: impl Into<String>, id: EntityId, name: impl Into<String>) -> Self {
        Self {
            entity_name: entity_name.into(),
            id,
            name: Some(name.into()),
        }
    }
}

/// A typed attribute value.
///
/// Closed sum over the value shapes the service returns. The dependency
/// calculator matches exhaustively over this type; scalar variants carry no
/// dependencies while reference, entity, collection, and aliased variants
/// contribute to the dependency walk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(chrono::DateTime<chrono::Utc>),
    Id(Uuid),
    /// A pointer to another record.
    Reference(EntityReference),
    /// A nested entity embedded in the attribute map.
    Entity(Box<Entity>),
    /// A nested collection of entities.
    Collection(EntityCollection),
    /// A joined/aliased column from a linked entity.
    Aliased(Box<AliasedValue>),
    Null,
}

/// A joined/aliased column value carrying the joined row's identity.
///
/// Changes to the joined record must invalidate the composite result, so the
/// aliased row's own (type, id) pair travels with the value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AliasedValue {
    /// Logical name of the joined entity type.
    pub entity_name: String,
    /// Identifier of the joined row, when the projection included it.
    pub id: Option<EntityId>,
    /// The projected value itself.
    pub value: Box<AttributeValue>,
}

impl AliasedValue {
    /// Create an aliased value for a joined row.
    pub fn new(
        entity_name: impl Into<String>,
        id: Option<EntityId>,
        value: AttributeValue,
    ) -> Self {
        Self {
            entity_name: entity_name.into(),
            id,
            value: Box::new(value),
        }
    }
}

/// A typed record returned by the entity service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Logical name of the entity type.
    pub entity_name: String,
    /// Unique identifier of this record.
    pub id: EntityId,
    /// Attribute values keyed by attribute name.
    pub attributes: BTreeMap<String, AttributeValue>,
    /// Related-entity collections keyed by relationship schema name.
    pub related: BTreeMap<String, EntityCollection>,
}

impl Entity {
    /// Create an entity with no attributes.
    pub fn new(entity_name: impl Into<String>, id: EntityId) -> Self {
        Self {
            entity_name: entity_name.into(),
            id,
            attributes: BTreeMap::new(),
            related: BTreeMap::new(),
        }
    }

    /// Add an attribute (builder style).
    pub fn with_attribute(mut self, name: impl Into<String>, value: AttributeValue) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }

    /// Add a related-entity collection (builder style).
    pub fn with_related(
        mut self,
        relationship: impl Into<String>,
        collection: EntityCollection,
    ) -> Self {
        self.related.insert(relationship.into(), collection);
        self
    }

    /// Get a reference to this entity.
    pub fn to_reference(&self) -> EntityReference {
        EntityReference::new(self.entity_name.clone(), self.id)
    }

    /// Return the activity-style identifier when this record is also
    /// visible through the activity supertype.
    ///
    /// Applies when the attribute map carries an id-valued `activityid`
    /// and the record's own type is not the supertype itself.
    pub fn activity_id(&self) -> Option<EntityId> {
        if self.entity_name == ACTIVITY_ENTITY {
            return None;
        }
        match self.attributes.get(ACTIVITY_ID_ATTRIBUTE) {
            Some(AttributeValue::Id(id)) => Some(*id),
            _ => None,
        }
    }
}

/// A collection of entities of one type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityCollection {
    /// Logical name of the collection's entity type.
    pub entity_name: String,
    /// The records themselves.
    pub entities: Vec<Entity>,
}

impl EntityCollection {
    /// Create an empty collection.
    pub fn new(entity_name: impl Into<String>) -> Self {
        Self {
            entity_name: entity_name.into(),
            entities: Vec::new(),
        }
    }

    /// Create a collection from the given entities.
    pub fn from_entities(entity_name: impl Into<String>, entities: Vec<Entity>) -> Self {
        Self {
            entity_name: entity_name.into(),
            entities,
        }
    }

    /// Number of records in the collection.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// True when the collection holds no records.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_builder() {
        let id = Uuid::new_v4();
        let referenced = Uuid::new_v4();
        let entity = Entity::new("contact", id)
            .with_attribute("fullname", AttributeValue::Text("Ada".to_string()))
            .with_attribute(
                "parentcustomerid",
                AttributeValue::Reference(EntityReference::new("account", referenced)),
            );

        assert_eq!(entity.entity_name, "contact");
        assert_eq!(entity.attributes.len(), 2);
        assert_eq!(entity.to_reference().id, id);
    }

    #[test]
    fn test_activity_id_detected_for_subtype() {
        let activity = Uuid::new_v4();
        let entity = Entity::new("phonecall", Uuid::new_v4())
            .with_attribute(ACTIVITY_ID_ATTRIBUTE, AttributeValue::Id(activity));

        assert_eq!(entity.activity_id(), Some(activity));
    }

    #[test]
    fn test_activity_id_ignored_for_supertype_itself() {
        let entity = Entity::new(ACTIVITY_ENTITY, Uuid::new_v4())
            .with_attribute(ACTIVITY_ID_ATTRIBUTE, AttributeValue::Id(Uuid::new_v4()));

        assert_eq!(entity.activity_id(), None);
    }

    #[test]
    fn test_activity_id_requires_id_valued_attribute() {
        let entity = Entity::new("phonecall", Uuid::new_v4())
            .with_attribute(ACTIVITY_ID_ATTRIBUTE, AttributeValue::Text("x".to_string()));

        assert_eq!(entity.activity_id(), None);
    }

    #[test]
    fn test_collection_len() {
        let mut collection = EntityCollection::new("account");
        assert!(collection.is_empty());

        collection.entities.push(Entity::new("account", Uuid::new_v4()));
        assert_eq!(collection.len(), 1);
    }
}
