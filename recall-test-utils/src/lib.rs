//! RECALL Test Utilities
//!
//! Shared fixtures for the RECALL workspace:
//! - Entity builders for the CRM-style shapes the tests exercise
//! - Envelope builders for common request patterns
//! - Proptest generators for entities and references

use recall_core::{
    AttributeValue, ColumnSet, Entity, EntityCollection, EntityId, EntityReference, Envelope,
    FilterExpr, Query, QueryExpression, Request,
};
use uuid::Uuid;

// ============================================================================
// ENTITY FIXTURES
// ============================================================================

/// A contact pointing at its parent account.
pub fn contact(id: EntityId, account_id: EntityId) -> Entity {
    Entity::new("contact", id)
        .with_attribute("fullname", AttributeValue::Text("Rae Finch".to_string()))
        .with_attribute(
            "parentaccountid",
            AttributeValue::Reference(EntityReference::new("account", account_id)),
        )
}

/// An account with a display name.
pub fn account(id: EntityId) -> Entity {
    Entity::new("account", id)
        .with_attribute("name", AttributeValue::Text("Fabrikam".to_string()))
}

/// An invoice pointing at its order.
pub fn invoice(id: EntityId, order_id: EntityId) -> Entity {
    Entity::new("invoice", id)
        .with_attribute(
            "salesorderid",
            AttributeValue::Reference(EntityReference::new("salesorder", order_id)),
        )
        .with_attribute("totalamount", AttributeValue::Float(125.0))
}

/// An activity-subtype record carrying the supertype identifier.
pub fn phone_call(id: EntityId) -> Entity {
    Entity::new("phonecall", id)
        .with_attribute("activityid", AttributeValue::Id(id))
        .with_attribute("subject", AttributeValue::Text("follow up".to_string()))
}

/// A collection of the given entities, typed after the first.
pub fn collection(entity_name: &str, entities: Vec<Entity>) -> EntityCollection {
    let mut collection = EntityCollection::new(entity_name);
    collection.entities = entities;
    collection
}

// ============================================================================
// REQUEST FIXTURES
// ============================================================================

/// Retrieve one record, all columns.
pub fn retrieve(entity_name: &str, id: EntityId) -> Envelope {
    Envelope::terminal(Request::Retrieve {
        target: EntityReference::new(entity_name, id),
        columns: ColumnSet::All,
    })
}

/// Retrieve every row of a type.
pub fn retrieve_all(entity_name: &str) -> Envelope {
    Envelope::terminal(Request::RetrieveMultiple {
        query: Query::Expression(QueryExpression::new(entity_name)),
    })
}

/// Retrieve rows matching one equality criterion.
pub fn retrieve_where(entity_name: &str, attribute: &str, value: serde_json::Value) -> Envelope {
    Envelope::terminal(Request::RetrieveMultiple {
        query: Query::Expression(
            QueryExpression::new(entity_name).with_criteria(FilterExpr::eq(attribute, value)),
        ),
    })
}

/// Retrieve the single row matching one equality criterion.
pub fn retrieve_single_where(
    entity_name: &str,
    attribute: &str,
    value: serde_json::Value,
) -> Envelope {
    Envelope::terminal(Request::RetrieveSingle {
        query: Query::Expression(
            QueryExpression::new(entity_name)
                .with_criteria(FilterExpr::eq(attribute, value))
                .with_top(1),
        ),
    })
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    use proptest::prelude::*;

    use super::*;

    /// Lowercase logical entity names.
    pub fn entity_name() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9_]{0,19}"
    }

    pub fn entity_id() -> impl Strategy<Value = EntityId> {
        any::<[u8; 16]>().prop_map(Uuid::from_bytes)
    }

    pub fn entity_reference() -> impl Strategy<Value = EntityReference> {
        (entity_name(), entity_id()).prop_map(|(name, id)| EntityReference::new(name, id))
    }

    /// Flat entities with scalar and reference attributes.
    pub fn entity() -> impl Strategy<Value = Entity> {
        (
            entity_name(),
            entity_id(),
            proptest::collection::btree_map(
                "[a-z][a-z0-9_]{0,11}",
                prop_oneof![
                    any::<bool>().prop_map(AttributeValue::Bool),
                    any::<i64>().prop_map(AttributeValue::Int),
                    "[a-z ]{0,24}".prop_map(AttributeValue::Text),
                    entity_reference().prop_map(AttributeValue::Reference),
                    Just(AttributeValue::Null),
                ],
                0..6,
            ),
        )
            .prop_map(|(name, id, attributes)| {
                let mut entity = Entity::new(name, id);
                entity.attributes = attributes;
                entity
            })
    }
}

// ============================================================================
// Tests
// ============================================================================
