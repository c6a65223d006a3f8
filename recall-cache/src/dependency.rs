//! Dependency extraction: which logical keys a cached result depends on.
//!
//! Every cacheable request/response pair maps to a set of [`DependencyKey`]s,
//! and every mutation maps to the set of keys it disturbs. Invalidation is
//! the intersection of the two: an entry whose registered keys overlap a
//! mutation's keys is dirtied or removed. Extraction is pure and
//! deterministic; identical logical requests always produce identical keys
//! regardless of which query dialect expressed them.
//!
//! Extraction fails open: request shapes with no recognized dependency
//! handling contribute nothing rather than erroring, so an unrecognized
//! request is cached without monitors instead of failing the call.

use std::collections::HashSet;
use std::fmt;

use recall_core::{
    classify, AttributeValue, Change, Entity, EntityId, Envelope, GlobalSignal,
    MutationDescriptor, OperationClass, Query, RecallResult, Request, RequestError, Response,
    ACTIVITY_ENTITY,
};
use uuid::Uuid;

/// Tag applied to results known to contain at most one row.
pub const TAG_SINGLE_RESULT: &str = "single-result";

/// Tag applied to metadata reads.
pub const TAG_METADATA: &str = "metadata";

/// Tag applied to query-shaped content reads.
pub const TAG_FETCH: &str = "fetch";

/// Bound on entity-graph recursion during the response walk.
///
/// Visited tracking already breaks cycles; the depth bound additionally
/// caps pathological acyclic nesting.
pub const MAX_ENTITY_DEPTH: usize = 16;

// ============================================================================
// DependencyKey
// ============================================================================

/// One logical key a cached entry may depend on.
///
/// The canonical string form (via [`fmt::Display`]) is stable and parseable;
/// [`DependencyKey::parse`] inverts it exactly.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DependencyKey {
    /// Any record of the named type changed.
    EntityType { entity_name: String },
    /// One specific record changed.
    EntityInstance { entity_name: String, id: EntityId },
    /// A free-form classification tag.
    Tag { tag: String },
    /// A new record of the named type appeared; matches single-row results
    /// whose membership a create could change.
    UniqueInstance { entity_name: String },
    /// Everything in the named operation class changed.
    Global { class: OperationClass },
}

impl DependencyKey {
    /// Key for any record of a type.
    pub fn entity_type(entity_name: impl Into<String>) -> Self {
        DependencyKey::EntityType {
            entity_name: entity_name.into(),
        }
    }

    /// Key for one specific record.
    pub fn instance(entity_name: impl Into<String>, id: EntityId) -> Self {
        DependencyKey::EntityInstance {
            entity_name: entity_name.into(),
            id,
        }
    }

    /// Key for a classification tag.
    pub fn tag(tag: impl Into<String>) -> Self {
        DependencyKey::Tag { tag: tag.into() }
    }

    /// Key matching creates of the named type.
    pub fn unique(entity_name: impl Into<String>) -> Self {
        DependencyKey::UniqueInstance {
            entity_name: entity_name.into(),
        }
    }

    /// Key for a whole operation class.
    pub fn global(class: OperationClass) -> Self {
        DependencyKey::Global { class }
    }

    /// Parse the canonical string form produced by [`fmt::Display`].
    pub fn parse(text: &str) -> Option<DependencyKey> {
        let (kind, rest) = text.split_once(':')?;
        match kind {
            "entity" => match rest.split_once(":id=") {
                Some((entity_name, id)) => {
                    let id = Uuid::parse_str(id).ok()?;
                    Some(DependencyKey::instance(entity_name, id))
                }
                None if !rest.is_empty() && !rest.contains(':') => {
                    Some(DependencyKey::entity_type(rest))
                }
                None => None,
            },
            "tag" if !rest.is_empty() => Some(DependencyKey::tag(rest)),
            "unique" if !rest.is_empty() => Some(DependencyKey::unique(rest)),
            "global" => match rest {
                "content" => Some(DependencyKey::global(OperationClass::Content)),
                "metadata" => Some(DependencyKey::global(OperationClass::Metadata)),
                _ => None,
            },
            _ => None,
        }
    }
}

impl fmt::Display for DependencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DependencyKey::EntityType { entity_name } => write!(f, "entity:{entity_name}"),
            DependencyKey::EntityInstance { entity_name, id } => {
                write!(f, "entity:{entity_name}:id={id}")
            }
            DependencyKey::Tag { tag } => write!(f, "tag:{tag}"),
            DependencyKey::UniqueInstance { entity_name } => write!(f, "unique:{entity_name}"),
            DependencyKey::Global { class } => write!(f, "global:{}", class.label()),
        }
    }
}

// ============================================================================
// DependencyCalculator
// ============================================================================

/// Derives dependency keys from requests, responses, and mutations.
///
/// Stateless; keys compare and index structurally, with [`DependencyKey`]'s
/// `Display` as the canonical string form.
#[derive(Debug, Clone, Default)]
pub struct DependencyCalculator;

impl DependencyCalculator {
    pub fn new() -> Self {
        Self
    }

    /// Dependencies for a wrapped request.
    ///
    /// Unwraps the envelope first so wrapper-carried flags (single-result,
    /// skip-dependencies) shape the result exactly as they shape caching.
    pub fn for_envelope(&self, envelope: &Envelope) -> RecallResult<Vec<DependencyKey>> {
        let (request, flags) = envelope.unwrap_terminal()?;
        if flags.skip_dependencies {
            return Ok(Vec::new());
        }
        self.for_request(request, flags.single_result)
    }

    /// Dependencies derived from the request shape alone.
    pub fn for_request(
        &self,
        request: &Request,
        single_result: bool,
    ) -> RecallResult<Vec<DependencyKey>> {
        let mut keys = Vec::new();
        self.request_dependencies(request, single_result, &mut keys)?;
        Ok(dedup(keys))
    }

    /// Dependencies for a request/response pair: the request-shape keys plus
    /// instance keys for every record the response actually carried.
    pub fn for_response(
        &self,
        request: &Request,
        response: &Response,
        single_result: bool,
    ) -> RecallResult<Vec<DependencyKey>> {
        let mut keys = Vec::new();
        self.request_dependencies(request, single_result, &mut keys)?;

        let mut visited = HashSet::new();
        match response {
            Response::Retrieved { entity } | Response::RetrievedWithRelated { entity } => {
                entity_dependencies(entity, &mut keys, &mut visited, 0);
            }
            Response::RetrievedSingle { entity: Some(entity) } => {
                entity_dependencies(entity, &mut keys, &mut visited, 0);
            }
            Response::RetrievedMultiple { entities } => {
                for entity in &entities.entities {
                    entity_dependencies(entity, &mut keys, &mut visited, 0);
                }
            }
            Response::Named { results, .. } => {
                for value in results.values() {
                    value_dependencies(value, &mut keys, &mut visited, 0);
                }
            }
            _ => {}
        }

        Ok(dedup(keys))
    }

    /// The keys a mutation disturbs.
    pub fn for_mutation(&self, descriptor: &MutationDescriptor) -> Vec<DependencyKey> {
        let mut keys = Vec::new();
        match &descriptor.change {
            Change::Created { entity_name, id } => {
                keys.push(DependencyKey::entity_type(entity_name.clone()));
                keys.push(DependencyKey::instance(entity_name.clone(), *id));
                // A create can change the membership of single-row results
                // that carry no instance key for the new record yet.
                keys.push(DependencyKey::unique(entity_name.clone()));
            }
            Change::Updated { entity_name, id } | Change::Deleted { entity_name, id } => {
                keys.push(DependencyKey::entity_type(entity_name.clone()));
                keys.push(DependencyKey::instance(entity_name.clone(), *id));
            }
            Change::Associated {
                target,
                relationship,
                related,
            }
            | Change::Disassociated {
                target,
                relationship,
                related,
            } => {
                keys.push(DependencyKey::entity_type(target.entity_name.clone()));
                keys.push(DependencyKey::instance(target.entity_name.clone(), target.id));
                for reference in related {
                    keys.push(DependencyKey::instance(
                        reference.entity_name.clone(),
                        reference.id,
                    ));
                }
                if let Some(intersect) = &relationship.intersect_entity {
                    keys.push(DependencyKey::entity_type(intersect.clone()));
                }
            }
            Change::Signal(signal) => match signal {
                GlobalSignal::Publish => {
                    keys.push(DependencyKey::global(OperationClass::Metadata));
                    keys.push(DependencyKey::global(OperationClass::Content));
                }
                GlobalSignal::MetadataChanged | GlobalSignal::RelationshipDefinitionChanged => {
                    keys.push(DependencyKey::global(OperationClass::Metadata));
                }
                GlobalSignal::ContentChanged => {
                    keys.push(DependencyKey::global(OperationClass::Content));
                }
            },
        }
        dedup(keys)
    }

    fn request_dependencies(
        &self,
        request: &Request,
        single_result: bool,
        keys: &mut Vec<DependencyKey>,
    ) -> Result<(), RequestError> {
        match request {
            Request::Retrieve { target, .. } => {
                // The id is known, so the instance key suffices; a type key
                // here would invalidate on every unrelated row of the type.
                keys.push(DependencyKey::instance(target.entity_name.clone(), target.id));
                keys.push(DependencyKey::global(OperationClass::Content));
            }
            Request::RetrieveMultiple { query } => {
                self.query_dependencies(query, single_result, keys)?;
                keys.push(DependencyKey::global(OperationClass::Content));
            }
            Request::RetrieveSingle { query } => {
                self.query_dependencies(query, true, keys)?;
                keys.push(DependencyKey::global(OperationClass::Content));
            }
            Request::RetrieveWithRelated {
                target, related, ..
            } => {
                keys.push(DependencyKey::instance(target.entity_name.clone(), target.id));
                keys.push(DependencyKey::entity_type(related.query.entity_name.clone()));
                for name in related.query.linked_entity_names() {
                    keys.push(DependencyKey::entity_type(name));
                }
                // Many-to-many traversals are stored through the intersect
                // entity, so mutations arrive under that type name.
                if let Some(intersect) = &related.relationship.intersect_entity {
                    keys.push(DependencyKey::entity_type(intersect.clone()));
                }
                keys.push(DependencyKey::tag(TAG_FETCH));
                keys.push(DependencyKey::global(OperationClass::Content));
            }
            Request::Named { name, parameters } if classify::is_metadata_read(name) => {
                keys.push(DependencyKey::tag(TAG_METADATA));
                keys.push(DependencyKey::global(OperationClass::Metadata));
                let mut visited = HashSet::new();
                for value in parameters.values() {
                    value_dependencies(value, keys, &mut visited, 0);
                }
            }
            // Mutations and unknown named requests are never cached, so
            // they carry no read-side dependencies.
            _ => {}
        }
        Ok(())
    }

    fn query_dependencies(
        &self,
        query: &Query,
        single_result: bool,
        keys: &mut Vec<DependencyKey>,
    ) -> Result<(), RequestError> {
        let expression = query.to_expression()?;
        if single_result || expression.expected_single_row() {
            // A confirmed single-row result is invalidated through the
            // instance keys of the row it actually returned; a type key
            // would dirty it on every row of the type. Creates still have
            // to reach it, which is what the unique key is for.
            keys.push(DependencyKey::tag(TAG_SINGLE_RESULT));
            keys.push(DependencyKey::unique(expression.entity_name));
        } else {
            keys.push(DependencyKey::entity_type(expression.entity_name.clone()));
            for name in expression.linked_entity_names() {
                keys.push(DependencyKey::entity_type(name));
            }
        }
        keys.push(DependencyKey::tag(TAG_FETCH));
        Ok(())
    }
}

/// Walk one entity's graph, pushing instance keys for it and everything it
/// embeds or references.
fn entity_dependencies(
    entity: &Entity,
    keys: &mut Vec<DependencyKey>,
    visited: &mut HashSet<(String, EntityId)>,
    depth: usize,
) {
    if depth > MAX_ENTITY_DEPTH {
        return;
    }
    if !visited.insert((entity.entity_name.clone(), entity.id)) {
        return;
    }

    keys.push(DependencyKey::instance(entity.entity_name.clone(), entity.id));
    if let Some(activity_id) = entity.activity_id() {
        keys.push(DependencyKey::instance(ACTIVITY_ENTITY, activity_id));
    }

    for value in entity.attributes.values() {
        value_dependencies(value, keys, visited, depth + 1);
    }
    for collection in entity.related.values() {
        for related in &collection.entities {
            entity_dependencies(related, keys, visited, depth + 1);
        }
    }
}

fn value_dependencies(
    value: &AttributeValue,
    keys: &mut Vec<DependencyKey>,
    visited: &mut HashSet<(String, EntityId)>,
    depth: usize,
) {
    if depth > MAX_ENTITY_DEPTH {
        return;
    }
    match value {
        AttributeValue::Reference(reference) => {
            keys.push(DependencyKey::instance(
                reference.entity_name.clone(),
                reference.id,
            ));
        }
        AttributeValue::Entity(entity) => {
            entity_dependencies(entity, keys, visited, depth);
        }
        AttributeValue::Collection(collection) => {
            for entity in &collection.entities {
                entity_dependencies(entity, keys, visited, depth);
            }
        }
        AttributeValue::Aliased(aliased) => {
            match aliased.id {
                Some(id) => {
                    keys.push(DependencyKey::instance(aliased.entity_name.clone(), id))
                }
                // Joined row identity unknown: fall back to the joined type
                // so changes there still reach this entry.
                None => keys.push(DependencyKey::entity_type(aliased.entity_name.clone())),
            }
            value_dependencies(&aliased.value, keys, visited, depth + 1);
        }
        _ => {}
    }
}

/// Remove duplicates, keeping first occurrence order.
fn dedup(keys: Vec<DependencyKey>) -> Vec<DependencyKey> {
    let mut seen = HashSet::new();
    keys.into_iter().filter(|k| seen.insert(k.clone())).collect()
}

// ============================================================================
// Tests
// ============================================================================
