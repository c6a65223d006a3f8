//! Cache key construction.
//!
//! Keys are deterministic functions of the request alone. Common request
//! shapes get short structural fast-path keys; everything else falls back to
//! the serialized request, optionally SHA-256 hashed to bound key length.
//! A caller-supplied explicit key short-circuits both paths.

use recall_core::{
    ColumnSet, Envelope, Query, RecallResult, RelationshipRole, Request, RequestError,
};
use sha2::{Digest, Sha256};

/// Builds cache keys for wrapped requests.
#[derive(Debug, Clone)]
pub struct CacheKeyBuilder {
    prefix: String,
    hash_keys: bool,
}

impl CacheKeyBuilder {
    pub fn new(prefix: impl Into<String>, hash_keys: bool) -> Self {
        Self {
            prefix: prefix.into(),
            hash_keys,
        }
    }

    /// The cache key for a wrapped request.
    ///
    /// `selector_key` distinguishes callers that post-process the same
    /// response differently; it is appended as a suffix so two selectors
    /// over one request never share an entry.
    pub fn key(&self, envelope: &Envelope, selector_key: Option<&str>) -> RecallResult<String> {
        let (request, flags) = envelope.unwrap_terminal()?;

        let base = if let Some(explicit) = flags.explicit_key {
            format!("{}:{}", self.prefix, explicit)
        } else if let Some(fast) = self.fast_path(request) {
            fast
        } else {
            self.fallback(request)?
        };

        Ok(match selector_key {
            Some(selector) => format!("{base}|sel={selector}"),
            None => base,
        })
    }

    /// Canonical key for the retrieve-all-rows-of-a-type shape.
    ///
    /// Exposed so invalidation can address always-cached system collections
    /// without holding the original request.
    pub fn all_of_type_key(&self, entity_name: &str) -> String {
        format!("{}:select:{}:all", self.prefix, entity_name)
    }

    /// Structural keys for the request shapes that dominate traffic.
    ///
    /// Anything with criteria, projections, joins, or limits is left to the
    /// serialized fallback rather than growing an ad-hoc mini-format here.
    fn fast_path(&self, request: &Request) -> Option<String> {
        match request {
            Request::Retrieve {
                target,
                columns: ColumnSet::All,
            } => Some(format!(
                "{}:retrieve:{}:id={}:all",
                self.prefix, target.entity_name, target.id
            )),
            Request::RetrieveMultiple {
                query: Query::Expression(query),
            } if query.columns == ColumnSet::All
                && query.criteria.is_empty()
                && query.links.is_empty()
                && query.top.is_none() =>
            {
                Some(self.all_of_type_key(&query.entity_name))
            }
            Request::RetrieveWithRelated {
                target,
                columns: ColumnSet::All,
                related,
            } if related.query.columns == ColumnSet::All
                && related.query.criteria.is_empty()
                && related.query.links.is_empty()
                && related.query.top.is_none() =>
            {
                let role = match related.relationship.role {
                    Some(RelationshipRole::Referencing) => ":role=referencing",
                    Some(RelationshipRole::Referenced) => ":role=referenced",
                    None => "",
                };
                Some(format!(
                    "{}:retrieve:{}:id={}:related={}{}",
                    self.prefix,
                    target.entity_name,
                    target.id,
                    related.relationship.schema_name,
                    role
                ))
            }
            _ => None,
        }
    }

    /// Serialized-request fallback, hashed when configured.
    fn fallback(&self, request: &Request) -> RecallResult<String> {
        let serialized =
            serde_json::to_string(request).map_err(|e| RequestError::KeySerialization {
                reason: e.to_string(),
            })?;

        Ok(if self.hash_keys {
            let digest = Sha256::digest(serialized.as_bytes());
            format!("{}:request:sha256={}", self.prefix, hex::encode(digest))
        } else {
            format!("{}:request:{}", self.prefix, serialized)
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
