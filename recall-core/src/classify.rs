//! Fixed classification table: content operations versus metadata operations.
//!
//! Content operations are row-level reads; metadata operations read schema
//! and definition data. Every cacheable request receives the matching global
//! tag so a full metadata or full content flush never has to enumerate
//! entity types.

use crate::request::Request;

/// Class of a cacheable operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationClass {
    /// Row-level read operations.
    Content,
    /// Schema/definition read operations.
    Metadata,
}

impl OperationClass {
    /// Canonical lowercase label used in dependency keys.
    pub fn label(&self) -> &'static str {
        match self {
            OperationClass::Content => "content",
            OperationClass::Metadata => "metadata",
        }
    }
}

/// Named requests that read schema/definition data.
///
/// This table is closed: a new metadata request kind must be added here or
/// it will be treated as a mutation and never cached.
const METADATA_READS: &[&str] = &[
    "retrieve_entity",
    "retrieve_all_entities",
    "retrieve_relationship",
    "retrieve_attribute",
    "retrieve_option_set",
];

/// True when the named request is a metadata read.
pub fn is_metadata_read(name: &str) -> bool {
    METADATA_READS.contains(&name)
}

/// Classify a request as a content or metadata operation.
pub fn classify(request: &Request) -> OperationClass {
    match request {
        Request::Named { name, .. } if is_metadata_read(name) => OperationClass::Metadata,
        _ => OperationClass::Content,
    }
}

/// True when the request's results may be cached at all.
pub fn is_cacheable(request: &Request) -> bool {
    request.is_read()
}
