//! Query shapes for read operations.
//!
//! Three query dialects resolve to one structured form: structured query
//! expressions, attribute-equality queries, and raw query text. Raw text is
//! the JSON serialization of a [`QueryExpression`] and is parsed back into
//! the structured form before any dependency extraction, so raw and
//! structured paths always produce identical dependency keys.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::RequestError;

/// Filter operator for attribute comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOperator {
    /// Equal to
    Eq,
    /// Not equal to
    Ne,
    /// Greater than
    Gt,
    /// Less than
    Lt,
    /// Greater than or equal
    Gte,
    /// Less than or equal
    Lte,
    /// Contains substring (for strings)
    Contains,
    /// In list of values
    In,
}

/// Filter expression over one attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterExpr {
    /// Attribute to filter on
    pub attribute: String,
    /// Operator to apply
    pub operator: FilterOperator,
    /// Value to compare against (JSON value for flexibility)
    pub value: serde_json::Value,
}

impl FilterExpr {
    /// Create a new filter expression.
    pub fn new(
        attribute: impl Into<String>,
        operator: FilterOperator,
        value: serde_json::Value,
    ) -> Self {
        Self {
            attribute: attribute.into(),
            operator,
            value,
        }
    }

    /// Create an equality filter.
    pub fn eq(attribute: impl Into<String>, value: serde_json::Value) -> Self {
        Self::new(attribute, FilterOperator::Eq, value)
    }
}

/// Column selection for a read operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ColumnSet {
    /// All columns of the target type.
    #[default]
    All,
    /// An explicit projection.
    Columns(Vec<String>),
}

impl ColumnSet {
    /// Create a projection over the named columns.
    pub fn columns(names: &[&str]) -> Self {
        Self::Columns(names.iter().map(|n| n.to_string()).collect())
    }
}

/// A joined entity within a query, possibly nested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkEntity {
    /// Logical name of the joined entity type.
    pub entity_name: String,
    /// Alias under which joined columns surface in results.
    pub alias: Option<String>,
    /// Nested joins below this one.
    pub links: Vec<LinkEntity>,
}

impl LinkEntity {
    /// Create a join against the given type.
    pub fn new(entity_name: impl Into<String>) -> Self {
        Self {
            entity_name: entity_name.into(),
            alias: None,
            links: Vec::new(),
        }
    }

    /// Set the result alias (builder style).
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Add a nested join (builder style).
    pub fn with_link(mut self, link: LinkEntity) -> Self {
        self.links.push(link);
        self
    }
}

/// A structured query against the entity service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryExpression {
    /// Primary entity type.
    pub entity_name: String,
    /// Column projection.
    pub columns: ColumnSet,
    /// Filter criteria, combined conjunctively.
    pub criteria: Vec<FilterExpr>,
    /// Joined entities, possibly nested.
    pub links: Vec<LinkEntity>,
    /// Row limit; `Some(1)` marks a query expected to return one row.
    pub top: Option<u32>,
}

impl QueryExpression {
    /// Create a query over all columns of a type with no criteria.
    pub fn new(entity_name: impl Into<String>) -> Self {
        Self {
            entity_name: entity_name.into(),
            columns: ColumnSet::All,
            criteria: Vec::new(),
            links: Vec::new(),
            top: None,
        }
    }

    /// Set the column projection (builder style).
    pub fn with_columns(mut self, columns: ColumnSet) -> Self {
        self.columns = columns;
        self
    }

    /// Add a filter (builder style).
    pub fn with_criteria(mut self, filter: FilterExpr) -> Self {
        self.criteria.push(filter);
        self
    }

    /// Add a join (builder style).
    pub fn with_link(mut self, link: LinkEntity) -> Self {
        self.links.push(link);
        self
    }

    /// Set the row limit (builder style).
    pub fn with_top(mut self, top: u32) -> Self {
        self.top = Some(top);
        self
    }

    /// True when the query shape guarantees at most one row.
    pub fn expected_single_row(&self) -> bool {
        self.top == Some(1)
    }

    /// Collect every joined type name, depth-first over nested links.
    pub fn linked_entity_names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        fn walk<'a>(links: &'a [LinkEntity], out: &mut Vec<&'a str>) {
            for link in links {
                out.push(link.entity_name.as_str());
                walk(&link.links, out);
            }
        }
        walk(&self.links, &mut names);
        names
    }
}

/// An attribute-equality query: all records where the given attributes match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeQuery {
    /// Target entity type.
    pub entity_name: String,
    /// Attribute name to required value.
    pub attributes: BTreeMap<String, serde_json::Value>,
}

impl AttributeQuery {
    /// Create an attribute query over the given pairs.
    pub fn new(
        entity_name: impl Into<String>,
        attributes: BTreeMap<String, serde_json::Value>,
    ) -> Self {
        Self {
            entity_name: entity_name.into(),
            attributes,
        }
    }
}

/// The query dialects accepted by read requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Query {
    /// A structured query expression.
    Expression(QueryExpression),
    /// An attribute-equality query.
    ByAttribute(AttributeQuery),
    /// Raw query text (the JSON serialization of a query expression).
    Raw(String),
}

impl Query {
    /// Resolve any dialect to the structured form.
    ///
    /// Raw text parses through [`parse_raw`]; attribute queries become
    /// equality criteria. Dependency extraction always runs on the result of
    /// this method so every dialect yields identical keys.
    pub fn to_expression(&self) -> Result<QueryExpression, RequestError> {
        match self {
            Query::Expression(query) => Ok(query.clone()),
            Query::ByAttribute(query) => {
                let mut expression = QueryExpression::new(query.entity_name.clone());
                for (attribute, value) in &query.attributes {
                    expression
                        .criteria
                        .push(FilterExpr::eq(attribute.clone(), value.clone()));
                }
                Ok(expression)
            }
            Query::Raw(text) => parse_raw(text),
        }
    }
}

/// Parse raw query text into the structured form.
pub fn parse_raw(text: &str) -> Result<QueryExpression, RequestError> {
    serde_json::from_str(text).map_err(|e| RequestError::MalformedRawQuery {
        reason: e.to_string(),
    })
}
