//! Structured query consumed by the pipeline.
//!
//! The free-text query language is parsed elsewhere; this module only models
//! the resulting object. A query is immutable once built: construct it through
//! [`StructuredQuery::new`] and the `with_*` builders, or deserialize it from a
//! JSON/YAML document, both of which reject duplicate fields.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Instance used when the caller does not name one.
pub const DEFAULT_INSTANCE: &str = "prod/global";

/// Filter kind selecting the free-text extraction mode.
pub const GREP_FILTER: &str = "grep";

/// Errors raised while building a [`StructuredQuery`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("query must select at least one field")]
    NoFields,
    #[error("duplicate field '{0}' in query")]
    DuplicateField(String),
    #[error("empty field name in query")]
    EmptyField,
}

/// Constraint value attached to a spec key.
///
/// A scalar pins the key to one value; a list expresses either a range
/// (`run between [100, 200]`) or an enumeration (`run in [1, 5, 9]`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Constraint {
    List(Vec<Value>),
    Scalar(Value),
}

impl Constraint {
    /// All constraint values rendered as plain strings.
    pub fn values(&self) -> Vec<String> {
        match self {
            Constraint::List(items) => items.iter().map(scalar_to_string).collect(),
            Constraint::Scalar(value) => vec![scalar_to_string(value)],
        }
    }

    /// First value rendered as a string, if any.
    pub fn first(&self) -> Option<String> {
        self.values().into_iter().next()
    }

    pub fn is_list(&self) -> bool {
        matches!(self, Constraint::List(_))
    }
}

impl From<&str> for Constraint {
    fn from(value: &str) -> Self {
        Constraint::Scalar(Value::String(value.to_string()))
    }
}

impl From<String> for Constraint {
    fn from(value: String) -> Self {
        Constraint::Scalar(Value::String(value))
    }
}

impl From<i64> for Constraint {
    fn from(value: i64) -> Self {
        Constraint::Scalar(Value::from(value))
    }
}

impl From<Vec<i64>> for Constraint {
    fn from(values: Vec<i64>) -> Self {
        Constraint::List(values.into_iter().map(Value::from).collect())
    }
}

/// Renders a JSON scalar the way it appears in URLs and output lines.
pub fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// A `(function, field)` aggregation request such as `sum(file.size)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatorDirective {
    pub function: String,
    pub key: String,
}

/// Serialized form of a query (`mongo_query` in the output envelope).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct QueryDocument {
    fields: Vec<String>,
    #[serde(default)]
    spec: IndexMap<String, Constraint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(default)]
    instance: Option<String>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    filters: IndexMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    aggregators: Vec<AggregatorDirective>,
    #[serde(default)]
    detail: bool,
}

/// Immutable structured query handed to the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "QueryDocument", into = "QueryDocument")]
pub struct StructuredQuery {
    fields: Vec<String>,
    spec: IndexMap<String, Constraint>,
    system: Option<String>,
    instance: String,
    filters: IndexMap<String, Vec<String>>,
    aggregators: Vec<AggregatorDirective>,
    detail: bool,
}

impl StructuredQuery {
    /// Builds a query selecting `fields` on the default instance.
    pub fn new<I, S>(fields: I) -> Result<Self, QueryError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut unique: Vec<String> = Vec::new();
        for field in fields {
            let field = field.into().trim().to_string();
            if field.is_empty() {
                return Err(QueryError::EmptyField);
            }
            if unique.contains(&field) {
                return Err(QueryError::DuplicateField(field));
            }
            unique.push(field);
        }
        if unique.is_empty() {
            return Err(QueryError::NoFields);
        }
        Ok(Self {
            fields: unique,
            spec: IndexMap::new(),
            system: None,
            instance: DEFAULT_INSTANCE.to_string(),
            filters: IndexMap::new(),
            aggregators: Vec::new(),
            detail: false,
        })
    }

    pub fn with_spec(mut self, key: impl Into<String>, constraint: impl Into<Constraint>) -> Self {
        self.spec.insert(key.into(), constraint.into());
        self
    }

    /// Forces the query onto one backend system. Empty strings mean auto-resolve.
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        let system = system.into();
        self.system = if system.trim().is_empty() { None } else { Some(system) };
        self
    }

    pub fn with_instance(mut self, instance: impl Into<String>) -> Self {
        let instance = instance.into();
        if !instance.trim().is_empty() {
            self.instance = instance;
        }
        self
    }

    pub fn with_filter<I, S>(mut self, kind: impl Into<String>, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let entry = self.filters.entry(kind.into()).or_default();
        entry.extend(paths.into_iter().map(Into::into));
        self
    }

    pub fn with_aggregator(mut self, function: impl Into<String>, key: impl Into<String>) -> Self {
        self.aggregators.push(AggregatorDirective {
            function: function.into(),
            key: key.into(),
        });
        self
    }

    pub fn with_detail(mut self, detail: bool) -> Self {
        self.detail = detail;
        self
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn spec(&self) -> &IndexMap<String, Constraint> {
        &self.spec
    }

    pub fn constraint(&self, key: &str) -> Option<&Constraint> {
        self.spec.get(key)
    }

    pub fn system(&self) -> Option<&str> {
        self.system.as_deref()
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub fn filters(&self) -> &IndexMap<String, Vec<String>> {
        &self.filters
    }

    /// Key paths of the `grep` filter, empty when the filter is absent.
    pub fn grep_filters(&self) -> &[String] {
        self.filters.get(GREP_FILTER).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn aggregators(&self) -> &[AggregatorDirective] {
        &self.aggregators
    }

    pub fn is_detail(&self) -> bool {
        self.detail
    }

    /// True when the query selects exactly one field and that field is also
    /// its only spec key (`dataset dataset=/A/B/C`).
    pub fn is_identity_lookup(&self) -> bool {
        self.fields.len() == 1 && self.spec.len() == 1 && self.spec.contains_key(&self.fields[0])
    }

    /// JSON form used for the `mongo_query` entry of the output envelope.
    pub fn to_document(&self) -> Value {
        serde_json::to_value(QueryDocument::from(self.clone())).unwrap_or(Value::Null)
    }
}

impl TryFrom<QueryDocument> for StructuredQuery {
    type Error = QueryError;

    fn try_from(document: QueryDocument) -> Result<Self, Self::Error> {
        let mut query = StructuredQuery::new(document.fields)?;
        query.spec = document.spec;
        query = query.with_system(document.system.unwrap_or_default());
        query = query.with_instance(document.instance.unwrap_or_default());
        query.filters = document.filters;
        query.aggregators = document.aggregators;
        query.detail = document.detail;
        Ok(query)
    }
}

impl From<StructuredQuery> for QueryDocument {
    fn from(query: StructuredQuery) -> Self {
        QueryDocument {
            fields: query.fields,
            spec: query.spec,
            system: query.system,
            instance: Some(query.instance),
            filters: query.filters,
            aggregators: query.aggregators,
            detail: query.detail,
        }
    }
}
