//! Shared helpers for resolving dotted key paths against records.
//!
//! Normalized records wrap domain values in single-element lists
//! (`{"file": [{"name": "..."}]}`), so a configured path such as `file.name`
//! usually needs an explicit first-element index after its first segment.
//! Both the projector and the generic aggregator resolve paths through these
//! helpers so their behavior stays consistent.

use das_types::{Record, RecordBody};
use serde_json::Value;

/// Explicit first-element index segment.
pub const FIRST_ELEMENT: &str = "[0]";

/// Output path for one query lookup key, in direct and list-indexed forms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputKeyPath {
    /// Query lookup key the path belongs to (e.g. `file`).
    pub lookup: String,
    /// Dotted record path as configured (e.g. `file.name`).
    pub rec_key: String,
    /// `rec_key` split into segments.
    pub direct: Vec<String>,
    /// `direct` with [`FIRST_ELEMENT`] inserted after the first segment.
    pub fallback: Vec<String>,
}

impl OutputKeyPath {
    pub fn new(lookup: impl Into<String>, rec_key: impl Into<String>) -> Self {
        let rec_key = rec_key.into();
        let direct = split_key_path(&rec_key);
        let fallback = with_first_element_index(&direct);
        Self {
            lookup: lookup.into(),
            rec_key,
            direct,
            fallback,
        }
    }
}

pub fn split_key_path(path: &str) -> Vec<String> {
    path.split('.')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect()
}

/// Inserts [`FIRST_ELEMENT`] after the first segment unless an index is already there.
pub fn with_first_element_index(segments: &[String]) -> Vec<String> {
    let mut out = Vec::with_capacity(segments.len() + 1);
    for (index, segment) in segments.iter().enumerate() {
        out.push(segment.clone());
        if index == 0 && segments.get(1).is_none_or(|next| parse_index(next).is_none()) {
            out.push(FIRST_ELEMENT.to_string());
        }
    }
    out
}

fn parse_index(segment: &str) -> Option<usize> {
    segment.strip_prefix('[')?.strip_suffix(']')?.parse().ok()
}

/// Walks `segments` through nested objects; `[n]` segments index arrays.
pub fn lookup_value<'a>(value: &'a Value, segments: &[String]) -> Option<&'a Value> {
    let mut current = value;
    for segment in segments {
        current = match parse_index(segment) {
            Some(index) => current.as_array()?.get(index)?,
            None => current.as_object()?.get(segment)?,
        };
    }
    match current {
        Value::Null => None,
        other => Some(other),
    }
}

pub fn lookup_in_body<'a>(body: &'a RecordBody, segments: &[String]) -> Option<&'a Value> {
    let (first, rest) = segments.split_first()?;
    lookup_value(body.get(first)?, rest)
}

/// Resolves a path against a record, trying the indexed fallback when the
/// direct form yields nothing.
pub fn lookup_with_fallback<'a>(record: &'a Record, path: &OutputKeyPath) -> Option<&'a Value> {
    lookup_in_body(&record.body, &path.direct).or_else(|| lookup_in_body(&record.body, &path.fallback))
}

/// Renders an extracted value as an output token. Strings are emitted without
/// quotes; composite values as compact JSON.
pub fn render_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use das_types::DasMeta;
    use serde_json::json;

    fn record(body: Value) -> Record {
        let das = DasMeta {
            expire: 0,
            instance: "prod/global".into(),
            primary_key: "file.name".into(),
            record: 1,
            services: Vec::new(),
        };
        Record::new(das, body.as_object().cloned().unwrap())
    }

    #[test]
    fn fallback_inserts_index_after_first_segment() {
        let path = OutputKeyPath::new("file", "file.name");
        assert_eq!(path.direct, vec!["file", "name"]);
        assert_eq!(path.fallback, vec!["file", "[0]", "name"]);

        let indexed = with_first_element_index(&split_key_path("file.[2].name"));
        assert_eq!(indexed, vec!["file", "[2]", "name"]);
    }

    #[test]
    fn list_wrapped_values_resolve_through_fallback() {
        let record = record(json!({"file": [{"name": "/store/a.root", "size": 10}]}));
        let path = OutputKeyPath::new("file", "file.name");
        assert!(lookup_in_body(&record.body, &path.direct).is_none());
        assert_eq!(lookup_with_fallback(&record, &path), Some(&json!("/store/a.root")));
    }

    #[test]
    fn direct_values_win_over_fallback() {
        let record = record(json!({"run": {"run_number": 5}}));
        let path = OutputKeyPath::new("run", "run.run_number");
        assert_eq!(lookup_with_fallback(&record, &path), Some(&json!(5)));
    }

    #[test]
    fn renders_scalars_and_composites() {
        assert_eq!(render_value(&json!("x")), Some("x".to_string()));
        assert_eq!(render_value(&json!(12)), Some("12".to_string()));
        assert_eq!(render_value(&json!([10, 20])), Some("[10,20]".to_string()));
        assert_eq!(render_value(&Value::Null), None);
    }
}
