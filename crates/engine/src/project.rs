//! Rendering of records into output lines.
//!
//! Default mode prints, per record, the values of the output key paths joined
//! by the separator. Grep mode prints the requested paths instead. JSON output
//! bypasses this module and serializes the records directly.

use das_types::{Record, StructuredQuery};

use crate::field_paths::{OutputKeyPath, lookup_with_fallback, render_value, split_key_path};

/// Projection mode for textual output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectionMode {
    /// Values of the resolved output key paths.
    Default,
    /// Values of explicit `grep` paths, in the order given.
    Grep(Vec<String>),
}

impl ProjectionMode {
    pub fn for_query(query: &StructuredQuery) -> Self {
        match query.grep_filters() {
            [] => Self::Default,
            paths => Self::Grep(paths.to_vec()),
        }
    }
}

/// Projects records into lines. Error records are skipped; they only
/// influence the exit status.
pub fn project(records: &[Record], output_keys: &[OutputKeyPath], mode: &ProjectionMode, separator: &str) -> Vec<String> {
    let grep_paths: Vec<OutputKeyPath>;
    let paths: &[OutputKeyPath] = match mode {
        ProjectionMode::Default => output_keys,
        ProjectionMode::Grep(filters) => {
            grep_paths = filters
                .iter()
                .map(|filter| {
                    let lookup = split_key_path(filter).into_iter().next().unwrap_or_default();
                    OutputKeyPath::new(lookup, filter.as_str())
                })
                .collect();
            grep_paths.as_slice()
        }
    };

    records
        .iter()
        .filter(|record| !record.has_error())
        .filter_map(|record| {
            let mut tokens: Vec<String> = Vec::with_capacity(paths.len());
            for token in paths.iter().filter_map(|path| lookup_with_fallback(record, path).and_then(render_value)) {
                if matches!(mode, ProjectionMode::Grep(_)) || !tokens.contains(&token) {
                    tokens.push(token);
                }
            }
            (!tokens.is_empty()).then(|| tokens.join(separator))
        })
        .collect()
}

/// Deduplicates and sorts output lines.
pub fn unique_sorted(mut lines: Vec<String>) -> Vec<String> {
    lines.sort();
    lines.dedup();
    lines
}

/// Full textual projection for `query`.
///
/// Lines are deduplicated and sorted unless the query asks for per-record
/// detail or carries aggregators, whose summaries keep their declared order.
pub fn project_query(query: &StructuredQuery, records: &[Record], output_keys: &[OutputKeyPath], separator: &str) -> Vec<String> {
    let lines = project(records, output_keys, &ProjectionMode::for_query(query), separator);
    if query.is_detail() || !query.aggregators().is_empty() {
        lines
    } else {
        unique_sorted(lines)
    }
}
