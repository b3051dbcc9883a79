//! Result aggregation.
//!
//! Two modes exist. Queries carrying `(function, key)` directives get one
//! summary record per directive. File queries that also ask for lumis (without
//! `detail`) are grouped per file, folding the per-row lumi/run/event values
//! into sets; runs and events ride along when present.

use std::{
    collections::{BTreeMap, BTreeSet},
    str::FromStr,
};

use das_types::{AggregatorDirective, DasMeta, Record, StructuredQuery};
use serde_json::{Map, Number, Value, json};
use thiserror::Error;
use tracing::{debug, warn};

use crate::field_paths::{OutputKeyPath, lookup_with_fallback};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AggregationError {
    #[error("record #{index} breaks the file/lumi contract: {files} file entries and {lumis} lumi entries (expected one of each)")]
    Cardinality { index: usize, files: usize, lumis: usize },

    #[error("record #{index} has no file name")]
    MissingFileName { index: usize },
}

/// Supported aggregate functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunction {
    Count,
    Sum,
    Min,
    Max,
    Avg,
    Median,
}

impl FromStr for AggregateFunction {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "count" => Ok(Self::Count),
            "sum" => Ok(Self::Sum),
            "min" => Ok(Self::Min),
            "max" => Ok(Self::Max),
            "avg" => Ok(Self::Avg),
            "median" => Ok(Self::Median),
            other => Err(format!("unknown aggregate function '{other}'")),
        }
    }
}

/// True when `query` asks for file grouping: both `file` and `lumi` are
/// selected, outside detail mode and without aggregators.
pub fn is_file_grouping_query(query: &StructuredQuery) -> bool {
    let fields = query.fields();
    !query.is_detail()
        && query.aggregators().is_empty()
        && fields.iter().any(|field| field == "file")
        && fields.iter().any(|field| field == "lumi")
}

/// Applies whichever aggregation mode `query` calls for.
pub fn apply(query: &StructuredQuery, records: Vec<Record>) -> Result<Vec<Record>, AggregationError> {
    if !query.aggregators().is_empty() {
        return Ok(aggregate(&records, query.aggregators()));
    }
    if is_file_grouping_query(query) {
        return aggregate_file_lumis(records);
    }
    Ok(records)
}

/// Output paths used to print summary records.
pub fn summary_output_keys() -> Vec<OutputKeyPath> {
    vec![
        OutputKeyPath::new("function", "function"),
        OutputKeyPath::new("key", "key"),
        OutputKeyPath::new("result", "result.value"),
    ]
}

#[derive(Debug, Default)]
struct FileGroup {
    lumis: BTreeSet<i64>,
    runs: BTreeSet<i64>,
    events: BTreeSet<i64>,
}

/// Groups file/lumi rows by file name.
///
/// Every input must carry exactly one file entry and one lumi entry. Zero
/// values are treated as absent. The output is ordered by file name and
/// carries the provenance of the last input record.
pub fn aggregate_file_lumis(records: Vec<Record>) -> Result<Vec<Record>, AggregationError> {
    let mut groups: BTreeMap<String, FileGroup> = BTreeMap::new();
    let mut das: Option<DasMeta> = None;
    let input_count = records.len();

    for (index, record) in records.into_iter().enumerate() {
        let files = entries(&record, "file");
        let lumis = entries(&record, "lumi");
        if files.len() != 1 || lumis.len() != 1 {
            return Err(AggregationError::Cardinality {
                index,
                files: files.len(),
                lumis: lumis.len(),
            });
        }
        let name = files[0]
            .get("name")
            .and_then(Value::as_str)
            .ok_or(AggregationError::MissingFileName { index })?;

        let group = groups.entry(name.to_string()).or_default();
        group.lumis.extend(numbers(lumis[0].get("number")));
        if let Some(run) = entries(&record, "run").first() {
            group.runs.extend(numbers(run.get("run_number")));
        }
        if let Some(events) = entries(&record, "events").first() {
            group.events.extend(numbers(events.get("number")));
        }
        das = Some(record.das);
    }

    let Some(das) = das else {
        return Ok(Vec::new());
    };
    debug!(input_count, file_count = groups.len(), "file records grouped");

    Ok(groups
        .into_iter()
        .map(|(name, group)| {
            let mut body = Map::new();
            body.insert("file".into(), json!([{"name": name}]));
            body.insert("lumi".into(), json!([{"number": group.lumis}]));
            match group.runs.len() {
                0 => {}
                1 => {
                    body.insert("run".into(), json!([{"run_number": group.runs.first()}]));
                }
                _ => {
                    body.insert("run".into(), json!([{"run_number": group.runs}]));
                }
            }
            if !group.events.is_empty() {
                body.insert("events".into(), json!([{"number": group.events}]));
            }
            Record::new(das.clone(), body)
        })
        .collect())
}

/// Objects listed under `key`; a bare object counts as one entry.
fn entries<'a>(record: &'a Record, key: &str) -> Vec<&'a Map<String, Value>> {
    match record.get(key) {
        Some(Value::Array(items)) => items.iter().filter_map(Value::as_object).collect(),
        Some(Value::Object(map)) => vec![map],
        _ => Vec::new(),
    }
}

/// Non-zero integers held by a scalar or list value.
fn numbers(value: Option<&Value>) -> Vec<i64> {
    let as_number = |value: &Value| match value {
        Value::Number(number) => number.as_i64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    };
    match value {
        Some(Value::Array(items)) => items.iter().filter_map(as_number).filter(|n| *n != 0).collect(),
        Some(other) => as_number(other).filter(|n| *n != 0).into_iter().collect(),
        None => Vec::new(),
    }
}

/// Computes one summary record per directive, in declared order.
///
/// Unknown functions and keys without any values are skipped.
pub fn aggregate(records: &[Record], directives: &[AggregatorDirective]) -> Vec<Record> {
    let Some(first) = records.first() else {
        return Vec::new();
    };
    let mut das = first.das.clone();
    for record in &records[1..] {
        for service in &record.das.services {
            das.add_service(service.clone());
        }
    }
    das.primary_key = "result.value".to_string();

    directives
        .iter()
        .filter_map(|directive| {
            let function = match directive.function.parse::<AggregateFunction>() {
                Ok(function) => function,
                Err(error) => {
                    warn!(function = %directive.function, key = %directive.key, "{error}");
                    return None;
                }
            };
            let value = evaluate(function, records, &directive.key)?;
            let mut body = Map::new();
            body.insert("function".into(), Value::String(directive.function.clone()));
            body.insert("key".into(), Value::String(directive.key.clone()));
            body.insert("result".into(), json!({"value": value}));
            Some(Record::new(das.clone(), body))
        })
        .collect()
}

fn evaluate(function: AggregateFunction, records: &[Record], key: &str) -> Option<Value> {
    let path = OutputKeyPath::new(key, key);
    let values: Vec<&Value> = records.iter().filter_map(|record| lookup_with_fallback(record, &path)).collect();
    if function == AggregateFunction::Count {
        return (!values.is_empty()).then(|| Value::from(values.len()));
    }

    let mut numbers: Vec<Number> = Vec::new();
    for value in values {
        match value {
            Value::Number(number) => numbers.push(number.clone()),
            Value::Array(items) => numbers.extend(items.iter().filter_map(|item| match item {
                Value::Number(number) => Some(number.clone()),
                _ => None,
            })),
            Value::String(text) => numbers.extend(text.trim().parse::<f64>().ok().and_then(Number::from_f64)),
            _ => {}
        }
    }
    if numbers.is_empty() {
        return None;
    }

    let integers: Option<Vec<i64>> = numbers.iter().map(Number::as_i64).collect();
    let floats: Vec<f64> = numbers.iter().filter_map(Number::as_f64).collect();
    match (function, integers) {
        (AggregateFunction::Sum, Some(ints)) => match ints.iter().try_fold(0_i64, |total, n| total.checked_add(*n)) {
            Some(total) => Some(Value::from(total)),
            None => float(floats.iter().sum()),
        },
        (AggregateFunction::Min, Some(ints)) => ints.iter().min().map(|n| Value::from(*n)),
        (AggregateFunction::Max, Some(ints)) => ints.iter().max().map(|n| Value::from(*n)),
        (AggregateFunction::Sum, None) => float(floats.iter().sum()),
        (AggregateFunction::Min, None) => floats.iter().copied().reduce(f64::min).and_then(float),
        (AggregateFunction::Max, None) => floats.iter().copied().reduce(f64::max).and_then(float),
        (AggregateFunction::Avg, _) => float(floats.iter().sum::<f64>() / floats.len() as f64),
        (AggregateFunction::Median, _) => float(median(floats)),
        (AggregateFunction::Count, _) => None,
    }
}

fn float(value: f64) -> Option<Value> {
    Number::from_f64(value).map(Value::Number)
}

fn median(mut values: Vec<f64>) -> f64 {
    values.sort_by(f64::total_cmp);
    let middle = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[middle - 1] + values[middle]) / 2.0
    } else {
        values[middle]
    }
}
