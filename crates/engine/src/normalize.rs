//! Translation of raw service payloads into normalized records.
//!
//! [`unmarshal`] turns one raw response into rows keyed by the descriptor's
//! lookup keys (`{"file": [{"name": ...}]}`), applying the system's notations.
//! [`adjust_records`] stamps the `das` provenance block and prunes top-level
//! keys the query does not ask for. Local providers share the second half.
//!
//! Failures never abort a query: a malformed payload becomes a top-level
//! error record, a malformed row becomes an error sub-record under the
//! primary lookup key, and a service-reported error becomes an error record
//! carrying the service's own code.

use chrono::Utc;
use das_types::{DasMeta, ErrorCode, Notation, Record, RecordBody, ServiceDescriptor, StructuredQuery};
use das_util::parse_response_json_strict;
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use crate::{
    fetch::RawResponse,
    field_paths::{lookup_value, split_key_path},
};

/// Keys of the error block carried by error records.
const ERROR_KEYS: [&str; 2] = ["error", "code"];

/// Wrapper keys probed for the row list when the payload is an object.
const ROW_WRAPPER_KEYS: [&str; 5] = ["data", "result", "results", "items", "rows"];

/// Normalizes one raw response for `descriptor`.
pub fn normalize(raw: &RawResponse, descriptor: &ServiceDescriptor, notations: &[Notation], query: &StructuredQuery) -> Vec<Record> {
    let rows = unmarshal(raw, descriptor, notations);
    adjust_records(query, descriptor, rows)
}

/// Converts a raw payload into lookup-keyed rows without provenance.
pub fn unmarshal(raw: &RawResponse, descriptor: &ServiceDescriptor, notations: &[Notation]) -> Vec<RecordBody> {
    let code = ErrorCode::for_system(&descriptor.system).code();

    if let Some(error) = &raw.error {
        return match raw.payload.as_deref().and_then(service_error_payload) {
            Some(map) => {
                debug!(url = %raw.url, service = %descriptor.identifier(), "service reported an error");
                vec![service_error_body(&map, code, error)]
            }
            None => {
                warn!(url = %raw.url, service = %descriptor.identifier(), error = %error, "fetch failed; no records produced");
                Vec::new()
            }
        };
    }

    let Some(payload) = raw.payload.as_deref().filter(|payload| !payload.trim().is_empty()) else {
        return Vec::new();
    };
    let value = match parse_response_json_strict(payload, None) {
        Ok(value) => value,
        Err(error) => {
            warn!(url = %raw.url, service = %descriptor.identifier(), error = %error, "malformed payload");
            return vec![error_body(format!("unable to parse {} payload: {}", descriptor.identifier(), error), code)];
        }
    };

    if let Value::Object(map) = &value
        && is_service_error(map)
    {
        return vec![service_error_body(map, code, "service error")];
    }

    let lookup = descriptor.lookup_keys();
    let primary = lookup.first().copied().unwrap_or("result");
    extract_rows(&value, descriptor.list_path.as_deref())
        .into_iter()
        .map(|row| match row {
            Value::Object(row) => shape_row(row, descriptor, notations, &lookup),
            other => {
                let message = format!("malformed row from {}: expected an object, got {}", descriptor.identifier(), kind_of(&other));
                let mut body = Map::new();
                body.insert(primary.to_string(), json!([{"error": message, "code": code}]));
                body
            }
        })
        .collect()
}

/// Stamps provenance and prunes keys outside the query's fields and the
/// descriptor's lookup keys.
pub fn adjust_records(query: &StructuredQuery, descriptor: &ServiceDescriptor, rows: Vec<RecordBody>) -> Vec<Record> {
    let lookup = descriptor.lookup_keys();
    let das = DasMeta {
        expire: Utc::now().timestamp() + descriptor.expire,
        instance: query.instance().to_string(),
        primary_key: descriptor.primary_key(),
        record: 1,
        services: vec![descriptor.identifier()],
    };

    rows.into_iter()
        .filter_map(|mut body| {
            body.retain(|key, _| {
                query.fields().iter().any(|field| field == key) || lookup.contains(&key.as_str()) || ERROR_KEYS.contains(&key.as_str())
            });
            if body.is_empty() {
                return None;
            }
            Some(Record::new(das.clone(), body))
        })
        .collect()
}

fn extract_rows(value: &Value, list_path: Option<&str>) -> Vec<Value> {
    if let Some(path) = list_path {
        return match lookup_value(value, &split_key_path(path)) {
            Some(Value::Array(items)) => items.clone(),
            Some(other) => vec![other.clone()],
            None => Vec::new(),
        };
    }
    match value {
        Value::Array(items) => items.clone(),
        Value::Object(map) => ROW_WRAPPER_KEYS
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_array))
            .cloned()
            .unwrap_or_else(|| vec![value.clone()]),
        Value::Null => Vec::new(),
        other => vec![other.clone()],
    }
}

/// Applies notations and wraps the row under the lookup keys.
///
/// A notation target containing a dot (`lumi.number`) places the value at
/// that record path instead of inside the primary lookup's sub-record.
fn shape_row(row: Map<String, Value>, descriptor: &ServiceDescriptor, notations: &[Notation], lookup: &[&str]) -> RecordBody {
    let mut renamed = Map::new();
    let mut placed: Vec<(String, String, Value)> = Vec::new();
    for (key, value) in row {
        let target = notation_target(notations, &descriptor.urn, &key).unwrap_or(&key).to_string();
        match target.split_once('.') {
            Some((prefix, attribute)) => placed.push((prefix.to_string(), attribute.to_string(), value)),
            None => {
                renamed.insert(target, value);
            }
        }
    }

    let mut subs: Vec<(String, Map<String, Value>)> = lookup.iter().map(|key| (key.to_string(), Map::new())).collect();
    if subs.is_empty() {
        subs.push(("result".to_string(), Map::new()));
    }
    for (key, value) in renamed {
        let owner = lookup
            .iter()
            .position(|lookup_key| descriptor.rec_key_for(lookup_key) == Some(format!("{lookup_key}.{key}").as_str()))
            .unwrap_or(0);
        subs[owner].1.insert(key, value);
    }

    let mut body = Map::new();
    for (key, sub) in subs {
        if !sub.is_empty() {
            body.insert(key, json!([sub]));
        }
    }
    for (prefix, attribute, value) in placed {
        let entry = body.entry(prefix).or_insert_with(|| json!([{}]));
        if let Some(Value::Object(sub)) = entry.as_array_mut().and_then(|items| items.first_mut()) {
            sub.insert(attribute, value);
        }
    }
    body
}

/// Operation-specific notations take precedence over system-wide ones.
fn notation_target<'a>(notations: &'a [Notation], urn: &str, api_output: &str) -> Option<&'a str> {
    let matching = |specific: bool| {
        notations
            .iter()
            .find(|notation| notation.api_output == api_output && notation.applies_to(urn) && specific != notation.api.is_empty())
    };
    matching(true).or_else(|| matching(false)).map(|notation| notation.rec_key.as_str())
}

fn is_service_error(map: &Map<String, Value>) -> bool {
    let present = |key: &str| map.get(key).is_some_and(|value| !value.is_null() && value.as_str() != Some(""));
    present("error") || present("exception")
}

/// Parses a failed call's body when it is an object describing the error.
fn service_error_payload(body: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(body).ok()? {
        Value::Object(map) if is_service_error(&map) || map.contains_key("message") => Some(map),
        _ => None,
    }
}

fn service_error_body(map: &Map<String, Value>, code: i64, fallback: &str) -> RecordBody {
    let message = ["error", "exception", "message"]
        .iter()
        .find_map(|key| map.get(*key).filter(|value| !value.is_null()))
        .map(|value| match value {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        })
        .unwrap_or_else(|| fallback.to_string());
    let code = das_types::error_code_of(map).unwrap_or(code);
    error_body(message, code)
}

fn error_body(message: String, code: i64) -> RecordBody {
    let mut body = Map::new();
    body.insert("error".to_string(), Value::String(message));
    body.insert("code".to_string(), Value::from(code));
    body
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
