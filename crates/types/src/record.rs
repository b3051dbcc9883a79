use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Untyped key/value payload of a record before provenance is attached.
pub type RecordBody = Map<String, Value>;

/// Provenance block carried by every record under the reserved `das` key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DasMeta {
    /// Absolute expiration timestamp (epoch seconds).
    pub expire: i64,
    /// Logical backend instance the data came from (e.g. `prod/global`).
    pub instance: String,
    /// Dot-delimited path of the field that keys this record (e.g. `file.name`).
    pub primary_key: String,
    /// Record shape discriminator.
    pub record: i64,
    /// Ordered set of `system:operation` identifiers that produced the record.
    pub services: Vec<String>,
}

impl DasMeta {
    /// Appends a service identifier, keeping the list free of duplicates.
    pub fn add_service(&mut self, service: impl Into<String>) {
        let service = service.into();
        if !self.services.contains(&service) {
            self.services.push(service);
        }
    }
}

/// A normalized result record.
///
/// The domain payload is schema-less because every backend has its own shape;
/// only the `das` block is strongly typed. Serialization flattens the body next
/// to `das`, e.g. `{"das": {...}, "file": [{"name": "..."}]}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub das: DasMeta,
    #[serde(flatten)]
    pub body: RecordBody,
}

impl Record {
    pub fn new(das: DasMeta, body: RecordBody) -> Self {
        Self { das, body }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.body.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.body.insert(key.into(), value)
    }

    /// Message of a service error reported at the top level of the record.
    pub fn error_message(&self) -> Option<String> {
        error_message_of(&self.body)
    }

    /// Numeric code of a service error reported at the top level of the record.
    pub fn error_code(&self) -> Option<i64> {
        error_code_of(&self.body)
    }

    /// Objects nested in list values of the domain keys, in key order.
    ///
    /// For `{"file": [{"name": "a"}, {"name": "b"}]}` this yields both file
    /// objects. The `das` block is never visited.
    pub fn sub_records(&self) -> impl Iterator<Item = &Map<String, Value>> {
        self.body.values().flat_map(|value| match value {
            Value::Array(items) => items.iter().filter_map(Value::as_object).collect::<Vec<_>>(),
            Value::Object(map) => vec![map],
            _ => Vec::new(),
        })
    }

    /// True when the record or any of its sub-records carries an `error`.
    pub fn has_error(&self) -> bool {
        self.error_message().is_some() || self.sub_records().any(|sub| error_message_of(sub).is_some())
    }

    /// Full JSON representation including the `das` block.
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("das".to_string(), serde_json::to_value(&self.das).unwrap_or(Value::Null));
        for (key, value) in &self.body {
            map.insert(key.clone(), value.clone());
        }
        Value::Object(map)
    }
}

/// Reads the `error` entry of a record-like map. Empty strings and nulls do not count.
pub fn error_message_of(map: &Map<String, Value>) -> Option<String> {
    match map.get("error")? {
        Value::Null => None,
        Value::String(text) if text.trim().is_empty() => None,
        Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}

/// Reads the numeric `code` entry of a record-like map; numeric strings are accepted.
pub fn error_code_of(map: &Map<String, Value>) -> Option<i64> {
    match map.get("code")? {
        Value::Number(number) => number.as_i64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn meta() -> DasMeta {
        DasMeta {
            expire: 100,
            instance: "prod/global".into(),
            primary_key: "file.name".into(),
            record: 1,
            services: vec!["dbs3:files".into()],
        }
    }

    #[test]
    fn serializes_body_next_to_das_block() {
        let body = json!({"file": [{"name": "/store/a.root"}]}).as_object().cloned().unwrap();
        let record = Record::new(meta(), body);

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["das"]["primary_key"], json!("file.name"));
        assert_eq!(value["file"][0]["name"], json!("/store/a.root"));

        let back: Record = serde_json::from_value(value).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn detects_nested_errors_in_sub_records() {
        let body = json!({"file": [{"name": "a"}, {"error": "boom", "code": 2}]}).as_object().cloned().unwrap();
        let record = Record::new(meta(), body);

        assert!(record.error_message().is_none());
        assert!(record.has_error());
    }

    #[test]
    fn add_service_keeps_set_semantics() {
        let mut das = meta();
        das.add_service("dbs3:files");
        das.add_service("phedex:file4dataset");
        assert_eq!(das.services, vec!["dbs3:files", "phedex:file4dataset"]);
    }

    #[test]
    fn error_code_accepts_numeric_strings() {
        let map = json!({"error": "bad", "code": "3"}).as_object().cloned().unwrap();
        assert_eq!(error_code_of(&map), Some(3));
        let blank = json!({"error": "  "}).as_object().cloned().unwrap();
        assert_eq!(error_message_of(&blank), None);
    }
}
