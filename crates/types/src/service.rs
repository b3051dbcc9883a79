//! Service map entries: descriptors, key mappings and notations.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// URL sentinel marking a descriptor served by an in-process provider.
pub const LOCAL_API: &str = "local_api";

fn default_expire() -> i64 {
    3600
}

/// Translation between a query key and a service output path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyMapping {
    /// Query-level key (e.g. `file`).
    pub das_key: String,
    /// Dot path of the value in normalized records (e.g. `file.name`).
    pub rec_key: String,
    /// Name of the API argument that receives the constraint value, if any.
    #[serde(default)]
    pub api_arg: Option<String>,
}

/// One backend operation as described by the service maps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    /// Backend system name (e.g. `dbs3`, `phedex`).
    pub system: String,
    /// Operation name within the system.
    pub urn: String,
    /// URL template, or [`LOCAL_API`] for in-process providers.
    pub url: String,
    /// Comma-separated query fields this operation resolves.
    #[serde(default)]
    pub lookup: String,
    /// Query key to output path translations.
    #[serde(default)]
    pub das_map: Vec<KeyMapping>,
    /// Record validity in seconds.
    #[serde(default = "default_expire")]
    pub expire: i64,
    /// Default API parameters. The values `"required"` and `"optional"` mark
    /// parameters filled from the query.
    #[serde(default)]
    pub params: IndexMap<String, Value>,
    /// Instances served by this operation; empty means every instance.
    #[serde(default)]
    pub instances: Vec<String>,
    /// Dot path of the row list inside the payload, when not top-level.
    #[serde(default)]
    pub list_path: Option<String>,
}

impl ServiceDescriptor {
    /// `system:urn` identifier recorded in `das.services`.
    pub fn identifier(&self) -> String {
        format!("{}:{}", self.system, self.urn)
    }

    pub fn lookup_keys(&self) -> Vec<&str> {
        self.lookup
            .split(',')
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .collect()
    }

    pub fn is_local(&self) -> bool {
        self.url == LOCAL_API
    }

    /// Output path mapped to a query key.
    pub fn rec_key_for(&self, das_key: &str) -> Option<&str> {
        self.das_map
            .iter()
            .find(|mapping| mapping.das_key == das_key)
            .map(|mapping| mapping.rec_key.as_str())
    }

    /// Primary key of produced records: the output path of the first lookup key.
    pub fn primary_key(&self) -> String {
        let Some(first) = self.lookup_keys().first().map(|key| key.to_string()) else {
            return String::new();
        };
        self.rec_key_for(&first).map(str::to_string).unwrap_or(first)
    }

    pub fn serves_instance(&self, instance: &str) -> bool {
        self.instances.is_empty() || self.instances.iter().any(|candidate| candidate == instance)
    }
}

/// Field renaming rule for one system's raw payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notation {
    pub system: String,
    /// Operation the rule is limited to; empty applies to every operation.
    #[serde(default)]
    pub api: String,
    /// Field name in the raw payload.
    pub api_output: String,
    /// Field name (or dotted record path) in normalized records.
    pub rec_key: String,
}

impl Notation {
    pub fn applies_to(&self, urn: &str) -> bool {
        self.api.is_empty() || self.api == urn
    }
}

/// A fully built network call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingRequest {
    pub url: String,
    /// JSON body for POST-style calls; `None` issues a plain GET.
    pub args: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn descriptor() -> ServiceDescriptor {
        serde_json::from_value(json!({
            "system": "dbs3",
            "urn": "files",
            "url": "https://cmsweb.cern.ch/dbs/prod/global/DBSReader/files",
            "lookup": "file",
            "das_map": [
                {"das_key": "file", "rec_key": "file.name", "api_arg": "logical_file_name"},
                {"das_key": "dataset", "rec_key": "dataset.name", "api_arg": "dataset"}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn descriptor_defaults_and_identity() {
        let descriptor = descriptor();
        assert_eq!(descriptor.expire, 3600);
        assert_eq!(descriptor.identifier(), "dbs3:files");
        assert_eq!(descriptor.primary_key(), "file.name");
        assert!(!descriptor.is_local());
        assert!(descriptor.serves_instance("int/global"));
    }

    #[test]
    fn lookup_keys_trim_whitespace() {
        let mut descriptor = descriptor();
        descriptor.lookup = "file, lumi,".into();
        assert_eq!(descriptor.lookup_keys(), vec!["file", "lumi"]);
    }

    #[test]
    fn notation_scope() {
        let notation = Notation {
            system: "dbs3".into(),
            api: String::new(),
            api_output: "logical_file_name".into(),
            rec_key: "name".into(),
        };
        assert!(notation.applies_to("files"));
        let scoped = Notation { api: "blocks".into(), ..notation };
        assert!(!scoped.applies_to("files"));
    }
}
