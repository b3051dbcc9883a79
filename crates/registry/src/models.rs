use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
};

use das_types::{Notation, ServiceDescriptor, StructuredQuery};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::ServiceRegistry;

/// Errors raised while loading a service map document.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to read service maps from {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse service maps: {0}")]
    Parse(String),

    #[error("invalid service descriptor #{index}: {reason}")]
    InvalidDescriptor { index: usize, reason: String },
}

/// In-memory service maps: descriptors plus per-system notations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceMaps {
    /// Descriptors in document order; candidate order follows it.
    #[serde(default)]
    pub services: Vec<ServiceDescriptor>,
    /// Field renaming rules keyed by system.
    #[serde(default)]
    pub notations: Vec<Notation>,
}

impl ServiceMaps {
    /// Loads and validates a service map document.
    ///
    /// Files ending in `.yaml` or `.yml` are parsed as YAML; everything else as JSON.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| RegistryError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let is_yaml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"));
        let maps = if is_yaml {
            Self::from_yaml_str(&content)?
        } else {
            Self::from_json_str(&content)?
        };
        debug!(
            path = %path.display(),
            service_count = maps.services.len(),
            notation_count = maps.notations.len(),
            "service maps loaded"
        );
        Ok(maps)
    }

    pub fn from_json_str(content: &str) -> Result<Self, RegistryError> {
        let maps: ServiceMaps = serde_json::from_str(content).map_err(|error| RegistryError::Parse(error.to_string()))?;
        maps.validate()?;
        Ok(maps)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, RegistryError> {
        let maps: ServiceMaps = serde_yaml::from_str(content).map_err(|error| RegistryError::Parse(error.to_string()))?;
        maps.validate()?;
        Ok(maps)
    }

    fn validate(&self) -> Result<(), RegistryError> {
        for (index, descriptor) in self.services.iter().enumerate() {
            let invalid = |reason: &str| RegistryError::InvalidDescriptor {
                index,
                reason: format!("{} ({})", reason, descriptor.identifier()),
            };
            if descriptor.system.trim().is_empty() || descriptor.urn.trim().is_empty() {
                return Err(invalid("system and urn are required"));
            }
            if descriptor.url.trim().is_empty() {
                return Err(invalid("url is required"));
            }
            if descriptor.lookup_keys().is_empty() {
                return Err(invalid("lookup must name at least one key"));
            }
            if descriptor.expire < 0 {
                return Err(invalid("expire must not be negative"));
            }
        }
        Ok(())
    }

    /// Every query key known to the maps, sorted.
    pub fn das_keys(&self) -> Vec<String> {
        let mut keys = BTreeSet::new();
        for descriptor in &self.services {
            keys.extend(descriptor.lookup_keys().into_iter().map(str::to_string));
            keys.extend(descriptor.das_map.iter().map(|mapping| mapping.das_key.clone()));
        }
        keys.into_iter().collect()
    }

    /// Descriptors served by in-process providers.
    pub fn local_descriptors(&self) -> impl Iterator<Item = &ServiceDescriptor> {
        self.services.iter().filter(|descriptor| descriptor.is_local())
    }
}

/// True when `descriptor` can answer `query`.
///
/// The descriptor's lookup keys must equal the query fields as a set, it must
/// serve the query instance, every spec key must be mapped, and every
/// `required` parameter must be fillable from the query constraints.
fn serves_query(descriptor: &ServiceDescriptor, query: &StructuredQuery) -> bool {
    if !descriptor.serves_instance(query.instance()) {
        return false;
    }

    let lookup: BTreeSet<&str> = descriptor.lookup_keys().into_iter().collect();
    let fields: BTreeSet<&str> = query.fields().iter().map(String::as_str).collect();
    if lookup != fields {
        return false;
    }

    let mapped = |key: &str| descriptor.das_map.iter().any(|mapping| mapping.das_key == key);
    if !query.spec().keys().all(|key| mapped(key)) {
        return false;
    }

    descriptor
        .params
        .iter()
        .filter(|(_, value)| value.as_str() == Some("required"))
        .all(|(param, _)| {
            descriptor
                .das_map
                .iter()
                .any(|mapping| mapping.api_arg.as_deref() == Some(param.as_str()) && query.spec().contains_key(&mapping.das_key))
        })
}

impl ServiceRegistry for ServiceMaps {
    fn find_services(&self, query: &StructuredQuery) -> Vec<ServiceDescriptor> {
        let candidates: Vec<ServiceDescriptor> = self
            .services
            .iter()
            .filter(|descriptor| serves_query(descriptor, query))
            .cloned()
            .collect();
        debug!(
            fields = ?query.fields(),
            candidate_count = candidates.len(),
            "service candidates found"
        );
        candidates
    }

    fn find_notations(&self, system: &str) -> Vec<Notation> {
        self.notations
            .iter()
            .filter(|notation| notation.system == system)
            .cloned()
            .collect()
    }
}
