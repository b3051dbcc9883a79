//! In-process providers for descriptors whose URL is the `local_api` sentinel.
//!
//! Modules:
//! - `builtin`: Providers shipped with the client (`das:keys`, `runregistry:run_range`)
//!
//! [`LocalProviders`] is a closed dispatch table keyed by `system:urn`. It is
//! filled once at startup and validated against the loaded service maps, so a
//! descriptor without a provider fails before any query runs.

mod builtin;

use std::{fmt, sync::Arc};

use das_types::{Record, RecordBody, ServiceDescriptor, StructuredQuery};
use indexmap::{IndexMap, IndexSet};
use thiserror::Error;
use tracing::debug;

pub use builtin::{DasKeysProvider, MAX_RUN_RANGE, RunRangeProvider};

use crate::normalize::adjust_records;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("local provider '{0}' is already registered")]
    Duplicate(String),

    #[error("no local provider registered for {}", .0.join(", "))]
    Missing(Vec<String>),

    #[error("local provider '{key}' failed: {message}")]
    Failed { key: String, message: String },
}

/// Trait implemented by in-process data sources.
///
/// Providers return rows already keyed by the descriptor's lookup keys
/// (`{"run": [{"run_number": 1}]}`); provenance is stamped by the caller.
pub trait LocalProvider: Send + Sync + fmt::Debug {
    fn provide(&self, query: &StructuredQuery) -> Result<Vec<RecordBody>, String>;
}

/// Dispatch table of local providers keyed by `system:urn`.
#[derive(Clone, Default)]
pub struct LocalProviders {
    table: IndexMap<String, Arc<dyn LocalProvider>>,
}

impl fmt::Debug for LocalProviders {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalProviders")
            .field("keys", &self.table.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl LocalProviders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table with the built-in providers registered.
    ///
    /// `das_keys` is the key list reported by `das:keys`.
    pub fn with_builtins(das_keys: Vec<String>) -> Result<Self, ProviderError> {
        let mut providers = Self::new();
        providers.register("das", "keys", DasKeysProvider::new(das_keys))?;
        providers.register("runregistry", "run_range", RunRangeProvider)?;
        Ok(providers)
    }

    /// Registers a provider; each `system:urn` may be registered once.
    pub fn register(&mut self, system: &str, urn: &str, provider: impl LocalProvider + 'static) -> Result<(), ProviderError> {
        let key = format!("{system}:{urn}");
        if self.table.contains_key(&key) {
            return Err(ProviderError::Duplicate(key));
        }
        self.table.insert(key, Arc::new(provider));
        Ok(())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.table.contains_key(key)
    }

    /// Fails when a local descriptor has no registered provider.
    pub fn validate<'a>(&self, descriptors: impl IntoIterator<Item = &'a ServiceDescriptor>) -> Result<(), ProviderError> {
        let missing: IndexSet<String> = descriptors
            .into_iter()
            .filter(|descriptor| descriptor.is_local())
            .map(ServiceDescriptor::identifier)
            .filter(|key| !self.contains(key))
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ProviderError::Missing(missing.into_iter().collect()))
        }
    }

    /// Runs the provider for `descriptor` and stamps its rows.
    pub fn run_local(&self, descriptor: &ServiceDescriptor, query: &StructuredQuery) -> Result<Vec<Record>, ProviderError> {
        let key = descriptor.identifier();
        let provider = self
            .table
            .get(&key)
            .ok_or_else(|| ProviderError::Missing(vec![key.clone()]))?;
        let rows = provider
            .provide(query)
            .map_err(|message| ProviderError::Failed { key: key.clone(), message })?;
        debug!(provider = %key, row_count = rows.len(), "local provider finished");
        Ok(adjust_records(query, descriptor, rows))
    }
}
