//! End-to-end query execution.
//!
//! [`Pipeline::run`] wires the stages together: registry lookup, service
//! resolution, concurrent fetching, correlation and normalization, local
//! providers, aggregation and the error scan. Projection is left to the
//! caller through [`QueryOutcome`].

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use chrono::Utc;
use das_registry::ServiceRegistry;
use das_types::{ErrorCode, GREP_FILTER, Notation, Record, StructuredQuery};
use das_util::{Fetcher, block_on_future};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    aggregate::{self, AggregationError, summary_output_keys},
    config::ClientConfig,
    correlate::match_descriptor,
    fetch::FetchCoordinator,
    field_paths::OutputKeyPath,
    normalize::normalize,
    project::project_query,
    provider::LocalProviders,
    resolve::resolve,
    status::{QueryStatus, scan_errors},
};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Aggregation(#[from] AggregationError),

    #[error("query runtime failed: {0}")]
    Runtime(String),
}

impl PipelineError {
    pub fn code(&self) -> ErrorCode {
        match self {
            PipelineError::Aggregation(_) => ErrorCode::Aggregation,
            PipelineError::Runtime(_) => ErrorCode::DasServerError,
        }
    }
}

/// Records produced for one query plus what is needed to print them.
#[derive(Debug, Clone, Default)]
pub struct QueryOutcome {
    pub records: Vec<Record>,
    pub output_keys: Vec<OutputKeyPath>,
    pub status: QueryStatus,
    pub elapsed: Duration,
}

impl QueryOutcome {
    /// Plain or grep output lines.
    pub fn lines(&self, query: &StructuredQuery, separator: &str) -> Vec<String> {
        project_query(query, &self.records, &self.output_keys, separator)
    }

    /// Every record, error records included, as one JSON array.
    pub fn to_json(&self) -> Value {
        Value::Array(self.records.iter().map(Record::to_value).collect())
    }

    /// Status envelope wrapping the JSON records.
    pub fn envelope(&self, query: &StructuredQuery) -> Value {
        json!({
            "status": if self.status.is_ok() { "ok" } else { "fail" },
            "mongo_query": query.to_document(),
            "nresults": self.records.len(),
            "timestamp": Utc::now().timestamp(),
            "ctime": self.elapsed.as_secs_f64(),
            "data": self.to_json(),
        })
    }
}

/// Query executor over a registry, a transport and the local providers.
pub struct Pipeline {
    registry: Arc<dyn ServiceRegistry>,
    coordinator: FetchCoordinator,
    providers: LocalProviders,
    config: ClientConfig,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("providers", &self.providers)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    pub fn new(registry: Arc<dyn ServiceRegistry>, fetcher: Arc<dyn Fetcher>, providers: LocalProviders, config: ClientConfig) -> Self {
        Self {
            registry,
            coordinator: FetchCoordinator::new(fetcher),
            providers,
            config,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Runs `query` to completion.
    ///
    /// Service and provider failures degrade into missing or error records;
    /// only an aggregation contract violation aborts the query.
    pub async fn run(&self, query: &StructuredQuery) -> Result<QueryOutcome, PipelineError> {
        let started = Instant::now();
        for kind in query.filters().keys().filter(|kind| kind.as_str() != GREP_FILTER) {
            warn!(filter = %kind, "unsupported filter ignored");
        }

        let candidates = self.registry.find_services(query);
        let resolution = resolve(query, &candidates);
        if resolution.is_empty() {
            info!(fields = ?query.fields(), "no service can answer the query");
            return Ok(QueryOutcome {
                output_keys: resolution.output_keys,
                elapsed: started.elapsed(),
                ..QueryOutcome::default()
            });
        }

        let responses = self.coordinator.fetch_all(resolution.requests.values()).await;
        let mut records = Vec::new();
        let mut notations: HashMap<String, Vec<Notation>> = HashMap::new();
        for raw in &responses {
            let Some(descriptor) = match_descriptor(&raw.url, &resolution.services, query.instance()) else {
                warn!(url = %raw.url, "response matched no service; dropped");
                continue;
            };
            let system_notations = notations
                .entry(descriptor.system.clone())
                .or_insert_with(|| self.registry.find_notations(&descriptor.system));
            let normalized = normalize(raw, descriptor, system_notations, query);
            debug!(
                url = %raw.url,
                service = %descriptor.identifier(),
                record_count = normalized.len(),
                "response normalized"
            );
            records.extend(normalized);
        }

        for descriptor in &resolution.local_providers {
            match self.providers.run_local(descriptor, query) {
                Ok(local) => records.extend(local),
                Err(error) => warn!(service = %descriptor.identifier(), error = %error, "local provider failed"),
            }
        }

        let records = aggregate::apply(query, records)?;
        let output_keys = if query.aggregators().is_empty() {
            resolution.output_keys
        } else {
            summary_output_keys()
        };
        let status = scan_errors(&records);
        let elapsed = started.elapsed();
        info!(
            record_count = records.len(),
            duration_ms = elapsed.as_millis() as u64,
            status = status.code,
            "query finished"
        );

        Ok(QueryOutcome {
            records,
            output_keys,
            status,
            elapsed,
        })
    }

    /// Blocking form of [`Pipeline::run`] for synchronous callers.
    pub fn run_blocking(&self, query: &StructuredQuery) -> Result<QueryOutcome, PipelineError> {
        block_on_future(self.run(query)).map_err(|error| PipelineError::Runtime(error.to_string()))?
    }
}
