//! Service resolution: choose which candidates serve a query and build their calls.
//!
//! Selection narrows the registry's candidate list in four steps:
//!
//! 1. an explicit `system` keeps only that system's candidates;
//! 2. otherwise single-field, non-identity queries drop systems that are not
//!    preferred for the field (never dropping every candidate);
//! 3. an empty selection, or a query with aggregators, reverts to all candidates;
//! 4. single-field queries other than `site` keep only the first service.
//!
//! The selected descriptors are then turned into deduplicated network calls,
//! local provider invocations and output key paths.

use indexmap::IndexMap;
use serde_json::{Value, json};
use tracing::{debug, info};

use das_types::{Constraint, DEFAULT_INSTANCE, PendingRequest, ServiceDescriptor, StructuredQuery, scalar_to_string};
use das_util::{append_path_segment, append_query, has_placeholders, substitute_placeholders, substitute_positional};

use crate::field_paths::OutputKeyPath;

/// Systems whose answers are authoritative for a single looked-up field.
const PREFERRED_SYSTEMS: &[(&str, &[&str])] = &[
    ("dataset", &["dbs3"]),
    ("block", &["dbs3"]),
    ("file", &["dbs3"]),
    ("lumi", &["dbs3"]),
    ("run", &["dbs3", "runregistry"]),
    ("release", &["dbs3"]),
    ("config", &["reqmgr", "reqmgr2"]),
    ("mcm", &["mcm"]),
];

/// Field that always fans out to every selected service.
const FAN_OUT_FIELD: &str = "site";

/// Outcome of resolving one query.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// Selected descriptors, network and local alike.
    pub services: Vec<ServiceDescriptor>,
    /// Network calls keyed by URL; the first call built for a URL wins.
    pub requests: IndexMap<String, PendingRequest>,
    /// Local descriptors, unique by `system:urn`.
    pub local_providers: Vec<ServiceDescriptor>,
    /// Ordered output paths for the queried fields.
    pub output_keys: Vec<OutputKeyPath>,
}

impl Resolution {
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty() && self.local_providers.is_empty()
    }
}

/// Resolves `query` against the registry's `candidates`.
pub fn resolve(query: &StructuredQuery, candidates: &[ServiceDescriptor]) -> Resolution {
    let services = select_services(query, candidates);
    let mut resolution = Resolution::default();

    for descriptor in &services {
        if descriptor.is_local() {
            let identifier = descriptor.identifier();
            if !resolution.local_providers.iter().any(|known| known.identifier() == identifier) {
                resolution.local_providers.push(descriptor.clone());
            }
        } else {
            match build_request(query, descriptor) {
                Some(request) => {
                    resolution.requests.entry(request.url.clone()).or_insert(request);
                }
                None => debug!(service = %descriptor.identifier(), "service skipped: request could not be built"),
            }
        }

        for key in descriptor.lookup_keys() {
            if let Some(rec_key) = descriptor.rec_key_for(key) {
                let path = OutputKeyPath::new(key, rec_key);
                if !resolution.output_keys.contains(&path) {
                    resolution.output_keys.push(path);
                }
            }
        }
    }

    info!(
        fields = ?query.fields(),
        candidate_count = candidates.len(),
        selected = ?services.iter().map(ServiceDescriptor::identifier).collect::<Vec<_>>(),
        request_count = resolution.requests.len(),
        local_count = resolution.local_providers.len(),
        "query resolved"
    );
    resolution.services = services;
    resolution
}

/// Applies the selection policy to the candidate list.
pub fn select_services(query: &StructuredQuery, candidates: &[ServiceDescriptor]) -> Vec<ServiceDescriptor> {
    let mut selected: Vec<ServiceDescriptor> = match query.system() {
        Some(system) => candidates.iter().filter(|descriptor| descriptor.system == system).cloned().collect(),
        None => {
            let kept: Vec<ServiceDescriptor> = candidates
                .iter()
                .filter(|descriptor| !skip_system(query, &descriptor.system))
                .cloned()
                .collect();
            if kept.is_empty() { candidates.to_vec() } else { kept }
        }
    };

    if selected.is_empty() || !query.aggregators().is_empty() {
        selected = candidates.to_vec();
    }

    if let [field] = query.fields()
        && field != FAN_OUT_FIELD
    {
        selected.truncate(1);
    }
    selected
}

/// True when `system` is not preferred for the query's single field.
fn skip_system(query: &StructuredQuery, system: &str) -> bool {
    let [field] = query.fields() else {
        return false;
    };
    if query.is_identity_lookup() {
        return false;
    }
    PREFERRED_SYSTEMS
        .iter()
        .find(|(key, _)| key == field)
        .is_some_and(|(_, preferred)| !preferred.contains(&system))
}

/// Descriptor URL adjusted for the query instance.
///
/// PhEDEx XML endpoints are always called in their JSON form, and dbs3 URLs
/// carry the instance in their path.
pub fn descriptor_url(descriptor: &ServiceDescriptor, instance: &str) -> String {
    let mut url = descriptor.url.clone();
    if url.contains("phedex") {
        url = url.replace("xml", "json");
    }
    if descriptor.system == "dbs3" && instance != DEFAULT_INSTANCE {
        url = url.replace(DEFAULT_INSTANCE, instance);
    }
    url
}

/// Builds the network call for one descriptor, or `None` when the query
/// cannot fill it.
pub fn build_request(query: &StructuredQuery, descriptor: &ServiceDescriptor) -> Option<PendingRequest> {
    match descriptor.system.as_str() {
        "runregistry" => range_request(query, descriptor),
        "reqmgr" | "reqmgr2" | "mcm" => rest_request(query, descriptor),
        _ => query_string_request(query, descriptor),
    }
}

/// Run registry calls POST a numeric filter over the `run` constraint.
fn range_request(query: &StructuredQuery, descriptor: &ServiceDescriptor) -> Option<PendingRequest> {
    let constraint = query.constraint("run")?;
    let filter = run_filter(constraint)?;
    Some(PendingRequest {
        url: descriptor_url(descriptor, query.instance()),
        args: Some(json!({"filter": {"number": filter}})),
    })
}

/// Renders the run registry filter expression.
///
/// A scalar pins both bounds, a two-element list is a closed range and any
/// other list becomes an equality chain.
pub fn run_filter(constraint: &Constraint) -> Option<String> {
    let values = constraint.values();
    match (constraint, values.as_slice()) {
        (Constraint::Scalar(_), [value]) => Some(format!(">= {value} and <= {value}")),
        (Constraint::List(_), [low, high]) => Some(format!(">= {low} and <= {high}")),
        (Constraint::List(_), values) if !values.is_empty() => Some(
            values
                .iter()
                .map(|value| format!("= {value}"))
                .collect::<Vec<_>>()
                .join(" or "),
        ),
        _ => None,
    }
}

/// REST-style calls substitute `{key}` placeholders, or append the first
/// constraint value as a path segment when the template has none.
fn rest_request(query: &StructuredQuery, descriptor: &ServiceDescriptor) -> Option<PendingRequest> {
    let template = descriptor_url(descriptor, query.instance());
    let url = if has_placeholders(&template) {
        let values = placeholder_values(query, descriptor);
        let url = substitute_placeholders(&template, values.iter().map(|(key, value)| (key.as_str(), value.as_str())));
        if has_placeholders(&url) {
            return None;
        }
        url
    } else {
        match query.spec().values().next().and_then(Constraint::first) {
            Some(value) => append_path_segment(&template, &value),
            None => template,
        }
    };
    Some(PendingRequest { url, args: None })
}

/// Placeholder names a spec key can fill: the query key and its API argument.
fn placeholder_values(query: &StructuredQuery, descriptor: &ServiceDescriptor) -> Vec<(String, String)> {
    let mut values = Vec::new();
    for (key, constraint) in query.spec() {
        let Some(value) = constraint.first() else {
            continue;
        };
        values.push((key.clone(), value.clone()));
        if let Some(arg) = api_arg(descriptor, key) {
            values.push((arg.to_string(), value));
        }
    }
    values
}

fn api_arg<'a>(descriptor: &'a ServiceDescriptor, das_key: &str) -> Option<&'a str> {
    descriptor
        .das_map
        .iter()
        .find(|mapping| mapping.das_key == das_key)
        .and_then(|mapping| mapping.api_arg.as_deref())
}

/// Query-string calls merge the descriptor's default params with the query constraints.
///
/// Spec values land in `{key}`/`%s` markers when the template has them and in
/// the query string otherwise. A `required` param left unfilled skips the call;
/// unfilled `optional` params are dropped.
fn query_string_request(query: &StructuredQuery, descriptor: &ServiceDescriptor) -> Option<PendingRequest> {
    let mut url = descriptor_url(descriptor, query.instance());
    let mut params: IndexMap<String, Value> = descriptor.params.clone();
    let mut consumed: Vec<&str> = Vec::new();

    for (key, constraint) in query.spec() {
        let Some(value) = constraint.first() else {
            continue;
        };
        for name in [Some(key.as_str()), api_arg(descriptor, key)].into_iter().flatten() {
            if url.contains(&format!("{{{name}}}")) {
                url = substitute_placeholders(&url, [(name, value.as_str())]);
                consumed.push(key.as_str());
            }
        }
    }
    if url.contains("%s")
        && let Some((key, value)) = query
            .spec()
            .iter()
            .filter(|(key, _)| !consumed.contains(&key.as_str()))
            .find_map(|(key, constraint)| constraint.first().map(|value| (key, value)))
    {
        url = substitute_positional(&url, &value);
        consumed.push(key.as_str());
    }
    if has_placeholders(&url) {
        return None;
    }

    for (key, constraint) in query.spec() {
        let Some(arg) = api_arg(descriptor, key) else {
            continue;
        };
        if consumed.contains(&key.as_str()) {
            params.shift_remove(arg);
            continue;
        }
        let value = match constraint {
            Constraint::List(items) => Value::Array(items.clone()),
            Constraint::Scalar(value) => value.clone(),
        };
        params.insert(arg.to_string(), value);
    }

    let mut pairs = Vec::with_capacity(params.len());
    for (param, value) in &params {
        match value {
            Value::String(marker) if marker == "required" => {
                debug!(service = %descriptor.identifier(), param = %param, "required parameter not filled");
                return None;
            }
            Value::String(marker) if marker == "optional" => {}
            Value::Array(items) => pairs.extend(items.iter().map(|item| (param.clone(), scalar_to_string(item)))),
            Value::Null => {}
            other => pairs.push((param.clone(), scalar_to_string(other))),
        }
    }

    Some(PendingRequest {
        url: append_query(&url, &pairs),
        args: None,
    })
}
