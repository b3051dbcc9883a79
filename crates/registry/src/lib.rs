//! Service map registry for the DAS client.
//!
//! The registry answers two questions for the pipeline: which service
//! descriptors can serve a query, and which notations rename a system's raw
//! payload fields. [`ServiceRegistry`] is the contract; [`ServiceMaps`] is the
//! file-backed implementation loaded from a JSON or YAML service map document.

pub mod config;
pub mod models;

pub use config::{MAPS_PATH_ENV, RegistryConfig, default_maps_path};
pub use models::{RegistryError, ServiceMaps};

use das_types::{Notation, ServiceDescriptor, StructuredQuery};

/// Lookup contract consumed by the pipeline.
pub trait ServiceRegistry: Send + Sync {
    /// Ordered candidate descriptors able to serve `query`.
    fn find_services(&self, query: &StructuredQuery) -> Vec<ServiceDescriptor>;

    /// Notations registered for `system`.
    fn find_notations(&self, system: &str) -> Vec<Notation>;
}
