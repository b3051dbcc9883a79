//! # DAS Engine
//!
//! The engine answers a structured query by federating it across the backend
//! services described in the service maps, then merging their answers into one
//! uniform record set.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use das_engine::{ClientConfig, LocalProviders, Pipeline};
//! use das_registry::RegistryConfig;
//! use das_types::StructuredQuery;
//! use das_util::HttpFetcher;
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let config = ClientConfig::load()?;
//! let maps = RegistryConfig::resolve(None).load_maps()?;
//! let providers = LocalProviders::with_builtins(maps.das_keys())?;
//! providers.validate(&maps.services)?;
//! let fetcher = HttpFetcher::new(config.retry_policy(), config.user_agent.as_deref())?;
//!
//! let pipeline = Pipeline::new(Arc::new(maps), Arc::new(fetcher), providers, config);
//! let query = StructuredQuery::new(["file"])?.with_spec("dataset", "/A/B/C");
//! let outcome = pipeline.run(&query).await?;
//! for line in outcome.lines(&query, " ") {
//!     println!("{line}");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **`resolve`**: Candidate selection and request building
//! - **`fetch`**: Concurrent fetching of deduplicated URLs
//! - **`correlate`**: Mapping responses back to descriptors
//! - **`normalize`**: Payload unmarshalling, notations and provenance
//! - **`provider`**: In-process providers for `local_api` descriptors
//! - **`aggregate`**: File grouping and summary functions
//! - **`project`**: Output lines and uniqueness
//! - **`status`**: Exit status from error records
//! - **`pipeline`**: Orchestration of the stages above

pub mod aggregate;
pub mod config;
pub mod correlate;
pub mod fetch;
pub mod field_paths;
pub mod normalize;
pub mod pipeline;
pub mod project;
pub mod provider;
pub mod resolve;
pub mod status;

pub use aggregate::{AggregateFunction, AggregationError};
pub use config::{CONFIG_PATH_ENV, ClientConfig, ConfigError};
pub use fetch::{FetchCoordinator, RawResponse};
pub use field_paths::OutputKeyPath;
pub use pipeline::{Pipeline, PipelineError, QueryOutcome};
pub use project::{ProjectionMode, project, project_query, unique_sorted};
pub use provider::{LocalProvider, LocalProviders, ProviderError};
pub use resolve::{Resolution, resolve};
pub use status::{QueryStatus, scan_errors};
