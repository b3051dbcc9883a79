//! Shared type definitions for the DAS federation client.
//!
//! Every crate in the workspace speaks in terms of these types: the
//! [`StructuredQuery`] handed over by the query parser, the
//! [`ServiceDescriptor`] and [`Notation`] entries supplied by the service
//! maps, and the normalized [`Record`] emitted by the pipeline.

pub mod error_code;
pub mod query;
pub mod record;
pub mod service;

pub use error_code::ErrorCode;
pub use query::{AggregatorDirective, Constraint, DEFAULT_INSTANCE, GREP_FILTER, QueryError, StructuredQuery, scalar_to_string};
pub use record::{DasMeta, Record, RecordBody, error_code_of, error_message_of};
pub use service::{KeyMapping, Notation, PendingRequest, ServiceDescriptor, LOCAL_API};
