#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! Query translation and change-set submission for convention-driven OData APIs.
//!
//! An [`ApiConfiguration`] holds the model, the registered handler chains and
//! the convention hooks of one API type; an [`Api`] is the per-request instance
//! that runs queries ([`Api::query`], [`Api::query_path`]) and submits change
//! sets ([`Api::submit`]). Batch change sets are coordinated by
//! [`batch::ChangeSetRequestItem`].
//!
//! Data access is pluggable through [`DataProvider`] and [`ChangeSetStore`].

pub mod api;
pub mod batch;
pub mod chain;
pub mod config;
pub mod conventions;
pub mod error;
pub mod model;
pub mod problem;
pub mod property_bag;
pub mod provider;
pub mod query;
pub mod submit;
pub mod value;

#[cfg(test)]
mod testing;

pub use api::{Api, ApiBuilder, ApiConfiguration};
pub use config::{ConfigError, RestkitConfig};
pub use conventions::{ConventionDispatcher, ConventionSurface};
pub use error::{AggregateError, Error};
pub use model::{ApiTypeKey, Model, ModelCache, ModelProvider, TypeRef};
pub use problem::Problem;
pub use property_bag::PropertyBag;
pub use provider::{ChangeSetStore, DataProvider, ExecutionOptions};
pub use query::{QueryRequest, QueryResult};
pub use submit::{ChangeSet, ChangeSetItem, SubmitResult};
pub use value::{PrimitiveKind, Record, Value};
