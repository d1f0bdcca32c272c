//! Collaborator contracts implemented by storage back ends.
//!
//! Every call forwards the caller's cancellation token unchanged and reports
//! failures as `anyhow::Error`; the pipeline converts them with
//! [`Error::from_provider`](crate::Error::from_provider).

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::query::{ProviderRoot, QueryExpr, QuerySource};
use crate::submit::ChangeSet;
use crate::value::{Record, Value};

/// Per-execution knobs handed to [`DataProvider::execute`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecutionOptions {
    /// Hard cap on the number of materialised results.
    pub max_results: Option<u64>,
}

/// Produces and executes queries.
#[async_trait]
pub trait DataProvider: Send + Sync {
    /// Identifies roots produced by this provider.
    fn name(&self) -> &str;

    /// Turns an abstract placeholder into a provider root, or `None` if the
    /// resource is not served by this provider.
    fn source(&self, source: &QuerySource) -> Option<ProviderRoot>;

    /// Materialises the results of a fully sourced query.
    ///
    /// # Errors
    /// Returns an error when the query cannot be evaluated.
    async fn execute(
        &self,
        query: &QueryExpr,
        options: &ExecutionOptions,
        cancel: &CancellationToken,
    ) -> anyhow::Result<Vec<Value>>;

    /// Counts the results of a fully sourced query.
    ///
    /// # Errors
    /// Returns an error when the query cannot be evaluated.
    async fn count(&self, query: &QueryExpr, cancel: &CancellationToken) -> anyhow::Result<u64>;
}

/// Loads entities for change-set initialization and commits change sets.
#[async_trait]
pub trait ChangeSetStore: Send + Sync {
    /// Loads the entity of `resource_set` identified by `key`.
    ///
    /// # Errors
    /// Returns an error when the store cannot be read.
    async fn find(
        &self,
        resource_set: &str,
        key: &BTreeMap<String, Value>,
        cancel: &CancellationToken,
    ) -> anyhow::Result<Option<Record>>;

    /// Applies every item of `change_set` atomically.
    ///
    /// # Errors
    /// Returns an error (possibly an [`AggregateError`](crate::AggregateError))
    /// when any change cannot be applied; nothing is applied in that case.
    async fn commit(
        &self,
        change_set: &ChangeSet,
        cancel: &CancellationToken,
    ) -> anyhow::Result<()>;
}
