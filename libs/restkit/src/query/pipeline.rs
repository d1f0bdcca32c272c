//! Query pipeline stages.
//!
//! Sourcing, authorization, expansion and processing are pure rewrites of the
//! visited node and run synchronously; execution is the only stage that does I/O.
//! Each stage is a [`ServiceChain`](crate::chain::ServiceChain) of handlers; the
//! inherent methods on `Next<'_, dyn Stage>` are the drivers handlers delegate to.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::api::Api;
use crate::chain::Next;
use crate::error::Error;
use crate::model::Model;
use crate::property_bag::keys;
use crate::provider::{DataProvider, ExecutionOptions};
use crate::query::{QueryExpr, QueryExpressionContext};
use crate::value::Value;

/// Replaces an abstract source placeholder with a provider-backed root.
///
/// Must return `None` for nodes that are already sourced.
pub trait QueryExpressionSourcer: Send + Sync {
    fn source(
        &self,
        ctx: &QueryExpressionContext<'_>,
        next: Next<'_, dyn QueryExpressionSourcer>,
    ) -> Option<QueryExpr>;
}

/// Decides whether the visited node may be queried at all.
pub trait QueryExpressionAuthorizer: Send + Sync {
    fn authorize(
        &self,
        ctx: &QueryExpressionContext<'_>,
        next: Next<'_, dyn QueryExpressionAuthorizer>,
    ) -> bool;
}

/// Rewrites composed operators the provider cannot express natively.
/// An expanded node is visited again from scratch.
pub trait QueryExpressionExpander: Send + Sync {
    fn expand(
        &self,
        ctx: &QueryExpressionContext<'_>,
        next: Next<'_, dyn QueryExpressionExpander>,
    ) -> Option<QueryExpr>;
}

/// Final provider-specific rewrite of the visited node.
pub trait QueryExpressionProcessor: Send + Sync {
    fn process(
        &self,
        ctx: &QueryExpressionContext<'_>,
        next: Next<'_, dyn QueryExpressionProcessor>,
    ) -> Option<QueryExpr>;
}

/// State shared by executors for one query.
pub struct QueryContext<'a> {
    pub api: &'a Api,
    pub model: &'a Model,
    pub cancel: &'a CancellationToken,
}

/// Materialises results.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(
        &self,
        ctx: &QueryContext<'_>,
        query: &QueryExpr,
        next: Next<'_, dyn QueryExecutor>,
    ) -> Result<Vec<Value>, Error>;

    async fn count(
        &self,
        ctx: &QueryContext<'_>,
        query: &QueryExpr,
        next: Next<'_, dyn QueryExecutor>,
    ) -> Result<u64, Error>;
}

impl Next<'_, dyn QueryExpressionSourcer> {
    pub fn source(self, ctx: &QueryExpressionContext<'_>) -> Option<QueryExpr> {
        let (handler, rest) = self.split_first()?;
        handler.source(ctx, rest)
    }
}

impl Next<'_, dyn QueryExpressionAuthorizer> {
    /// Allows when no handler objects.
    pub fn authorize(self, ctx: &QueryExpressionContext<'_>) -> bool {
        match self.split_first() {
            Some((handler, rest)) => handler.authorize(ctx, rest),
            None => true,
        }
    }
}

impl Next<'_, dyn QueryExpressionExpander> {
    pub fn expand(self, ctx: &QueryExpressionContext<'_>) -> Option<QueryExpr> {
        let (handler, rest) = self.split_first()?;
        handler.expand(ctx, rest)
    }
}

impl Next<'_, dyn QueryExpressionProcessor> {
    pub fn process(self, ctx: &QueryExpressionContext<'_>) -> Option<QueryExpr> {
        let (handler, rest) = self.split_first()?;
        handler.process(ctx, rest)
    }
}

impl Next<'_, dyn QueryExecutor> {
    /// # Errors
    /// `Error::Unsupported` when no executor is registered, otherwise whatever the executor reports.
    pub async fn execute(
        self,
        ctx: &QueryContext<'_>,
        query: &QueryExpr,
    ) -> Result<Vec<Value>, Error> {
        match self.split_first() {
            Some((handler, rest)) => handler.execute(ctx, query, rest).await,
            None => Err(Error::unsupported("no query executor is registered")),
        }
    }

    /// # Errors
    /// `Error::Unsupported` when no executor is registered, otherwise whatever the executor reports.
    pub async fn count(self, ctx: &QueryContext<'_>, query: &QueryExpr) -> Result<u64, Error> {
        match self.split_first() {
            Some((handler, rest)) => handler.count(ctx, query, rest).await,
            None => Err(Error::unsupported("no query executor is registered")),
        }
    }
}

/// Sources placeholders through the configured data provider.
pub struct ProviderSourcer {
    provider: Arc<dyn DataProvider>,
}

impl ProviderSourcer {
    #[must_use]
    pub fn new(provider: Arc<dyn DataProvider>) -> Self {
        Self { provider }
    }
}

impl QueryExpressionSourcer for ProviderSourcer {
    fn source(
        &self,
        ctx: &QueryExpressionContext<'_>,
        next: Next<'_, dyn QueryExpressionSourcer>,
    ) -> Option<QueryExpr> {
        if let Some(QueryExpr::Source(source)) = ctx.visited_node()
            && let Some(root) = self.provider.source(source)
        {
            return Some(QueryExpr::Root(root));
        }
        next.source(ctx)
    }
}

/// Executes fully sourced queries on the configured data provider.
pub struct ProviderExecutor {
    provider: Arc<dyn DataProvider>,
}

impl ProviderExecutor {
    #[must_use]
    pub fn new(provider: Arc<dyn DataProvider>) -> Self {
        Self { provider }
    }

    fn ensure_sourced(query: &QueryExpr) -> Result<(), Error> {
        if query.is_sourced() {
            Ok(())
        } else {
            Err(Error::unsupported(format!(
                "query over '{}' was never sourced",
                query.root_name().unwrap_or_default()
            )))
        }
    }
}

#[async_trait]
impl QueryExecutor for ProviderExecutor {
    async fn execute(
        &self,
        ctx: &QueryContext<'_>,
        query: &QueryExpr,
        _next: Next<'_, dyn QueryExecutor>,
    ) -> Result<Vec<Value>, Error> {
        Self::ensure_sourced(query)?;
        let options = ctx
            .api
            .properties()
            .get::<ExecutionOptions>(keys::EXECUTION_OPTIONS)
            .unwrap_or_default();
        self.provider
            .execute(query, &options, ctx.cancel)
            .await
            .map_err(Error::from_provider)
    }

    async fn count(
        &self,
        ctx: &QueryContext<'_>,
        query: &QueryExpr,
        _next: Next<'_, dyn QueryExecutor>,
    ) -> Result<u64, Error> {
        Self::ensure_sourced(query)?;
        self.provider
            .count(query, ctx.cancel)
            .await
            .map_err(Error::from_provider)
    }
}
