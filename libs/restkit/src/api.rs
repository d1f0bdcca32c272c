//! API composition.
//!
//! An [`ApiBuilder`] collects the model provider, data collaborators, convention
//! surface and user stage handlers, then composes every stage into a
//! [`ServiceChain`]. Within a chain the built-in default sits at the bottom, the
//! convention stage above it and user handlers on top in registration order, so
//! the last registered handler runs first.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::chain::ServiceChain;
use crate::config::RestkitConfig;
use crate::conventions::{ConventionDispatcher, ConventionSurface};
use crate::error::Error;
use crate::model::{
    ApiTypeKey, DefaultModelMapper, Model, ModelCache, ModelError, ModelMapper, ModelProvider,
    StaticModelProvider,
};
use crate::property_bag::PropertyBag;
use crate::provider::{ChangeSetStore, DataProvider};
use crate::query::{
    ConventionBasedQueryExpressionAuthorizer, ConventionBasedQueryExpressionProcessor,
    ProviderExecutor, ProviderSourcer, QueryBuilder, QueryExecutor, QueryExpr,
    QueryExpressionAuthorizer, QueryExpressionExpander, QueryExpressionProcessor,
    QueryExpressionSourcer, QueryRequest, QueryResult, QuerySource, ResourcePath,
};
use crate::submit::{
    ChangeSet, ChangeSetInitializer, ChangeSetItemAuthorizer, ChangeSetItemFilter,
    ChangeSetItemValidator, ConventionBasedChangeSetItemAuthorizer,
    ConventionBasedChangeSetItemFilter, ModelConstraintValidator, StoreInitializer,
    StoreSubmitExecutor, SubmitExecutor, SubmitResult,
};

#[must_use]
pub struct ApiBuilder {
    api_type: ApiTypeKey,
    config: RestkitConfig,
    model_provider: Option<Arc<dyn ModelProvider>>,
    model_cache: Option<Arc<ModelCache>>,
    model_mapper: Arc<dyn ModelMapper>,
    data_provider: Option<Arc<dyn DataProvider>>,
    store: Option<Arc<dyn ChangeSetStore>>,
    conventions: ConventionSurface,
    query_sourcers: Vec<Arc<dyn QueryExpressionSourcer>>,
    query_authorizers: Vec<Arc<dyn QueryExpressionAuthorizer>>,
    query_expanders: Vec<Arc<dyn QueryExpressionExpander>>,
    query_processors: Vec<Arc<dyn QueryExpressionProcessor>>,
    query_executors: Vec<Arc<dyn QueryExecutor>>,
    change_set_initializers: Vec<Arc<dyn ChangeSetInitializer>>,
    item_authorizers: Vec<Arc<dyn ChangeSetItemAuthorizer>>,
    item_filters: Vec<Arc<dyn ChangeSetItemFilter>>,
    item_validators: Vec<Arc<dyn ChangeSetItemValidator>>,
    submit_executors: Vec<Arc<dyn SubmitExecutor>>,
}

impl ApiBuilder {
    pub fn new(api_type: ApiTypeKey) -> Self {
        Self {
            api_type,
            config: RestkitConfig::default(),
            model_provider: None,
            model_cache: None,
            model_mapper: Arc::new(DefaultModelMapper),
            data_provider: None,
            store: None,
            conventions: ConventionSurface::new(),
            query_sourcers: Vec::new(),
            query_authorizers: Vec::new(),
            query_expanders: Vec::new(),
            query_processors: Vec::new(),
            query_executors: Vec::new(),
            change_set_initializers: Vec::new(),
            item_authorizers: Vec::new(),
            item_filters: Vec::new(),
            item_validators: Vec::new(),
            submit_executors: Vec::new(),
        }
    }

    /// Keys the model cache by the Rust type of the API.
    pub fn for_api<A: ?Sized + 'static>() -> Self {
        Self::new(ApiTypeKey::of::<A>())
    }

    pub fn with_model(self, model: Model) -> Self {
        self.with_model_provider(Arc::new(StaticModelProvider::new(model)))
    }

    pub fn with_model_provider(mut self, provider: Arc<dyn ModelProvider>) -> Self {
        self.model_provider = Some(provider);
        self
    }

    /// Uses a private cache instead of the process-wide one.
    pub fn with_model_cache(mut self, cache: Arc<ModelCache>) -> Self {
        self.model_cache = Some(cache);
        self
    }

    pub fn with_model_mapper(mut self, mapper: Arc<dyn ModelMapper>) -> Self {
        self.model_mapper = mapper;
        self
    }

    pub fn with_data_provider(mut self, provider: Arc<dyn DataProvider>) -> Self {
        self.data_provider = Some(provider);
        self
    }

    pub fn with_change_set_store(mut self, store: Arc<dyn ChangeSetStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_conventions(mut self, surface: ConventionSurface) -> Self {
        self.conventions = surface;
        self
    }

    pub fn with_config(mut self, config: RestkitConfig) -> Self {
        self.config = config;
        self
    }

    pub fn add_query_sourcer(mut self, handler: Arc<dyn QueryExpressionSourcer>) -> Self {
        self.query_sourcers.push(handler);
        self
    }

    pub fn add_query_authorizer(mut self, handler: Arc<dyn QueryExpressionAuthorizer>) -> Self {
        self.query_authorizers.push(handler);
        self
    }

    pub fn add_query_expander(mut self, handler: Arc<dyn QueryExpressionExpander>) -> Self {
        self.query_expanders.push(handler);
        self
    }

    pub fn add_query_processor(mut self, handler: Arc<dyn QueryExpressionProcessor>) -> Self {
        self.query_processors.push(handler);
        self
    }

    pub fn add_query_executor(mut self, handler: Arc<dyn QueryExecutor>) -> Self {
        self.query_executors.push(handler);
        self
    }

    pub fn add_change_set_initializer(mut self, handler: Arc<dyn ChangeSetInitializer>) -> Self {
        self.change_set_initializers.push(handler);
        self
    }

    pub fn add_item_authorizer(mut self, handler: Arc<dyn ChangeSetItemAuthorizer>) -> Self {
        self.item_authorizers.push(handler);
        self
    }

    pub fn add_item_filter(mut self, handler: Arc<dyn ChangeSetItemFilter>) -> Self {
        self.item_filters.push(handler);
        self
    }

    pub fn add_item_validator(mut self, handler: Arc<dyn ChangeSetItemValidator>) -> Self {
        self.item_validators.push(handler);
        self
    }

    pub fn add_submit_executor(mut self, handler: Arc<dyn SubmitExecutor>) -> Self {
        self.submit_executors.push(handler);
        self
    }

    /// Composes every stage chain.
    ///
    /// # Errors
    /// `Error::Precondition` when no model provider is set or the configuration is invalid.
    pub fn build(self) -> Result<Arc<ApiConfiguration>, Error> {
        let model_provider = self.model_provider.ok_or_else(|| {
            Error::precondition(format!(
                "API '{}' has no model provider",
                self.api_type.as_str()
            ))
        })?;
        self.config
            .validate()
            .map_err(|e| Error::precondition(format!("invalid configuration: {e}")))?;

        let conventions_enabled = self.config.conventions.enabled;
        let dispatcher = Arc::new(ConventionDispatcher::new(
            Arc::new(self.conventions),
            self.config.conventions.report_near_misses,
        ));
        let convention = |enabled: bool| enabled.then(|| dispatcher.clone());
        let provider = self.data_provider;
        let store = self.store;

        let configuration = ApiConfiguration {
            api_type: self.api_type,
            model_provider,
            model_cache: self.model_cache,
            model_mapper: self.model_mapper,
            query_sourcers: compose(
                provider
                    .clone()
                    .map(|p| Arc::new(ProviderSourcer::new(p)) as Arc<dyn QueryExpressionSourcer>),
                self.query_sourcers,
            ),
            query_authorizers: compose(
                convention(conventions_enabled).map(|d| {
                    Arc::new(ConventionBasedQueryExpressionAuthorizer::new(d))
                        as Arc<dyn QueryExpressionAuthorizer>
                }),
                self.query_authorizers,
            ),
            query_expanders: compose(None, self.query_expanders),
            query_processors: compose(
                convention(conventions_enabled).map(|d| {
                    Arc::new(ConventionBasedQueryExpressionProcessor::new(d))
                        as Arc<dyn QueryExpressionProcessor>
                }),
                self.query_processors,
            ),
            query_executors: compose(
                provider.map(|p| Arc::new(ProviderExecutor::new(p)) as Arc<dyn QueryExecutor>),
                self.query_executors,
            ),
            change_set_initializers: compose(
                store
                    .clone()
                    .map(|s| Arc::new(StoreInitializer::new(s)) as Arc<dyn ChangeSetInitializer>),
                self.change_set_initializers,
            ),
            item_authorizers: compose(
                convention(conventions_enabled).map(|d| {
                    Arc::new(ConventionBasedChangeSetItemAuthorizer::new(d))
                        as Arc<dyn ChangeSetItemAuthorizer>
                }),
                self.item_authorizers,
            ),
            item_filters: compose(
                convention(conventions_enabled).map(|d| {
                    Arc::new(ConventionBasedChangeSetItemFilter::new(d)) as Arc<dyn ChangeSetItemFilter>
                }),
                self.item_filters,
            ),
            item_validators: compose(
                Some(Arc::new(ModelConstraintValidator) as Arc<dyn ChangeSetItemValidator>),
                self.item_validators,
            ),
            submit_executors: compose(
                store.map(|s| Arc::new(StoreSubmitExecutor::new(s)) as Arc<dyn SubmitExecutor>),
                self.submit_executors,
            ),
            config: self.config,
        };
        debug!(api = configuration.api_type.as_str(), "API configuration built");
        Ok(Arc::new(configuration))
    }
}

fn compose<H: ?Sized>(default: Option<Arc<H>>, registered: Vec<Arc<H>>) -> ServiceChain<H> {
    ServiceChain::from_registrations(default.into_iter().chain(registered))
}

/// Immutable, shareable result of [`ApiBuilder::build`].
pub struct ApiConfiguration {
    api_type: ApiTypeKey,
    config: RestkitConfig,
    model_provider: Arc<dyn ModelProvider>,
    model_cache: Option<Arc<ModelCache>>,
    model_mapper: Arc<dyn ModelMapper>,
    query_sourcers: ServiceChain<dyn QueryExpressionSourcer>,
    query_authorizers: ServiceChain<dyn QueryExpressionAuthorizer>,
    query_expanders: ServiceChain<dyn QueryExpressionExpander>,
    query_processors: ServiceChain<dyn QueryExpressionProcessor>,
    query_executors: ServiceChain<dyn QueryExecutor>,
    change_set_initializers: ServiceChain<dyn ChangeSetInitializer>,
    item_authorizers: ServiceChain<dyn ChangeSetItemAuthorizer>,
    item_filters: ServiceChain<dyn ChangeSetItemFilter>,
    item_validators: ServiceChain<dyn ChangeSetItemValidator>,
    submit_executors: ServiceChain<dyn SubmitExecutor>,
}

impl ApiConfiguration {
    /// A fresh per-request API instance.
    #[must_use]
    pub fn create_api(self: &Arc<Self>) -> Api {
        Api {
            configuration: Arc::clone(self),
            properties: PropertyBag::new(),
        }
    }

    #[must_use]
    pub fn api_type(&self) -> ApiTypeKey {
        self.api_type
    }

    #[must_use]
    pub fn config(&self) -> &RestkitConfig {
        &self.config
    }

    #[must_use]
    pub fn model_mapper(&self) -> &dyn ModelMapper {
        self.model_mapper.as_ref()
    }

    /// The model for this API, built at most once per cache.
    ///
    /// # Errors
    /// `Error::Cancelled` when `cancel` fires first, `Error::Model` when the build fails.
    pub async fn model(&self, cancel: &CancellationToken) -> Result<Arc<Model>, Error> {
        let cache: &ModelCache = match &self.model_cache {
            Some(cache) => cache,
            None => ModelCache::global(),
        };
        cache
            .get_or_build(self.api_type, self.model_provider.as_ref(), cancel)
            .await
            .map_err(|e| match e {
                ModelError::Cancelled { .. } => Error::Cancelled,
                other => Error::Model(other),
            })
    }

    #[must_use]
    pub fn query_sourcers(&self) -> &ServiceChain<dyn QueryExpressionSourcer> {
        &self.query_sourcers
    }

    #[must_use]
    pub fn query_authorizers(&self) -> &ServiceChain<dyn QueryExpressionAuthorizer> {
        &self.query_authorizers
    }

    #[must_use]
    pub fn query_expanders(&self) -> &ServiceChain<dyn QueryExpressionExpander> {
        &self.query_expanders
    }

    #[must_use]
    pub fn query_processors(&self) -> &ServiceChain<dyn QueryExpressionProcessor> {
        &self.query_processors
    }

    #[must_use]
    pub fn query_executors(&self) -> &ServiceChain<dyn QueryExecutor> {
        &self.query_executors
    }

    #[must_use]
    pub fn change_set_initializers(&self) -> &ServiceChain<dyn ChangeSetInitializer> {
        &self.change_set_initializers
    }

    #[must_use]
    pub fn item_authorizers(&self) -> &ServiceChain<dyn ChangeSetItemAuthorizer> {
        &self.item_authorizers
    }

    #[must_use]
    pub fn item_filters(&self) -> &ServiceChain<dyn ChangeSetItemFilter> {
        &self.item_filters
    }

    #[must_use]
    pub fn item_validators(&self) -> &ServiceChain<dyn ChangeSetItemValidator> {
        &self.item_validators
    }

    #[must_use]
    pub fn submit_executors(&self) -> &ServiceChain<dyn SubmitExecutor> {
        &self.submit_executors
    }
}

/// Per-request API instance: shared configuration plus a private property bag.
pub struct Api {
    configuration: Arc<ApiConfiguration>,
    properties: PropertyBag,
}

impl Api {
    #[must_use]
    pub fn configuration(&self) -> &ApiConfiguration {
        &self.configuration
    }

    #[must_use]
    pub fn properties(&self) -> &PropertyBag {
        &self.properties
    }

    /// # Errors
    /// See [`ApiConfiguration::model`].
    pub async fn model(&self, cancel: &CancellationToken) -> Result<Arc<Model>, Error> {
        self.configuration.model(cancel).await
    }

    /// An abstract query over the resource called `name`, not yet sourced.
    ///
    /// # Errors
    /// `Error::InvalidPath` when the mapper does not know `name`.
    pub fn source(&self, model: &Model, name: &str) -> Result<QueryExpr, Error> {
        let resolved = self
            .configuration
            .model_mapper()
            .resolve(model, name)
            .ok_or_else(|| Error::invalid_path(format!("unknown resource '{name}'")))?;
        Ok(QueryExpr::source(QuerySource {
            name: resolved.name,
            element_type: resolved.type_name,
            kind: resolved.kind,
        }))
    }

    /// Runs `request` through the query pipeline.
    ///
    /// # Errors
    /// Any pipeline failure: forbidden, unsupported, provider errors.
    pub async fn query(
        &self,
        request: QueryRequest,
        cancel: &CancellationToken,
    ) -> Result<QueryResult, Error> {
        crate::query::handler::execute(self, request, cancel).await
    }

    /// Parses `path`, builds its query and runs it.
    ///
    /// # Errors
    /// Path and builder errors as well as everything [`Api::query`] reports.
    #[instrument(skip(self, cancel))]
    pub async fn query_path(
        &self,
        path: &str,
        cancel: &CancellationToken,
    ) -> Result<QueryResult, Error> {
        let model = self.model(cancel).await?;
        let path = ResourcePath::parse(&model, path)?;
        let built = QueryBuilder::new(self, &model).build(&path)?;
        self.query(QueryRequest::from(built), cancel).await
    }

    /// Runs `change_set` through the submit pipeline.
    ///
    /// # Errors
    /// Forbidden, not-found, validation, concurrency and store failures.
    pub async fn submit(
        &self,
        change_set: ChangeSet,
        cancel: &CancellationToken,
    ) -> Result<SubmitResult, Error> {
        crate::submit::handler::submit(self, change_set, cancel).await
    }

    /// Releases request-scoped state.
    pub fn dispose(&self) {
        self.properties.clear();
    }
}

impl Drop for Api {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::chain::Next;
    use crate::model::tests::sales_model;
    use crate::query::{QueryContext, QueryExpressionContext};
    use crate::testing::{RecordingProvider, test_api_builder};
    use crate::value::Value;

    #[test]
    fn build_requires_a_model_provider() {
        let err = ApiBuilder::new(ApiTypeKey::named("no-model")).build().err().unwrap();
        assert!(matches!(err, Error::Precondition(_)), "{err:?}");
    }

    #[test]
    fn build_rejects_invalid_config() {
        let mut config = RestkitConfig::default();
        config.batch.dependency_marker = String::new();
        let err = test_api_builder(sales_model())
            .with_config(config)
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, Error::Precondition(_)), "{err:?}");
    }

    #[test]
    fn chains_stack_defaults_conventions_and_user_handlers() {
        struct Deny;
        impl QueryExpressionAuthorizer for Deny {
            fn authorize(
                &self,
                _ctx: &QueryExpressionContext<'_>,
                _next: Next<'_, dyn QueryExpressionAuthorizer>,
            ) -> bool {
                false
            }
        }

        let configuration = test_api_builder(sales_model())
            .with_data_provider(Arc::new(RecordingProvider::default()))
            .add_query_authorizer(Arc::new(Deny))
            .build()
            .unwrap();
        assert_eq!(configuration.query_sourcers().len(), 1);
        assert_eq!(configuration.query_authorizers().len(), 2);
        assert_eq!(configuration.item_validators().len(), 1);
        assert!(configuration.submit_executors().is_empty());

        let mut config = RestkitConfig::default();
        config.conventions.enabled = false;
        let bare = test_api_builder(sales_model()).with_config(config).build().unwrap();
        assert!(bare.query_authorizers().is_empty());
        assert!(bare.item_filters().is_empty());
    }

    struct CountingExecutor(AtomicUsize);

    #[async_trait]
    impl QueryExecutor for CountingExecutor {
        async fn execute(
            &self,
            ctx: &QueryContext<'_>,
            query: &QueryExpr,
            next: Next<'_, dyn QueryExecutor>,
        ) -> Result<Vec<Value>, Error> {
            self.0.fetch_add(1, Ordering::SeqCst);
            next.execute(ctx, query).await
        }

        async fn count(
            &self,
            ctx: &QueryContext<'_>,
            query: &QueryExpr,
            next: Next<'_, dyn QueryExecutor>,
        ) -> Result<u64, Error> {
            next.count(ctx, query).await
        }
    }

    #[tokio::test]
    async fn user_executor_decorates_the_provider() {
        let counter = Arc::new(CountingExecutor(AtomicUsize::new(0)));
        let provider = Arc::new(RecordingProvider::with_rows(vec![Value::Int(1)]));
        let api = test_api_builder(sales_model())
            .with_data_provider(provider.clone())
            .add_query_executor(counter.clone())
            .build()
            .unwrap()
            .create_api();

        let result = api.query_path("Products", &CancellationToken::new()).await.unwrap();
        assert_eq!(result.results.len(), 1);
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
        assert_eq!(provider.executed(), vec!["Products".to_owned()]);
    }

    #[tokio::test]
    async fn query_without_executor_is_unsupported() {
        let api = test_api_builder(sales_model()).build().unwrap().create_api();
        let err = api
            .query_path("Products", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)), "{err:?}");
    }

    #[tokio::test]
    async fn source_of_unknown_resource_is_invalid_path() {
        let api = test_api_builder(sales_model()).build().unwrap().create_api();
        let model = api.model(&CancellationToken::new()).await.unwrap();
        assert!(matches!(api.source(&model, "Nope"), Err(Error::InvalidPath(_))));
    }

    #[tokio::test]
    async fn model_build_honours_cancellation() {
        let api = test_api_builder(sales_model()).build().unwrap().create_api();
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(api.model(&cancel).await, Err(Error::Cancelled)));
    }

    #[test]
    fn dispose_clears_request_properties() {
        let api = test_api_builder(sales_model()).build().unwrap().create_api();
        api.properties().set("k", 1_u64);
        api.dispose();
        assert!(api.properties().is_empty());
    }
}
