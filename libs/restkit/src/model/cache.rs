//! Per-API-type model memoization.
//!
//! A model is built at most once per API type. Concurrent callers share the
//! in-flight build: the first caller drives it while the rest wait on the same
//! slot. A build that fails or is cancelled leaves the slot empty, so the next
//! waiter retries and ends up with the single winning model.

use std::fmt;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::Model;

/// Stable identity of an API type, based on `type_name::<T>()`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ApiTypeKey(&'static str);

impl ApiTypeKey {
    #[inline]
    #[must_use]
    pub fn of<T: ?Sized + 'static>() -> Self {
        ApiTypeKey(std::any::type_name::<T>())
    }

    #[must_use]
    pub const fn named(name: &'static str) -> Self {
        ApiTypeKey(name)
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        self.0
    }
}

impl fmt::Debug for ApiTypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

impl fmt::Display for ApiTypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

#[derive(thiserror::Error, Debug, Clone)]
pub enum ModelError {
    #[error("model build for '{api}' was cancelled")]
    Cancelled { api: ApiTypeKey },

    #[error("model build for '{api}' failed: {message}")]
    BuildFailed { api: ApiTypeKey, message: String },
}

/// Produces the model of one API type.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// # Errors
    /// Returns an error when the model cannot be produced.
    async fn build_model(&self, cancel: &CancellationToken) -> anyhow::Result<Model>;
}

/// A provider that hands out a prebuilt model.
pub struct StaticModelProvider(Model);

impl StaticModelProvider {
    #[must_use]
    pub fn new(model: Model) -> Self {
        Self(model)
    }
}

#[async_trait]
impl ModelProvider for StaticModelProvider {
    async fn build_model(&self, _cancel: &CancellationToken) -> anyhow::Result<Model> {
        Ok(self.0.clone())
    }
}

type Slot = Arc<OnceCell<Arc<Model>>>;

static GLOBAL: LazyLock<ModelCache> = LazyLock::new(ModelCache::new);

#[derive(Default)]
pub struct ModelCache {
    slots: DashMap<ApiTypeKey, Slot>,
}

impl ModelCache {
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: DashMap::new(),
        }
    }

    /// Process-wide cache shared by every API configuration that does not bring its own.
    #[must_use]
    pub fn global() -> &'static ModelCache {
        &GLOBAL
    }

    /// Returns the memoized model for `api`, building it through `provider` when absent.
    ///
    /// # Errors
    /// Returns `ModelError::Cancelled` if `cancel` fires while this caller builds
    /// or waits for another caller's build, and `ModelError::BuildFailed` if the
    /// provider fails. Neither is memoized.
    pub async fn get_or_build(
        &self,
        api: ApiTypeKey,
        provider: &dyn ModelProvider,
        cancel: &CancellationToken,
    ) -> Result<Arc<Model>, ModelError> {
        // Clone the slot out so no map shard lock is held across the await.
        let slot: Slot = Arc::clone(&self.slots.entry(api).or_default());

        if let Some(model) = slot.get() {
            return Ok(Arc::clone(model));
        }

        // Dropping an unfinished init releases the slot for the next caller.
        let init = slot.get_or_try_init(|| async {
            debug!(api = %api, "building model");
            provider
                .build_model(cancel)
                .await
                .map(Arc::new)
                .map_err(|e| ModelError::BuildFailed {
                    api,
                    message: format!("{e:#}"),
                })
        });
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(ModelError::Cancelled { api }),
            built = init => built.cloned(),
        }
    }

    /// Returns the model if it has already been built.
    #[must_use]
    pub fn get(&self, api: ApiTypeKey) -> Option<Arc<Model>> {
        self.slots
            .get(&api)
            .and_then(|slot| slot.get().cloned())
    }

    /// Drops the memoized model so the next request rebuilds it.
    ///
    /// A build still in flight is left alone, so callers keep sharing it.
    /// Returns `true` if a model was cached.
    pub fn invalidate(&self, api: ApiTypeKey) -> bool {
        self.slots
            .remove_if(&api, |_, slot| slot.initialized())
            .is_some()
    }
}
