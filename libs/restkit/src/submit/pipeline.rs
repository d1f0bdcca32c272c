//! Submit pipeline stages and the store-backed defaults registered beneath
//! user handlers.

use std::cmp::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::api::Api;
use crate::chain::Next;
use crate::error::Error;
use crate::model::{Model, TypeRef};
use crate::provider::ChangeSetStore;
use crate::submit::{
    ChangeSet, ChangeSetItem, ChangeSetItemAction, ChangeSetItemValidationResult, ItemState,
    ValidationResults,
};
use crate::value::{Record, Value};

/// State shared by every stage of one submission.
pub struct SubmitContext<'a> {
    pub api: &'a Api,
    pub model: &'a Model,
    pub cancel: &'a CancellationToken,
}

/// Resolves the entities the items act on.
#[async_trait]
pub trait ChangeSetInitializer: Send + Sync {
    async fn initialize(
        &self,
        ctx: &SubmitContext<'_>,
        change_set: &mut ChangeSet,
        next: Next<'_, dyn ChangeSetInitializer>,
    ) -> Result<(), Error>;
}

#[async_trait]
pub trait ChangeSetItemAuthorizer: Send + Sync {
    async fn authorize(
        &self,
        ctx: &SubmitContext<'_>,
        item: &ChangeSetItem,
        next: Next<'_, dyn ChangeSetItemAuthorizer>,
    ) -> Result<bool, Error>;
}

/// Runs before (`on_processing`) and after (`on_processed`) the store commit.
#[async_trait]
pub trait ChangeSetItemFilter: Send + Sync {
    async fn on_processing(
        &self,
        ctx: &SubmitContext<'_>,
        item: &mut ChangeSetItem,
        next: Next<'_, dyn ChangeSetItemFilter>,
    ) -> Result<(), Error> {
        next.on_processing(ctx, item).await
    }

    async fn on_processed(
        &self,
        ctx: &SubmitContext<'_>,
        item: &mut ChangeSetItem,
        next: Next<'_, dyn ChangeSetItemFilter>,
    ) -> Result<(), Error> {
        next.on_processed(ctx, item).await
    }
}

/// Records findings for one item; `index` is the item's position in the change set.
#[async_trait]
pub trait ChangeSetItemValidator: Send + Sync {
    async fn validate(
        &self,
        ctx: &SubmitContext<'_>,
        index: usize,
        item: &ChangeSetItem,
        results: &mut ValidationResults,
        next: Next<'_, dyn ChangeSetItemValidator>,
    ) -> Result<(), Error>;
}

/// Persists a validated change set.
#[async_trait]
pub trait SubmitExecutor: Send + Sync {
    async fn execute(
        &self,
        ctx: &SubmitContext<'_>,
        change_set: &ChangeSet,
        next: Next<'_, dyn SubmitExecutor>,
    ) -> Result<(), Error>;
}

impl Next<'_, dyn ChangeSetInitializer> {
    /// # Errors
    /// Whatever the remaining initializers report.
    pub async fn initialize(
        self,
        ctx: &SubmitContext<'_>,
        change_set: &mut ChangeSet,
    ) -> Result<(), Error> {
        match self.split_first() {
            Some((handler, rest)) => handler.initialize(ctx, change_set, rest).await,
            None => Ok(()),
        }
    }
}

impl Next<'_, dyn ChangeSetItemAuthorizer> {
    /// Allows when no handler objects.
    ///
    /// # Errors
    /// Whatever the remaining authorizers report.
    pub async fn authorize(self, ctx: &SubmitContext<'_>, item: &ChangeSetItem) -> Result<bool, Error> {
        match self.split_first() {
            Some((handler, rest)) => handler.authorize(ctx, item, rest).await,
            None => Ok(true),
        }
    }
}

impl Next<'_, dyn ChangeSetItemFilter> {
    /// # Errors
    /// Whatever the remaining filters report.
    pub async fn on_processing(
        self,
        ctx: &SubmitContext<'_>,
        item: &mut ChangeSetItem,
    ) -> Result<(), Error> {
        match self.split_first() {
            Some((handler, rest)) => handler.on_processing(ctx, item, rest).await,
            None => Ok(()),
        }
    }

    /// # Errors
    /// Whatever the remaining filters report.
    pub async fn on_processed(
        self,
        ctx: &SubmitContext<'_>,
        item: &mut ChangeSetItem,
    ) -> Result<(), Error> {
        match self.split_first() {
            Some((handler, rest)) => handler.on_processed(ctx, item, rest).await,
            None => Ok(()),
        }
    }
}

impl Next<'_, dyn ChangeSetItemValidator> {
    /// # Errors
    /// Whatever the remaining validators report.
    pub async fn validate(
        self,
        ctx: &SubmitContext<'_>,
        index: usize,
        item: &ChangeSetItem,
        results: &mut ValidationResults,
    ) -> Result<(), Error> {
        match self.split_first() {
            Some((handler, rest)) => handler.validate(ctx, index, item, results, rest).await,
            None => Ok(()),
        }
    }
}

impl Next<'_, dyn SubmitExecutor> {
    /// # Errors
    /// `Error::Unsupported` when nothing can persist the change set.
    pub async fn execute(self, ctx: &SubmitContext<'_>, change_set: &ChangeSet) -> Result<(), Error> {
        match self.split_first() {
            Some((handler, rest)) => handler.execute(ctx, change_set, rest).await,
            None => Err(Error::unsupported("no change-set store is configured")),
        }
    }
}

/// Loads targets of updates and deletes from the store and materialises payloads.
pub struct StoreInitializer {
    store: Arc<dyn ChangeSetStore>,
}

impl StoreInitializer {
    #[must_use]
    pub fn new(store: Arc<dyn ChangeSetStore>) -> Self {
        Self { store }
    }

    async fn initialize_item(&self, ctx: &SubmitContext<'_>, item: &mut ChangeSetItem) -> Result<(), Error> {
        coerce_keys(ctx.model, item)?;
        let entity = match item.action {
            ChangeSetItemAction::Insert => materialize(ctx.model, &item.expected_resource_type, item)?,
            ChangeSetItemAction::Update => {
                let mut entity = self.load(ctx, item).await?;
                check_original_values(item, &entity)?;
                let patch = materialize(ctx.model, entity.type_name(), item)?;
                if item.is_full_replace_update {
                    entity = Record::new(entity.type_name());
                }
                entity.merge_from(patch);
                for (name, value) in &item.key_values {
                    entity.set(name.as_str(), value.clone());
                }
                entity
            }
            ChangeSetItemAction::Delete => {
                let entity = self.load(ctx, item).await?;
                check_original_values(item, &entity)?;
                entity
            }
        };
        item.actual_resource_type = Some(entity.type_name().to_owned());
        item.resource = Some(entity);
        Ok(())
    }

    async fn load(&self, ctx: &SubmitContext<'_>, item: &ChangeSetItem) -> Result<Record, Error> {
        self.store
            .find(&item.resource_set_name, &item.key_values, ctx.cancel)
            .await
            .map_err(Error::from_provider)?
            .ok_or_else(|| Error::ResourceNotFound {
                resource: item.resource_set_name.clone(),
                key: item.key_display(),
            })
    }
}

#[async_trait]
impl ChangeSetInitializer for StoreInitializer {
    async fn initialize(
        &self,
        ctx: &SubmitContext<'_>,
        change_set: &mut ChangeSet,
        next: Next<'_, dyn ChangeSetInitializer>,
    ) -> Result<(), Error> {
        for item in change_set.items_mut() {
            self.initialize_item(ctx, item).await?;
            item.set_state(ItemState::Initialized);
        }
        next.initialize(ctx, change_set).await
    }
}

/// Converts key values to the declared key types so the store can match them.
fn coerce_keys(model: &Model, item: &mut ChangeSetItem) -> Result<(), Error> {
    for (name, value) in &mut item.key_values {
        if let Some(TypeRef::Primitive(kind)) = model
            .property(&item.expected_resource_type, name)
            .map(|p| &p.ty)
        {
            *value = value.coerce_to(*kind)?;
        }
    }
    Ok(())
}

fn materialize(model: &Model, type_name: &str, item: &ChangeSetItem) -> Result<Record, Error> {
    let payload = serde_json::Value::Object(item.serialized_properties.clone());
    match Value::from_json(&payload, &TypeRef::entity(type_name), model)? {
        Value::Record(record) => Ok(record),
        other => Err(Error::InvalidPayload(format!(
            "expected an entity of type '{type_name}', got {}",
            other.kind_name()
        ))),
    }
}

fn check_original_values(item: &ChangeSetItem, entity: &Record) -> Result<(), Error> {
    for (name, expected) in &item.original_values {
        let actual = entity.get(name).unwrap_or(&Value::Null);
        if actual.compare(expected) != Some(Ordering::Equal) {
            return Err(Error::ConcurrencyConflict {
                resource: format!("{}{}", item.resource_set_name, item.key_display()),
                message: format!("'{name}' is {actual}, expected {expected}"),
            });
        }
    }
    Ok(())
}

/// Required and max-length checks from the model.
#[derive(Debug, Default, Clone, Copy)]
pub struct ModelConstraintValidator;

#[async_trait]
impl ChangeSetItemValidator for ModelConstraintValidator {
    async fn validate(
        &self,
        ctx: &SubmitContext<'_>,
        index: usize,
        item: &ChangeSetItem,
        results: &mut ValidationResults,
        next: Next<'_, dyn ChangeSetItemValidator>,
    ) -> Result<(), Error> {
        if item.action != ChangeSetItemAction::Delete {
            match &item.resource {
                None => results.push(ChangeSetItemValidationResult::error(
                    index,
                    item.resource_set_name.as_str(),
                    None,
                    "The entity was not initialized.",
                )),
                Some(entity) => check_constraints(ctx.model, index, item, entity, results),
            }
        }
        next.validate(ctx, index, item, results).await
    }
}

fn check_constraints(
    model: &Model,
    index: usize,
    item: &ChangeSetItem,
    entity: &Record,
    results: &mut ValidationResults,
) {
    for property in model.all_properties(entity.type_name()) {
        let value = entity.get(&property.name).unwrap_or(&Value::Null);
        if value.is_null() {
            if !property.nullable {
                results.push(
                    ChangeSetItemValidationResult::error(
                        index,
                        item.resource_set_name.as_str(),
                        Some(&property.name),
                        format!("The {} field is required.", property.name),
                    )
                    .with_id("required"),
                );
            }
            continue;
        }
        if let (Some(max), Value::String(text)) = (property.max_length, value)
            && text.chars().count() > max
        {
            results.push(
                ChangeSetItemValidationResult::error(
                    index,
                    item.resource_set_name.as_str(),
                    Some(&property.name),
                    format!(
                        "The field {} must be a string with a maximum length of {max}.",
                        property.name
                    ),
                )
                .with_id("max_length"),
            );
        }
    }
}

/// Commits through the configured store.
pub struct StoreSubmitExecutor {
    store: Arc<dyn ChangeSetStore>,
}

impl StoreSubmitExecutor {
    #[must_use]
    pub fn new(store: Arc<dyn ChangeSetStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl SubmitExecutor for StoreSubmitExecutor {
    async fn execute(
        &self,
        ctx: &SubmitContext<'_>,
        change_set: &ChangeSet,
        _next: Next<'_, dyn SubmitExecutor>,
    ) -> Result<(), Error> {
        self.store
            .commit(change_set, ctx.cancel)
            .await
            .map_err(Error::from_provider)
    }
}
