//! Submit stages backed by `Can<Action><Set>`, `On<Action>ing<Set>` and
//! `On<Action>ed<Set>` convention hooks.

use std::sync::Arc;

use async_trait::async_trait;

use crate::chain::Next;
use crate::conventions::{ConventionDispatcher, HookArgs, HookName, PipelineState};
use crate::error::Error;
use crate::submit::{ChangeSetItem, ChangeSetItemAuthorizer, ChangeSetItemFilter, SubmitContext};

fn hook_name(state: PipelineState, item: &ChangeSetItem) -> HookName {
    HookName::change_set_item(
        state,
        item.action,
        &item.resource_set_name,
        &item.expected_resource_type,
    )
}

pub struct ConventionBasedChangeSetItemAuthorizer {
    dispatcher: Arc<ConventionDispatcher>,
}

impl ConventionBasedChangeSetItemAuthorizer {
    #[must_use]
    pub fn new(dispatcher: Arc<ConventionDispatcher>) -> Self {
        Self { dispatcher }
    }
}

#[async_trait]
impl ChangeSetItemAuthorizer for ConventionBasedChangeSetItemAuthorizer {
    async fn authorize(
        &self,
        ctx: &SubmitContext<'_>,
        item: &ChangeSetItem,
        next: Next<'_, dyn ChangeSetItemAuthorizer>,
    ) -> Result<bool, Error> {
        let name = hook_name(PipelineState::Authorization, item);
        let args = HookArgs {
            resource_set: item.resource_set_name.clone(),
            action: Some(item.action),
            entity: item.resource.clone(),
        };
        if self
            .dispatcher
            .authorize_item(ctx.model, &name, item.resource_type(), &args)
            == Some(false)
        {
            return Ok(false);
        }
        next.authorize(ctx, item).await
    }
}

pub struct ConventionBasedChangeSetItemFilter {
    dispatcher: Arc<ConventionDispatcher>,
}

impl ConventionBasedChangeSetItemFilter {
    #[must_use]
    pub fn new(dispatcher: Arc<ConventionDispatcher>) -> Self {
        Self { dispatcher }
    }

    /// The hook takes the entity for the duration of the call and hands it back.
    async fn run(
        &self,
        ctx: &SubmitContext<'_>,
        item: &mut ChangeSetItem,
        state: PipelineState,
    ) -> Result<(), Error> {
        let name = hook_name(state, item);
        let entity_type = item.resource_type().to_owned();
        let mut args = HookArgs {
            resource_set: item.resource_set_name.clone(),
            action: Some(item.action),
            entity: item.resource.take(),
        };
        let outcome = self
            .dispatcher
            .filter_item(ctx.model, &name, &entity_type, &mut args)
            .await;
        item.resource = args.entity;
        outcome.map(|_| ())
    }
}

#[async_trait]
impl ChangeSetItemFilter for ConventionBasedChangeSetItemFilter {
    async fn on_processing(
        &self,
        ctx: &SubmitContext<'_>,
        item: &mut ChangeSetItem,
        next: Next<'_, dyn ChangeSetItemFilter>,
    ) -> Result<(), Error> {
        self.run(ctx, item, PipelineState::PreSubmit).await?;
        next.on_processing(ctx, item).await
    }

    async fn on_processed(
        &self,
        ctx: &SubmitContext<'_>,
        item: &mut ChangeSetItem,
        next: Next<'_, dyn ChangeSetItemFilter>,
    ) -> Result<(), Error> {
        self.run(ctx, item, PipelineState::PostSubmit).await?;
        next.on_processed(ctx, item).await
    }
}
