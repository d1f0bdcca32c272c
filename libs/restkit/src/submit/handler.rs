//! Drives a change set through initialize, authorize, pre-filter, validate,
//! submit and post-filter.

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::api::Api;
use crate::error::Error;
use crate::submit::{ChangeSet, ItemState, SubmitContext, SubmitResult, ValidationResults};

#[instrument(skip_all, fields(items = change_set.len()))]
pub(crate) async fn submit(
    api: &Api,
    mut change_set: ChangeSet,
    cancel: &CancellationToken,
) -> Result<SubmitResult, Error> {
    let configuration = api.configuration();
    let model = api.model(cancel).await?;
    let ctx = SubmitContext {
        api,
        model: &model,
        cancel,
    };

    configuration
        .change_set_initializers()
        .head()
        .initialize(&ctx, &mut change_set)
        .await?;

    for item in change_set.items_mut() {
        item.set_state(ItemState::Authorizing);
        if !configuration.item_authorizers().head().authorize(&ctx, item).await? {
            item.set_state(ItemState::Rejected);
            debug!(
                resource_set = %item.resource_set_name,
                action = %item.action,
                "change set item authorization denied"
            );
            return Err(Error::forbidden(format!(
                "{} on {}",
                item.action, item.resource_set_name
            )));
        }
    }

    for item in change_set.items_mut() {
        item.set_state(ItemState::FilteringPre);
        configuration.item_filters().head().on_processing(&ctx, item).await?;
    }

    let mut results = ValidationResults::new();
    for (index, item) in change_set.items_mut().iter_mut().enumerate() {
        item.set_state(ItemState::Validating);
        configuration
            .item_validators()
            .head()
            .validate(&ctx, index, item, &mut results)
            .await?;
    }
    for (index, item) in change_set.items_mut().iter_mut().enumerate() {
        item.set_state(if results.item_has_errors(index) {
            ItemState::Rejected
        } else {
            ItemState::Validated
        });
    }
    if results.has_errors() {
        debug!(findings = results.len(), "change set failed validation");
        return Err(Error::Validation(results.into_vec()));
    }
    change_set.set_validation_results(results.into_vec());

    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    configuration
        .submit_executors()
        .head()
        .execute(&ctx, &change_set)
        .await?;
    change_set.set_all_states(ItemState::Persisted);
    info!(items = change_set.len(), "change set committed");

    for item in change_set.items_mut() {
        item.set_state(ItemState::FilteringPost);
        configuration.item_filters().head().on_processed(&ctx, item).await?;
        item.set_state(ItemState::Submitted);
    }

    Ok(SubmitResult::new(change_set))
}
