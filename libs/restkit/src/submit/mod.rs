//! Submit side: change sets and the pipeline that validates and persists them.

pub mod change_set;
pub mod conventions;
pub(crate) mod handler;
pub mod pipeline;
pub mod validation;

pub use change_set::{ChangeSet, ChangeSetItem, ChangeSetItemAction, ItemState};
pub use conventions::{ConventionBasedChangeSetItemAuthorizer, ConventionBasedChangeSetItemFilter};
pub use pipeline::{
    ChangeSetInitializer, ChangeSetItemAuthorizer, ChangeSetItemFilter, ChangeSetItemValidator,
    ModelConstraintValidator, StoreInitializer, StoreSubmitExecutor, SubmitContext, SubmitExecutor,
};
pub use validation::{ChangeSetItemValidationResult, Severity, ValidationResults};

/// A committed change set, items in their final state.
#[derive(Clone, Debug, PartialEq)]
pub struct SubmitResult {
    change_set: ChangeSet,
}

impl SubmitResult {
    #[must_use]
    pub fn new(change_set: ChangeSet) -> Self {
        Self { change_set }
    }

    #[must_use]
    pub fn change_set(&self) -> &ChangeSet {
        &self.change_set
    }

    #[must_use]
    pub fn into_change_set(self) -> ChangeSet {
        self.change_set
    }
}
