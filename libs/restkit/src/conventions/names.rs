//! Hook method naming.
//!
//! | Hook point                  | Name                          |
//! |-----------------------------|-------------------------------|
//! | change-set authorization    | `Can{Insert,Update,Delete}X`  |
//! | pre-submit filter           | `On{Insert,Updat,Delet}ingX`  |
//! | post-submit filter          | `On{Insert,Updat,Delet}edX`   |
//! | query authorization         | `CanReadX`                    |
//! | query filter                | `OnFilterX`                   |
//!
//! `X` is the resource set name. The entity type name variant is only used to
//! report a likely typo; it is never invoked.

use crate::submit::ChangeSetItemAction;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PipelineState {
    Authorization,
    PreSubmit,
    PostSubmit,
}

/// The exact name to invoke plus the near-miss name to report.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HookName {
    pub exact: String,
    pub fallback: Option<String>,
}

impl HookName {
    fn pair(prefix: &str, resource_set: &str, type_name: &str) -> Self {
        let exact = format!("{prefix}{resource_set}");
        let fallback = format!("{prefix}{type_name}");
        Self {
            fallback: (fallback != exact).then_some(fallback),
            exact,
        }
    }

    #[must_use]
    pub fn change_set_item(
        state: PipelineState,
        action: ChangeSetItemAction,
        resource_set: &str,
        type_name: &str,
    ) -> Self {
        Self::pair(&prefix(state, action), resource_set, type_name)
    }

    #[must_use]
    pub fn can_read(resource_set: &str, type_name: &str) -> Self {
        Self::pair("CanRead", resource_set, type_name)
    }

    #[must_use]
    pub fn on_filter(resource_set: &str, type_name: &str) -> Self {
        Self::pair("OnFilter", resource_set, type_name)
    }
}

fn prefix(state: PipelineState, action: ChangeSetItemAction) -> String {
    let verb = match (state, action) {
        (PipelineState::Authorization, ChangeSetItemAction::Insert) => "CanInsert",
        (PipelineState::Authorization, ChangeSetItemAction::Update) => "CanUpdate",
        (PipelineState::Authorization, ChangeSetItemAction::Delete) => "CanDelete",
        (PipelineState::PreSubmit, ChangeSetItemAction::Insert) => "OnInserting",
        (PipelineState::PreSubmit, ChangeSetItemAction::Update) => "OnUpdating",
        (PipelineState::PreSubmit, ChangeSetItemAction::Delete) => "OnDeleting",
        (PipelineState::PostSubmit, ChangeSetItemAction::Insert) => "OnInserted",
        (PipelineState::PostSubmit, ChangeSetItemAction::Update) => "OnUpdated",
        (PipelineState::PostSubmit, ChangeSetItemAction::Delete) => "OnDeleted",
    };
    verb.to_owned()
}
