use std::collections::BTreeMap;
use std::fmt;

use crate::submit::validation::ChangeSetItemValidationResult;
use crate::value::{Record, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChangeSetItemAction {
    Insert,
    Update,
    Delete,
}

impl fmt::Display for ChangeSetItemAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ChangeSetItemAction::Insert => "insert",
            ChangeSetItemAction::Update => "update",
            ChangeSetItemAction::Delete => "delete",
        })
    }
}

/// Where an item is in the submission pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ItemState {
    Created,
    Initialized,
    Authorizing,
    FilteringPre,
    Validating,
    Validated,
    Persisted,
    FilteringPost,
    Submitted,
    Rejected,
}

/// One entity mutation.
#[derive(Clone, Debug, PartialEq)]
pub struct ChangeSetItem {
    pub resource_set_name: String,
    pub expected_resource_type: String,
    /// The concrete (possibly derived) type, known once the resource is resolved.
    pub actual_resource_type: Option<String>,
    pub action: ChangeSetItemAction,
    pub key_values: BTreeMap<String, Value>,
    /// Values the client last saw; checked against the stored entity before update/delete.
    pub original_values: BTreeMap<String, Value>,
    /// The incoming payload as sent by the client.
    pub serialized_properties: serde_json::Map<String, serde_json::Value>,
    /// PUT semantics: properties missing from the payload are reset.
    pub is_full_replace_update: bool,
    /// Batch `Content-ID` of the sub-request this item came from.
    pub content_id: Option<String>,
    /// The entity being inserted, updated or deleted, once resolved.
    pub resource: Option<Record>,
    state: ItemState,
}

impl ChangeSetItem {
    fn new(
        resource_set_name: impl Into<String>,
        expected_resource_type: impl Into<String>,
        action: ChangeSetItemAction,
    ) -> Self {
        Self {
            resource_set_name: resource_set_name.into(),
            expected_resource_type: expected_resource_type.into(),
            actual_resource_type: None,
            action,
            key_values: BTreeMap::new(),
            original_values: BTreeMap::new(),
            serialized_properties: serde_json::Map::new(),
            is_full_replace_update: false,
            content_id: None,
            resource: None,
            state: ItemState::Created,
        }
    }

    pub fn insert(
        resource_set_name: impl Into<String>,
        expected_resource_type: impl Into<String>,
        payload: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        let mut item = Self::new(
            resource_set_name,
            expected_resource_type,
            ChangeSetItemAction::Insert,
        );
        item.serialized_properties = payload;
        item
    }

    /// A PATCH-style update: only the properties in `payload` change.
    pub fn update(
        resource_set_name: impl Into<String>,
        expected_resource_type: impl Into<String>,
        key_values: BTreeMap<String, Value>,
        payload: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        let mut item = Self::new(
            resource_set_name,
            expected_resource_type,
            ChangeSetItemAction::Update,
        );
        item.key_values = key_values;
        item.serialized_properties = payload;
        item
    }

    /// A PUT-style update: the stored entity is replaced by `payload`.
    pub fn replace(
        resource_set_name: impl Into<String>,
        expected_resource_type: impl Into<String>,
        key_values: BTreeMap<String, Value>,
        payload: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        let mut item = Self::update(
            resource_set_name,
            expected_resource_type,
            key_values,
            payload,
        );
        item.is_full_replace_update = true;
        item
    }

    pub fn delete(
        resource_set_name: impl Into<String>,
        expected_resource_type: impl Into<String>,
        key_values: BTreeMap<String, Value>,
    ) -> Self {
        let mut item = Self::new(
            resource_set_name,
            expected_resource_type,
            ChangeSetItemAction::Delete,
        );
        item.key_values = key_values;
        item
    }

    #[must_use]
    pub fn with_original_values(mut self, original_values: BTreeMap<String, Value>) -> Self {
        self.original_values = original_values;
        self
    }

    #[must_use]
    pub fn with_content_id(mut self, content_id: impl Into<String>) -> Self {
        self.content_id = Some(content_id.into());
        self
    }

    #[must_use]
    pub fn state(&self) -> ItemState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: ItemState) {
        self.state = state;
    }

    /// The type hooks and validators should treat the entity as.
    #[must_use]
    pub fn resource_type(&self) -> &str {
        self.actual_resource_type
            .as_deref()
            .unwrap_or(&self.expected_resource_type)
    }

    /// Key rendered as `(Name=value,...)` for messages.
    #[must_use]
    pub fn key_display(&self) -> String {
        format_key(&self.key_values)
    }
}

pub(crate) fn format_key(key: &BTreeMap<String, Value>) -> String {
    let parts: Vec<String> = key.iter().map(|(k, v)| format!("{k}={v}")).collect();
    format!("({})", parts.join(","))
}

/// Ordered set of items submitted together.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChangeSet {
    items: Vec<ChangeSetItem>,
    validation_results: Vec<ChangeSetItemValidationResult>,
}

impl ChangeSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an item and returns its position.
    pub fn push(&mut self, item: ChangeSetItem) -> usize {
        self.items.push(item);
        self.items.len() - 1
    }

    #[must_use]
    pub fn with(mut self, item: ChangeSetItem) -> Self {
        self.push(item);
        self
    }

    #[must_use]
    pub fn items(&self) -> &[ChangeSetItem] {
        &self.items
    }

    pub fn items_mut(&mut self) -> &mut [ChangeSetItem] {
        &mut self.items
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&ChangeSetItem> {
        self.items.get(index)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Results recorded by the last validation pass, in recording order.
    #[must_use]
    pub fn validation_results(&self) -> &[ChangeSetItemValidationResult] {
        &self.validation_results
    }

    pub(crate) fn set_validation_results(&mut self, results: Vec<ChangeSetItemValidationResult>) {
        self.validation_results = results;
    }

    pub(crate) fn set_all_states(&mut self, state: ItemState) {
        for item in &mut self.items {
            item.set_state(state);
        }
    }
}

impl FromIterator<ChangeSetItem> for ChangeSet {
    fn from_iter<T: IntoIterator<Item = ChangeSetItem>>(iter: T) -> Self {
        Self {
            items: iter.into_iter().collect(),
            validation_results: Vec::new(),
        }
    }
}
