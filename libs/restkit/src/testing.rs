//! Collaborators used by the crate's unit tests.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::api::{Api, ApiBuilder};
use crate::model::{ApiTypeKey, Model, ModelCache};
use crate::provider::{ChangeSetStore, DataProvider, ExecutionOptions};
use crate::query::{ProviderRoot, QueryExpr, QuerySource};
use crate::submit::{ChangeSet, ChangeSetItemAction, change_set::format_key};
use crate::value::{Record, Value};

pub(crate) fn test_api_builder(model: Model) -> ApiBuilder {
    ApiBuilder::new(ApiTypeKey::named("restkit-test"))
        .with_model(model)
        .with_model_cache(Arc::new(ModelCache::new()))
}

pub(crate) fn test_api(model: Model) -> Api {
    match test_api_builder(model).build() {
        Ok(configuration) => configuration.create_api(),
        Err(e) => panic!("test API failed to build: {e}"),
    }
}

/// Returns canned rows and records the queries it is asked to run.
#[derive(Default)]
pub(crate) struct RecordingProvider {
    rows: Vec<Value>,
    unsourced: Vec<String>,
    executed: Mutex<Vec<String>>,
    counted: Mutex<Vec<String>>,
}

impl RecordingProvider {
    pub(crate) fn with_rows(rows: Vec<Value>) -> Self {
        Self {
            rows,
            ..Self::default()
        }
    }

    /// Refuses to source `resource`.
    pub(crate) fn without(mut self, resource: &str) -> Self {
        self.unsourced.push(resource.to_owned());
        self
    }

    pub(crate) fn executed(&self) -> Vec<String> {
        self.executed.lock().clone()
    }

    pub(crate) fn counted(&self) -> Vec<String> {
        self.counted.lock().clone()
    }
}

#[async_trait]
impl DataProvider for RecordingProvider {
    fn name(&self) -> &str {
        "recording"
    }

    fn source(&self, source: &QuerySource) -> Option<ProviderRoot> {
        if self.unsourced.contains(&source.name) {
            return None;
        }
        Some(ProviderRoot {
            provider: self.name().to_owned(),
            resource: source.name.clone(),
            element_type: source.element_type.clone(),
        })
    }

    async fn execute(
        &self,
        query: &QueryExpr,
        options: &ExecutionOptions,
        _cancel: &CancellationToken,
    ) -> anyhow::Result<Vec<Value>> {
        self.executed.lock().push(query.to_string());
        let limit = options
            .max_results
            .and_then(|m| usize::try_from(m).ok())
            .unwrap_or(usize::MAX);
        Ok(self.rows.iter().take(limit).cloned().collect())
    }

    async fn count(&self, query: &QueryExpr, _cancel: &CancellationToken) -> anyhow::Result<u64> {
        self.counted.lock().push(query.to_string());
        Ok(u64::try_from(self.rows.len())?)
    }
}

/// Keeps entities in a map keyed by set name and rendered `Id`.
#[derive(Default)]
pub(crate) struct RecordingStore {
    entities: Mutex<BTreeMap<(String, String), Record>>,
    commits: AtomicUsize,
    fail_commit: Option<String>,
}

impl RecordingStore {
    pub(crate) fn seeded(entities: Vec<(&str, Record)>) -> Self {
        let store = Self::default();
        for (set, record) in entities {
            store
                .entities
                .lock()
                .insert((set.to_owned(), format_key(&id_of(&record))), record);
        }
        store
    }

    pub(crate) fn failing(message: &str) -> Self {
        Self {
            fail_commit: Some(message.to_owned()),
            ..Self::default()
        }
    }

    pub(crate) fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    pub(crate) fn get(&self, set: &str, key: &BTreeMap<String, Value>) -> Option<Record> {
        self.entities
            .lock()
            .get(&(set.to_owned(), format_key(key)))
            .cloned()
    }
}

#[async_trait]
impl ChangeSetStore for RecordingStore {
    async fn find(
        &self,
        resource_set: &str,
        key: &BTreeMap<String, Value>,
        _cancel: &CancellationToken,
    ) -> anyhow::Result<Option<Record>> {
        Ok(self.get(resource_set, key))
    }

    async fn commit(&self, change_set: &ChangeSet, _cancel: &CancellationToken) -> anyhow::Result<()> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.fail_commit {
            anyhow::bail!("{message}");
        }
        let mut entities = self.entities.lock();
        for item in change_set.items() {
            let Some(record) = &item.resource else {
                anyhow::bail!("item for '{}' was never initialized", item.resource_set_name);
            };
            let key = if item.action == ChangeSetItemAction::Insert {
                format_key(&id_of(record))
            } else {
                item.key_display()
            };
            let slot = (item.resource_set_name.clone(), key);
            match item.action {
                ChangeSetItemAction::Insert | ChangeSetItemAction::Update => {
                    entities.insert(slot, record.clone());
                }
                ChangeSetItemAction::Delete => {
                    entities.remove(&slot);
                }
            }
        }
        Ok(())
    }
}

fn id_of(record: &Record) -> BTreeMap<String, Value> {
    BTreeMap::from([(
        "Id".to_owned(),
        record.get("Id").cloned().unwrap_or(Value::Null),
    )])
}
