#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! In-memory data provider and change-set store for restkit.
//!
//! Each entity set or singleton of the model is a table of records. Queries
//! are interpreted directly over the tables; navigations are resolved through
//! declared [`Relation`]s. Commits apply to a copy of the tables and replace
//! them only when every item succeeds.

mod error;
mod eval;

use std::cmp::Ordering as ValueOrdering;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use restkit::query::{ProviderRoot, QueryExpr, QuerySource};
use restkit::submit::{ChangeSetItem, ChangeSetItemAction};
use restkit::{
    AggregateError, ChangeSet, ChangeSetStore, DataProvider, ExecutionOptions, Model, Record,
    Value,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use error::MemoryStoreError;

use crate::eval::Evaluator;

/// Name under which roots of this provider are produced.
pub const PROVIDER_NAME: &str = "memory";

/// Joins a navigation property of `source_type` to the rows of `target_set`
/// whose `target_property` equals the source row's `source_property`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Relation {
    pub source_type: String,
    pub navigation: String,
    pub target_set: String,
    pub source_property: String,
    pub target_property: String,
}

impl Relation {
    /// A relation joined on `Id` on both sides until [`Relation::joined_on`] says otherwise.
    pub fn new(
        source_type: impl Into<String>,
        navigation: impl Into<String>,
        target_set: impl Into<String>,
    ) -> Self {
        Self {
            source_type: source_type.into(),
            navigation: navigation.into(),
            target_set: target_set.into(),
            source_property: "Id".to_owned(),
            target_property: "Id".to_owned(),
        }
    }

    #[must_use]
    pub fn joined_on(
        mut self,
        source_property: impl Into<String>,
        target_property: impl Into<String>,
    ) -> Self {
        self.source_property = source_property.into();
        self.target_property = target_property.into();
        self
    }
}

pub struct MemoryStore {
    model: Arc<Model>,
    tables: RwLock<HashMap<String, Vec<Record>>>,
    relations: Vec<Relation>,
    commits: AtomicUsize,
}

impl MemoryStore {
    /// An empty table for every resource of `model`.
    #[must_use]
    pub fn new(model: Arc<Model>) -> Self {
        let tables = model
            .resources()
            .map(|resource| (resource.name.clone(), Vec::new()))
            .collect();
        Self {
            model,
            tables: RwLock::new(tables),
            relations: Vec::new(),
            commits: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn with_rows(
        mut self,
        resource: impl Into<String>,
        rows: impl IntoIterator<Item = Record>,
    ) -> Self {
        self.tables
            .get_mut()
            .entry(resource.into())
            .or_default()
            .extend(rows);
        self
    }

    #[must_use]
    pub fn with_relation(mut self, relation: Relation) -> Self {
        self.relations.push(relation);
        self
    }

    /// Snapshot of the rows of `resource`.
    #[must_use]
    pub fn rows(&self, resource: &str) -> Vec<Record> {
        self.tables.read().get(resource).cloned().unwrap_or_default()
    }

    /// Number of successful commits.
    #[must_use]
    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    fn evaluate(&self, query: &QueryExpr) -> Result<Vec<Value>, MemoryStoreError> {
        let tables = self.tables.read();
        Evaluator {
            model: &self.model,
            provider: PROVIDER_NAME,
            tables: &tables,
            relations: &self.relations,
        }
        .run(query)
    }

    fn key_of(&self, record: &Record) -> BTreeMap<String, Value> {
        self.model
            .key_properties(record.type_name())
            .into_iter()
            .map(|name| (name.to_owned(), record.get(name).cloned().unwrap_or_default()))
            .collect()
    }

    fn apply(
        &self,
        tables: &mut HashMap<String, Vec<Record>>,
        item: &ChangeSetItem,
    ) -> anyhow::Result<()> {
        let set = &item.resource_set_name;
        let table = tables
            .get_mut(set)
            .ok_or_else(|| MemoryStoreError::UnknownResource(set.clone()))?;
        match item.action {
            ChangeSetItemAction::Insert => {
                let record = initialized(item)?;
                let key = self.key_of(&record);
                if table.iter().any(|row| matches_key(row, &key)) {
                    return Err(MemoryStoreError::DuplicateKey {
                        set: set.clone(),
                        key: render_key(&key),
                    }
                    .into());
                }
                table.push(record);
            }
            ChangeSetItemAction::Update => {
                let record = initialized(item)?;
                let slot = table
                    .iter_mut()
                    .find(|row| matches_key(row, &item.key_values))
                    .ok_or_else(|| not_found(item))?;
                *slot = record;
            }
            ChangeSetItemAction::Delete => {
                let before = table.len();
                table.retain(|row| !matches_key(row, &item.key_values));
                if table.len() == before {
                    return Err(not_found(item));
                }
            }
        }
        Ok(())
    }
}

fn initialized(item: &ChangeSetItem) -> Result<Record, MemoryStoreError> {
    item.resource
        .clone()
        .ok_or_else(|| MemoryStoreError::Uninitialized(item.resource_set_name.clone()))
}

fn not_found(item: &ChangeSetItem) -> anyhow::Error {
    restkit::Error::ResourceNotFound {
        resource: item.resource_set_name.clone(),
        key: item.key_display(),
    }
    .into()
}

fn matches_key(row: &Record, key: &BTreeMap<String, Value>) -> bool {
    key.iter().all(|(name, value)| {
        row.get(name)
            .is_some_and(|v| v.compare(value) == Some(ValueOrdering::Equal))
    })
}

fn render_key(key: &BTreeMap<String, Value>) -> String {
    let parts: Vec<String> = key.iter().map(|(k, v)| format!("{k}={v}")).collect();
    format!("({})", parts.join(","))
}

fn ensure_live(cancel: &CancellationToken) -> anyhow::Result<()> {
    if cancel.is_cancelled() {
        return Err(restkit::Error::Cancelled.into());
    }
    Ok(())
}

#[async_trait]
impl DataProvider for MemoryStore {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn source(&self, source: &QuerySource) -> Option<ProviderRoot> {
        self.tables
            .read()
            .contains_key(&source.name)
            .then(|| ProviderRoot {
                provider: PROVIDER_NAME.to_owned(),
                resource: source.name.clone(),
                element_type: source.element_type.clone(),
            })
    }

    async fn execute(
        &self,
        query: &QueryExpr,
        options: &ExecutionOptions,
        cancel: &CancellationToken,
    ) -> anyhow::Result<Vec<Value>> {
        ensure_live(cancel)?;
        let mut rows = self.evaluate(query)?;
        if let Some(max) = options.max_results {
            rows.truncate(usize::try_from(max).unwrap_or(usize::MAX));
        }
        debug!(%query, rows = rows.len(), "query executed");
        Ok(rows)
    }

    async fn count(&self, query: &QueryExpr, cancel: &CancellationToken) -> anyhow::Result<u64> {
        ensure_live(cancel)?;
        let count = self.evaluate(query)?.len();
        Ok(u64::try_from(count)?)
    }
}

#[async_trait]
impl ChangeSetStore for MemoryStore {
    async fn find(
        &self,
        resource_set: &str,
        key: &BTreeMap<String, Value>,
        cancel: &CancellationToken,
    ) -> anyhow::Result<Option<Record>> {
        ensure_live(cancel)?;
        let tables = self.tables.read();
        let table = tables
            .get(resource_set)
            .ok_or_else(|| MemoryStoreError::UnknownResource(resource_set.to_owned()))?;
        Ok(table.iter().find(|row| matches_key(row, key)).cloned())
    }

    async fn commit(&self, change_set: &ChangeSet, cancel: &CancellationToken) -> anyhow::Result<()> {
        ensure_live(cancel)?;
        let mut tables = self.tables.write();
        let mut staged = tables.clone();
        let failures: Vec<anyhow::Error> = change_set
            .items()
            .iter()
            .filter_map(|item| self.apply(&mut staged, item).err())
            .collect();
        if !failures.is_empty() {
            warn!(
                failed = failures.len(),
                items = change_set.len(),
                "change set rejected, nothing applied"
            );
            return Err(AggregateError(failures).into());
        }
        *tables = staged;
        drop(tables);

        self.commits.fetch_add(1, Ordering::SeqCst);
        info!(items = change_set.len(), "change set committed");
        Ok(())
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use restkit::model::Multiplicity;
    use restkit::query::{Expr, Lambda};
    use restkit::{PrimitiveKind, TypeRef};
    use tracing_test::traced_test;

    use super::*;

    fn model() -> Arc<Model> {
        Arc::new(
            Model::builder()
                .entity_type("Customer", |t| {
                    t.key("Id", PrimitiveKind::Int32)
                        .required("Name", PrimitiveKind::String)
                        .navigation("Orders", "Order", Multiplicity::Many)
                })
                .entity_type("VipCustomer", |t| {
                    t.base("Customer").property("Level", PrimitiveKind::Int32)
                })
                .entity_type("Order", |t| {
                    t.key("Id", PrimitiveKind::Int32)
                        .property("CustomerId", PrimitiveKind::Int32)
                        .navigation("Customer", "Customer", Multiplicity::ZeroOrOne)
                })
                .entity_set("Customers", "Customer")
                .entity_set("Orders", "Order")
                .build(),
        )
    }

    fn customer(id: i32, name: &str) -> Record {
        Record::new("Customer").with("Id", id).with("Name", name)
    }

    fn order(id: i32, customer: Option<i32>) -> Record {
        let order = Record::new("Order").with("Id", id);
        match customer {
            Some(c) => order.with("CustomerId", c),
            None => order.with("CustomerId", Value::Null),
        }
    }

    fn store() -> MemoryStore {
        MemoryStore::new(model())
            .with_rows(
                "Customers",
                [
                    customer(1, "Ada"),
                    Record::new("VipCustomer")
                        .with("Id", 2)
                        .with("Name", "Grace")
                        .with("Level", 3),
                ],
            )
            .with_rows("Orders", [order(10, Some(1)), order(11, Some(2)), order(12, None)])
            .with_relation(Relation::new("Customer", "Orders", "Orders").joined_on("Id", "CustomerId"))
            .with_relation(
                Relation::new("Order", "Customer", "Customers").joined_on("CustomerId", "Id"),
            )
    }

    fn root(store: &MemoryStore, name: &str, element_type: &str) -> QueryExpr {
        let source = QuerySource {
            name: name.to_owned(),
            element_type: element_type.to_owned(),
            kind: restkit::model::ResourceKind::EntitySet,
        };
        QueryExpr::Root(store.source(&source).unwrap())
    }

    fn ids(rows: &[Value]) -> Vec<i64> {
        rows.iter()
            .filter_map(|row| row.as_record()?.get("Id")?.as_i64())
            .collect()
    }

    #[tokio::test]
    async fn navigations_join_through_relations() {
        let store = store();
        let cancel = CancellationToken::new();

        let orders_of_ada = root(&store, "Customers", "Customer")
            .filter(Lambda::new("c", Expr::param("c").member("Id").equals(Expr::literal(1))))
            .select_many(
                Lambda::new("c", Expr::param("c").member("Orders")),
                TypeRef::entity("Order"),
            );
        let rows = store
            .execute(&orders_of_ada, &ExecutionOptions::default(), &cancel)
            .await
            .unwrap();
        assert_eq!(ids(&rows), vec![10]);

        let customers_of_orders = root(&store, "Orders", "Order")
            .filter(Lambda::new(
                "o",
                Expr::param("o")
                    .member("Customer")
                    .not_equals(Expr::Literal(Value::Null)),
            ))
            .select(
                Lambda::new("o", Expr::param("o").member("Customer")),
                TypeRef::entity("Customer"),
            );
        let rows = store
            .execute(&customers_of_orders, &ExecutionOptions::default(), &cancel)
            .await
            .unwrap();
        assert_eq!(ids(&rows), vec![1, 2]);
    }

    #[tokio::test]
    async fn derived_rows_survive_type_filters() {
        let store = store();
        let query = root(&store, "Customers", "Customer").of_type("VipCustomer");

        let count = store.count(&query, &CancellationToken::new()).await.unwrap();

        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn paging_and_result_caps_apply() {
        let store = store();
        let query = root(&store, "Orders", "Order").skip(1);
        let options = ExecutionOptions {
            max_results: Some(1),
        };

        let rows = store
            .execute(&query, &options, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(ids(&rows), vec![11]);
    }

    #[tokio::test]
    async fn unsourced_queries_are_rejected() {
        let store = store();
        let query = QueryExpr::source(QuerySource {
            name: "Orders".to_owned(),
            element_type: "Order".to_owned(),
            kind: restkit::model::ResourceKind::EntitySet,
        });

        let err = store.count(&query, &CancellationToken::new()).await.unwrap_err();

        assert!(matches!(
            err.downcast_ref::<MemoryStoreError>(),
            Some(MemoryStoreError::NotSourced(_))
        ));
    }

    #[tokio::test]
    #[traced_test]
    async fn failed_commit_applies_nothing() {
        let store = store();
        let mut fresh = ChangeSetItem::insert("Customers", "Customer", serde_json::Map::new());
        fresh.resource = Some(customer(3, "Linus"));
        let mut duplicate = ChangeSetItem::insert("Customers", "Customer", serde_json::Map::new());
        duplicate.resource = Some(customer(1, "Ada again"));
        let change_set = ChangeSet::new().with(fresh).with(duplicate);

        let err = store
            .commit(&change_set, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(err.downcast_ref::<AggregateError>().is_some());
        assert_eq!(store.rows("Customers").len(), 2);
        assert_eq!(store.commit_count(), 0);
        assert!(logs_contain("change set rejected"));
    }

    #[tokio::test]
    async fn find_and_delete_by_key() {
        let store = store();
        let cancel = CancellationToken::new();
        let key = BTreeMap::from([("Id".to_owned(), Value::Int(10))]);

        assert!(store.find("Orders", &key, &cancel).await.unwrap().is_some());

        let change_set =
            ChangeSet::new().with(ChangeSetItem::delete("Orders", "Order", key.clone()));
        store.commit(&change_set, &cancel).await.unwrap();

        assert!(store.find("Orders", &key, &cancel).await.unwrap().is_none());
        assert_eq!(store.commit_count(), 1);
    }

    #[tokio::test]
    async fn cancelled_calls_fail_fast() {
        let store = store();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = store.commit(&ChangeSet::new(), &cancel).await.unwrap_err();

        assert!(matches!(
            err.downcast_ref::<restkit::Error>(),
            Some(restkit::Error::Cancelled)
        ));
    }
}
