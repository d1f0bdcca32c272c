#![allow(dead_code)]

use std::sync::Arc;

use restkit::conventions::ConventionSurface;
use restkit::model::Multiplicity;
use restkit::{Api, ApiBuilder, ApiTypeKey, Model, ModelCache, PrimitiveKind, Record, RestkitConfig};
use restkit_memory::{MemoryStore, Relation};

pub fn shop_model() -> Model {
    Model::builder()
        .entity_type("Product", |t| {
            t.key("Id", PrimitiveKind::Int32)
                .string("Name", 20)
                .property("Price", PrimitiveKind::Decimal)
        })
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
                .property("Total", PrimitiveKind::Int32)
                .property("CustomerId", PrimitiveKind::Int32)
                .navigation("Customer", "Customer", Multiplicity::ZeroOrOne)
        })
        .entity_set("Products", "Product")
        .entity_set("Customers", "Customer")
        .entity_set("Orders", "Order")
        .build()
}

pub fn seeded_store() -> Arc<MemoryStore> {
    let store = MemoryStore::new(Arc::new(shop_model()))
        .with_rows(
            "Products",
            [
                product(1, "Chai", 18),
                product(2, "Chang", 19),
                product(3, "Aniseed Syrup", 0),
            ],
        )
        .with_rows(
            "Customers",
            [
                Record::new("Customer").with("Id", 1).with("Name", "Alfreds"),
                Record::new("VipCustomer")
                    .with("Id", 2)
                    .with("Name", "Bon app")
                    .with("Level", 2),
            ],
        )
        .with_rows(
            "Orders",
            [order(10, 1, 100), order(11, 1, 250), order(12, 2, 40)],
        )
        .with_relation(Relation::new("Customer", "Orders", "Orders").joined_on("Id", "CustomerId"))
        .with_relation(Relation::new("Order", "Customer", "Customers").joined_on("CustomerId", "Id"));
    Arc::new(store)
}

pub fn product(id: i32, name: &str, price: i32) -> Record {
    Record::new("Product")
        .with("Id", id)
        .with("Name", name)
        .with("Price", price)
}

pub fn order(id: i32, customer: i32, total: i32) -> Record {
    Record::new("Order")
        .with("Id", id)
        .with("CustomerId", customer)
        .with("Total", total)
}

pub fn builder(store: &Arc<MemoryStore>) -> ApiBuilder {
    ApiBuilder::new(ApiTypeKey::named("shop"))
        .with_model(shop_model())
        .with_model_cache(Arc::new(ModelCache::new()))
        .with_data_provider(store.clone())
        .with_change_set_store(store.clone())
}

pub fn api(store: &Arc<MemoryStore>, surface: ConventionSurface) -> Api {
    builder(store)
        .with_conventions(surface)
        .build()
        .expect("api configuration")
        .create_api()
}

pub fn api_with_config(store: &Arc<MemoryStore>, config: RestkitConfig) -> Api {
    builder(store)
        .with_config(config)
        .build()
        .expect("api configuration")
        .create_api()
}

pub fn ids(rows: &[restkit::Value]) -> Vec<i64> {
    rows.iter()
        .filter_map(|row| row.as_record()?.get("Id")?.as_i64())
        .collect()
}
