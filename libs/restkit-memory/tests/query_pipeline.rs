#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use restkit::conventions::{ConventionMethod, ConventionSurface};
use restkit::property_bag::keys;
use restkit::query::{Expr, Lambda};
use restkit::{Error, QueryRequest, RestkitConfig, Value};
use tokio_util::sync::CancellationToken;

use common::{api, api_with_config, ids, seeded_store};

#[tokio::test]
async fn key_navigation_returns_related_rows() {
    let store = seeded_store();
    let api = api(&store, ConventionSurface::new());

    let result = api
        .query_path("Customers(1)/Orders", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(ids(&result.results), vec![10, 11]);
}

#[tokio::test]
async fn single_valued_navigation_follows_the_reference() {
    let store = seeded_store();
    let api = api(&store, ConventionSurface::new());

    let result = api
        .query_path("Orders(12)/Customer", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(ids(&result.results), vec![2]);
}

#[tokio::test]
async fn on_filter_hook_narrows_every_query_of_the_set() {
    let store = seeded_store();
    let surface = ConventionSurface::new().with(
        ConventionMethod::query("OnFilterProducts", |q| {
            q.filter(Lambda::new(
                "p",
                Expr::param("p").member("Price").not_equals(Expr::literal(0)),
            ))
        })
        .with_queryable_parameter("Product"),
    );
    let api = api(&store, surface);
    let cancel = CancellationToken::new();

    let all = api.query_path("Products", &cancel).await.unwrap();
    assert_eq!(ids(&all.results), vec![1, 2]);

    let hidden = api.query_path("Products(3)", &cancel).await.unwrap();
    assert!(hidden.results.is_empty());
}

#[tokio::test]
async fn can_read_false_is_forbidden() {
    let store = seeded_store();
    let surface =
        ConventionSurface::new().with(ConventionMethod::predicate("CanReadOrders", |_| false));
    let api = api(&store, surface);

    let err = api
        .query_path("Customers(1)/Orders", &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Forbidden { .. }), "{err:?}");
}

#[tokio::test]
async fn count_segment_counts_the_addressed_rows() {
    let store = seeded_store();
    let api = api(&store, ConventionSurface::new());

    let result = api
        .query_path("Customers(1)/Orders/$count", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.results, vec![Value::Int(2)]);
    assert_eq!(api.properties().get::<u64>(keys::TOTAL_COUNT), Some(2));
}

#[tokio::test]
async fn type_cast_keeps_derived_rows() {
    let store = seeded_store();
    let api = api(&store, ConventionSurface::new());

    let result = api
        .query_path("Customers/Shop.VipCustomer", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(ids(&result.results), vec![2]);
}

#[tokio::test]
async fn max_top_caps_results_but_not_the_total() {
    let store = seeded_store();
    let mut config = RestkitConfig::default();
    config.query.max_top = Some(2);
    let api = api_with_config(&store, config);
    let cancel = CancellationToken::new();

    let model = api.model(&cancel).await.unwrap();
    let query = api.source(&model, "Orders").unwrap();
    let result = api
        .query(QueryRequest::new(query).with_total_count(true), &cancel)
        .await
        .unwrap();

    assert_eq!(result.results.len(), 2);
    assert_eq!(result.total_count, Some(3));
}

#[tokio::test]
async fn unknown_key_yields_an_empty_result() {
    let store = seeded_store();
    let api = api(&store, ConventionSurface::new());

    let result = api
        .query_path("Products(99)", &CancellationToken::new())
        .await
        .unwrap();

    assert!(result.results.is_empty());
}
