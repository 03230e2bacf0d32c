//! [`CosmosOrderRepository`] against a mocked Cosmos DB REST endpoint.

#![allow(clippy::unwrap_used)]

use makeline_core::order::{Order, OrderId, OrderStatus};
use makeline_core::repository::{OrderRepository, RepositoryError};
use makeline_cosmos::{CosmosCredential, CosmosOrderRepository, PartitionKey};
use serde_json::json;
use wiremock::matchers::{
    body_partial_json, body_string_contains, header, header_exists, method, path,
};
use wiremock::{Mock, MockServer, ResponseTemplate};

const FEED: &str = "/dbs/orderdb/colls/orders/docs";

fn repository(server: &MockServer) -> CosmosOrderRepository {
    CosmosOrderRepository::builder()
        .endpoint(server.uri())
        .database("orderdb")
        .container("orders")
        .partition_key(PartitionKey::new("storeId", "pets").unwrap())
        .credential(CosmosCredential::shared_key("c2VjcmV0LWFjY291bnQta2V5").unwrap())
        .build()
        .unwrap()
}

fn order(id: &str) -> Order {
    Order::new(OrderId::parse(id).unwrap(), OrderStatus::Pending).with_field("customerId", "4321")
}

fn stored(id: &str, status: i64) -> serde_json::Value {
    json!({
        "id": id,
        "orderId": id,
        "storeId": "pets",
        "status": status,
        "customerId": "4321",
        "_rid": "rid==",
        "_etag": "\"etag\"",
        "_ts": 1_700_000_000
    })
}

#[tokio::test]
async fn insert_treats_conflict_as_already_stored() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(FEED))
        .and(header("x-ms-documentdb-partitionkey", r#"["pets"]"#))
        .and(header("x-ms-version", "2018-12-31"))
        .and(header_exists("authorization"))
        .and(header_exists("x-ms-date"))
        .and(body_partial_json(json!({"id": "1", "orderId": "1", "storeId": "pets", "status": 1})))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(FEED))
        .and(body_partial_json(json!({"orderId": "2"})))
        .respond_with(ResponseTemplate::new(409))
        .expect(1)
        .mount(&server)
        .await;

    repository(&server)
        .insert_orders(vec![order("1"), order("2")])
        .await
        .unwrap();
}

#[tokio::test]
async fn insert_surfaces_server_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(FEED))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let result = repository(&server).insert_orders(vec![order("1")]).await;

    assert!(matches!(result, Err(RepositoryError::DatabaseError(_))));
}

#[tokio::test]
async fn rejected_credentials_are_authentication_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let result = repository(&server)
        .get_order(&OrderId::parse("1").unwrap())
        .await;

    assert!(matches!(result, Err(RepositoryError::AuthenticationError(_))));
}

#[tokio::test]
async fn pending_query_follows_continuations_and_sorts() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(FEED))
        .and(header("x-ms-continuation", "page-2"))
        .and(header("x-ms-documentdb-partitionkey", r#"["pets"]"#))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"Documents": [stored("3", 1)]})),
        )
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(FEED))
        .and(header("x-ms-documentdb-isquery", "True"))
        .and(header("x-ms-documentdb-partitionkey", r#"["pets"]"#))
        .and(header("content-type", "application/query+json"))
        .and(body_string_contains("o.status = @status"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-ms-continuation", "page-2")
                .set_body_json(json!({"Documents": [stored("10", 1), stored("2", 1)]})),
        )
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;

    let pending = repository(&server).get_pending_orders().await.unwrap();

    let ids: Vec<&str> = pending.iter().map(|o| o.order_id.as_str()).collect();
    assert_eq!(ids, vec!["2", "3", "10"]);
    assert!(pending.iter().all(|o| o.payload.len() == 1));
}

#[tokio::test]
async fn get_order_strips_store_bookkeeping() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("{FEED}/12")))
        .and(header("x-ms-documentdb-partitionkey", r#"["pets"]"#))
        .respond_with(ResponseTemplate::new(200).set_body_json(stored("12", 2)))
        .expect(1)
        .mount(&server)
        .await;

    let order = repository(&server)
        .get_order(&OrderId::parse("12").unwrap())
        .await
        .unwrap();

    assert_eq!(order.status, OrderStatus::Processing);
    assert_eq!(order.payload.get("customerId"), Some(&json!("4321")));
    assert!(!order.payload.contains_key("storeId"));
    assert!(!order.payload.contains_key("_etag"));
}

#[tokio::test]
async fn missing_order_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    let repo = repository(&server);

    assert!(matches!(
        repo.get_order(&OrderId::parse("9").unwrap()).await,
        Err(RepositoryError::NotFound(_))
    ));
    assert!(matches!(
        repo.update_order(order("9")).await,
        Err(RepositoryError::NotFound(_))
    ));
}

#[tokio::test]
async fn update_replaces_item_in_partition() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("{FEED}/5")))
        .and(header("x-ms-documentdb-partitionkey", r#"["pets"]"#))
        .respond_with(ResponseTemplate::new(200).set_body_json(stored("5", 1)))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path(format!("{FEED}/5")))
        .and(header("x-ms-documentdb-partitionkey", r#"["pets"]"#))
        .and(body_partial_json(json!({
            "id": "5",
            "orderId": "5",
            "storeId": "pets",
            "status": 3,
            "customerId": "4321"
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    repository(&server)
        .update_order(Order::new(OrderId::parse("5").unwrap(), OrderStatus::Complete))
        .await
        .unwrap();
}
