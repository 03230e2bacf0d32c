//! End-to-end HTTP behaviour over the in-memory repository and queue.

#![allow(clippy::unwrap_used)]

use axum::http::StatusCode;
use axum_test::TestServer;
use makeline_core::OrderService;
use makeline_core::order::{Order, OrderId, OrderStatus};
use makeline_testing::{InMemoryOrderQueue, InMemoryOrderRepository};
use makeline_web::{AppState, CORRELATION_ID_HEADER, build_router};
use serde_json::{Value, json};
use std::sync::Arc;

struct Harness {
    server: TestServer,
    repo: InMemoryOrderRepository,
    queue: InMemoryOrderQueue,
}

fn harness() -> Harness {
    let repo = InMemoryOrderRepository::new();
    let queue = InMemoryOrderQueue::new();
    let service = OrderService::new(Arc::new(repo.clone()), Arc::new(queue.clone()));
    let server = TestServer::new(build_router(AppState::new(service, "1.2.3"))).unwrap();

    Harness {
        server,
        repo,
        queue,
    }
}

fn place(queue: &InMemoryOrderQueue, id: &str) {
    let message = json!({
        "orderId": id,
        "customerId": "4321",
        "items": [{"productId": 1, "quantity": 2, "price": 4.99}],
        "status": 0
    });
    assert!(queue.push_message(message.to_string().as_bytes()));
}

#[tokio::test]
async fn order_lifecycle_scenario() {
    let h = harness();
    place(&h.queue, "1");
    place(&h.queue, "2");

    let response = h.server.get("/order/fetch").await;
    response.assert_status_ok();
    let pending: Value = response.json();
    assert_eq!(pending.as_array().unwrap().len(), 2);
    assert_eq!(pending[0]["orderId"], "1");
    assert_eq!(pending[0]["status"], 1);
    assert_eq!(pending[1]["orderId"], "2");
    assert_eq!(pending[1]["items"][0]["quantity"], 2);

    let update = json!({"orderId": "1", "status": 2});
    let response = h.server.put("/order").json(&update).await;
    response.assert_status(StatusCode::ACCEPTED);
    assert!(response.text().is_empty());

    let order: Value = h.server.get("/order/1").await.json();
    assert_eq!(order["status"], 2);
    assert_eq!(order["customerId"], "4321");

    h.server
        .put("/order")
        .json(&update)
        .await
        .assert_status(StatusCode::ACCEPTED);

    let pending: Value = h.server.get("/order/fetch").await.json();
    let ids: Vec<&str> = pending
        .as_array()
        .unwrap()
        .iter()
        .map(|o| o["orderId"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["2"]);
}

#[tokio::test]
async fn fetch_with_empty_queue_returns_backlog() {
    let h = harness();
    h.repo
        .seed([Order::new(OrderId::parse("9").unwrap(), OrderStatus::Pending)]);

    let response = h.server.get("/order/fetch").await;

    response.assert_status_ok();
    assert!(response.text().contains("\n    {\n        \"orderId\": \"9\""));
    assert_eq!(h.repo.insert_calls(), 0);
}

#[tokio::test]
async fn fetch_reports_queue_failure_as_500() {
    let h = harness();
    h.queue.set_failing(true);

    let response = h.server.get("/order/fetch").await;

    response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = response.json();
    assert_eq!(body["code"], "INTERNAL_SERVER_ERROR");
    assert_eq!(body["message"], "An internal error occurred");
}

#[tokio::test]
async fn get_order_canonicalizes_id() {
    let h = harness();
    h.repo
        .seed([Order::new(OrderId::parse("7").unwrap(), OrderStatus::Pending)]);

    let order: Value = h.server.get("/order/007").await.json();

    assert_eq!(order["orderId"], "7");
}

#[tokio::test]
async fn get_order_rejects_non_numeric_id() {
    let h = harness();

    let response = h.server.get("/order/abc").await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn unknown_order_is_404() {
    let h = harness();

    h.server
        .get("/order/42")
        .await
        .assert_status(StatusCode::NOT_FOUND);
    h.server
        .put("/order")
        .json(&json!({"orderId": "42", "status": 3}))
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn database_failure_is_500() {
    let h = harness();
    h.repo.set_unavailable(true);

    h.server
        .get("/order/1")
        .await
        .assert_status(StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn update_rejects_invalid_requests() {
    let h = harness();
    h.repo
        .seed([Order::new(OrderId::parse("1").unwrap(), OrderStatus::Pending)]);

    let bodies = [
        json!({"status": 2}),
        json!({"orderId": "", "status": 2}),
        json!({"orderId": "1"}),
        json!({"orderId": "1", "status": 0}),
        json!({"orderId": "1", "status": 1}),
        json!({"orderId": "1", "status": 7}),
        json!({"orderId": "x1", "status": 2}),
        json!({"orderId": "1", "status": "done"}),
    ];
    for body in bodies {
        h.server
            .put("/order")
            .json(&body)
            .await
            .assert_status(StatusCode::BAD_REQUEST);
    }

    h.server
        .put("/order")
        .text("not json")
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    assert_eq!(h.repo.stored("1").unwrap().status, OrderStatus::Pending);
}

#[tokio::test]
async fn health_reports_version() {
    let h = harness();

    let response = h.server.get("/health").await;

    response.assert_status_ok();
    response.assert_json(&json!({"status": "ok", "version": "1.2.3"}));
    assert!(response.headers().contains_key(CORRELATION_ID_HEADER));
}
