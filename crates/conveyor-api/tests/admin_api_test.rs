//! Admin API integration tests.
//!
//! Drives the router directly with `tower::ServiceExt::oneshot` against an
//! in-memory SQLite store, asserting both the HTTP contract and the
//! supervisor events each mutation emits.

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use sqlx::SqlitePool;
use tokio::sync::mpsc;
use tower::ServiceExt;

use conveyor_api::{create_router, AppState, Config};
use conveyor_broker::{ConsumerEvent, ConsumerEventKind};
use conveyor_core::{storage::Storage, ConsumerStatus};
use conveyor_delivery::{Alerter, CallbackClient, Dispatcher, NoOpAccessLog};

async fn test_app() -> (Router, Storage, mpsc::Receiver<ConsumerEvent>) {
    let pool = SqlitePool::connect("sqlite::memory:").await.expect("open in-memory sqlite");
    let storage = Storage::new(pool);
    storage.migrate().await.expect("apply schema");

    let client = CallbackClient::new().expect("build client");
    let dispatcher = Arc::new(Dispatcher::new(
        client.clone(),
        storage.clone(),
        Alerter::new(client, "http://127.0.0.1:1/robot/send"),
        Arc::new(NoOpAccessLog),
    ));

    let (events_tx, events_rx) = mpsc::channel(16);
    let state = AppState::new(storage.clone(), events_tx, dispatcher);
    let router = create_router(state, &Config::default());

    (router, storage, events_rx)
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn empty_request(method: &str, uri: &str) -> Request<Body> {
    Request::builder().method(method).uri(uri).body(Body::empty()).unwrap()
}

async fn response_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    serde_json::from_slice(&bytes).expect("response should be JSON")
}

fn consumer_body() -> Value {
    json!({
        "name": "orders",
        "queue_name": "orders.sync",
        "exchange_name": "orders",
        "routing_key": "orders.*",
        "callback": "http://api.internal/orders/sync",
        "status": "stopped",
        "retry_mode": "5s,1m"
    })
}

#[tokio::test]
async fn create_consumer_commits_and_emits_added() {
    let (app, storage, mut events) = test_app().await;

    let response =
        app.oneshot(json_request("POST", "/consumers", consumer_body())).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let body = response_json(response).await;
    let id = body["id"].as_i64().expect("id in response");

    let stored = storage.consumers.fetch(&id.to_string()).await.unwrap();
    assert_eq!(stored.name, "orders");

    let event = events.recv().await.expect("event emitted");
    assert_eq!(event.kind, ConsumerEventKind::Added);
    assert_eq!(event.spec.id, id.to_string());
}

#[tokio::test]
async fn invalid_consumer_is_rejected_without_event() {
    let (app, storage, mut events) = test_app().await;

    let mut body = consumer_body();
    body["callback"] = json!("not-a-url");

    let response = app.oneshot(json_request("POST", "/consumers", body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    assert!(storage.consumers.list().await.unwrap().is_empty());
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn update_replaces_definition_and_emits_updated() {
    let (app, storage, mut events) = test_app().await;

    let create = app
        .clone()
        .oneshot(json_request("POST", "/consumers", consumer_body()))
        .await
        .unwrap();
    let id = response_json(create).await["id"].as_i64().unwrap();
    let _ = events.recv().await;

    let mut body = consumer_body();
    body["status"] = json!("running");
    body["retry_mode"] = json!("");

    let response =
        app.oneshot(json_request("PUT", &format!("/consumers/{id}"), body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let stored = storage.consumers.fetch(&id.to_string()).await.unwrap();
    assert_eq!(stored.status, ConsumerStatus::Running);
    assert_eq!(stored.retry_mode, "");

    let event = events.recv().await.unwrap();
    assert_eq!(event.kind, ConsumerEventKind::Updated);
    assert_eq!(event.spec.status, ConsumerStatus::Running);
}

#[tokio::test]
async fn enable_and_disable_flip_status() {
    let (app, storage, mut events) = test_app().await;

    let create = app
        .clone()
        .oneshot(json_request("POST", "/consumers", consumer_body()))
        .await
        .unwrap();
    let id = response_json(create).await["id"].as_i64().unwrap();
    let _ = events.recv().await;

    let response = app
        .clone()
        .oneshot(empty_request("PUT", &format!("/consumers/{id}/enable")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        storage.consumers.fetch(&id.to_string()).await.unwrap().status,
        ConsumerStatus::Running
    );
    assert_eq!(events.recv().await.unwrap().kind, ConsumerEventKind::Updated);

    let response = app
        .oneshot(empty_request("PUT", &format!("/consumers/{id}/disable")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        storage.consumers.fetch(&id.to_string()).await.unwrap().status,
        ConsumerStatus::Stopped
    );
    assert_eq!(events.recv().await.unwrap().kind, ConsumerEventKind::Updated);
}

#[tokio::test]
async fn restart_emits_restarted_with_stored_definition() {
    let (app, _storage, mut events) = test_app().await;

    let create = app
        .clone()
        .oneshot(json_request("POST", "/consumers", consumer_body()))
        .await
        .unwrap();
    let id = response_json(create).await["id"].as_i64().unwrap();
    let _ = events.recv().await;

    let response = app
        .oneshot(empty_request("PUT", &format!("/consumers/{id}/restart")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let event = events.recv().await.unwrap();
    assert_eq!(event.kind, ConsumerEventKind::Restarted);
    assert_eq!(event.spec.queue_name, "orders.sync");
}

#[tokio::test]
async fn delete_removes_row_and_emits_deleted() {
    let (app, storage, mut events) = test_app().await;

    let create = app
        .clone()
        .oneshot(json_request("POST", "/consumers", consumer_body()))
        .await
        .unwrap();
    let id = response_json(create).await["id"].as_i64().unwrap();
    let _ = events.recv().await;

    let response =
        app.oneshot(empty_request("DELETE", &format!("/consumers/{id}"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    assert!(storage.consumers.list().await.unwrap().is_empty());
    assert_eq!(events.recv().await.unwrap().kind, ConsumerEventKind::Deleted);
}

#[tokio::test]
async fn mutations_on_unknown_ids_are_not_found() {
    let (app, _storage, _events) = test_app().await;

    let response = app
        .clone()
        .oneshot(empty_request("DELETE", "/consumers/404"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app.oneshot(empty_request("PUT", "/consumers/404/enable")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn broker_config_round_trips() {
    let (app, _storage, _events) = test_app().await;

    let response = app
        .clone()
        .oneshot(json_request(
            "PUT",
            "/rabbitmq-config",
            json!({
                "host": "rabbit.internal",
                "port": 5671,
                "vhost": "orders",
                "user": "svc",
                "password": "secret"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.oneshot(empty_request("GET", "/rabbitmq-config")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = response_json(response).await;
    assert_eq!(body["host"], "rabbit.internal");
    assert_eq!(body["port"], 5671);
    assert_eq!(body["vhost"], "orders");
}

#[tokio::test]
async fn failed_callbacks_list_and_delete() {
    let (app, storage, _events) = test_app().await;

    let id = storage
        .failed_callbacks
        .insert("http://c/hook", "{}", 500, "nope", "orders.sync")
        .await
        .unwrap();

    let response = app
        .clone()
        .oneshot(empty_request("GET", "/failed-callbacks"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["response_code"], 500);

    let response = app
        .oneshot(empty_request("DELETE", &format!("/failed-callbacks/{id}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(storage.failed_callbacks.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn bulk_delete_removes_all_listed_records() {
    let (app, storage, _events) = test_app().await;

    let first =
        storage.failed_callbacks.insert("http://c/a", "{}", 500, "a", "q").await.unwrap();
    let second =
        storage.failed_callbacks.insert("http://c/b", "{}", 502, "b", "q").await.unwrap();

    let response = app
        .oneshot(json_request(
            "POST",
            "/failed-callbacks/bulk",
            json!({ "ids": [first, second], "action": "delete" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    assert!(storage.failed_callbacks.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn bulk_with_unknown_action_is_rejected() {
    let (app, _storage, _events) = test_app().await;

    let response = app
        .oneshot(json_request(
            "POST",
            "/failed-callbacks/bulk",
            json!({ "ids": [1], "action": "requeue" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn health_reports_ok() {
    let (app, _storage, _events) = test_app().await;

    let response = app.oneshot(empty_request("GET", "/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = response_json(response).await;
    assert_eq!(body["status"], "ok");
}
