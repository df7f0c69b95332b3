use std::num::NonZeroUsize;
use std::sync::Arc;

use assert_json_diff::assert_json_include;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use log_common::health::HealthRegistry;
use log_common::record::Record;
use log_ingestor::queue::RecordQueue;
use log_ingestor::router::{router, State};
use log_ingestor::test_utils::{record, MemoryStore};
use serde_json::{json, Value};
use time::macros::datetime;
use tower::ServiceExt;

fn app(queue: Arc<RecordQueue>, store: MemoryStore) -> Router {
    let state = State {
        queue,
        store: Arc::new(store),
        index: "ingestor".to_string(),
    };
    router(state, HealthRegistry::new("liveness"), false).unwrap()
}

fn queue() -> Arc<RecordQueue> {
    Arc::new(RecordQueue::new(NonZeroUsize::new(10).unwrap()))
}

fn stored() -> MemoryStore {
    let mut records = Vec::new();
    for (i, (topic, level)) in [
        ("auth", "error"),
        ("auth", "info"),
        ("database", "error"),
        ("database", "info"),
    ]
    .into_iter()
    .enumerate()
    {
        let mut record = record(topic, level, &format!("{topic} {level}"));
        record.timestamp = datetime!(2024-03-10 12:00:00 UTC) + time::Duration::hours(i as i64);
        records.push(record);
    }
    MemoryStore::new(records)
}

async fn get(app: Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

async fn post(app: Router, uri: &str, body: String) -> (StatusCode, Value) {
    let request = Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn add_log_enqueues_record() {
    let queue = queue();
    let body = json!({
        "level": "error",
        "message": "Failed to authenticate user",
        "resourceId": "server-1234",
        "timestamp": "2023-09-15T08:00:00Z",
        "traceId": "abc-xyz-123",
        "spanId": "span-456",
        "commit": "5e5342f",
        "metadata": { "parentResourceId": "server-0987" },
        "topic": "auth"
    });

    let app = app(queue.clone(), stored());
    let (status, response) = post(app, "/add-log", body.to_string()).await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(response, json!({ "status": "success" }));

    let record: Record = queue.dequeue().await.unwrap();
    assert_eq!(record.topic, "auth");
    assert_eq!(record.message, "Failed to authenticate user");
    assert_eq!(record.metadata["parentResourceId"], "server-0987");
}

#[tokio::test]
async fn add_log_rejects_malformed_body() {
    let queue = queue();

    let truncated = "{\"level\":".to_string();
    let (status, response) = post(app(queue.clone(), stored()), "/add-log", truncated).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(response["error"].is_string());

    let no_timestamp = json!({ "level": "info", "message": "hello" }).to_string();
    let (status, _) = post(app(queue.clone(), stored()), "/add-log", no_timestamp).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert!(queue.is_empty());
}

#[tokio::test]
async fn add_log_fails_once_queue_is_closed() {
    let queue = queue();
    queue.close();

    let body = json!({ "level": "info", "timestamp": "2023-09-15T08:00:00Z" }).to_string();
    let (status, response) = post(app(queue, stored()), "/add-log", body).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(response["error"].is_string());
}

#[tokio::test]
async fn count_applies_filters() {
    let (status, response) = get(app(queue(), stored()), "/logs-count").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response, json!({ "count": 4 }));

    let (_, response) = get(app(queue(), stored()), "/logs-count?topic=auth&logLevel=error").await;
    assert_eq!(response, json!({ "count": 1 }));
}

#[tokio::test]
async fn list_filters_on_topic_and_level() {
    let uri = "/all-logs?topic=auth&logLevel=error";
    let (status, response) = get(app(queue(), stored()), uri).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["total"], 1);
    assert_json_include!(
        actual: response,
        expected: json!({
            "logs": [{
                "_source": {
                    "topic": "auth",
                    "level": "error",
                    "message": "auth error",
                    "resourceId": "server-1234"
                }
            }]
        })
    );
}

#[tokio::test]
async fn list_all_topics_newest_first() {
    let uri = "/all-logs?topic=all&page=1&size=3";
    let (status, response) = get(app(queue(), stored()), uri).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["total"], 4);
    let messages: Vec<&str> = response["logs"]
        .as_array()
        .unwrap()
        .iter()
        .map(|log| log["_source"]["message"].as_str().unwrap())
        .collect();
    assert_eq!(messages, vec!["database info", "database error", "auth info"]);

    let (_, response) = get(app(queue(), stored()), "/all-logs?page=2&size=3").await;
    assert_eq!(response["logs"].as_array().unwrap().len(), 1);
    assert_eq!(response["logs"][0]["_source"]["message"], "auth error");
}

#[tokio::test]
async fn list_filters_on_date_range() {
    let (_, response) = get(
        app(queue(), stored()),
        "/all-logs?startDate=2024-03-10T13:00:00Z&endDate=2024-03-10T14:00:00Z",
    )
    .await;

    assert_eq!(response["total"], 2);
}

#[tokio::test]
async fn list_rejects_invalid_parameters() {
    for (uri, message) in [
        ("/all-logs?page=0", "Invalid page value"),
        ("/all-logs?size=abc", "Invalid size value"),
        ("/all-logs?endDate=03/10/2024", "Invalid endDate value"),
        ("/logs-count?startDate=soon", "Invalid startDate value"),
    ] {
        let (status, response) = get(app(queue(), stored()), uri).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
        assert_eq!(response, json!({ "error": message }), "{uri}");
    }
}

#[tokio::test]
async fn store_failure_is_internal_error() {
    for uri in ["/all-logs", "/logs-count"] {
        let (status, response) = get(app(queue(), MemoryStore::unavailable()), uri).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response, json!({ "error": "Internal Server Error" }));
    }
}

#[tokio::test]
async fn health_endpoints() {
    let response = app(queue(), stored())
        .oneshot(Request::get("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"log-ingestor");

    // Nothing registered yet, so nothing is known to be alive
    let response = app(queue(), stored())
        .oneshot(Request::get("/_liveness").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}
