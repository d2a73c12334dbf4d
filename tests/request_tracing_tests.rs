/// End-to-end tests for trace propagation through the HTTP middleware chain
mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    routing::get,
    Router,
};
use common::TestApp;
use serde_json::Value;
use tower::ServiceExt;
use user_api::observability::REQUEST_ID_HEADER;

async fn send(app: &TestApp, uri: &str) -> (StatusCode, String, Value) {
    let response = app
        .router
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let trace_id = response.headers()[REQUEST_ID_HEADER]
        .to_str()
        .unwrap()
        .to_string();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, trace_id, json)
}

fn by_msg<'a>(records: &'a [Value], msg: &str) -> Vec<&'a Value> {
    records.iter().filter(|r| r["msg"] == msg).collect()
}

#[tokio::test]
async fn test_list_users_end_to_end() -> anyhow::Result<()> {
    let app = TestApp::new().await;
    app.seed_users(12).await;

    let (status, trace_id, body) = send(&app, "/api/v1/users?page=2&size=5").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["page"], 2);
    assert_eq!(body["size"], 5);
    assert_eq!(body["total"], 12);
    assert_eq!(body["users"].as_array().unwrap().len(), 5);
    assert_eq!(body["users"][0]["name"], "user06");

    let records = app.records();
    assert!(!records.is_empty());
    // Every record of the request carries the id echoed in the header
    for record in &records {
        assert_eq!(record["trace_id"], trace_id.as_str(), "record: {}", record);
    }

    let fetching = by_msg(&records, "Fetching users");
    assert_eq!(fetching.len(), 1);
    assert_eq!(fetching[0]["page"], 2);
    assert_eq!(fetching[0]["size"], 5);

    let queries = by_msg(&records, "SQL query executed");
    assert_eq!(queries.len(), 2, "count and page queries");
    for query in &queries {
        assert_eq!(query["level"], "info");
        assert!(query["sql"].as_str().unwrap().contains("FROM users"));
    }
    assert!(queries[1]["sql"].as_str().unwrap().ends_with("LIMIT 5 OFFSET 5"));

    let started = by_msg(&records, "Request started");
    assert_eq!(started.len(), 1);
    assert_eq!(started[0]["method"], "GET");
    assert_eq!(started[0]["path"], "/api/v1/users");
    assert_eq!(started[0]["query"], "page=2&size=5");

    let completed = by_msg(&records, "Request completed");
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0]["status"], 200);
    assert!(completed[0]["duration"].as_f64().unwrap() >= 0.0);
    let response_body: Value =
        serde_json::from_str(completed[0]["response_body"].as_str().unwrap())?;
    assert_eq!(response_body["total"], 12);

    // Completion is the last record of the request
    assert_eq!(records.last().unwrap()["msg"], "Request completed");
    Ok(())
}

#[tokio::test]
async fn test_handler_panic_is_recovered() -> anyhow::Result<()> {
    async fn explode() -> &'static str {
        panic!("database exploded")
    }

    let app = TestApp::with_routes(Router::new().route("/api/v1/explode", get(explode))).await;

    let (status, trace_id, body) = send(&app, "/api/v1/explode").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"]["type"], "internal_error");

    // The server keeps serving
    let (status, _, _) = send(&app, "/api/v1/users").await;
    assert_eq!(status, StatusCode::OK);

    let records = app.records();
    let errors: Vec<&Value> = records.iter().filter(|r| r["level"] == "error").collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0]["msg"], "Recovered from panic");
    assert_eq!(errors[0]["panic"], "database exploded");
    assert_eq!(errors[0]["trace_id"], trace_id.as_str());

    let completed: Vec<&Value> = by_msg(&records, "Request completed")
        .into_iter()
        .filter(|r| r["trace_id"] == trace_id.as_str())
        .collect();
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0]["status"], 500);
    Ok(())
}

#[tokio::test]
async fn test_get_user_found_and_missing() -> anyhow::Result<()> {
    let app = TestApp::new().await;
    app.seed_users(1).await;

    let (status, _, body) = send(&app, "/api/v1/users/1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["email"], "user01@example.com");

    let (status, missing_trace, body) = send(&app, "/api/v1/users/404").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["type"], "not_found");

    let records = app.records();
    let missing: Vec<&Value> = records
        .iter()
        .filter(|r| r["trace_id"] == missing_trace.as_str())
        .collect();
    // Not-found is benign: traced at info, never as an error
    assert!(missing.iter().all(|r| r["level"] != "error"));
    let query = missing
        .iter()
        .find(|r| r["msg"] == "SQL query executed")
        .expect("lookup query is traced");
    assert_eq!(query["rows"], 0);
    Ok(())
}

#[tokio::test]
async fn test_invalid_pagination_is_rejected() -> anyhow::Result<()> {
    let app = TestApp::new().await;

    let (status, trace_id, body) = send(&app, "/api/v1/users?page=abc").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["type"], "invalid_request");

    let (status, _, body) = send(&app, "/api/v1/users?page=0&size=-3").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["page"], 1);
    assert_eq!(body["size"], 10);

    let records = app.records();
    let failed = by_msg(&records, "Failed to parse page parameter");
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0]["trace_id"], trace_id.as_str());
    Ok(())
}

#[tokio::test]
async fn test_concurrent_requests_keep_their_own_trace() -> anyhow::Result<()> {
    let app = TestApp::new().await;
    app.seed_users(3).await;

    let (first, second) = tokio::join!(
        send(&app, "/api/v1/users?size=1"),
        send(&app, "/api/v1/users/2"),
    );
    assert_ne!(first.1, second.1);

    let records = app.records();
    for (trace_id, path) in [(&first.1, "/api/v1/users"), (&second.1, "/api/v1/users/2")] {
        let own: Vec<&Value> = records
            .iter()
            .filter(|r| r["trace_id"] == trace_id.as_str())
            .collect();
        assert_eq!(by_msg_refs(&own, "Request started").len(), 1);
        assert_eq!(by_msg_refs(&own, "Request completed").len(), 1);
        assert!(own
            .iter()
            .filter(|r| r.get("path").is_some())
            .all(|r| r["path"] == path));
    }
    Ok(())
}

fn by_msg_refs<'a>(records: &[&'a Value], msg: &str) -> Vec<&'a Value> {
    records.iter().copied().filter(|r| r["msg"] == msg).collect()
}

#[tokio::test]
async fn test_metrics_endpoint_is_traced() -> anyhow::Result<()> {
    let app = TestApp::new().await;

    let response = app
        .router
        .clone()
        .oneshot(Request::builder().uri("/metrics").body(Body::empty())?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key(REQUEST_ID_HEADER));
    Ok(())
}
