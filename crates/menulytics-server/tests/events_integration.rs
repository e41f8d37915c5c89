use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{Duration, Utc};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use menulytics_core::config::Config;
use menulytics_duckdb::DuckDbBackend;
use menulytics_server::app::build_app;
use menulytics_server::state::{
    AppState, MAX_BATCH_SIZE, RATE_LIMIT_PER_MINUTE, RATE_LIMIT_WINDOW,
};

fn test_config() -> Config {
    Config {
        port: 0,
        data_dir: "/tmp/menulytics-test".to_string(),
        duckdb_memory_limit: "256MB".to_string(),
        cors_origins: vec![],
        timezone: chrono_tz::Tz::UTC,
        buffer_flush_interval_ms: 5000,
        buffer_max_size: 100,
        rate_limit_disable: false,
    }
}

fn setup() -> (Arc<AppState>, axum::Router) {
    setup_with(test_config())
}

fn setup_with(config: Config) -> (Arc<AppState>, axum::Router) {
    let db = DuckDbBackend::open_in_memory().expect("in-memory DuckDB");
    let state = Arc::new(AppState::new(db, config));
    let app = build_app(Arc::clone(&state));
    (state, app)
}

async fn json_body(response: axum::http::Response<Body>) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("read body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("parse JSON")
}

fn event_payload(location_id: &str, event_type: &str, created_at: &str) -> Value {
    json!({
        "id": uuid::Uuid::new_v4().to_string(),
        "location_id": location_id,
        "type": event_type,
        "session_id": "1772000000000-a1b2c3d4e",
        "device_type": "mobile",
        "browser": "Safari",
        "os": "iOS",
        "screen_size": "390x844",
        "language": "en",
        "page_url": "/menu",
        "metadata": {},
        "created_at": created_at
    })
}

fn post_events(body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/events")
        .header("content-type", "application/json")
        .header("x-forwarded-for", "203.0.113.7")
        .body(Body::from(body.to_string()))
        .expect("build request")
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .expect("build request")
}

async fn row_count(state: &AppState) -> i64 {
    let conn = state.db.conn_for_test().await;
    let mut stmt = conn
        .prepare("SELECT COUNT(*) FROM analytics_events")
        .expect("prepare");
    stmt.query_row([], |row| row.get(0)).expect("count")
}

#[tokio::test]
async fn test_single_event_is_accepted_and_buffered() {
    let (state, app) = setup();

    let response = app
        .oneshot(post_events(&event_payload(
            "loc1",
            "page_view",
            "2026-03-02T12:00:00Z",
        )))
        .await
        .expect("request");

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(json_body(response).await, json!({ "ok": true }));
    assert_eq!(state.buffer.lock().await.len(), 1);
}

#[tokio::test]
async fn test_batch_then_list_returns_events_in_time_order() {
    let (_state, app) = setup();

    let batch = json!([
        event_payload("loc1", "product_view", "2026-03-02T15:00:00Z"),
        event_payload("loc1", "qr_scan", "2026-03-02T09:00:00Z"),
        event_payload("loc2", "page_view", "2026-03-02T10:00:00Z"),
    ]);
    let response = app
        .clone()
        .oneshot(post_events(&batch))
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let response = app
        .oneshot(get(
            "/api/locations/loc1/events?start=2026-03-02T00:00:00Z&end=2026-03-03T00:00:00Z",
        ))
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::OK);

    let json = json_body(response).await;
    let data = json["data"].as_array().expect("data array");
    assert_eq!(data.len(), 2);
    assert_eq!(data[0]["type"], "qr_scan");
    assert_eq!(data[1]["type"], "product_view");
    assert_eq!(data[0]["location_id"], "loc1");
}

#[tokio::test]
async fn test_resending_a_batch_stores_each_event_once() {
    let (state, app) = setup();

    let batch = json!([
        event_payload("loc1", "page_view", "2026-03-02T12:00:00Z"),
        event_payload("loc1", "search", "2026-03-02T12:01:00Z"),
    ]);
    for _ in 0..2 {
        let response = app
            .clone()
            .oneshot(post_events(&batch))
            .await
            .expect("request");
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        state.flush_buffer().await;
    }

    assert_eq!(row_count(&state).await, 2);
}

#[tokio::test]
async fn test_empty_batch_is_rejected() {
    let (_state, app) = setup();

    let response = app
        .oneshot(post_events(&json!([])))
        .await
        .expect("request");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = json_body(response).await;
    assert_eq!(json["error"]["code"], "validation_error");
}

#[tokio::test]
async fn test_oversized_batch_is_rejected() {
    let (state, app) = setup();

    let events: Vec<Value> = (0..=MAX_BATCH_SIZE)
        .map(|_| event_payload("loc1", "page_view", "2026-03-02T12:00:00Z"))
        .collect();
    let response = app
        .oneshot(post_events(&Value::Array(events)))
        .await
        .expect("request");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = json_body(response).await;
    assert_eq!(json["error"]["code"], "batch_too_large");
    assert!(state.buffer.lock().await.is_empty());
}

#[tokio::test]
async fn test_blank_session_id_is_rejected() {
    let (_state, app) = setup();

    let mut event = event_payload("loc1", "page_view", "2026-03-02T12:00:00Z");
    event["session_id"] = json!("  ");
    let response = app.oneshot(post_events(&event)).await.expect("request");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = json_body(response).await;
    assert_eq!(json["error"]["message"], "session_id must not be empty");
}

#[tokio::test]
async fn test_list_rejects_inverted_range_and_bad_timestamps() {
    let (_state, app) = setup();

    let response = app
        .clone()
        .oneshot(get(
            "/api/locations/loc1/events?start=2026-03-03T00:00:00Z&end=2026-03-02T00:00:00Z",
        ))
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .oneshot(get("/api/locations/loc1/events?start=last-week"))
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_list_defaults_to_last_seven_days() {
    let (_state, app) = setup();

    let recent = (Utc::now() - Duration::hours(1)).to_rfc3339();
    let old = (Utc::now() - Duration::days(10)).to_rfc3339();
    let batch = json!([
        event_payload("loc1", "page_view", &recent),
        event_payload("loc1", "page_view", &old),
    ]);
    app.clone()
        .oneshot(post_events(&batch))
        .await
        .expect("request");

    let response = app
        .oneshot(get("/api/locations/loc1/events"))
        .await
        .expect("request");
    let json = json_body(response).await;
    assert_eq!(json["data"].as_array().expect("data").len(), 1);
}

#[tokio::test]
async fn test_failed_flush_keeps_events_and_overload_returns_503() {
    let mut config = test_config();
    config.buffer_max_size = 2;
    let (state, app) = setup_with(config);

    state
        .db
        .conn_for_test()
        .await
        .execute_batch("DROP TABLE analytics_events")
        .expect("drop table");

    // Second event reaches buffer_max_size and triggers a flush that fails.
    for _ in 0..2 {
        let response = app
            .clone()
            .oneshot(post_events(&event_payload(
                "loc1",
                "page_view",
                "2026-03-02T12:00:00Z",
            )))
            .await
            .expect("request");
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }
    assert_eq!(state.buffer.lock().await.len(), 2);

    let events: Vec<Value> = (0..19)
        .map(|_| event_payload("loc1", "page_view", "2026-03-02T12:00:00Z"))
        .collect();
    let response = app
        .oneshot(post_events(&Value::Array(events)))
        .await
        .expect("request");

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(
        response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok()),
        Some("5")
    );
    let json = json_body(response).await;
    assert_eq!(json["error"]["code"], "ingest_overloaded");
    assert_eq!(state.buffer.lock().await.len(), 2);
}

#[tokio::test]
async fn test_rate_limit_per_ip() {
    let (state, _app) = setup();

    for _ in 0..RATE_LIMIT_PER_MINUTE {
        assert!(state.check_rate_limit("198.51.100.1").await);
    }
    assert!(!state.check_rate_limit("198.51.100.1").await);
    assert!(state.check_rate_limit("198.51.100.2").await);
}

#[tokio::test]
async fn test_rate_limit_can_be_disabled() {
    let mut config = test_config();
    config.rate_limit_disable = true;
    let (state, _app) = setup_with(config);

    for _ in 0..=RATE_LIMIT_PER_MINUTE {
        assert!(state.check_rate_limit("198.51.100.1").await);
    }
}

#[tokio::test(start_paused = true)]
async fn test_idle_clients_are_pruned_from_rate_limiter() {
    let (state, _app) = setup();

    assert!(state.check_rate_limit("198.51.100.1").await);
    assert!(state.check_rate_limit("198.51.100.2").await);
    assert_eq!(state.rate_limited_clients().await, 2);

    tokio::time::advance(RATE_LIMIT_WINDOW / 2).await;
    assert!(state.check_rate_limit("198.51.100.2").await);
    assert_eq!(state.prune_rate_limiter().await, 0);

    tokio::time::advance(RATE_LIMIT_WINDOW / 2 + std::time::Duration::from_secs(1)).await;
    assert_eq!(state.prune_rate_limiter().await, 1);
    assert_eq!(state.rate_limited_clients().await, 1);

    tokio::time::advance(RATE_LIMIT_WINDOW).await;
    assert_eq!(state.prune_rate_limiter().await, 1);
    assert_eq!(state.rate_limited_clients().await, 0);
}

#[tokio::test]
async fn test_full_batch_into_empty_buffer_is_accepted() {
    let mut config = test_config();
    config.buffer_max_size = 10;
    let (state, app) = setup_with(config);

    let events: Vec<Value> = (0..MAX_BATCH_SIZE)
        .map(|_| event_payload("loc1", "page_view", "2026-03-02T12:00:00Z"))
        .collect();
    let response = app
        .clone()
        .oneshot(post_events(&Value::Array(events)))
        .await
        .expect("request");

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert!(state.buffer.lock().await.is_empty());

    let response = app
        .oneshot(get(
            "/api/locations/loc1/events?start=2026-03-02T00:00:00Z&end=2026-03-03T00:00:00Z",
        ))
        .await
        .expect("request");
    let json = json_body(response).await;
    assert_eq!(json["data"].as_array().expect("data").len(), MAX_BATCH_SIZE);
}
