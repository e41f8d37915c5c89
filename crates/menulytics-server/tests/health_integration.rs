use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use menulytics_core::config::Config;
use menulytics_core::event::Event;
use menulytics_duckdb::DuckDbBackend;
use menulytics_server::app::build_app;
use menulytics_server::state::AppState;

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

async fn json_body(response: axum::http::Response<Body>) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("read body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("parse JSON")
}

#[tokio::test]
async fn test_health_returns_200_when_db_reachable() {
    let db = DuckDbBackend::open_in_memory().expect("in-memory DuckDB");
    let state = Arc::new(AppState::new(db, test_config()));
    let app = build_app(state);

    let request = Request::builder()
        .method("GET")
        .uri("/health")
        .body(Body::empty())
        .expect("build request");

    let response = app.oneshot(request).await.expect("request");
    assert_eq!(response.status(), StatusCode::OK);

    let json = json_body(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(json["database"], "up");
    assert_eq!(json["buffer"]["pending"], 0);
    assert_eq!(json["buffer"]["flush_at"], 100);
}

#[tokio::test]
async fn test_health_reports_unflushed_backlog() {
    let mut config = test_config();
    config.buffer_max_size = 2;
    let db = DuckDbBackend::open_in_memory().expect("in-memory DuckDB");
    let state = Arc::new(AppState::new(db, config));
    state
        .db
        .conn_for_test()
        .await
        .execute_batch("DROP TABLE analytics_events")
        .expect("drop table");

    let event: Event = serde_json::from_value(json!({
        "id": "evt-1",
        "location_id": "loc1",
        "type": "page_view",
        "session_id": "1772000000000-a1b2c3d4e",
        "device_type": "mobile",
        "browser": "Safari",
        "os": "iOS",
        "screen_size": null,
        "language": null,
        "referrer": null,
        "page_url": null,
        "created_at": "2026-03-02T12:00:00Z"
    }))
    .expect("event");
    let mut second = event.clone();
    second.id = "evt-2".to_string();
    state
        .push_events(vec![event, second])
        .await
        .expect("buffered");

    let request = Request::builder()
        .method("GET")
        .uri("/health")
        .body(Body::empty())
        .expect("build request");
    let response = build_app(Arc::clone(&state))
        .oneshot(request)
        .await
        .expect("request");

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["buffer"]["pending"], 2);
    assert_eq!(json["buffer"]["flush_at"], 2);
}

#[tokio::test]
async fn test_unknown_route_returns_404() {
    let db = DuckDbBackend::open_in_memory().expect("in-memory DuckDB");
    let app = build_app(Arc::new(AppState::new(db, test_config())));

    let request = Request::builder()
        .method("GET")
        .uri("/api/nothing-here")
        .body(Body::empty())
        .expect("build request");

    let response = app.oneshot(request).await.expect("request");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
