//! In-process scenario tests for mqk-daemon's HTTP endpoints.
//!
//! These tests spin up the Axum router **without** binding a TCP socket,
//! driven via `tower::ServiceExt::oneshot`. DB-backed: skipped if
//! `MQK_DATABASE_URL` is not set, same convention as `mqk-db`'s own tests.

use std::sync::Arc;

use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use mqk_config::AutonomyRuntimeConfig;
use mqk_daemon::{routes, state};
use tower::ServiceExt; // oneshot

async fn make_router() -> Option<axum::Router> {
    let url = std::env::var(mqk_db::ENV_DB_URL).ok()?;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(2)
        .connect(&url)
        .await
        .expect("connect to test database");
    mqk_db::migrate(&pool).await.expect("migrate test database");

    let st = Arc::new(state::AppState::new(pool, AutonomyRuntimeConfig::default()));
    Some(routes::build_router(st))
}

async fn call(router: axum::Router, req: Request<axum::body::Body>) -> (StatusCode, bytes::Bytes) {
    let resp = router.oneshot(req).await.expect("oneshot failed");
    let status = resp.status();
    let body = resp.into_body().collect().await.expect("body collect failed").to_bytes();
    (status, body)
}

fn parse_json(b: bytes::Bytes) -> serde_json::Value {
    serde_json::from_slice(&b).expect("body is not valid JSON")
}

#[tokio::test]
async fn health_reports_service_and_db_connectivity() {
    let Some(router) = make_router().await else {
        eprintln!("SKIP: MQK_DATABASE_URL not set");
        return;
    };

    let req = Request::builder().method("GET").uri("/v1/health").body(axum::body::Body::empty()).unwrap();
    let (status, body) = call(router, req).await;
    assert_eq!(status, StatusCode::OK);

    let json = parse_json(body);
    assert_eq!(json["service"], "mqk-daemon");
    assert_eq!(json["db_ok"], true);
    assert_eq!(json["ok"], true);
}

#[tokio::test]
async fn status_reflects_default_autonomy_config_with_no_policy_row() {
    let Some(router) = make_router().await else {
        eprintln!("SKIP: MQK_DATABASE_URL not set");
        return;
    };

    let req = Request::builder().method("GET").uri("/v1/status").body(axum::body::Body::empty()).unwrap();
    let (status, body) = call(router, req).await;
    assert_eq!(status, StatusCode::OK);

    let json = parse_json(body);
    // Default config: autonomy disabled, no policy row written, so no overrides apply.
    assert_eq!(json["autonomy_enabled"], false);
    assert_eq!(json["full_auto"], false);
    assert_eq!(json["observation_only"], false);
    assert_eq!(json["heartbeat_enabled"], false);
}

#[tokio::test]
async fn stream_responds_with_event_stream_content_type() {
    let Some(router) = make_router().await else {
        eprintln!("SKIP: MQK_DATABASE_URL not set");
        return;
    };

    let req = Request::builder().method("GET").uri("/v1/stream").body(axum::body::Body::empty()).unwrap();
    let resp = router.oneshot(req).await.expect("oneshot failed");
    assert_eq!(resp.status(), StatusCode::OK);
    let content_type = resp.headers().get("content-type").unwrap().to_str().unwrap();
    assert!(content_type.starts_with("text/event-stream"));
}

#[tokio::test]
async fn unknown_route_is_404() {
    let Some(router) = make_router().await else {
        eprintln!("SKIP: MQK_DATABASE_URL not set");
        return;
    };

    let req = Request::builder().method("GET").uri("/v1/nope").body(axum::body::Body::empty()).unwrap();
    let (status, _) = call(router, req).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
