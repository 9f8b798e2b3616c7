mod common;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{Duration, Utc};
use tower::ServiceExt;

use polysentry::api::create_router;
use polysentry::config::DetectionConfig;
use polysentry::ingestion::FeedActivity;
use polysentry::intelligence::Trackers;
use polysentry::models::Side;
use polysentry::AppState;

fn build_state(started_ago: Duration) -> AppState {
    AppState {
        trackers: Trackers::from_config(&DetectionConfig::default()),
        feed: Arc::new(FeedActivity::default()),
        health_stale_secs: 300,
        started_at: Utc::now() - started_ago,
        metrics_handle: polysentry::metrics::detached_handle(),
    }
}

async fn get(app: axum::Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let resp = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = resp.status();
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let json = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    (status, json)
}

#[tokio::test]
async fn test_health_reports_recent_traffic() {
    let state = build_state(Duration::hours(1));
    state.feed.record(Utc::now());
    let app = create_router(state);

    let (status, json) = get(app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["stale"], false);
    assert_eq!(json["message_count"], 1);
}

#[tokio::test]
async fn test_health_stale_without_traffic() {
    let app = create_router(build_state(Duration::hours(1)));

    let (status, json) = get(app, "/health").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["status"], "stale");
    assert_eq!(json["stale"], true);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let app = create_router(build_state(Duration::zero()));

    let resp = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_unknown_wallet_not_found() {
    let app = create_router(build_state(Duration::zero()));

    let (status, json) = get(app, "/api/wallets/0xnobody").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["success"], false);
}

#[tokio::test]
async fn test_invalid_wallet_rejected() {
    let app = create_router(build_state(Duration::zero()));

    let (status, _) = get(app, "/api/wallets/nobody").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_wallet_stats_reported() {
    let state = build_state(Duration::zero());
    state.trackers.contrarian.insert("0xabc");
    let at = Utc::now();
    let buy = common::trade_at("0xabc", common::YES_TOKEN, Side::Buy, "0.40", 30_000, at);
    state.trackers.patterns.observe(&buy, None, at);
    let app = create_router(state);

    let (status, json) = get(app, "/api/wallets/0xABC").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    assert_eq!(json["data"]["wallet"], "0xabc");
    assert_eq!(json["data"]["contrarian_winner"], true);
    let trackers = json["data"]["trackers"].as_array().expect("array");
    assert!(trackers
        .iter()
        .any(|t| t["tracker"] == "pre_move_positioning" && t["observed"] == 1));
}
