use super::*;
use crate::db::{Database, UpsertStats};
use crate::downloader::RunStats;
use crate::types::{CaaId, FailureKind, NewRecord};
use axum::body::{Body, to_bytes};
use axum::http::Request;
use std::sync::Arc;
use tower::ServiceExt;

const MBID: &str = "76df3287-6cda-33eb-8e9a-044b5e15ffdd";

async fn test_state() -> (MonitorState, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::new(&dir.path().join("index.db")).await.unwrap();
    let records: Vec<NewRecord> = (1..=4)
        .map(|id| NewRecord::new(id, MBID, Some("image/jpeg")))
        .collect();
    db.upsert_records(&records).await.unwrap();
    db.mark_downloaded(CaaId(1), 1).await.unwrap();
    db.mark_failed(CaaId(2), FailureKind::Permanent, "404", 1)
        .await
        .unwrap();
    (MonitorState::new(Arc::new(db)), dir)
}

async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null))
}

#[tokio::test]
async fn test_health_check() {
    let (state, _dir) = test_state().await;

    let (status, body) = get_json(create_router(state), "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_status_reports_index_counts() {
    let (state, _dir) = test_state().await;
    let id = state.db.begin_import(false).await.unwrap();
    state
        .db
        .finish_import(
            id,
            4,
            UpsertStats {
                inserted: 4,
                updated: 0,
            },
        )
        .await
        .unwrap();

    let (status, body) = get_json(create_router(state), "/status").await;

    assert_eq!(status, StatusCode::OK);
    assert!(body["run"].is_null());
    assert_eq!(body["index"]["pending"], 2);
    assert_eq!(body["index"]["downloaded"], 1);
    assert_eq!(body["index"]["failed_permanent"], 1);
    assert_eq!(body["index"]["failed_transient"], 0);
    assert_eq!(body["total"], 4);
    assert_eq!(body["last_import"]["fetched"], 4);
}

#[tokio::test]
async fn test_status_includes_run_counters() {
    let (state, _dir) = test_state().await;
    let stats = Arc::new(RunStats::new());
    stats.begin(2, 8);
    stats.dispatched();
    stats.record_download(512);

    let (status, body) = get_json(create_router(state.with_stats(stats)), "/status").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["run"]["running"], true);
    assert_eq!(body["run"]["workers"], 8);
    assert_eq!(body["run"]["pending_at_start"], 2);
    assert_eq!(body["run"]["in_flight"], 1);
    assert_eq!(body["run"]["downloaded"], 1);
    assert_eq!(body["run"]["bytes"], 512);
}

#[tokio::test]
async fn test_unknown_path_is_not_found() {
    let (state, _dir) = test_state().await;

    let (status, _) = get_json(create_router(state), "/downloads").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_index_error_is_internal_error() {
    let (state, _dir) = test_state().await;
    state.db.pool().close().await;

    let (status, body) = get_json(create_router(state), "/status").await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].as_str().unwrap().contains("database error"));
}

#[tokio::test]
async fn test_server_stops_on_shutdown() {
    let (state, _dir) = test_state().await;
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    let shutdown = CancellationToken::new();

    let server = tokio::spawn(serve_listener(listener, state, shutdown.clone()));

    let body: serde_json::Value = reqwest::get(format!("http://{}/health", address))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");

    shutdown.cancel();
    let result = tokio::time::timeout(std::time::Duration::from_secs(5), server)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_bind_failure_is_reported() {
    let (state, _dir) = test_state().await;
    let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = taken.local_addr().unwrap();

    let result = serve(address, state, CancellationToken::new()).await;

    assert!(matches!(result, Err(Error::Monitor(_))));
}
