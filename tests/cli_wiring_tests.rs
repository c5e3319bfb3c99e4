//! Bootstrap wiring tests
//!
//! Assemble the full engine the way `main` does and smoke the router
//! without binding a socket.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use rcode::cli::build_state;
use rcode_api::ApiServer;
use rcode_core::Config;

fn test_config(dir: &TempDir) -> Config {
    Config {
        data_dir: dir.path().join("data"),
        project_root: dir.path().to_path_buf(),
        ..Config::default()
    }
}

#[tokio::test]
async fn test_build_state_wires_everything() {
    let dir = TempDir::new().unwrap();
    let state = build_state(test_config(&dir), CancellationToken::new()).unwrap();

    // Built-in tools landed in the registry
    assert!(state.registry.contains("read_file"));
    assert!(state.registry.contains("shell_command"));
    assert!(state.registry.contains("git_commit"));

    // The data directory and database were created
    assert!(dir.path().join("data").join("rcode.db").exists());
}

#[tokio::test]
async fn test_router_serves_health() {
    let dir = TempDir::new().unwrap();
    let state = build_state(test_config(&dir), CancellationToken::new()).unwrap();
    let router = ApiServer::new(state).router();

    let response = router
        .oneshot(
            Request::builder()
                .uri("/api/app")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_session_lifecycle_through_bootstrap() {
    let dir = TempDir::new().unwrap();
    let state = build_state(test_config(&dir), CancellationToken::new()).unwrap();

    let session = state.sessions.create(None).await.unwrap();
    assert_eq!(
        session.project_root,
        dir.path().to_string_lossy().to_string()
    );

    let loaded = state.sessions.get(&session.id).await.unwrap();
    assert_eq!(loaded.id, session.id);

    state.sessions.delete(&session.id).await.unwrap();
    assert!(state.sessions.get(&session.id).await.is_err());
}
