//! Project-context handlers

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use tracing::error;

use rcode_core::context::ProjectContext;
use rcode_core::tool::ToolMetrics;

use crate::models::ScanRequest;
use crate::state::SharedState;

/// Session the context endpoints fall back to when none is named
pub const GLOBAL_CONTEXT: &str = "global";

fn session_from(params: &HashMap<String, String>) -> String {
    params
        .get("session_id")
        .cloned()
        .unwrap_or_else(|| GLOBAL_CONTEXT.to_string())
}

/// `GET /api/context`
pub async fn get_context(
    State(state): State<SharedState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<ProjectContext>, StatusCode> {
    let session_id = session_from(&params);
    state
        .context
        .get(&session_id)
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

/// `POST /api/context/scan`
pub async fn scan_context(
    State(state): State<SharedState>,
    body: Option<Json<ScanRequest>>,
) -> Result<Json<ProjectContext>, StatusCode> {
    let request = body.map(|Json(b)| b).unwrap_or_default();
    let session_id = request
        .session_id
        .unwrap_or_else(|| GLOBAL_CONTEXT.to_string());

    // Session-bound scans use the session's project root
    let root = match state.sessions.get(&session_id).await {
        Ok(record) => std::path::PathBuf::from(record.project_root),
        Err(_) => state.config.project_root.clone(),
    };

    let context = state.context.clone();
    let scan_session = session_id.clone();
    // The scanner walks the filesystem; keep it off the request path
    tokio::task::spawn_blocking(move || context.scan(&scan_session, &root))
        .await
        .map_err(|e| {
            error!(error = %e, "scan task failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|e| {
            error!(error = %e, "scan failed");
            StatusCode::BAD_REQUEST
        })?;

    state
        .context
        .get(&session_id)
        .map(Json)
        .ok_or(StatusCode::INTERNAL_SERVER_ERROR)
}

/// `GET /api/context/files/:task` — files relevant to a task description
pub async fn context_files(
    State(state): State<SharedState>,
    Path(task): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Vec<String>>, StatusCode> {
    let session_id = session_from(&params);
    let Some(context) = state.context.get(&session_id) else {
        return Err(StatusCode::NOT_FOUND);
    };

    let needles: Vec<String> = task
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 2)
        .map(str::to_string)
        .collect();

    let mut hits: Vec<String> = context
        .files
        .iter()
        .filter(|(path, meta)| {
            let haystack = format!(
                "{} {} {}",
                path.to_lowercase(),
                meta.functions.join(" ").to_lowercase(),
                meta.classes.join(" ").to_lowercase()
            );
            needles.iter().any(|n| haystack.contains(n))
        })
        .map(|(path, _)| path.clone())
        .collect();
    hits.sort();
    Ok(Json(hits))
}

/// `GET /api/context/metrics` — per-tool execution metrics
pub async fn context_metrics(
    State(state): State<SharedState>,
) -> Json<HashMap<String, ToolMetrics>> {
    Json(state.registry.metrics_snapshot())
}
