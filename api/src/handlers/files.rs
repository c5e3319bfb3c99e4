//! File-explorer handlers

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use tracing::error;

use rcode_core::context::{scan_project, FileNode};
use rcode_core::tool::definition::{ToolContext, ToolUse};
use rcode_core::tool::schema::clean_path;
use rcode_core::tool::value::input_from_json;

use crate::models::{FileSearchRequest, OpenFileRequest};
use crate::state::SharedState;

use super::store_status;

/// `GET /api/files/tree`
pub async fn files_tree(
    State(state): State<SharedState>,
) -> Result<Json<Vec<FileNode>>, StatusCode> {
    let root = state.config.project_root.clone();
    let scan = tokio::task::spawn_blocking(move || scan_project(&root))
        .await
        .map_err(|e| {
            error!(error = %e, "tree task failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|e| {
            error!(error = %e, "tree scan failed");
            StatusCode::BAD_REQUEST
        })?;
    Ok(Json(scan.tree))
}

/// `GET /api/files/content/*path` — file content under the project root
pub async fn file_content(
    State(state): State<SharedState>,
    Path(path): Path<String>,
) -> Result<String, StatusCode> {
    let root = clean_path(&state.config.project_root);
    let resolved = clean_path(&root.join(path.trim_start_matches('/')));

    // Same containment rule as the tool pipeline
    if !resolved.starts_with(&root) {
        return Err(StatusCode::FORBIDDEN);
    }

    tokio::fs::read_to_string(&resolved)
        .await
        .map_err(|_| StatusCode::NOT_FOUND)
}

/// `POST /api/files/search` — regex search through the registry's tool
pub async fn files_search(
    State(state): State<SharedState>,
    Json(request): Json<FileSearchRequest>,
) -> Result<Json<Vec<String>>, StatusCode> {
    let mut input = serde_json::json!({"pattern": request.pattern});
    if let Some(glob) = request.glob {
        input["glob"] = serde_json::Value::String(glob);
    }

    let tool_use = ToolUse {
        id: uuid::Uuid::new_v4().to_string(),
        name: "search_files".to_string(),
        input: input_from_json(input),
    };
    let ctx = ToolContext::new(None, state.config.project_root.clone())
        .with_cancel(state.shutdown.clone());

    let result = state.registry.execute(&tool_use, &ctx).await;
    if result.is_error {
        error!(error = result.content, "search failed");
        return Err(StatusCode::BAD_REQUEST);
    }
    let lines = if result.content == "no matches" {
        Vec::new()
    } else {
        result.content.lines().map(str::to_string).collect()
    };
    Ok(Json(lines))
}

/// `POST /api/session/:id/files/open` — record a file as recently used
pub async fn open_file(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(request): Json<OpenFileRequest>,
) -> Result<StatusCode, StatusCode> {
    let session = state.sessions.get(&id).await.map_err(store_status)?;
    state.context.touch_file(
        &id,
        &std::path::PathBuf::from(session.project_root),
        &request.path,
    );
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /api/session/:id/files/recent`
pub async fn recent_files(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<String>>, StatusCode> {
    state.sessions.get(&id).await.map_err(store_status)?;
    Ok(Json(state.context.recent_files(&id)))
}
