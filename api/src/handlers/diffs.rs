//! Diff handlers

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use tracing::error;

use rcode_core::diff::DiffRecord;

use crate::state::SharedState;

use super::store_status;

/// `GET /api/session/:id/diffs`
pub async fn list_diffs(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<DiffRecord>>, StatusCode> {
    state.sessions.get(&id).await.map_err(store_status)?;
    Ok(Json(state.diffs.for_session(&id)))
}

/// `GET /api/session/:id/diff/:diff_id`
pub async fn get_diff(
    State(state): State<SharedState>,
    Path((id, diff_id)): Path<(String, String)>,
) -> Result<Json<DiffRecord>, StatusCode> {
    state.sessions.get(&id).await.map_err(store_status)?;
    match state.diffs.get(&diff_id) {
        Some(record) if record.session_id == id => Ok(Json(record)),
        _ => Err(StatusCode::NOT_FOUND),
    }
}

/// `POST /api/session/:id/diff/:diff_id/apply`
pub async fn apply_diff(
    State(state): State<SharedState>,
    Path((id, diff_id)): Path<(String, String)>,
) -> Result<StatusCode, StatusCode> {
    state.sessions.get(&id).await.map_err(store_status)?;
    state.diffs.apply(&diff_id).await.map_err(|e| {
        error!(diff = diff_id, error = %e, "apply failed");
        StatusCode::NOT_FOUND
    })?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /api/session/:id/diff/:diff_id/revert`
pub async fn revert_diff(
    State(state): State<SharedState>,
    Path((id, diff_id)): Path<(String, String)>,
) -> Result<StatusCode, StatusCode> {
    state.sessions.get(&id).await.map_err(store_status)?;
    state.diffs.revert(&diff_id).await.map_err(|e| {
        error!(diff = diff_id, error = %e, "revert failed");
        StatusCode::NOT_FOUND
    })?;
    Ok(StatusCode::NO_CONTENT)
}
