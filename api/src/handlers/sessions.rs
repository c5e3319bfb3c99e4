//! Session and message handlers

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use tracing::{error, info};

use rcode_core::llm::types::Message;
use rcode_core::store::SessionRecord;

use crate::models::{
    AppStatusResponse, CreateSessionRequest, SendMessageRequest, SendMessageResponse,
};
use crate::state::SharedState;

use super::store_status;

/// `GET /api/app` — health and auth status
pub async fn app_status(State(state): State<SharedState>) -> Json<AppStatusResponse> {
    let authenticated = state.config.data_dir.join("auth.json").exists();
    Json(AppStatusResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        authenticated,
    })
}

/// `GET /api/session`
pub async fn list_sessions(
    State(state): State<SharedState>,
) -> Result<Json<Vec<SessionRecord>>, StatusCode> {
    state
        .sessions
        .list()
        .await
        .map(Json)
        .map_err(store_status)
}

/// `POST /api/session`
pub async fn create_session(
    State(state): State<SharedState>,
    body: Option<Json<CreateSessionRequest>>,
) -> Result<Json<SessionRecord>, StatusCode> {
    let request = body.map(|Json(b)| b).unwrap_or_default();
    let session = state
        .sessions
        .create(request.project_root)
        .await
        .map_err(store_status)?;
    info!(session = session.id, "session created");
    Ok(Json(session))
}

/// `DELETE /api/session/:id`
pub async fn delete_session(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<StatusCode, StatusCode> {
    state.sessions.delete(&id).await.map_err(store_status)?;
    state.diffs.remove_session(&id);
    state.context.remove_session(&id);
    info!(session = id, "session deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /api/session/:id/message`
///
/// Runs one conversation turn. Handlers for the same session serialize
/// behind the per-session mutex; unrelated sessions proceed in parallel.
pub async fn send_message(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(request): Json<SendMessageRequest>,
) -> Result<Json<SendMessageResponse>, StatusCode> {
    if request.content.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let session = state.sessions.get(&id).await.map_err(store_status)?;
    let lock = state.sessions.lock_for(&id);
    let _guard = lock.lock().await;

    let history = state.store.load_messages(&id).await.map_err(store_status)?;
    let project_root = std::path::PathBuf::from(&session.project_root);

    let outcome = state
        .driver
        .run_turn(&id, &project_root, &history, &request.content, &state.shutdown)
        .await
        .map_err(|e| {
            error!(session = id, error = %e, "turn failed");
            StatusCode::BAD_GATEWAY
        })?;

    for message in &outcome.messages {
        state
            .store
            .append_message(&id, message)
            .await
            .map_err(store_status)?;
    }
    state.store.touch_session(&id).await.map_err(store_status)?;

    Ok(Json(SendMessageResponse {
        final_text: outcome.final_text,
        tool_summaries: outcome.tool_summaries,
        iterations: outcome.iterations,
    }))
}

/// `GET /api/session/:id/messages`
pub async fn get_messages(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Message>>, StatusCode> {
    state.sessions.get(&id).await.map_err(store_status)?;
    state
        .store
        .load_messages(&id)
        .await
        .map(Json)
        .map_err(store_status)
}

/// `GET /api/session/:id/prompts` — past user prompts, oldest first
pub async fn get_prompts(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<String>>, StatusCode> {
    state.sessions.get(&id).await.map_err(store_status)?;
    let messages = state.store.load_messages(&id).await.map_err(store_status)?;
    let prompts = messages
        .iter()
        .filter(|m| m.role == rcode_core::llm::Role::User)
        .map(Message::text)
        .filter(|t| !t.is_empty())
        .collect();
    Ok(Json(prompts))
}
