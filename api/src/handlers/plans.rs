//! Plan handlers

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use tracing::{error, info};

use rcode_core::plan::{GitOperation, Plan, PlanOptions};

use crate::models::{CreatePlanRequest, CreatePlanResponse, PlanStepSummary, RollbackRequest};
use crate::state::SharedState;

use super::store_status;

fn step_summaries(plan: &Plan) -> Vec<PlanStepSummary> {
    plan.steps
        .iter()
        .map(|s| PlanStepSummary {
            id: s.id.clone(),
            description: s.description.clone(),
            tool: s.tool.clone(),
            depends_on: s.depends_on.clone(),
            status: s.status.as_str().to_string(),
        })
        .collect()
}

/// Run a plan in the background, persisting the final state
fn spawn_execution(state: SharedState, plan_id: String) {
    tokio::spawn(async move {
        let cancel = state.shutdown.clone();
        match state.executor.execute(&plan_id, &cancel).await {
            Ok(plan) => {
                if let Err(e) = state.store.save_plan(&plan).await {
                    error!(plan = plan_id, error = %e, "failed to persist finished plan");
                }
            }
            Err(e) => error!(plan = plan_id, error = %e, "plan execution failed"),
        }
    });
}

/// `POST /api/session/:id/plan`
pub async fn create_plan(
    State(state): State<SharedState>,
    Path(session_id): Path<String>,
    Json(request): Json<CreatePlanRequest>,
) -> Result<Json<CreatePlanResponse>, StatusCode> {
    state.sessions.get(&session_id).await.map_err(store_status)?;

    let plan = match request.steps {
        // Caller-supplied step list is taken verbatim (still validated)
        Some(steps) => state
            .planner
            .from_steps(&session_id, &request.description, steps, PlanOptions::default())
            .map_err(|e| {
                error!(session = session_id, error = %e, "plan rejected");
                StatusCode::BAD_REQUEST
            })?,
        None => state
            .planner
            .synthesize(
                state.model_client.as_ref(),
                &state.config.model,
                &session_id,
                &request.description,
                PlanOptions::default(),
            )
            .await
            .map_err(|e| {
                error!(session = session_id, error = %e, "plan synthesis failed");
                StatusCode::BAD_GATEWAY
            })?,
    };

    state.store.save_plan(&plan).await.map_err(store_status)?;
    let steps = step_summaries(&plan);
    let plan_id = state.executor.admit(plan);
    info!(session = session_id, plan = plan_id, "plan created");

    if request.auto_execute {
        spawn_execution(state.clone(), plan_id.clone());
    }

    Ok(Json(CreatePlanResponse {
        plan_id,
        steps,
        executing: request.auto_execute,
    }))
}

/// `POST /api/plan/:id/execute`
pub async fn execute_plan(
    State(state): State<SharedState>,
    Path(plan_id): Path<String>,
) -> Result<Json<Plan>, StatusCode> {
    let cancel = state.shutdown.clone();
    let plan = state
        .executor
        .execute(&plan_id, &cancel)
        .await
        .map_err(|e| {
            error!(plan = plan_id, error = %e, "execution failed");
            StatusCode::NOT_FOUND
        })?;
    state.store.save_plan(&plan).await.map_err(store_status)?;
    Ok(Json(plan))
}

/// `GET /api/plan/:id/status`
pub async fn plan_status(
    State(state): State<SharedState>,
    Path(plan_id): Path<String>,
) -> Result<Json<Plan>, StatusCode> {
    // Prefer live state; fall back to the store after a restart
    if let Ok(plan) = state.executor.status(&plan_id).await {
        return Ok(Json(plan));
    }
    match state.store.load_plan(&plan_id).await.map_err(store_status)? {
        Some(plan) => Ok(Json(plan)),
        None => Err(StatusCode::NOT_FOUND),
    }
}

/// `POST /api/plan/:id/rollback`
pub async fn rollback_plan(
    State(state): State<SharedState>,
    Path(plan_id): Path<String>,
    Json(request): Json<RollbackRequest>,
) -> Result<Json<Plan>, StatusCode> {
    let plan = state
        .executor
        .rollback_to(&plan_id, &request.checkpoint_id)
        .await
        .map_err(|e| {
            error!(plan = plan_id, error = %e, "rollback failed");
            StatusCode::NOT_FOUND
        })?;
    state.store.save_plan(&plan).await.map_err(store_status)?;
    info!(plan = plan_id, checkpoint = request.checkpoint_id, "rolled back");
    Ok(Json(plan))
}

/// `GET /api/plan/:id/git-operations`
pub async fn plan_git_operations(
    State(state): State<SharedState>,
    Path(plan_id): Path<String>,
) -> Result<Json<Vec<GitOperation>>, StatusCode> {
    state
        .executor
        .git_operations(&plan_id)
        .await
        .map(Json)
        .map_err(|_| StatusCode::NOT_FOUND)
}

/// `GET /api/plan/:id/logs`
pub async fn plan_logs(
    State(state): State<SharedState>,
    Path(plan_id): Path<String>,
) -> Result<Json<Vec<String>>, StatusCode> {
    state
        .executor
        .logs(&plan_id)
        .await
        .map(Json)
        .map_err(|_| StatusCode::NOT_FOUND)
}
