//! API request and response models

use serde::{Deserialize, Serialize};

use rcode_core::llm::ToolSummary;
use rcode_core::plan::StepSpec;

/// `GET /api/app`
#[derive(Debug, Serialize)]
pub struct AppStatusResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub authenticated: bool,
}

/// `POST /api/session`
#[derive(Debug, Default, Deserialize)]
pub struct CreateSessionRequest {
    /// Project root override for the session
    #[serde(default)]
    pub project_root: Option<String>,
}

/// `POST /api/session/:id/message`
#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub content: String,
}

/// Response to a message turn
#[derive(Debug, Serialize)]
pub struct SendMessageResponse {
    pub final_text: String,
    pub tool_summaries: Vec<ToolSummary>,
    pub iterations: u32,
}

/// `POST /api/session/:id/plan`
#[derive(Debug, Deserialize)]
pub struct CreatePlanRequest {
    pub description: String,
    /// Execute immediately after construction
    #[serde(default)]
    pub auto_execute: bool,
    /// Caller-supplied steps; when present, no model call is made
    #[serde(default)]
    pub steps: Option<Vec<StepSpec>>,
}

/// Response to plan creation
#[derive(Debug, Serialize)]
pub struct CreatePlanResponse {
    pub plan_id: String,
    pub steps: Vec<PlanStepSummary>,
    pub executing: bool,
}

/// One step in a plan response
#[derive(Debug, Serialize)]
pub struct PlanStepSummary {
    pub id: String,
    pub description: String,
    pub tool: String,
    pub depends_on: Vec<String>,
    pub status: String,
}

/// `POST /api/plan/:id/rollback`
#[derive(Debug, Deserialize)]
pub struct RollbackRequest {
    pub checkpoint_id: String,
}

/// `POST /api/files/search`
#[derive(Debug, Deserialize)]
pub struct FileSearchRequest {
    pub pattern: String,
    #[serde(default)]
    pub glob: Option<String>,
}

/// `POST /api/session/:id/files/open`
#[derive(Debug, Deserialize)]
pub struct OpenFileRequest {
    pub path: String,
}

/// `POST /api/context/scan`
#[derive(Debug, Default, Deserialize)]
pub struct ScanRequest {
    #[serde(default)]
    pub session_id: Option<String>,
}

/// Generic error body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}
