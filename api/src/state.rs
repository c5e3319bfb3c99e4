//! Shared server state

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use rcode_core::config::Config;
use rcode_core::context::ContextTracker;
use rcode_core::diff::DiffTracker;
use rcode_core::events::Broadcaster;
use rcode_core::llm::{ConversationDriver, ModelClient};
use rcode_core::plan::{PlanExecutor, Planner};
use rcode_core::session::SessionManager;
use rcode_core::store::SessionStore;
use rcode_core::tool::ToolRegistry;

/// Everything the handlers need, shared behind an `Arc`
pub struct ApiState {
    pub config: Config,
    pub store: Arc<SessionStore>,
    pub sessions: Arc<SessionManager>,
    pub registry: Arc<ToolRegistry>,
    pub broadcaster: Arc<Broadcaster>,
    pub diffs: Arc<DiffTracker>,
    pub context: Arc<ContextTracker>,
    pub driver: Arc<ConversationDriver>,
    pub planner: Arc<Planner>,
    pub executor: Arc<PlanExecutor>,
    pub model_client: Arc<dyn ModelClient>,
    /// Signalled at process shutdown; propagated into long operations
    pub shutdown: CancellationToken,
}

/// Convenience alias used by all handlers
pub type SharedState = Arc<ApiState>;
