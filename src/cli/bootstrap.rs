//! Engine assembly
//!
//! Builds the full object graph: store, registry with built-in tools and
//! hooks, trackers, model client, conversation driver, planner, and
//! executor.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::info;

use rcode_api::ApiState;
use rcode_core::config::Config;
use rcode_core::context::{ChangeTrackingHook, ContextTracker};
use rcode_core::diff::{DiffCaptureAfter, DiffCaptureBefore, DiffTracker};
use rcode_core::events::Broadcaster;
use rcode_core::llm::{
    AnthropicClient, ConversationDriver, DriverOptions, FileAuthProvider, ModelClient,
};
use rcode_core::plan::{ExecutorOptions, PlanExecutor, Planner};
use rcode_core::session::SessionManager;
use rcode_core::store::SessionStore;
use rcode_core::tool::{CapabilityGate, PathConfinementHook, SessionContextHook, ToolRegistry};
use rcode_tools::register_builtin_tools;

/// Assemble the shared server state
pub fn build_state(config: Config, shutdown: CancellationToken) -> Result<Arc<ApiState>> {
    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("creating data dir {}", config.data_dir.display()))?;

    let db_path = config.db_path();
    let store = Arc::new(SessionStore::open(&db_path).context("opening session store")?);
    info!(db = %db_path.display(), "session store ready");

    let broadcaster = Arc::new(Broadcaster::new());
    let diffs = Arc::new(DiffTracker::new(broadcaster.clone()));
    let context = Arc::new(ContextTracker::new(broadcaster.clone()));

    let mut registry = ToolRegistry::new(broadcaster.clone());
    register_builtin_tools(&mut registry);
    registry.add_before_hook(Arc::new(CapabilityGate));
    registry.add_before_hook(Arc::new(SessionContextHook));
    registry.add_before_hook(Arc::new(PathConfinementHook));
    registry.add_before_hook(Arc::new(DiffCaptureBefore::new(diffs.clone())));
    registry.add_after_hook(Arc::new(DiffCaptureAfter::new(diffs.clone())));
    registry.add_after_hook(Arc::new(
        ChangeTrackingHook::new(context.clone()).with_store(store.clone()),
    ));
    let registry = Arc::new(registry);
    info!(tools = registry.definitions().len(), "tool registry ready");

    let auth = Arc::new(FileAuthProvider::new(&config.data_dir));
    let model_client: Arc<dyn ModelClient> =
        Arc::new(AnthropicClient::new(config.endpoint.clone(), auth));

    let driver = Arc::new(ConversationDriver::new(
        model_client.clone(),
        registry.clone(),
        broadcaster.clone(),
        DriverOptions {
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            streaming: config.streaming,
        },
    ));

    let planner = Arc::new(Planner::new(registry.clone()));
    let executor = Arc::new(PlanExecutor::new(
        registry.clone(),
        broadcaster.clone(),
        ExecutorOptions {
            project_root: config.project_root.clone(),
        },
    ));

    let sessions = Arc::new(SessionManager::new(
        store.clone(),
        broadcaster.clone(),
        config.project_root.clone(),
    ));

    Ok(Arc::new(ApiState {
        config,
        store,
        sessions,
        registry,
        broadcaster,
        diffs,
        context,
        driver,
        planner,
        executor,
        model_client,
        shutdown,
    }))
}
