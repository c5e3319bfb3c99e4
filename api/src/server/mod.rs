//! HTTP server
//!
//! Router assembly and serving, HTTP or HTTPS depending on
//! `RCODE_TLS_ENABLED`.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::handlers::{context, diffs, files, plans, sessions};
use crate::sse;
use crate::state::{ApiState, SharedState};

/// Main API server
pub struct ApiServer {
    state: SharedState,
}

impl ApiServer {
    /// New server over assembled state
    pub fn new(state: Arc<ApiState>) -> Self {
        Self { state }
    }

    /// The complete router (exposed for in-process tests)
    pub fn router(&self) -> Router {
        Router::new()
            // Health and auth status
            .route("/api/app", get(sessions::app_status))
            // Sessions and messages
            .route("/api/session", get(sessions::list_sessions))
            .route("/api/session", post(sessions::create_session))
            .route("/api/session/:id", delete(sessions::delete_session))
            .route("/api/session/:id/message", post(sessions::send_message))
            .route("/api/session/:id/messages", get(sessions::get_messages))
            .route("/api/session/:id/prompts", get(sessions::get_prompts))
            // Plans
            .route("/api/session/:id/plan", post(plans::create_plan))
            .route("/api/plan/:id/execute", post(plans::execute_plan))
            .route("/api/plan/:id/status", get(plans::plan_status))
            .route("/api/plan/:id/rollback", post(plans::rollback_plan))
            .route("/api/plan/:id/git-operations", get(plans::plan_git_operations))
            .route("/api/plan/:id/logs", get(plans::plan_logs))
            // Project context
            .route("/api/context", get(context::get_context))
            .route("/api/context/scan", post(context::scan_context))
            .route("/api/context/files/:task", get(context::context_files))
            .route("/api/context/metrics", get(context::context_metrics))
            // File explorer
            .route("/api/files/tree", get(files::files_tree))
            .route("/api/files/content/*path", get(files::file_content))
            .route("/api/files/search", post(files::files_search))
            .route("/api/session/:id/files/open", post(files::open_file))
            .route("/api/session/:id/files/recent", get(files::recent_files))
            // Diffs
            .route("/api/session/:id/diffs", get(diffs::list_diffs))
            .route("/api/session/:id/diff/:diff_id", get(diffs::get_diff))
            .route("/api/session/:id/diff/:diff_id/apply", post(diffs::apply_diff))
            .route("/api/session/:id/diff/:diff_id/revert", post(diffs::revert_diff))
            // Progress stream
            .route("/events", get(sse::events))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(self.state.clone())
    }

    /// Serve until the shutdown token fires
    pub async fn serve(&self) -> Result<()> {
        let config = &self.state.config;
        let addr: SocketAddr = format!("{}:{}", config.host, config.effective_port())
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid bind address: {e}"))?;
        let app = self.router();
        let shutdown = self.state.shutdown.clone();

        if config.tls_enabled {
            let (cert, key) = match (&config.tls_cert, &config.tls_key) {
                (Some(cert), Some(key)) => (cert.clone(), key.clone()),
                _ => anyhow::bail!("TLS enabled but tls_cert/tls_key are not configured"),
            };
            info!(%addr, "serving HTTPS");
            let tls = axum_server::tls_rustls::RustlsConfig::from_pem_file(cert, key).await?;
            let handle = axum_server::Handle::new();
            let shutdown_handle = handle.clone();
            tokio::spawn(async move {
                shutdown.cancelled().await;
                shutdown_handle.graceful_shutdown(Some(std::time::Duration::from_secs(15)));
            });
            axum_server::bind_rustls(addr, tls)
                .handle(handle)
                .serve(app.into_make_service())
                .await?;
        } else {
            info!(%addr, "serving HTTP");
            let listener = tokio::net::TcpListener::bind(addr).await?;
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await?;
        }

        Ok(())
    }
}
