//! RCode core: the agentic task execution engine
//!
//! Receives high-level coding requests, drives a tool-calling model
//! conversation, plans multi-step jobs into DAGs, executes them with
//! retries, checkpoints, and rollback, and streams progress to UI
//! subscribers.

pub mod config;
pub mod context;
pub mod diff;
pub mod error;
pub mod events;
pub mod llm;
pub mod plan;
pub mod retry;
pub mod session;
pub mod store;
pub mod tool;

pub use config::Config;
pub use context::{ContextTracker, ProjectContext};
pub use diff::{DiffRecord, DiffTracker};
pub use error::{ClassifiedError, ErrorCategory};
pub use events::{Broadcaster, ChangeKind, ProgressEvent};
pub use llm::{ConversationDriver, ModelClient};
pub use plan::{Plan, PlanExecutor, Planner};
pub use retry::{retry, run_with_retry, RetryPolicy};
pub use session::SessionManager;
pub use store::SessionStore;
pub use tool::{Tool, ToolRegistry};
