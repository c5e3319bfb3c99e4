//! Tool execution runtime
//!
//! A registry of capability-typed tools; every call is wrapped with
//! parameter validation, per-tool retry policies, metrics, and
//! before/after hooks.

pub mod definition;
pub mod hooks;
pub mod metrics;
pub mod registry;
pub mod schema;
pub mod value;

pub use definition::{
    DynTool, Tool, ToolCapabilities, ToolContext, ToolDefinition, ToolResult, ToolUse,
};
pub use hooks::{
    AfterHook, BeforeHook, CapabilityGate, DynAfterHook, DynBeforeHook, PathConfinementHook,
    SessionContextHook, SESSION_KEY,
};
pub use metrics::{MetricsRegistry, ToolMetrics};
pub use registry::ToolRegistry;
pub use schema::{clean_path, expand_path, InputSchema, ParamSpec, ParamType, PathKind};
pub use value::{input_from_json, input_to_json, ToolInput, ToolValue};
