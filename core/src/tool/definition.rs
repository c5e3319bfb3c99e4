//! Tool definitions, capabilities, and the execution contract

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ClassifiedError;

use super::schema::InputSchema;
use super::value::ToolInput;

/// Public description of a tool: name, description, input schema
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Unique tool name
    pub name: String,
    /// Human-readable description, included in the model prompt
    pub description: String,
    /// Recognized parameters and constraints
    pub input_schema: InputSchema,
}

impl ToolDefinition {
    /// New definition
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: InputSchema,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }

    /// Render as the JSON schema object the model endpoint expects
    pub fn to_model_schema(&self) -> serde_json::Value {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();

        for param in &self.input_schema.params {
            let ty = match param.ty {
                super::schema::ParamType::Integer => "integer",
                super::schema::ParamType::Boolean => "boolean",
                _ => "string",
            };
            let mut prop = serde_json::Map::new();
            prop.insert("type".to_string(), serde_json::Value::from(ty));
            prop.insert(
                "description".to_string(),
                serde_json::Value::from(param.description.clone()),
            );
            if let Some(allowed) = &param.allowed_values {
                prop.insert(
                    "enum".to_string(),
                    serde_json::Value::from(allowed.clone()),
                );
            }
            properties.insert(param.name.clone(), serde_json::Value::Object(prop));
            if param.required {
                required.push(serde_json::Value::from(param.name.clone()));
            }
        }

        serde_json::json!({
            "name": self.name,
            "description": self.description,
            "input_schema": {
                "type": "object",
                "properties": properties,
                "required": required,
            }
        })
    }
}

/// Declared capabilities of a plug-in tool
///
/// Gate execution and restrict filesystem reach; a tool touching paths
/// outside the project root must declare a matching workdir root.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolCapabilities {
    /// Reads file contents
    pub file_read: bool,
    /// Creates or modifies files
    pub file_write: bool,
    /// Performs network requests
    pub network: bool,
    /// Spawns subprocesses
    pub process_spawn: bool,
    /// Explicit filesystem root this tool may reach outside the project
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workdir_root: Option<PathBuf>,
}

impl ToolCapabilities {
    /// Read-only tool
    pub fn read_only() -> Self {
        Self {
            file_read: true,
            ..Self::default()
        }
    }

    /// Tool that reads and writes files
    pub fn read_write() -> Self {
        Self {
            file_read: true,
            file_write: true,
            ..Self::default()
        }
    }

    /// Network-accessing tool
    pub fn network() -> Self {
        Self {
            network: true,
            ..Self::default()
        }
    }

    /// Process-spawning tool
    pub fn process() -> Self {
        Self {
            process_spawn: true,
            file_read: true,
            file_write: true,
            ..Self::default()
        }
    }

    /// Whether this tool can modify files
    pub fn is_mutating(&self) -> bool {
        self.file_write
    }
}

/// A model-produced directive requesting execution of a named tool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolUse {
    /// Block id assigned by the model
    pub id: String,
    /// Tool name
    pub name: String,
    /// Raw input map
    pub input: ToolInput,
}

/// The outcome fed back to the model as a tool_result block
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Id of the originating tool_use block
    pub tool_use_id: String,
    /// Textual content of the result
    pub content: String,
    /// Whether the tool failed
    pub is_error: bool,
}

impl ToolResult {
    /// Successful result
    pub fn ok(tool_use_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_use_id: tool_use_id.into(),
            content: content.into(),
            is_error: false,
        }
    }

    /// Failed result
    pub fn error(tool_use_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_use_id: tool_use_id.into(),
            content: content.into(),
            is_error: true,
        }
    }
}

/// Per-invocation context handed to tools and hooks
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// Session the invocation belongs to, when bound
    pub session_id: Option<String>,
    /// Active project root for path confinement
    pub project_root: PathBuf,
    /// Unique id for this execution, shared with progress events
    pub execution_id: String,
    /// Cancellation signal scoped to the enclosing request
    pub cancel: tokio_util::sync::CancellationToken,
}

impl ToolContext {
    /// Context for a session-bound invocation
    pub fn new(session_id: Option<String>, project_root: impl Into<PathBuf>) -> Self {
        Self {
            session_id,
            project_root: project_root.into(),
            execution_id: uuid::Uuid::new_v4().to_string(),
            cancel: tokio_util::sync::CancellationToken::new(),
        }
    }

    /// Replace the cancellation token
    pub fn with_cancel(mut self, cancel: tokio_util::sync::CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// A named capability with a declared input schema and an executor body
///
/// Plug-in tools implement this trait and register with the
/// [`ToolRegistry`](super::registry::ToolRegistry) at startup.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Definition advertised to the model
    fn definition(&self) -> ToolDefinition;

    /// Declared capabilities, used for gating and path confinement
    fn capabilities(&self) -> ToolCapabilities {
        ToolCapabilities::read_only()
    }

    /// Execute the tool body with validated input
    async fn execute(&self, input: ToolInput, ctx: &ToolContext)
        -> Result<String, ClassifiedError>;

    /// One-time setup hook
    async fn initialize(&self) -> Result<(), ClassifiedError> {
        Ok(())
    }

    /// Teardown hook
    async fn cleanup(&self) -> Result<(), ClassifiedError> {
        Ok(())
    }
}

/// Shared tool handle
pub type DynTool = Arc<dyn Tool>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::schema::{ParamSpec, ParamType};

    #[test]
    fn test_model_schema_rendering() {
        let def = ToolDefinition::new(
            "read_file",
            "Read a file",
            InputSchema::new()
                .with_param(ParamSpec::new("path", ParamType::Path, true, "file path"))
                .with_param(ParamSpec::new("limit", ParamType::Integer, false, "line cap")),
        );

        let schema = def.to_model_schema();
        assert_eq!(schema["name"], "read_file");
        assert_eq!(schema["input_schema"]["properties"]["path"]["type"], "string");
        assert_eq!(
            schema["input_schema"]["properties"]["limit"]["type"],
            "integer"
        );
        assert_eq!(schema["input_schema"]["required"][0], "path");
    }

    #[test]
    fn test_capability_presets() {
        assert!(ToolCapabilities::read_only().file_read);
        assert!(!ToolCapabilities::read_only().is_mutating());
        assert!(ToolCapabilities::read_write().is_mutating());
        assert!(ToolCapabilities::network().network);
        assert!(ToolCapabilities::process().process_spawn);
    }
}
