//! Before/after execution hooks
//!
//! Before-hooks run after validation and may abort the execution by
//! returning an error; the tool body never runs in that case.
//! After-hooks run unconditionally with the outcome and must not fail.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::error::ClassifiedError;
use crate::tool::definition::{ToolCapabilities, ToolContext};
use crate::tool::schema::{clean_path, ParamType};
use crate::tool::value::{ToolInput, ToolValue};

/// Private input key under which the session id is injected for
/// downstream hooks (diff capture, change tracking)
pub const SESSION_KEY: &str = "__session_id";

/// Hook running before a tool executes; may abort the call
#[async_trait]
pub trait BeforeHook: Send + Sync {
    /// Hook name for logs
    fn name(&self) -> &str;

    /// Inspect or enrich the input; an error aborts the execution
    async fn before(
        &self,
        tool: &crate::tool::definition::ToolDefinition,
        capabilities: &ToolCapabilities,
        input: &mut ToolInput,
        ctx: &ToolContext,
    ) -> Result<(), ClassifiedError>;
}

/// Hook running after a tool executed (successfully or not)
#[async_trait]
pub trait AfterHook: Send + Sync {
    /// Hook name for logs
    fn name(&self) -> &str;

    /// Observe the outcome; never fails, panics are the implementor's bug
    async fn after(
        &self,
        tool: &crate::tool::definition::ToolDefinition,
        input: &ToolInput,
        result: Result<&str, &ClassifiedError>,
        ctx: &ToolContext,
    );
}

/// Shared hook handles
pub type DynBeforeHook = Arc<dyn BeforeHook>;
pub type DynAfterHook = Arc<dyn AfterHook>;

/// Injects the bound session id into the input map under [`SESSION_KEY`]
pub struct SessionContextHook;

#[async_trait]
impl BeforeHook for SessionContextHook {
    fn name(&self) -> &str {
        "session-context"
    }

    async fn before(
        &self,
        _tool: &crate::tool::definition::ToolDefinition,
        _capabilities: &ToolCapabilities,
        input: &mut ToolInput,
        ctx: &ToolContext,
    ) -> Result<(), ClassifiedError> {
        if let Some(session_id) = &ctx.session_id {
            input.insert(SESSION_KEY.to_string(), ToolValue::String(session_id.clone()));
        }
        Ok(())
    }
}

/// Rejects path parameters resolving outside the project root or the
/// tool's declared workdir root
pub struct PathConfinementHook;

impl PathConfinementHook {
    fn is_confined(path: &Path, roots: &[&Path]) -> bool {
        roots.iter().any(|root| path.starts_with(root))
    }
}

#[async_trait]
impl BeforeHook for PathConfinementHook {
    fn name(&self) -> &str {
        "path-confinement"
    }

    async fn before(
        &self,
        tool: &crate::tool::definition::ToolDefinition,
        capabilities: &ToolCapabilities,
        input: &mut ToolInput,
        ctx: &ToolContext,
    ) -> Result<(), ClassifiedError> {
        let project_root = clean_path(&ctx.project_root);
        let workdir = capabilities.workdir_root.as_deref().map(clean_path);

        let mut roots: Vec<&Path> = vec![&project_root];
        if let Some(wd) = workdir.as_deref() {
            roots.push(wd);
        }

        for spec in &tool.input_schema.params {
            if spec.ty != ParamType::Path {
                continue;
            }
            let Some(value) = input.get(&spec.name).and_then(|v| v.as_str()) else {
                continue;
            };

            // Relative paths are resolved against the project root before
            // the containment check
            let resolved = {
                let p = Path::new(value);
                if p.is_absolute() {
                    clean_path(p)
                } else {
                    clean_path(&project_root.join(p))
                }
            };

            if !Self::is_confined(&resolved, &roots) {
                return Err(ClassifiedError::permanent(format!(
                    "path '{}' escapes the project root '{}'",
                    resolved.display(),
                    project_root.display()
                )));
            }

            input.insert(
                spec.name.clone(),
                ToolValue::String(resolved.to_string_lossy().into_owned()),
            );
        }

        Ok(())
    }
}

/// Refuses operations the tool's declared capabilities do not cover
///
/// The registry knows which built-ins mutate files, reach the network, or
/// spawn processes; a tool attempting such an operation without the
/// matching declaration is misregistered and must not run.
pub struct CapabilityGate;

#[async_trait]
impl BeforeHook for CapabilityGate {
    fn name(&self) -> &str {
        "capability-gate"
    }

    async fn before(
        &self,
        tool: &crate::tool::definition::ToolDefinition,
        capabilities: &ToolCapabilities,
        _input: &mut ToolInput,
        _ctx: &ToolContext,
    ) -> Result<(), ClassifiedError> {
        let declared_any = capabilities.file_read
            || capabilities.file_write
            || capabilities.network
            || capabilities.process_spawn;
        if !declared_any {
            warn!(tool = tool.name, "tool declares no capabilities");
            return Err(ClassifiedError::permanent(format!(
                "tool '{}' declares no capabilities and cannot run",
                tool.name
            )));
        }
        Ok(())
    }
}
