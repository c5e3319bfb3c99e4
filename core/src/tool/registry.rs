//! Tool registry
//!
//! Holds tool definitions and executors; wraps every execution with
//! schema validation, before/after hooks, a per-tool retry policy, panic
//! capture, metrics, and progress events.
//!
//! The registry is populated at startup and treated as immutable at
//! steady state; executors and the conversation driver share it behind an
//! `Arc`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info};

use crate::error::ClassifiedError;
use crate::events::{Broadcaster, ProgressEvent};
use crate::retry::{run_with_retry, RetryError, RetryPolicy};

use super::definition::{DynTool, ToolContext, ToolDefinition, ToolResult, ToolUse};
use super::hooks::{DynAfterHook, DynBeforeHook};
use super::metrics::{MetricsRegistry, ToolMetrics};

struct RegisteredTool {
    tool: DynTool,
    definition: ToolDefinition,
}

/// Registry of capability-typed tools
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
    before_hooks: Vec<DynBeforeHook>,
    after_hooks: Vec<DynAfterHook>,
    policies: HashMap<String, RetryPolicy>,
    default_policy: RetryPolicy,
    metrics: MetricsRegistry,
    broadcaster: Arc<Broadcaster>,
}

impl ToolRegistry {
    /// New registry publishing progress through `broadcaster`
    pub fn new(broadcaster: Arc<Broadcaster>) -> Self {
        Self {
            tools: HashMap::new(),
            before_hooks: Vec::new(),
            after_hooks: Vec::new(),
            policies: HashMap::new(),
            default_policy: RetryPolicy::standard(),
            metrics: MetricsRegistry::new(),
            broadcaster,
        }
    }

    /// Register a tool under its declared name
    pub fn register(&mut self, tool: DynTool) {
        let definition = tool.definition();
        info!(tool = definition.name, "registering tool");
        self.tools.insert(
            definition.name.clone(),
            RegisteredTool { tool, definition },
        );
    }

    /// Install a before-hook; hooks run in installation order
    pub fn add_before_hook(&mut self, hook: DynBeforeHook) {
        self.before_hooks.push(hook);
    }

    /// Install an after-hook; hooks run in installation order
    pub fn add_after_hook(&mut self, hook: DynAfterHook) {
        self.after_hooks.push(hook);
    }

    /// Override the retry policy for one tool
    pub fn set_retry_policy(&mut self, tool: impl Into<String>, policy: RetryPolicy) {
        self.policies.insert(tool.into(), policy);
    }

    /// Replace the fallback retry policy
    pub fn set_default_policy(&mut self, policy: RetryPolicy) {
        self.default_policy = policy;
    }

    /// All registered definitions, for inclusion in the model prompt
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<_> = self.tools.values().map(|t| t.definition.clone()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Whether a tool name is registered
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Definition for one tool
    pub fn definition(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.get(name).map(|t| &t.definition)
    }

    /// Input schema lookup, used by the planner for step validation
    pub fn schema(&self, name: &str) -> Option<&super::schema::InputSchema> {
        self.tools.get(name).map(|t| &t.definition.input_schema)
    }

    /// Declared capabilities of a registered tool
    pub fn capabilities(&self, name: &str) -> Option<super::definition::ToolCapabilities> {
        self.tools.get(name).map(|t| t.tool.capabilities())
    }

    /// Metrics snapshot for one tool
    pub fn metrics(&self, name: &str) -> Option<ToolMetrics> {
        self.metrics.get(name)
    }

    /// Metrics snapshot for every tool
    pub fn metrics_snapshot(&self) -> HashMap<String, ToolMetrics> {
        self.metrics.snapshot()
    }

    /// Execute a tool-use block
    ///
    /// Validation and hook failures, retries, and panics all collapse into
    /// the returned [`ToolResult`]; the caller (the conversation driver or
    /// the plan executor) never sees a transport-level error. Exactly one
    /// start and one complete event is published per invocation.
    pub async fn execute(&self, tool_use: &ToolUse, ctx: &ToolContext) -> ToolResult {
        let started = Instant::now();
        self.publish_start(tool_use, ctx);

        let (result, attempts) = self.execute_inner(tool_use, ctx).await;
        let duration = started.elapsed();

        self.metrics
            .record(&tool_use.name, result.is_ok(), duration, attempts);
        self.publish_complete(tool_use, ctx, &result, duration.as_millis() as u64);

        match result {
            Ok(content) => ToolResult::ok(&tool_use.id, content),
            Err(err) => ToolResult::error(&tool_use.id, err.message),
        }
    }

    async fn execute_inner(
        &self,
        tool_use: &ToolUse,
        ctx: &ToolContext,
    ) -> (Result<String, ClassifiedError>, u32) {
        let Some(registered) = self.tools.get(&tool_use.name) else {
            return (
                Err(ClassifiedError::permanent(format!(
                    "unknown tool '{}'",
                    tool_use.name
                ))),
                1,
            );
        };

        // Validation converts loose input to schema-conforming values
        let mut input = tool_use.input.clone();
        if let Err(err) = registered.definition.input_schema.validate(&mut input) {
            self.run_after_hooks(registered, &input, Err(&err), ctx).await;
            return (Err(err), 1);
        }

        // Before-hooks may abort; the tool body never runs in that case
        let capabilities = registered.tool.capabilities();
        for hook in &self.before_hooks {
            if let Err(err) = hook
                .before(&registered.definition, &capabilities, &mut input, ctx)
                .await
            {
                debug!(
                    tool = tool_use.name,
                    hook = hook.name(),
                    error = %err,
                    "before-hook aborted execution"
                );
                self.run_after_hooks(registered, &input, Err(&err), ctx).await;
                return (Err(err), 1);
            }
        }

        let policy = self
            .policies
            .get(&tool_use.name)
            .unwrap_or(&self.default_policy)
            .clone();

        let tool = registered.tool.clone();
        let run_input = input.clone();
        let run_ctx = ctx.clone();
        let (outcome, report) = run_with_retry(&policy, &ctx.cancel, move || {
            let tool = tool.clone();
            let input = run_input.clone();
            let ctx = run_ctx.clone();
            async move {
                // A panicking tool must not take the engine down; run it on
                // its own task and convert the panic to a tool failure
                let handle =
                    tokio::spawn(async move { tool.execute(input, &ctx).await });
                match handle.await {
                    Ok(result) => result,
                    Err(join_err) if join_err.is_panic() => Err(ClassifiedError::permanent(
                        format!("tool panicked: {join_err}"),
                    )),
                    Err(join_err) => {
                        Err(ClassifiedError::permanent(format!("tool task failed: {join_err}")))
                    }
                }
            }
        })
        .await;

        let result = outcome.map_err(|err| match err {
            RetryError::Cancelled => ClassifiedError::permanent("execution cancelled"),
            other => other
                .classified()
                .cloned()
                .unwrap_or_else(|| ClassifiedError::permanent(other.to_string())),
        });

        self.run_after_hooks(registered, &input, result.as_deref(), ctx)
            .await;

        (result, report.attempts)
    }

    async fn run_after_hooks(
        &self,
        registered: &RegisteredTool,
        input: &super::value::ToolInput,
        result: Result<&str, &ClassifiedError>,
        ctx: &ToolContext,
    ) {
        for hook in &self.after_hooks {
            hook.after(&registered.definition, input, result, ctx).await;
        }
    }

    fn publish_start(&self, tool_use: &ToolUse, ctx: &ToolContext) {
        let Some(session_id) = &ctx.session_id else {
            return;
        };
        let seq = self.broadcaster.next_seq(session_id);
        self.broadcaster.publish(ProgressEvent::ToolExecutionStart {
            session_id: session_id.clone(),
            seq,
            execution_id: ctx.execution_id.clone(),
            tool: tool_use.name.clone(),
        });
    }

    fn publish_complete(
        &self,
        tool_use: &ToolUse,
        ctx: &ToolContext,
        result: &Result<String, ClassifiedError>,
        duration_ms: u64,
    ) {
        let Some(session_id) = &ctx.session_id else {
            return;
        };
        if let Err(err) = result {
            error!(tool = tool_use.name, error = %err, "tool execution failed");
        }
        let seq = self.broadcaster.next_seq(session_id);
        self.broadcaster
            .publish(ProgressEvent::ToolExecutionComplete {
                session_id: session_id.clone(),
                seq,
                execution_id: ctx.execution_id.clone(),
                tool: tool_use.name.clone(),
                success: result.is_ok(),
                reason: result.as_ref().err().map(|e| e.message.clone()),
                duration_ms,
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::definition::{Tool, ToolCapabilities};
    use crate::tool::hooks::PathConfinementHook;
    use crate::tool::schema::{InputSchema, ParamSpec, ParamType};
    use crate::tool::value::{input_from_json, ToolInput};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition::new(
                "echo",
                "Echo the input back",
                InputSchema::new().with_param(ParamSpec::new(
                    "text",
                    ParamType::String,
                    true,
                    "text to echo",
                )),
            )
        }

        async fn execute(
            &self,
            input: ToolInput,
            _ctx: &ToolContext,
        ) -> Result<String, ClassifiedError> {
            Ok(input["text"].as_str().unwrap_or_default().to_string())
        }
    }

    struct FlakyTool {
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Tool for FlakyTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition::new("flaky", "Fails twice then succeeds", InputSchema::new())
        }

        async fn execute(
            &self,
            _input: ToolInput,
            _ctx: &ToolContext,
        ) -> Result<String, ClassifiedError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(ClassifiedError::retryable("temporary glitch"))
            } else {
                Ok("recovered".to_string())
            }
        }
    }

    struct PanicTool;

    #[async_trait]
    impl Tool for PanicTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition::new("panic", "Always panics", InputSchema::new())
        }

        async fn execute(
            &self,
            _input: ToolInput,
            _ctx: &ToolContext,
        ) -> Result<String, ClassifiedError> {
            panic!("tool blew up");
        }
    }

    struct ReadPathTool;

    #[async_trait]
    impl Tool for ReadPathTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition::new(
                "read_path",
                "Pretend to read a path",
                InputSchema::new().with_param(ParamSpec::new(
                    "path",
                    ParamType::Path,
                    true,
                    "file path",
                )),
            )
        }

        async fn execute(
            &self,
            input: ToolInput,
            _ctx: &ToolContext,
        ) -> Result<String, ClassifiedError> {
            Ok(format!("read {}", input["path"].as_str().unwrap_or("?")))
        }
    }

    fn registry() -> (ToolRegistry, Arc<Broadcaster>) {
        let bus = Arc::new(Broadcaster::new());
        let reg = ToolRegistry::new(bus.clone());
        (reg, bus)
    }

    fn tool_use(name: &str, input: serde_json::Value) -> ToolUse {
        ToolUse {
            id: "tu-1".to_string(),
            name: name.to_string(),
            input: input_from_json(input),
        }
    }

    #[tokio::test]
    async fn test_execute_success() {
        let (mut reg, _) = registry();
        reg.register(Arc::new(EchoTool));

        let ctx = ToolContext::new(None, "/project");
        let result = reg.execute(&tool_use("echo", json!({"text": "hi"})), &ctx).await;

        assert!(!result.is_error);
        assert_eq!(result.content, "hi");
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let (reg, _) = registry();
        let ctx = ToolContext::new(None, "/project");
        let result = reg.execute(&tool_use("nope", json!({})), &ctx).await;

        assert!(result.is_error);
        assert!(result.content.contains("unknown tool"));
    }

    #[tokio::test]
    async fn test_validation_failure_is_error_result() {
        let (mut reg, _) = registry();
        reg.register(Arc::new(EchoTool));

        let ctx = ToolContext::new(None, "/project");
        let result = reg.execute(&tool_use("echo", json!({})), &ctx).await;

        assert!(result.is_error);
        assert!(result.content.contains("'text'"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_policy_applied() {
        let (mut reg, _) = registry();
        let calls = Arc::new(AtomicU32::new(0));
        reg.register(Arc::new(FlakyTool { calls: calls.clone() }));

        let ctx = ToolContext::new(None, "/project");
        let result = reg.execute(&tool_use("flaky", json!({})), &ctx).await;

        assert!(!result.is_error);
        assert_eq!(result.content, "recovered");
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let metrics = reg.metrics("flaky").unwrap();
        assert_eq!(metrics.retries, 2);
        assert_eq!(metrics.retry_successes, 1);
    }

    #[tokio::test]
    async fn test_panic_becomes_failure() {
        let (mut reg, _) = registry();
        reg.register(Arc::new(PanicTool));
        reg.set_retry_policy("panic", RetryPolicy::none());

        let ctx = ToolContext::new(None, "/project");
        let result = reg.execute(&tool_use("panic", json!({})), &ctx).await;

        assert!(result.is_error);
        assert!(result.content.contains("panicked"));
    }

    #[tokio::test]
    async fn test_start_and_complete_events() {
        let (mut reg, bus) = registry();
        reg.register(Arc::new(EchoTool));

        let mut rx = bus.subscribe("sess-1");
        let ctx = ToolContext::new(Some("sess-1".to_string()), "/project");
        reg.execute(&tool_use("echo", json!({"text": "hi"})), &ctx).await;

        let mut starts = 0;
        let mut completes = 0;
        while let Ok(ev) = rx.try_recv() {
            match ev {
                ProgressEvent::ToolExecutionStart { .. } => starts += 1,
                ProgressEvent::ToolExecutionComplete { success, .. } => {
                    assert!(success);
                    completes += 1;
                }
                _ => {}
            }
        }
        assert_eq!(starts, 1);
        assert_eq!(completes, 1);
    }

    #[tokio::test]
    async fn test_confinement_hook_blocks_escape() {
        let (mut reg, bus) = registry();
        reg.register(Arc::new(ReadPathTool));
        reg.add_before_hook(Arc::new(PathConfinementHook));

        let mut rx = bus.subscribe("sess-1");
        let ctx = ToolContext::new(Some("sess-1".to_string()), "/project");
        let result = reg
            .execute(&tool_use("read_path", json!({"path": "../../etc/passwd"})), &ctx)
            .await;

        assert!(result.is_error);
        assert!(result.content.contains("escapes"));

        // Complete event carries success=false
        let mut saw_failed_complete = false;
        while let Ok(ev) = rx.try_recv() {
            if let ProgressEvent::ToolExecutionComplete { success, .. } = ev {
                assert!(!success);
                saw_failed_complete = true;
            }
        }
        assert!(saw_failed_complete);
    }

    #[tokio::test]
    async fn test_definitions_sorted() {
        let (mut reg, _) = registry();
        reg.register(Arc::new(EchoTool));
        reg.register(Arc::new(PanicTool));

        let defs = reg.definitions();
        assert_eq!(defs.len(), 2);
        assert_eq!(defs[0].name, "echo");
        assert_eq!(defs[1].name, "panic");
    }

    #[tokio::test]
    async fn test_metrics_recorded() {
        let (mut reg, _) = registry();
        reg.register(Arc::new(EchoTool));

        let ctx = ToolContext::new(None, "/project");
        reg.execute(&tool_use("echo", json!({"text": "a"})), &ctx).await;
        reg.execute(&tool_use("echo", json!({})), &ctx).await; // validation failure

        let metrics = reg.metrics("echo").unwrap();
        assert_eq!(metrics.executions, 2);
        assert_eq!(metrics.failures, 1);
    }
}
