//! Shell command execution with timeout and output capping

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use rcode_core::error::ClassifiedError;
use rcode_core::tool::definition::{Tool, ToolCapabilities, ToolContext, ToolDefinition};
use rcode_core::tool::schema::{InputSchema, ParamSpec, ParamType};
use rcode_core::tool::value::ToolInput;

/// Default command timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: i64 = 120;

/// Captured output beyond this many characters is truncated
pub const MAX_OUTPUT_CHARS: usize = 30_000;

/// Run a shell command inside the project
pub struct ShellCommandTool;

#[async_trait]
impl Tool for ShellCommandTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "shell_command",
            "Run a shell command and capture its output",
            InputSchema::new()
                .with_param(
                    ParamSpec::new("command", ParamType::String, true, "Command line to run")
                        .with_length(1, 10_000),
                )
                .with_param(
                    ParamSpec::new(
                        "timeout_secs",
                        ParamType::Integer,
                        false,
                        "Timeout in seconds",
                    )
                    .with_range(1, 600),
                ),
        )
    }

    fn capabilities(&self) -> ToolCapabilities {
        ToolCapabilities::process()
    }

    async fn execute(
        &self,
        input: ToolInput,
        ctx: &ToolContext,
    ) -> Result<String, ClassifiedError> {
        let command = input["command"].as_str().unwrap_or_default();
        let timeout_secs = input
            .get("timeout_secs")
            .and_then(|v| v.as_i64())
            .unwrap_or(DEFAULT_TIMEOUT_SECS) as u64;

        debug!(command, timeout_secs, "running shell command");

        let mut child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&ctx.project_root)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(ClassifiedError::from)?;

        let waited = tokio::select! {
            result = child.wait_with_output() => {
                Some(result.map_err(ClassifiedError::from)?)
            }
            _ = tokio::time::sleep(Duration::from_secs(timeout_secs)) => None,
            _ = ctx.cancel.cancelled() => {
                return Err(ClassifiedError::permanent("shell command cancelled"));
            }
        };

        let Some(output) = waited else {
            // kill_on_drop terminated the child when the select dropped it
            return Err(ClassifiedError::permanent(format!(
                "command timed out after {timeout_secs}s"
            )));
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let code = output.status.code().unwrap_or(-1);

        let mut rendered = format!("exit code: {code}\n");
        if !stdout.is_empty() {
            rendered.push_str("stdout:\n");
            rendered.push_str(&stdout);
        }
        if !stderr.is_empty() {
            rendered.push_str("stderr:\n");
            rendered.push_str(&stderr);
        }
        let rendered = truncate_output(&rendered);

        if output.status.success() {
            Ok(rendered)
        } else {
            Err(ClassifiedError::permanent(rendered))
        }
    }
}

/// Truncate to the cap, marking the cut
pub fn truncate_output(text: &str) -> String {
    if text.len() <= MAX_OUTPUT_CHARS {
        return text.to_string();
    }
    let mut cut = MAX_OUTPUT_CHARS;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}\n[output truncated]", &text[..cut])
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn input(pairs: serde_json::Value) -> ToolInput {
        rcode_core::tool::value::input_from_json(pairs)
    }

    #[tokio::test]
    async fn test_successful_command_captures_stdout() {
        let dir = TempDir::new().unwrap();
        let ctx = ToolContext::new(None, dir.path());
        let out = ShellCommandTool
            .execute(input(serde_json::json!({"command": "echo hello"})), &ctx)
            .await
            .unwrap();
        assert!(out.contains("exit code: 0"));
        assert!(out.contains("hello"));
    }

    #[tokio::test]
    async fn test_failing_command_is_error() {
        let dir = TempDir::new().unwrap();
        let ctx = ToolContext::new(None, dir.path());
        let err = ShellCommandTool
            .execute(input(serde_json::json!({"command": "exit 3"})), &ctx)
            .await
            .unwrap_err();
        assert!(err.message.contains("exit code: 3"));
    }

    #[tokio::test]
    async fn test_command_runs_in_project_root() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "").unwrap();
        let ctx = ToolContext::new(None, dir.path());
        let out = ShellCommandTool
            .execute(input(serde_json::json!({"command": "ls"})), &ctx)
            .await
            .unwrap();
        assert!(out.contains("marker.txt"));
    }

    #[tokio::test]
    async fn test_timeout_terminates_command() {
        let dir = TempDir::new().unwrap();
        let ctx = ToolContext::new(None, dir.path());
        let started = std::time::Instant::now();
        let err = ShellCommandTool
            .execute(
                input(serde_json::json!({"command": "sleep 30", "timeout_secs": 1})),
                &ctx,
            )
            .await
            .unwrap_err();
        assert!(err.message.contains("timed out"));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_truncation_bound() {
        let long = "x".repeat(MAX_OUTPUT_CHARS + 500);
        let truncated = truncate_output(&long);
        assert!(truncated.len() <= MAX_OUTPUT_CHARS + 20);
        assert!(truncated.ends_with("[output truncated]"));

        let short = "fine";
        assert_eq!(truncate_output(short), "fine");
    }
}
