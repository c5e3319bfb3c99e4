//! Version-control tools
//!
//! Thin wrappers over the `git` binary, one tool per operation. Mutating
//! operations (add, commit, merge, push, checkout) declare write
//! capability so the executor records them for rollback.

use async_trait::async_trait;
use tracing::debug;

use rcode_core::error::ClassifiedError;
use rcode_core::tool::definition::{Tool, ToolCapabilities, ToolContext, ToolDefinition};
use rcode_core::tool::schema::{InputSchema, ParamSpec, ParamType};
use rcode_core::tool::value::ToolInput;

/// Table entry describing one git operation
struct GitSpec {
    name: &'static str,
    description: &'static str,
    mutating: bool,
    schema: fn() -> InputSchema,
    args: fn(&ToolInput) -> Vec<String>,
}

fn no_params() -> InputSchema {
    InputSchema::new()
}

fn message_param() -> InputSchema {
    InputSchema::new().with_param(
        ParamSpec::new("message", ParamType::String, true, "Commit message").with_length(1, 5_000),
    )
}

fn optional_path_param() -> InputSchema {
    InputSchema::new().with_param(ParamSpec::new(
        "path",
        ParamType::String,
        false,
        "Limit to one path",
    ))
}

fn path_param() -> InputSchema {
    InputSchema::new().with_param(ParamSpec::new(
        "path",
        ParamType::String,
        true,
        "Path to stage",
    ))
}

fn ref_param() -> InputSchema {
    InputSchema::new().with_param(
        ParamSpec::new("ref", ParamType::String, true, "Branch, tag, or commit")
            .with_length(1, 256),
    )
}

fn limit_param() -> InputSchema {
    InputSchema::new().with_param(
        ParamSpec::new("limit", ParamType::Integer, false, "Number of commits").with_range(1, 200),
    )
}

fn optional_name_param() -> InputSchema {
    InputSchema::new().with_param(ParamSpec::new(
        "name",
        ParamType::String,
        false,
        "Branch to create; omit to list",
    ))
}

const GIT_SPECS: &[GitSpec] = &[
    GitSpec {
        name: "git_status",
        description: "Show working tree status",
        mutating: false,
        schema: no_params,
        args: |_| vec!["status".into(), "--porcelain".into()],
    },
    GitSpec {
        name: "git_diff",
        description: "Show unstaged changes",
        mutating: false,
        schema: optional_path_param,
        args: |input| {
            let mut args = vec!["diff".into()];
            if let Some(path) = input.get("path").and_then(|v| v.as_str()) {
                args.push("--".into());
                args.push(path.to_string());
            }
            args
        },
    },
    GitSpec {
        name: "git_log",
        description: "Show recent commits",
        mutating: false,
        schema: limit_param,
        args: |input| {
            let limit = input.get("limit").and_then(|v| v.as_i64()).unwrap_or(10);
            vec!["log".into(), "--oneline".into(), format!("-{limit}")]
        },
    },
    GitSpec {
        name: "git_branch",
        description: "List branches or create one",
        mutating: false,
        schema: optional_name_param,
        args: |input| match input.get("name").and_then(|v| v.as_str()) {
            Some(name) => vec!["branch".into(), name.to_string()],
            None => vec!["branch".into(), "--list".into()],
        },
    },
    GitSpec {
        name: "git_add",
        description: "Stage a path",
        mutating: true,
        schema: path_param,
        args: |input| {
            vec![
                "add".into(),
                input
                    .get("path")
                    .and_then(|v| v.as_str())
                    .unwrap_or(".")
                    .to_string(),
            ]
        },
    },
    GitSpec {
        name: "git_commit",
        description: "Commit staged changes",
        mutating: true,
        schema: message_param,
        args: |input| {
            vec![
                "commit".into(),
                "-m".into(),
                input
                    .get("message")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
            ]
        },
    },
    GitSpec {
        name: "git_checkout",
        description: "Check out a branch or commit",
        mutating: true,
        schema: ref_param,
        args: |input| {
            vec![
                "checkout".into(),
                input
                    .get("ref")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
            ]
        },
    },
    GitSpec {
        name: "git_merge",
        description: "Merge a branch into the current one",
        mutating: true,
        schema: ref_param,
        args: |input| {
            vec![
                "merge".into(),
                input
                    .get("ref")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
            ]
        },
    },
    GitSpec {
        name: "git_push",
        description: "Push the current branch",
        mutating: true,
        schema: no_params,
        args: |_| vec!["push".into()],
    },
    GitSpec {
        name: "git_pull",
        description: "Pull the current branch",
        mutating: true,
        schema: no_params,
        args: |_| vec!["pull".into()],
    },
];

/// One registered git operation
pub struct GitTool {
    spec: &'static GitSpec,
}

impl GitTool {
    fn new(spec: &'static GitSpec) -> Self {
        Self { spec }
    }
}

/// All git tools, ready to register
pub fn git_tools() -> Vec<std::sync::Arc<dyn Tool>> {
    GIT_SPECS
        .iter()
        .map(|spec| std::sync::Arc::new(GitTool::new(spec)) as std::sync::Arc<dyn Tool>)
        .collect()
}

#[async_trait]
impl Tool for GitTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(self.spec.name, self.spec.description, (self.spec.schema)())
    }

    fn capabilities(&self) -> ToolCapabilities {
        if self.spec.mutating {
            ToolCapabilities::process()
        } else {
            ToolCapabilities {
                file_read: true,
                process_spawn: true,
                ..Default::default()
            }
        }
    }

    async fn execute(
        &self,
        input: ToolInput,
        ctx: &ToolContext,
    ) -> Result<String, ClassifiedError> {
        let args = (self.spec.args)(&input);
        debug!(tool = self.spec.name, ?args, "running git");

        let output = tokio::process::Command::new("git")
            .args(&args)
            .current_dir(&ctx.project_root)
            .output()
            .await
            .map_err(ClassifiedError::from)?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim_end().to_string();
        if output.status.success() {
            if stdout.is_empty() {
                Ok(format!("git {} ok", args.first().cloned().unwrap_or_default()))
            } else {
                Ok(stdout)
            }
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim_end().to_string();
            Err(ClassifiedError::permanent(format!(
                "git {} failed: {stderr}",
                args.first().cloned().unwrap_or_default()
            )))
        }
    }
}
