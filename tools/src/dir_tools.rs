//! Directory tools — list, tree, make, remove, move

use std::path::Path;

use async_trait::async_trait;

use rcode_core::error::ClassifiedError;
use rcode_core::tool::definition::{Tool, ToolCapabilities, ToolContext, ToolDefinition};
use rcode_core::tool::schema::{InputSchema, ParamSpec, ParamType, PathKind};
use rcode_core::tool::value::ToolInput;

/// List the entries of one directory
pub struct ListDirectoryTool;

#[async_trait]
impl Tool for ListDirectoryTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "list_directory",
            "List the entries of a directory",
            InputSchema::new().with_param(
                ParamSpec::new("path", ParamType::Path, true, "Directory to list")
                    .with_path_kind(PathKind::Directory)
                    .must_exist(),
            ),
        )
    }

    fn capabilities(&self) -> ToolCapabilities {
        ToolCapabilities::read_only()
    }

    async fn execute(
        &self,
        input: ToolInput,
        _ctx: &ToolContext,
    ) -> Result<String, ClassifiedError> {
        let path = input["path"].as_str().unwrap_or_default();
        let mut reader = tokio::fs::read_dir(path).await.map_err(ClassifiedError::from)?;
        let mut entries = Vec::new();
        while let Some(entry) = reader.next_entry().await.map_err(ClassifiedError::from)? {
            let suffix = if entry.path().is_dir() { "/" } else { "" };
            entries.push(format!("{}{suffix}", entry.file_name().to_string_lossy()));
        }
        entries.sort();
        Ok(entries.join("\n"))
    }
}

/// Render a directory tree, depth-bounded
pub struct TreeDirectoryTool;

#[async_trait]
impl Tool for TreeDirectoryTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "tree_directory",
            "Render a directory tree",
            InputSchema::new()
                .with_param(
                    ParamSpec::new("path", ParamType::Path, true, "Root directory")
                        .with_path_kind(PathKind::Directory)
                        .must_exist(),
                )
                .with_param(
                    ParamSpec::new("depth", ParamType::Integer, false, "Maximum depth")
                        .with_range(1, 16),
                ),
        )
    }

    fn capabilities(&self) -> ToolCapabilities {
        ToolCapabilities::read_only()
    }

    async fn execute(
        &self,
        input: ToolInput,
        _ctx: &ToolContext,
    ) -> Result<String, ClassifiedError> {
        let path = input["path"].as_str().unwrap_or_default();
        let depth = input
            .get("depth")
            .and_then(|v| v.as_i64())
            .unwrap_or(4)
            .clamp(1, 16) as usize;

        let mut out = String::new();
        render_tree(Path::new(path), 0, depth, &mut out)?;
        Ok(out.trim_end().to_string())
    }
}

fn render_tree(
    dir: &Path,
    level: usize,
    max_depth: usize,
    out: &mut String,
) -> Result<(), ClassifiedError> {
    if level >= max_depth {
        return Ok(());
    }
    let mut entries: Vec<_> = std::fs::read_dir(dir)
        .map_err(ClassifiedError::from)?
        .flatten()
        .collect();
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name == ".git" || name == "target" || name == "node_modules" {
            continue;
        }
        let path = entry.path();
        let indent = "  ".repeat(level);
        if path.is_dir() {
            out.push_str(&format!("{indent}{name}/\n"));
            render_tree(&path, level + 1, max_depth, out)?;
        } else {
            out.push_str(&format!("{indent}{name}\n"));
        }
    }
    Ok(())
}

/// Create a directory (and parents)
pub struct MakeDirectoryTool;

#[async_trait]
impl Tool for MakeDirectoryTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "make_directory",
            "Create a directory, including parents",
            InputSchema::new().with_param(ParamSpec::new(
                "path",
                ParamType::Path,
                true,
                "Directory to create",
            )),
        )
    }

    fn capabilities(&self) -> ToolCapabilities {
        ToolCapabilities::read_write()
    }

    async fn execute(
        &self,
        input: ToolInput,
        _ctx: &ToolContext,
    ) -> Result<String, ClassifiedError> {
        let path = input["path"].as_str().unwrap_or_default();
        tokio::fs::create_dir_all(path)
            .await
            .map_err(ClassifiedError::from)?;
        Ok(format!("created {path}"))
    }
}

/// Remove a file or directory tree
pub struct RemovePathTool;

#[async_trait]
impl Tool for RemovePathTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "remove_path",
            "Delete a file or directory tree",
            InputSchema::new().with_param(
                ParamSpec::new("path", ParamType::Path, true, "Path to delete").must_exist(),
            ),
        )
    }

    fn capabilities(&self) -> ToolCapabilities {
        ToolCapabilities::read_write()
    }

    async fn execute(
        &self,
        input: ToolInput,
        _ctx: &ToolContext,
    ) -> Result<String, ClassifiedError> {
        let path = input["path"].as_str().unwrap_or_default();
        let target = Path::new(path);
        if target.is_dir() {
            tokio::fs::remove_dir_all(target)
                .await
                .map_err(ClassifiedError::from)?;
        } else {
            tokio::fs::remove_file(target)
                .await
                .map_err(ClassifiedError::from)?;
        }
        Ok(format!("removed {path}"))
    }
}

/// Move or rename a path
pub struct MovePathTool;

#[async_trait]
impl Tool for MovePathTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "move_path",
            "Move or rename a file or directory",
            InputSchema::new()
                .with_param(
                    ParamSpec::new("path", ParamType::Path, true, "Source path").must_exist(),
                )
                .with_param(ParamSpec::new(
                    "destination",
                    ParamType::Path,
                    true,
                    "Destination path",
                )),
        )
    }

    fn capabilities(&self) -> ToolCapabilities {
        ToolCapabilities::read_write()
    }

    async fn execute(
        &self,
        input: ToolInput,
        _ctx: &ToolContext,
    ) -> Result<String, ClassifiedError> {
        let source = input["path"].as_str().unwrap_or_default();
        let destination = input["destination"].as_str().unwrap_or_default();
        if let Some(parent) = Path::new(destination).parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(ClassifiedError::from)?;
        }
        tokio::fs::rename(source, destination)
            .await
            .map_err(ClassifiedError::from)?;
        Ok(format!("moved {source} -> {destination}"))
    }
}
