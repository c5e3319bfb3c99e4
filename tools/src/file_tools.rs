//! File tools — read, write, and edit file contents

use async_trait::async_trait;
use tracing::debug;

use rcode_core::error::ClassifiedError;
use rcode_core::tool::definition::{Tool, ToolCapabilities, ToolContext, ToolDefinition};
use rcode_core::tool::schema::{InputSchema, ParamSpec, ParamType, PathKind};
use rcode_core::tool::value::ToolInput;

/// Read a file's contents, optionally capped to a line limit
pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "read_file",
            "Read the contents of a file",
            InputSchema::new()
                .with_param(
                    ParamSpec::new("path", ParamType::Path, true, "File to read")
                        .with_path_kind(PathKind::File),
                )
                .with_param(
                    ParamSpec::new("limit", ParamType::Integer, false, "Maximum lines to return")
                        .with_range(1, 100_000),
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
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(ClassifiedError::from)?;

        match input.get("limit").and_then(|v| v.as_i64()) {
            Some(limit) => Ok(content
                .lines()
                .take(limit as usize)
                .collect::<Vec<_>>()
                .join("\n")),
            None => Ok(content),
        }
    }
}

/// Write (create or overwrite) a file
pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "write_file",
            "Write content to a file, creating it if needed",
            InputSchema::new()
                .with_param(ParamSpec::new("path", ParamType::Path, true, "File to write"))
                .with_param(ParamSpec::new(
                    "content",
                    ParamType::String,
                    true,
                    "Content to write",
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
        let content = input["content"].as_str().unwrap_or_default();

        if let Some(parent) = std::path::Path::new(path).parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(ClassifiedError::from)?;
        }
        tokio::fs::write(path, content)
            .await
            .map_err(ClassifiedError::from)?;

        debug!(path, bytes = content.len(), "file written");
        Ok(format!("wrote {} bytes to {path}", content.len()))
    }
}

/// Replace an exact string within a file
pub struct EditFileTool;

#[async_trait]
impl Tool for EditFileTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "edit_file",
            "Replace an exact text occurrence in a file",
            InputSchema::new()
                .with_param(
                    ParamSpec::new("path", ParamType::Path, true, "File to edit")
                        .with_path_kind(PathKind::File)
                        .must_exist(),
                )
                .with_param(
                    ParamSpec::new("old_text", ParamType::String, true, "Text to replace")
                        .with_length(1, 100_000),
                )
                .with_param(ParamSpec::new(
                    "new_text",
                    ParamType::String,
                    true,
                    "Replacement text",
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
        let old_text = input["old_text"].as_str().unwrap_or_default();
        let new_text = input["new_text"].as_str().unwrap_or_default();

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(ClassifiedError::from)?;

        let occurrences = content.matches(old_text).count();
        if occurrences == 0 {
            return Err(ClassifiedError::permanent(format!(
                "old_text not found in {path}"
            )));
        }
        if occurrences > 1 {
            return Err(ClassifiedError::permanent(format!(
                "old_text matches {occurrences} locations in {path}; provide more context"
            )));
        }

        let updated = content.replacen(old_text, new_text, 1);
        tokio::fs::write(path, updated)
            .await
            .map_err(ClassifiedError::from)?;

        Ok(format!("edited {path}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn ctx(dir: &TempDir) -> ToolContext {
        ToolContext::new(None, dir.path())
    }

    fn input(pairs: serde_json::Value) -> ToolInput {
        rcode_core::tool::value::input_from_json(pairs)
    }

    #[tokio::test]
    async fn test_read_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.txt");
        tokio::fs::write(&path, "one\ntwo\nthree\n").await.unwrap();

        let out = ReadFileTool
            .execute(
                input(serde_json::json!({"path": path.to_string_lossy()})),
                &ctx(&dir),
            )
            .await
            .unwrap();
        assert_eq!(out, "one\ntwo\nthree\n");
    }

    #[tokio::test]
    async fn test_read_file_with_limit() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.txt");
        tokio::fs::write(&path, "one\ntwo\nthree\n").await.unwrap();

        let out = ReadFileTool
            .execute(
                input(serde_json::json!({"path": path.to_string_lossy(), "limit": 2})),
                &ctx(&dir),
            )
            .await
            .unwrap();
        assert_eq!(out, "one\ntwo");
    }

    #[tokio::test]
    async fn test_read_missing_file_is_permanent() {
        let dir = TempDir::new().unwrap();
        let err = ReadFileTool
            .execute(
                input(serde_json::json!({"path": dir.path().join("no.txt").to_string_lossy()})),
                &ctx(&dir),
            )
            .await
            .unwrap_err();
        assert_eq!(err.category, rcode_core::ErrorCategory::Permanent);
    }

    #[tokio::test]
    async fn test_write_creates_parent_dirs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("deep/nested/file.txt");

        WriteFileTool
            .execute(
                input(serde_json::json!({
                    "path": path.to_string_lossy(),
                    "content": "hello",
                })),
                &ctx(&dir),
            )
            .await
            .unwrap();

        assert_eq!(tokio::fs::read_to_string(&path).await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_edit_replaces_unique_occurrence() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.txt");
        tokio::fs::write(&path, "fn main() {}\n").await.unwrap();

        EditFileTool
            .execute(
                input(serde_json::json!({
                    "path": path.to_string_lossy(),
                    "old_text": "fn main() {}",
                    "new_text": "// entry point\nfn main() {}",
                })),
                &ctx(&dir),
            )
            .await
            .unwrap();

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(content.starts_with("// entry point"));
    }

    #[tokio::test]
    async fn test_edit_rejects_ambiguous_match() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.txt");
        tokio::fs::write(&path, "x\nx\n").await.unwrap();

        let err = EditFileTool
            .execute(
                input(serde_json::json!({
                    "path": path.to_string_lossy(),
                    "old_text": "x",
                    "new_text": "y",
                })),
                &ctx(&dir),
            )
            .await
            .unwrap_err();
        assert!(err.message.contains("locations"));
    }

    #[tokio::test]
    async fn test_edit_rejects_missing_text() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.txt");
        tokio::fs::write(&path, "content\n").await.unwrap();

        let err = EditFileTool
            .execute(
                input(serde_json::json!({
                    "path": path.to_string_lossy(),
                    "old_text": "absent",
                    "new_text": "y",
                })),
                &ctx(&dir),
            )
            .await
            .unwrap_err();
        assert!(err.message.contains("not found"));
    }
}
