//! Pattern search across project files

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;

use rcode_core::error::ClassifiedError;
use rcode_core::tool::definition::{Tool, ToolCapabilities, ToolContext, ToolDefinition};
use rcode_core::tool::schema::{InputSchema, ParamSpec, ParamType, PathKind};
use rcode_core::tool::value::ToolInput;

/// Overall search deadline
const SEARCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Cap on reported matches
const MAX_MATCHES: usize = 500;

/// Regex search over a directory tree
pub struct SearchFilesTool;

#[async_trait]
impl Tool for SearchFilesTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "search_files",
            "Search file contents with a regular expression",
            InputSchema::new()
                .with_param(ParamSpec::new(
                    "pattern",
                    ParamType::Regex,
                    true,
                    "Regular expression to search for",
                ))
                .with_param(
                    ParamSpec::new("path", ParamType::Path, false, "Directory to search")
                        .with_path_kind(PathKind::Directory),
                )
                .with_param(
                    ParamSpec::new("glob", ParamType::String, false, "Filename glob filter")
                        .with_length(1, 256),
                ),
        )
    }

    fn capabilities(&self) -> ToolCapabilities {
        ToolCapabilities::read_only()
    }

    async fn execute(
        &self,
        input: ToolInput,
        ctx: &ToolContext,
    ) -> Result<String, ClassifiedError> {
        let pattern = input["pattern"].as_str().unwrap_or_default().to_string();
        let root = input
            .get("path")
            .and_then(|v| v.as_str())
            .map(std::path::PathBuf::from)
            .unwrap_or_else(|| ctx.project_root.clone());
        let name_filter = input
            .get("glob")
            .and_then(|v| v.as_str())
            .map(|g| glob::Pattern::new(g))
            .transpose()
            .map_err(|e| ClassifiedError::permanent(format!("invalid glob: {e}")))?;

        let regex = Regex::new(&pattern)
            .map_err(|e| ClassifiedError::permanent(format!("invalid pattern: {e}")))?;

        // The walk is blocking filesystem work; keep it off the runtime
        let result = tokio::time::timeout(
            SEARCH_TIMEOUT,
            tokio::task::spawn_blocking(move || search(&root, &regex, name_filter.as_ref())),
        )
        .await;

        match result {
            Err(_) => Err(ClassifiedError::retryable("search timed out")),
            Ok(Err(join_err)) => Err(ClassifiedError::permanent(format!(
                "search task failed: {join_err}"
            ))),
            Ok(Ok(matches)) => {
                if matches.is_empty() {
                    Ok("no matches".to_string())
                } else {
                    Ok(matches.join("\n"))
                }
            }
        }
    }
}

fn search(root: &Path, regex: &Regex, name_filter: Option<&glob::Pattern>) -> Vec<String> {
    let mut matches = Vec::new();
    walk(root, root, regex, name_filter, &mut matches);
    matches
}

fn walk(
    root: &Path,
    dir: &Path,
    regex: &Regex,
    name_filter: Option<&glob::Pattern>,
    matches: &mut Vec<String>,
) {
    if matches.len() >= MAX_MATCHES {
        return;
    }
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        if matches.len() >= MAX_MATCHES {
            return;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') || name == "target" || name == "node_modules" {
            continue;
        }
        let path = entry.path();
        if path.is_dir() {
            walk(root, &path, regex, name_filter, matches);
            continue;
        }
        if let Some(filter) = name_filter {
            if !filter.matches(&name) {
                continue;
            }
        }
        let Ok(content) = std::fs::read_to_string(&path) else {
            continue;
        };
        let rel = path.strip_prefix(root).unwrap_or(&path).to_string_lossy();
        for (line_no, line) in content.lines().enumerate() {
            if regex.is_match(line) {
                matches.push(format!("{rel}:{}:{line}", line_no + 1));
                if matches.len() >= MAX_MATCHES {
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn input(pairs: serde_json::Value) -> ToolInput {
        rcode_core::tool::value::input_from_json(pairs)
    }

    #[tokio::test]
    async fn test_search_finds_matches_with_locations() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.rs"), "fn alpha() {}\nfn beta() {}\n").unwrap();
        std::fs::write(dir.path().join("b.rs"), "fn gamma() {}\n").unwrap();

        let ctx = ToolContext::new(None, dir.path());
        let out = SearchFilesTool
            .execute(input(serde_json::json!({"pattern": r"fn \w+"})), &ctx)
            .await
            .unwrap();

        assert!(out.contains("a.rs:1:fn alpha() {}"));
        assert!(out.contains("b.rs:1:fn gamma() {}"));
    }

    #[tokio::test]
    async fn test_search_with_glob_filter() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.rs"), "needle\n").unwrap();
        std::fs::write(dir.path().join("a.txt"), "needle\n").unwrap();

        let ctx = ToolContext::new(None, dir.path());
        let out = SearchFilesTool
            .execute(
                input(serde_json::json!({"pattern": "needle", "glob": "*.rs"})),
                &ctx,
            )
            .await
            .unwrap();

        assert!(out.contains("a.rs"));
        assert!(!out.contains("a.txt"));
    }

    #[tokio::test]
    async fn test_no_matches_reported() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.rs"), "nothing here\n").unwrap();

        let ctx = ToolContext::new(None, dir.path());
        let out = SearchFilesTool
            .execute(input(serde_json::json!({"pattern": "absent_symbol"})), &ctx)
            .await
            .unwrap();
        assert_eq!(out, "no matches");
    }
}
