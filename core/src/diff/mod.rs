//! Diff subsystem
//!
//! File-modifying tools are bracketed by a pair of hooks: the before-hook
//! snapshots the current content, the after-hook reads the new content,
//! computes a line diff, and publishes a diff-available event. Snapshots
//! are in-memory only; durable diff records begin at diff-available with
//! a tracker-allocated id.

pub mod lcs;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::ClassifiedError;
use crate::events::{Broadcaster, ProgressEvent};
use crate::tool::definition::{ToolCapabilities, ToolContext, ToolDefinition};
use crate::tool::hooks::{AfterHook, BeforeHook};
use crate::tool::schema::ParamType;
use crate::tool::value::ToolInput;

pub use lcs::{diff_lines, DiffOp, DiffResult, Hunk};

/// Pre-modification capture of one file
#[derive(Debug, Clone)]
pub struct FileSnapshot {
    /// Session the capture belongs to
    pub session_id: String,
    /// Captured path
    pub path: PathBuf,
    /// Content at capture time; empty when the file did not exist
    pub content: String,
    /// Tool execution that triggered the capture
    pub execution_id: String,
    /// Capture time
    pub captured_at: DateTime<Utc>,
}

/// A published diff, retrievable until its session is deleted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffRecord {
    /// Tracker-allocated id
    pub id: String,
    /// Session the diff belongs to
    pub session_id: String,
    /// File the diff describes
    pub path: String,
    /// Content before the modification
    pub original: String,
    /// Content after the modification
    pub modified: String,
    /// Line-diff summary
    pub diff: DiffResult,
    /// Tool that produced the change
    pub tool: String,
    /// Publication time
    pub created_at: DateTime<Utc>,
}

/// In-memory snapshot map plus published-diff records
///
/// Snapshots are keyed (session id, path); each key has its own entry so
/// the before/after critical sections of unrelated files never contend.
pub struct DiffTracker {
    snapshots: DashMap<(String, String), FileSnapshot>,
    diffs: DashMap<String, DiffRecord>,
    broadcaster: Arc<Broadcaster>,
}

impl DiffTracker {
    /// New tracker publishing through `broadcaster`
    pub fn new(broadcaster: Arc<Broadcaster>) -> Self {
        Self {
            snapshots: DashMap::new(),
            diffs: DashMap::new(),
            broadcaster,
        }
    }

    /// Capture the current content of `path` for `session_id`
    pub async fn snapshot(&self, session_id: &str, path: &str, execution_id: &str) {
        let content = tokio::fs::read_to_string(path).await.unwrap_or_default();
        self.snapshots.insert(
            (session_id.to_string(), path.to_string()),
            FileSnapshot {
                session_id: session_id.to_string(),
                path: PathBuf::from(path),
                content,
                execution_id: execution_id.to_string(),
                captured_at: Utc::now(),
            },
        );
    }

    /// Compare the snapshot against current content and publish a diff
    ///
    /// Returns the new record's id, or `None` when there was no snapshot
    /// or the content is unchanged. The snapshot is cleared either way.
    pub async fn finish(&self, session_id: &str, path: &str, tool: &str) -> Option<String> {
        let key = (session_id.to_string(), path.to_string());
        let (_, snapshot) = self.snapshots.remove(&key)?;

        let modified = tokio::fs::read_to_string(path).await.unwrap_or_default();
        if modified == snapshot.content {
            return None;
        }

        let diff = diff_lines(&snapshot.content, &modified);
        let record = DiffRecord {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            path: path.to_string(),
            original: snapshot.content,
            modified,
            diff,
            tool: tool.to_string(),
            created_at: Utc::now(),
        };

        debug!(
            session = session_id,
            path,
            added = record.diff.added,
            deleted = record.diff.deleted,
            "diff available"
        );

        let seq = self.broadcaster.next_seq(session_id);
        self.broadcaster.publish(ProgressEvent::DiffAvailable {
            session_id: session_id.to_string(),
            seq,
            diff_id: record.id.clone(),
            path: record.path.clone(),
            added: record.diff.added,
            deleted: record.diff.deleted,
            tool: tool.to_string(),
        });

        let id = record.id.clone();
        self.diffs.insert(id.clone(), record);
        Some(id)
    }

    /// Drop a snapshot without diffing (failed or unmodifying tool)
    pub fn discard(&self, session_id: &str, path: &str) {
        self.snapshots
            .remove(&(session_id.to_string(), path.to_string()));
    }

    /// Look up a published diff
    pub fn get(&self, diff_id: &str) -> Option<DiffRecord> {
        self.diffs.get(diff_id).map(|r| r.clone())
    }

    /// All diffs published for a session, newest first
    pub fn for_session(&self, session_id: &str) -> Vec<DiffRecord> {
        let mut records: Vec<_> = self
            .diffs
            .iter()
            .filter(|r| r.session_id == session_id)
            .map(|r| r.clone())
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records
    }

    /// Re-apply a diff's modified content to the file
    pub async fn apply(&self, diff_id: &str) -> Result<(), ClassifiedError> {
        let record = self
            .get(diff_id)
            .ok_or_else(|| ClassifiedError::permanent(format!("diff not found: {diff_id}")))?;
        tokio::fs::write(&record.path, &record.modified)
            .await
            .map_err(ClassifiedError::from)
    }

    /// Restore the file to its pre-modification bytes
    pub async fn revert(&self, diff_id: &str) -> Result<(), ClassifiedError> {
        let record = self
            .get(diff_id)
            .ok_or_else(|| ClassifiedError::permanent(format!("diff not found: {diff_id}")))?;
        tokio::fs::write(&record.path, &record.original)
            .await
            .map_err(ClassifiedError::from)
    }

    /// Forget everything owned by a session
    pub fn remove_session(&self, session_id: &str) {
        self.snapshots.retain(|(sid, _), _| sid != session_id);
        self.diffs.retain(|_, r| r.session_id != session_id);
    }
}

/// Extract the path parameters a mutating tool is about to touch
fn mutated_paths(tool: &ToolDefinition, input: &ToolInput) -> Vec<String> {
    tool.input_schema
        .params
        .iter()
        .filter(|p| p.ty == ParamType::Path)
        .filter_map(|p| input.get(&p.name).and_then(|v| v.as_str()).map(String::from))
        .collect()
}

/// Before-hook: snapshot files a mutating tool is about to touch
pub struct DiffCaptureBefore {
    tracker: Arc<DiffTracker>,
}

impl DiffCaptureBefore {
    pub fn new(tracker: Arc<DiffTracker>) -> Self {
        Self { tracker }
    }
}

#[async_trait]
impl BeforeHook for DiffCaptureBefore {
    fn name(&self) -> &str {
        "diff-capture"
    }

    async fn before(
        &self,
        tool: &ToolDefinition,
        capabilities: &ToolCapabilities,
        input: &mut ToolInput,
        ctx: &ToolContext,
    ) -> Result<(), ClassifiedError> {
        if !capabilities.is_mutating() {
            return Ok(());
        }
        let Some(session_id) = &ctx.session_id else {
            return Ok(());
        };
        for path in mutated_paths(tool, input) {
            self.tracker
                .snapshot(session_id, &path, &ctx.execution_id)
                .await;
        }
        Ok(())
    }
}

/// After-hook: diff the snapshots against current content
pub struct DiffCaptureAfter {
    tracker: Arc<DiffTracker>,
}

impl DiffCaptureAfter {
    pub fn new(tracker: Arc<DiffTracker>) -> Self {
        Self { tracker }
    }
}

#[async_trait]
impl AfterHook for DiffCaptureAfter {
    fn name(&self) -> &str {
        "diff-capture"
    }

    async fn after(
        &self,
        tool: &ToolDefinition,
        input: &ToolInput,
        result: Result<&str, &ClassifiedError>,
        ctx: &ToolContext,
    ) {
        let Some(session_id) = &ctx.session_id else {
            return;
        };
        for path in mutated_paths(tool, input) {
            match result {
                Ok(_) => {
                    self.tracker.finish(session_id, &path, &tool.name).await;
                }
                Err(err) => {
                    warn!(
                        tool = tool.name,
                        path,
                        error = %err,
                        "discarding snapshot after failed tool"
                    );
                    self.tracker.discard(session_id, &path);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn tracker() -> (Arc<DiffTracker>, Arc<Broadcaster>) {
        let bus = Arc::new(Broadcaster::new());
        (Arc::new(DiffTracker::new(bus.clone())), bus)
    }

    #[tokio::test]
    async fn test_snapshot_modify_diff() {
        let (tracker, bus) = tracker();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.txt");
        tokio::fs::write(&path, "one\ntwo\n").await.unwrap();
        let path_str = path.to_string_lossy().to_string();

        let mut rx = bus.subscribe("s1");
        tracker.snapshot("s1", &path_str, "exec-1").await;
        tokio::fs::write(&path, "one\ntwo\nthree\n").await.unwrap();
        let diff_id = tracker.finish("s1", &path_str, "edit_file").await.unwrap();

        let record = tracker.get(&diff_id).unwrap();
        assert_eq!(record.diff.added, 1);
        assert_eq!(record.diff.deleted, 0);

        match rx.try_recv().unwrap() {
            ProgressEvent::DiffAvailable { diff_id: id, added, .. } => {
                assert_eq!(id, diff_id);
                assert_eq!(added, 1);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unchanged_content_publishes_nothing() {
        let (tracker, bus) = tracker();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.txt");
        tokio::fs::write(&path, "same\n").await.unwrap();
        let path_str = path.to_string_lossy().to_string();

        let mut rx = bus.subscribe("s1");
        tracker.snapshot("s1", &path_str, "exec-1").await;
        assert!(tracker.finish("s1", &path_str, "edit_file").await.is_none());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_missing_file_snapshots_empty() {
        let (tracker, _) = tracker();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("new.txt");
        let path_str = path.to_string_lossy().to_string();

        tracker.snapshot("s1", &path_str, "exec-1").await;
        tokio::fs::write(&path, "created\n").await.unwrap();
        let diff_id = tracker.finish("s1", &path_str, "write_file").await.unwrap();

        let record = tracker.get(&diff_id).unwrap();
        assert_eq!(record.original, "");
        assert_eq!(record.diff.added, 1);
    }

    #[tokio::test]
    async fn test_revert_restores_original_bytes() {
        let (tracker, _) = tracker();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.txt");
        let original = "alpha\nbeta\n";
        tokio::fs::write(&path, original).await.unwrap();
        let path_str = path.to_string_lossy().to_string();

        tracker.snapshot("s1", &path_str, "exec-1").await;
        tokio::fs::write(&path, "alpha\ngamma\n").await.unwrap();
        let diff_id = tracker.finish("s1", &path_str, "edit_file").await.unwrap();

        tracker.revert(&diff_id).await.unwrap();
        let restored = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(restored, original);

        tracker.apply(&diff_id).await.unwrap();
        let reapplied = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(reapplied, "alpha\ngamma\n");
    }

    #[tokio::test]
    async fn test_session_listing_and_removal() {
        let (tracker, _) = tracker();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.txt");
        tokio::fs::write(&path, "x\n").await.unwrap();
        let path_str = path.to_string_lossy().to_string();

        tracker.snapshot("s1", &path_str, "e1").await;
        tokio::fs::write(&path, "y\n").await.unwrap();
        tracker.finish("s1", &path_str, "edit_file").await.unwrap();

        assert_eq!(tracker.for_session("s1").len(), 1);
        assert!(tracker.for_session("s2").is_empty());

        tracker.remove_session("s1");
        assert!(tracker.for_session("s1").is_empty());
    }
}
