//! Context tracker
//!
//! Maintains a per-session [`ProjectContext`]: scan results, the recently
//! used files list, and the file-change log. File-modifying tools report
//! through the registry's after-hook, which lands here.

pub mod scanner;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ClassifiedError;
use crate::events::{Broadcaster, ChangeKind, ProgressEvent};
use crate::tool::definition::{ToolCapabilities, ToolContext, ToolDefinition};
use crate::tool::hooks::AfterHook;
use crate::tool::schema::ParamType;
use crate::tool::value::ToolInput;

pub use scanner::{extract_metadata, scan_project, FileMetadata, FileNode, Language, ScanResult};

/// Cap on the recently-used files list
pub const RECENT_FILES_LIMIT: usize = 50;

/// One recorded file change
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileChangeRecord {
    /// Changed path
    pub path: String,
    /// Kind of change
    pub change: ChangeKind,
    /// Tool that made the change
    pub tool: String,
    /// When it happened
    pub timestamp: DateTime<Utc>,
    /// Optional free-form details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Everything the engine knows about the active project of a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectContext {
    /// Absolute project root
    pub root: PathBuf,
    /// Detected language
    pub language: Language,
    /// Detected framework, when any
    pub framework: Option<String>,
    /// Declared dependencies
    pub dependencies: Vec<String>,
    /// Scanned file tree
    pub file_tree: Vec<FileNode>,
    /// Per-file metadata
    pub files: HashMap<String, FileMetadata>,
    /// Recently used files, most recent first, bounded
    pub recent_files: Vec<String>,
    /// Changes recorded this session, keyed by path
    pub modified_files: HashMap<String, Vec<FileChangeRecord>>,
}

impl ProjectContext {
    fn empty(root: PathBuf) -> Self {
        Self {
            root,
            language: Language::Unknown,
            framework: None,
            dependencies: Vec::new(),
            file_tree: Vec::new(),
            files: HashMap::new(),
            recent_files: Vec::new(),
            modified_files: HashMap::new(),
        }
    }
}

/// Per-session project context store
pub struct ContextTracker {
    contexts: DashMap<String, ProjectContext>,
    broadcaster: Arc<Broadcaster>,
}

impl ContextTracker {
    /// New tracker publishing through `broadcaster`
    pub fn new(broadcaster: Arc<Broadcaster>) -> Self {
        Self {
            contexts: DashMap::new(),
            broadcaster,
        }
    }

    /// Run a full project scan for a session
    pub fn scan(&self, session_id: &str, root: &PathBuf) -> Result<(), ClassifiedError> {
        let result = scan_project(root)?;
        info!(
            session = session_id,
            language = result.language.as_str(),
            "context scan"
        );

        let mut entry = self
            .contexts
            .entry(session_id.to_string())
            .or_insert_with(|| ProjectContext::empty(root.clone()));
        entry.language = result.language;
        entry.framework = result.framework;
        entry.dependencies = result.dependencies;
        entry.file_tree = result.tree;
        entry.files = result.files;
        drop(entry);

        let seq = self.broadcaster.next_seq(session_id);
        self.broadcaster.publish(ProgressEvent::FileTreeUpdated {
            session_id: session_id.to_string(),
            seq,
        });
        Ok(())
    }

    /// Snapshot of a session's context
    pub fn get(&self, session_id: &str) -> Option<ProjectContext> {
        self.contexts.get(session_id).map(|c| c.clone())
    }

    /// Record that a file was touched, bumping the recent-files list
    pub fn touch_file(&self, session_id: &str, root: &PathBuf, path: &str) {
        let mut entry = self
            .contexts
            .entry(session_id.to_string())
            .or_insert_with(|| ProjectContext::empty(root.clone()));
        bump_recent(&mut entry.recent_files, path);
    }

    /// Record a file change made by a tool
    pub fn record_change(
        &self,
        session_id: &str,
        root: &PathBuf,
        path: &str,
        change: ChangeKind,
        tool: &str,
        details: Option<String>,
    ) {
        let record = FileChangeRecord {
            path: path.to_string(),
            change,
            tool: tool.to_string(),
            timestamp: Utc::now(),
            details,
        };

        let mut entry = self
            .contexts
            .entry(session_id.to_string())
            .or_insert_with(|| ProjectContext::empty(root.clone()));
        entry
            .modified_files
            .entry(path.to_string())
            .or_default()
            .push(record);
        bump_recent(&mut entry.recent_files, path);
        drop(entry);

        let seq = self.broadcaster.next_seq(session_id);
        self.broadcaster.publish(ProgressEvent::FileChanged {
            session_id: session_id.to_string(),
            seq,
            path: path.to_string(),
            change,
            tool: tool.to_string(),
        });
    }

    /// Recently used files for a session, most recent first
    pub fn recent_files(&self, session_id: &str) -> Vec<String> {
        self.contexts
            .get(session_id)
            .map(|c| c.recent_files.clone())
            .unwrap_or_default()
    }

    /// Forget a session's context
    pub fn remove_session(&self, session_id: &str) {
        self.contexts.remove(session_id);
    }
}

fn bump_recent(recent: &mut Vec<String>, path: &str) {
    recent.retain(|p| p != path);
    recent.insert(0, path.to_string());
    recent.truncate(RECENT_FILES_LIMIT);
}

/// After-hook wiring file-modifying tools into the tracker
pub struct ChangeTrackingHook {
    tracker: Arc<ContextTracker>,
    store: Option<Arc<crate::store::SessionStore>>,
}

impl ChangeTrackingHook {
    pub fn new(tracker: Arc<ContextTracker>) -> Self {
        Self {
            tracker,
            store: None,
        }
    }

    /// Also append every change to the durable file-change log
    pub fn with_store(mut self, store: Arc<crate::store::SessionStore>) -> Self {
        self.store = Some(store);
        self
    }
}

#[async_trait]
impl AfterHook for ChangeTrackingHook {
    fn name(&self) -> &str {
        "change-tracking"
    }

    async fn after(
        &self,
        tool: &ToolDefinition,
        input: &ToolInput,
        result: Result<&str, &ClassifiedError>,
        ctx: &ToolContext,
    ) {
        if result.is_err() {
            return;
        }
        let Some(session_id) = &ctx.session_id else {
            return;
        };

        let change = match tool.name.as_str() {
            "write_file" | "make_directory" => ChangeKind::Create,
            "edit_file" => ChangeKind::Modify,
            "remove_path" => ChangeKind::Delete,
            "move_path" => ChangeKind::Rename,
            _ => {
                // Read-only tools still refresh the recent-files list
                for spec in &tool.input_schema.params {
                    if spec.ty == ParamType::Path {
                        if let Some(path) = input.get(&spec.name).and_then(|v| v.as_str()) {
                            self.tracker.touch_file(session_id, &ctx.project_root, path);
                        }
                    }
                }
                return;
            }
        };

        for spec in &tool.input_schema.params {
            if spec.ty != ParamType::Path {
                continue;
            }
            let Some(path) = input.get(&spec.name).and_then(|v| v.as_str()) else {
                continue;
            };
            self.tracker.record_change(
                session_id,
                &ctx.project_root,
                path,
                change,
                &tool.name,
                None,
            );

            if let Some(store) = &self.store {
                let record = FileChangeRecord {
                    path: path.to_string(),
                    change,
                    tool: tool.name.clone(),
                    timestamp: Utc::now(),
                    details: None,
                };
                if let Err(e) = store.record_file_change(session_id, &record).await {
                    tracing::warn!(path, error = %e, "file-change log write failed");
                }
            }
        }
    }
}
