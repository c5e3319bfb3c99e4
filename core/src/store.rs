//! Session store
//!
//! Persists sessions, message history, plans, and the file-change log in
//! an embedded SQLite database under the user data directory. Writes are
//! synchronous within a request; on startup, plans left running by a
//! previous process are marked failed.

use std::path::Path;

use rusqlite::{params, Connection};
use tokio::sync::Mutex;
use tracing::info;

use crate::context::FileChangeRecord;
use crate::llm::types::{ContentBlock, Message, Role};
use crate::plan::{Plan, PlanStatus};

/// Store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("session not found: {0}")]
    SessionNotFound(String),
}

/// Persisted session row
#[derive(Debug, Clone, serde::Serialize)]
pub struct SessionRecord {
    pub id: String,
    pub project_root: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// SQLite-backed store; the connection lives behind an async mutex so
/// writes within one request stay serialized
pub struct SessionStore {
    conn: Mutex<Connection>,
}

impl SessionStore {
    /// Open (creating if needed) the database at `path`
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store for tests
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY NOT NULL,
                project_root TEXT NOT NULL,
                tool_permissions TEXT NOT NULL DEFAULT '{}',
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS messages (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_messages_session ON messages(session_id);
            CREATE TABLE IF NOT EXISTS plans (
                id TEXT PRIMARY KEY NOT NULL,
                session_id TEXT NOT NULL,
                status TEXT NOT NULL,
                body TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_plans_session ON plans(session_id);
            CREATE TABLE IF NOT EXISTS file_changes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                path TEXT NOT NULL,
                change TEXT NOT NULL,
                tool TEXT NOT NULL,
                details TEXT,
                created_at INTEGER NOT NULL,
                FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_file_changes_session ON file_changes(session_id);",
        )?;

        Self::recover_incomplete(conn)?;
        Ok(())
    }

    /// A plan still marked running or pending did not survive a restart;
    /// mark it (and its unfinished steps) failed, in both the status
    /// column and the serialized body
    fn recover_incomplete(conn: &Connection) -> Result<(), StoreError> {
        let incomplete: Vec<(String, String)> = {
            let mut stmt = conn.prepare(
                "SELECT id, body FROM plans WHERE status IN ('running', 'pending')",
            )?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        for (id, body) in &incomplete {
            let mut plan: serde_json::Value = serde_json::from_str(body)?;
            plan["status"] = serde_json::json!("failed");
            if let Some(steps) = plan["steps"].as_array_mut() {
                for step in steps {
                    if step["status"] == "running" || step["status"] == "pending" {
                        step["status"] = serde_json::json!("failed");
                        step["error"] = serde_json::json!("interrupted by restart");
                    }
                }
            }
            conn.execute(
                "UPDATE plans SET status = 'failed', body = ?1 WHERE id = ?2",
                params![serde_json::to_string(&plan)?, id],
            )?;
        }

        if !incomplete.is_empty() {
            info!(count = incomplete.len(), "marked incomplete plans failed on startup");
        }
        Ok(())
    }

    fn now() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    /// Create a session row
    pub async fn create_session(
        &self,
        id: &str,
        project_root: &str,
    ) -> Result<SessionRecord, StoreError> {
        let now = Self::now();
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO sessions (id, project_root, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?3)",
            params![id, project_root, now],
        )?;
        Ok(SessionRecord {
            id: id.to_string(),
            project_root: project_root.to_string(),
            created_at: now,
            updated_at: now,
        })
    }

    /// Load one session
    pub async fn get_session(&self, id: &str) -> Result<SessionRecord, StoreError> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT id, project_root, created_at, updated_at FROM sessions WHERE id = ?1",
            params![id],
            |row| {
                Ok(SessionRecord {
                    id: row.get(0)?,
                    project_root: row.get(1)?,
                    created_at: row.get(2)?,
                    updated_at: row.get(3)?,
                })
            },
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => StoreError::SessionNotFound(id.to_string()),
            other => StoreError::Database(other),
        })
    }

    /// All sessions, newest first
    pub async fn list_sessions(&self) -> Result<Vec<SessionRecord>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, project_root, created_at, updated_at FROM sessions
             ORDER BY created_at DESC",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(SessionRecord {
                    id: row.get(0)?,
                    project_root: row.get(1)?,
                    created_at: row.get(2)?,
                    updated_at: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Delete a session and everything it owns
    pub async fn delete_session(&self, id: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        // Cascades are not always enabled on old SQLite builds; delete
        // children explicitly
        conn.execute("DELETE FROM messages WHERE session_id = ?1", params![id])?;
        conn.execute("DELETE FROM plans WHERE session_id = ?1", params![id])?;
        conn.execute("DELETE FROM file_changes WHERE session_id = ?1", params![id])?;
        let removed = conn.execute("DELETE FROM sessions WHERE id = ?1", params![id])?;
        if removed == 0 {
            return Err(StoreError::SessionNotFound(id.to_string()));
        }
        Ok(())
    }

    /// Bump a session's updated_at
    pub async fn touch_session(&self, id: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE sessions SET updated_at = ?1 WHERE id = ?2",
            params![Self::now(), id],
        )?;
        Ok(())
    }

    /// Per-tool permission state for a session
    pub async fn tool_permissions(
        &self,
        id: &str,
    ) -> Result<std::collections::HashMap<String, bool>, StoreError> {
        let conn = self.conn.lock().await;
        let raw: String = conn
            .query_row(
                "SELECT tool_permissions FROM sessions WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::SessionNotFound(id.to_string()),
                other => StoreError::Database(other),
            })?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Grant or revoke one tool for a session
    pub async fn set_tool_permission(
        &self,
        id: &str,
        tool: &str,
        allowed: bool,
    ) -> Result<(), StoreError> {
        let mut permissions = self.tool_permissions(id).await?;
        permissions.insert(tool.to_string(), allowed);
        let raw = serde_json::to_string(&permissions)?;
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE sessions SET tool_permissions = ?1 WHERE id = ?2",
            params![raw, id],
        )?;
        Ok(())
    }

    /// Append one message to a session's ordered history
    pub async fn append_message(
        &self,
        session_id: &str,
        message: &Message,
    ) -> Result<i64, StoreError> {
        let content = serde_json::to_string(&message.content)?;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO messages (session_id, role, content, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![session_id, message.role.as_str(), content, Self::now()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Load a session's messages in append order
    pub async fn load_messages(&self, session_id: &str) -> Result<Vec<Message>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT role, content FROM messages WHERE session_id = ?1 ORDER BY seq ASC",
        )?;
        let rows = stmt
            .query_map(params![session_id], |row| {
                let role: String = row.get(0)?;
                let content: String = row.get(1)?;
                Ok((role, content))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut messages = Vec::with_capacity(rows.len());
        for (role, content) in rows {
            let role = match role.as_str() {
                "assistant" => Role::Assistant,
                _ => Role::User,
            };
            let content: Vec<ContentBlock> = serde_json::from_str(&content)?;
            messages.push(Message { role, content });
        }
        Ok(messages)
    }

    /// Insert or update a plan
    pub async fn save_plan(&self, plan: &Plan) -> Result<(), StoreError> {
        let body = serde_json::to_string(plan)?;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO plans (id, session_id, status, body, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET status = ?3, body = ?4",
            params![
                plan.id,
                plan.session_id,
                plan.status.as_str(),
                body,
                plan.created_at.timestamp_millis()
            ],
        )?;
        Ok(())
    }

    /// Load one plan
    pub async fn load_plan(&self, plan_id: &str) -> Result<Option<Plan>, StoreError> {
        let conn = self.conn.lock().await;
        let body: Option<String> = conn
            .query_row(
                "SELECT body FROM plans WHERE id = ?1",
                params![plan_id],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        match body {
            Some(body) => Ok(Some(serde_json::from_str(&body)?)),
            None => Ok(None),
        }
    }

    /// All plans of a session, newest first
    pub async fn list_plans(&self, session_id: &str) -> Result<Vec<Plan>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT body FROM plans WHERE session_id = ?1 ORDER BY created_at DESC",
        )?;
        let bodies = stmt
            .query_map(params![session_id], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        let mut plans = Vec::with_capacity(bodies.len());
        for body in bodies {
            plans.push(serde_json::from_str(&body)?);
        }
        Ok(plans)
    }

    /// Plans stuck in a non-terminal status (startup recovery check)
    pub async fn incomplete_plan_count(&self) -> Result<i64, StoreError> {
        let conn = self.conn.lock().await;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM plans WHERE status IN ('running', 'pending')",
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Append to the file-change log
    pub async fn record_file_change(
        &self,
        session_id: &str,
        record: &FileChangeRecord,
    ) -> Result<(), StoreError> {
        let change = serde_json::to_string(&record.change)?;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO file_changes (session_id, path, change, tool, details, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                session_id,
                record.path,
                change.trim_matches('"'),
                record.tool,
                record.details,
                record.timestamp.timestamp_millis()
            ],
        )?;
        Ok(())
    }

    /// File-change log for a session, oldest first
    pub async fn load_file_changes(
        &self,
        session_id: &str,
    ) -> Result<Vec<(String, String, String)>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT path, change, tool FROM file_changes
             WHERE session_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map(params![session_id], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{PlanOptions, Step, StepStatus};
    use crate::tool::value::ToolInput;

    async fn store() -> SessionStore {
        SessionStore::in_memory().unwrap()
    }

    fn sample_plan(session_id: &str, status: PlanStatus) -> Plan {
        Plan {
            id: uuid::Uuid::new_v4().to_string(),
            description: "sample".to_string(),
            session_id: session_id.to_string(),
            steps: vec![Step {
                id: "a".to_string(),
                description: String::new(),
                tool: "read_file".to_string(),
                input: ToolInput::new(),
                depends_on: vec![],
                status: StepStatus::Pending,
                retry_count: 0,
                retryable: true,
                started_at: None,
                finished_at: None,
                output: None,
                error: None,
            }],
            status,
            checkpoints: vec![],
            git_operations: vec![],
            logs: vec![],
            options: PlanOptions::default(),
            created_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let store = store().await;
        store.create_session("s1", "/project").await.unwrap();

        let loaded = store.get_session("s1").await.unwrap();
        assert_eq!(loaded.project_root, "/project");

        assert_eq!(store.list_sessions().await.unwrap().len(), 1);

        store.delete_session("s1").await.unwrap();
        assert!(matches!(
            store.get_session("s1").await,
            Err(StoreError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_message_order_and_content_preserved() {
        let store = store().await;
        store.create_session("s1", "/p").await.unwrap();

        store
            .append_message("s1", &Message::user("first"))
            .await
            .unwrap();
        store
            .append_message("s1", &Message::assistant("second"))
            .await
            .unwrap();
        store
            .append_message("s1", &Message::user("third"))
            .await
            .unwrap();

        let messages = store.load_messages("s1").await.unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].text(), "first");
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[2].text(), "third");
    }

    #[tokio::test]
    async fn test_tool_blocks_round_trip() {
        let store = store().await;
        store.create_session("s1", "/p").await.unwrap();

        let message = Message {
            role: Role::Assistant,
            content: vec![ContentBlock::ToolUse {
                id: "t1".to_string(),
                name: "read_file".to_string(),
                input: serde_json::json!({"path": "x.rs"}),
            }],
        };
        store.append_message("s1", &message).await.unwrap();

        let loaded = store.load_messages("s1").await.unwrap();
        assert_eq!(loaded[0].tool_uses().len(), 1);
        assert_eq!(loaded[0].tool_uses()[0].name, "read_file");
    }

    #[tokio::test]
    async fn test_plan_save_and_load() {
        let store = store().await;
        store.create_session("s1", "/p").await.unwrap();

        let plan = sample_plan("s1", PlanStatus::Complete);
        store.save_plan(&plan).await.unwrap();

        let loaded = store.load_plan(&plan.id).await.unwrap().unwrap();
        assert_eq!(loaded.id, plan.id);
        assert_eq!(loaded.status, PlanStatus::Complete);
        assert_eq!(loaded.steps.len(), 1);

        assert!(store.load_plan("nope").await.unwrap().is_none());
        assert_eq!(store.list_plans("s1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_session_cascades() {
        let store = store().await;
        store.create_session("s1", "/p").await.unwrap();
        store
            .append_message("s1", &Message::user("hello"))
            .await
            .unwrap();
        store
            .save_plan(&sample_plan("s1", PlanStatus::Complete))
            .await
            .unwrap();

        store.delete_session("s1").await.unwrap();
        assert!(store.load_messages("s1").await.unwrap().is_empty());
        assert!(store.list_plans("s1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_tool_permissions_round_trip() {
        let store = store().await;
        store.create_session("s1", "/p").await.unwrap();

        assert!(store.tool_permissions("s1").await.unwrap().is_empty());

        store.set_tool_permission("s1", "shell_command", true).await.unwrap();
        store.set_tool_permission("s1", "remove_path", false).await.unwrap();

        let permissions = store.tool_permissions("s1").await.unwrap();
        assert_eq!(permissions.get("shell_command"), Some(&true));
        assert_eq!(permissions.get("remove_path"), Some(&false));
    }

    #[tokio::test]
    async fn test_file_change_log() {
        let store = store().await;
        store.create_session("s1", "/p").await.unwrap();

        let record = FileChangeRecord {
            path: "src/a.rs".to_string(),
            change: crate::events::ChangeKind::Modify,
            tool: "edit_file".to_string(),
            timestamp: chrono::Utc::now(),
            details: None,
        };
        store.record_file_change("s1", &record).await.unwrap();

        let changes = store.load_file_changes("s1").await.unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].0, "src/a.rs");
        assert_eq!(changes[0].1, "modify");
    }
}
