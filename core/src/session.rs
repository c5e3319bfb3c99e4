//! Sessions
//!
//! A session is the durable container for one ongoing conversation and
//! its derived plans. Message handlers for the same session run serially
//! behind a per-session mutex; unrelated sessions never contend.

use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::ClassifiedError;
use crate::events::{Broadcaster, ProgressEvent};
use crate::store::{SessionRecord, SessionStore, StoreError};

/// Session manager: creation, lookup, per-session serialization
pub struct SessionManager {
    store: Arc<SessionStore>,
    broadcaster: Arc<Broadcaster>,
    locks: DashMap<String, Arc<Mutex<()>>>,
    default_root: PathBuf,
}

impl SessionManager {
    /// New manager over the persistent store
    pub fn new(
        store: Arc<SessionStore>,
        broadcaster: Arc<Broadcaster>,
        default_root: PathBuf,
    ) -> Self {
        Self {
            store,
            broadcaster,
            locks: DashMap::new(),
            default_root,
        }
    }

    /// Create a session, optionally pinning a project root
    pub async fn create(&self, project_root: Option<String>) -> Result<SessionRecord, StoreError> {
        let id = Uuid::new_v4().to_string();
        let root = project_root.unwrap_or_else(|| self.default_root.to_string_lossy().into_owned());
        let record = self.store.create_session(&id, &root).await?;

        let seq = self.broadcaster.next_seq(&id);
        self.broadcaster.publish(ProgressEvent::SessionCreated {
            session_id: id,
            seq,
        });
        Ok(record)
    }

    /// Load a session
    pub async fn get(&self, id: &str) -> Result<SessionRecord, StoreError> {
        self.store.get_session(id).await
    }

    /// All sessions
    pub async fn list(&self) -> Result<Vec<SessionRecord>, StoreError> {
        self.store.list_sessions().await
    }

    /// Delete a session and drop its serialization lock
    pub async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.store.delete_session(id).await?;
        self.locks.remove(id);
        self.broadcaster.remove_session(id);
        Ok(())
    }

    /// The per-session mutex serializing message handlers
    pub fn lock_for(&self, id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Project root of a session as a path
    pub async fn project_root(&self, id: &str) -> Result<PathBuf, ClassifiedError> {
        let record = self
            .get(id)
            .await
            .map_err(|e| ClassifiedError::permanent(e.to_string()))?;
        Ok(PathBuf::from(record.project_root))
    }
}
