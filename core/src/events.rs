//! Progress events and the per-session broadcaster
//!
//! Every tool invocation, file change, and plan transition is published as
//! a typed event to all UI subscribers of the session. Publish never
//! blocks: each subscriber holds a bounded buffer and a slow consumer
//! loses only the oldest events beyond it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

/// Per-subscriber buffer size; a consumer further behind than this loses
/// the oldest events
pub const SUBSCRIBER_BUFFER: usize = 64;

/// Heartbeat cadence for idle connections
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Kind of a recorded file change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Create,
    Modify,
    Delete,
    Rename,
}

/// A typed, per-session notification broadcast to UI subscribers
///
/// The `type` tag matches the SSE event name on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ProgressEvent {
    SessionCreated {
        session_id: String,
        seq: u64,
    },
    MessageAppended {
        session_id: String,
        seq: u64,
        role: String,
        /// Partial streaming text, when the message is still accumulating
        #[serde(skip_serializing_if = "Option::is_none")]
        delta: Option<String>,
    },
    ToolExecutionStart {
        session_id: String,
        seq: u64,
        execution_id: String,
        tool: String,
    },
    ToolExecutionProgress {
        session_id: String,
        seq: u64,
        execution_id: String,
        tool: String,
        message: String,
    },
    ToolExecutionComplete {
        session_id: String,
        seq: u64,
        execution_id: String,
        tool: String,
        success: bool,
        /// Short reason suitable for UI display, on failure
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        duration_ms: u64,
    },
    FileChanged {
        session_id: String,
        seq: u64,
        path: String,
        change: ChangeKind,
        tool: String,
    },
    FileTreeUpdated {
        session_id: String,
        seq: u64,
    },
    DiffAvailable {
        session_id: String,
        seq: u64,
        diff_id: String,
        path: String,
        added: usize,
        deleted: usize,
        tool: String,
    },
    PlanStepStatus {
        session_id: String,
        seq: u64,
        plan_id: String,
        step_id: String,
        status: String,
    },
    ConnectionHeartbeat {
        session_id: String,
        timestamp: DateTime<Utc>,
    },
}

impl ProgressEvent {
    /// Session the event belongs to
    pub fn session_id(&self) -> &str {
        match self {
            ProgressEvent::SessionCreated { session_id, .. }
            | ProgressEvent::MessageAppended { session_id, .. }
            | ProgressEvent::ToolExecutionStart { session_id, .. }
            | ProgressEvent::ToolExecutionProgress { session_id, .. }
            | ProgressEvent::ToolExecutionComplete { session_id, .. }
            | ProgressEvent::FileChanged { session_id, .. }
            | ProgressEvent::FileTreeUpdated { session_id, .. }
            | ProgressEvent::DiffAvailable { session_id, .. }
            | ProgressEvent::PlanStepStatus { session_id, .. }
            | ProgressEvent::ConnectionHeartbeat { session_id, .. } => session_id,
        }
    }

    /// SSE event name for the wire
    pub fn event_type(&self) -> &'static str {
        match self {
            ProgressEvent::SessionCreated { .. } => "session-created",
            ProgressEvent::MessageAppended { .. } => "message-appended",
            ProgressEvent::ToolExecutionStart { .. } => "tool-execution-start",
            ProgressEvent::ToolExecutionProgress { .. } => "tool-execution-progress",
            ProgressEvent::ToolExecutionComplete { .. } => "tool-execution-complete",
            ProgressEvent::FileChanged { .. } => "file-changed",
            ProgressEvent::FileTreeUpdated { .. } => "file-tree-updated",
            ProgressEvent::DiffAvailable { .. } => "diff-available",
            ProgressEvent::PlanStepStatus { .. } => "plan-step-status",
            ProgressEvent::ConnectionHeartbeat { .. } => "connection-heartbeat",
        }
    }
}

struct Topic {
    sender: broadcast::Sender<ProgressEvent>,
    seq: Arc<AtomicU64>,
    heartbeat: tokio::task::JoinHandle<()>,
}

impl Drop for Topic {
    fn drop(&mut self) {
        self.heartbeat.abort();
    }
}

/// Per-session pub/sub fan-out, non-blocking with bounded per-subscriber
/// queues
pub struct Broadcaster {
    topics: DashMap<String, Topic>,
}

impl Broadcaster {
    /// New broadcaster with no topics
    pub fn new() -> Self {
        Self {
            topics: DashMap::new(),
        }
    }

    /// Next sequence number for a session
    pub fn next_seq(&self, session_id: &str) -> u64 {
        self.topic_seq(session_id).fetch_add(1, Ordering::SeqCst)
    }

    fn topic_seq(&self, session_id: &str) -> Arc<AtomicU64> {
        self.ensure_topic(session_id);
        self.topics
            .get(session_id)
            .map(|t| t.seq.clone())
            .unwrap_or_else(|| Arc::new(AtomicU64::new(0)))
    }

    fn ensure_topic(&self, session_id: &str) {
        if self.topics.contains_key(session_id) {
            return;
        }
        let (sender, _) = broadcast::channel(SUBSCRIBER_BUFFER);
        let heartbeat_sender = sender.clone();
        let session = session_id.to_string();
        let heartbeat = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick fires immediately; skip it so idle connections get
            // their first heartbeat after one interval
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let _ = heartbeat_sender.send(ProgressEvent::ConnectionHeartbeat {
                    session_id: session.clone(),
                    timestamp: Utc::now(),
                });
            }
        });
        self.topics.entry(session_id.to_string()).or_insert(Topic {
            sender,
            seq: Arc::new(AtomicU64::new(0)),
            heartbeat,
        });
    }

    /// Publish an event to all subscribers of its session
    ///
    /// Never blocks; a send with no subscribers is dropped silently.
    pub fn publish(&self, event: ProgressEvent) {
        self.ensure_topic(event.session_id());
        if let Some(topic) = self.topics.get(event.session_id()) {
            let receivers = topic.sender.receiver_count();
            if receivers > 0 {
                debug!(
                    session = event.session_id(),
                    event = event.event_type(),
                    receivers,
                    "publish"
                );
            }
            let _ = topic.sender.send(event);
        }
    }

    /// Subscribe to a session's events
    ///
    /// The returned receiver starts fresh: no replay of earlier events.
    pub fn subscribe(&self, session_id: &str) -> broadcast::Receiver<ProgressEvent> {
        self.ensure_topic(session_id);
        match self.topics.get(session_id) {
            Some(topic) => topic.sender.subscribe(),
            // The topic raced a remove_session; hand back a receiver on a
            // channel nobody publishes to
            None => broadcast::channel(SUBSCRIBER_BUFFER).1,
        }
    }

    /// Current subscriber count for a session
    pub fn subscriber_count(&self, session_id: &str) -> usize {
        self.topics
            .get(session_id)
            .map(|t| t.sender.receiver_count())
            .unwrap_or(0)
    }

    /// Tear down a session's topic, disconnecting its subscribers
    pub fn remove_session(&self, session_id: &str) {
        self.topics.remove(session_id);
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}
