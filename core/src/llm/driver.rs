//! Conversation driver
//!
//! Runs one user turn: sends the history with the registry's tool schemas
//! to the model, executes every tool_use block it returns, feeds the
//! results back, and loops until the model answers without tools or the
//! iteration cap trips.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::ClassifiedError;
use crate::events::{Broadcaster, ProgressEvent};
use crate::retry::{retry, RetryError, RetryPolicy};
use crate::tool::definition::{ToolContext, ToolResult};
use crate::tool::registry::ToolRegistry;

use super::client::ModelClient;
use super::types::{Message, MessagesRequest, MessagesResponse, Role};

/// Hard cap on model round-trips within a single user turn
pub const MAX_ITERATIONS: u32 = 32;

/// The system prompt sent verbatim with every request
pub const SYSTEM_PROMPT: &str = "You are RCode, a coding assistant operating inside the user's \
project. Use the provided tools to read, search, and modify files instead of guessing. Make \
the smallest change that satisfies the request, and describe what you changed when you finish.";

/// Driver configuration
#[derive(Debug, Clone)]
pub struct DriverOptions {
    /// Model identifier
    pub model: String,
    /// Maximum output tokens per request
    pub max_tokens: u32,
    /// Stream responses and forward partial text to subscribers
    pub streaming: bool,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-20250514".to_string(),
            max_tokens: 4096,
            streaming: false,
        }
    }
}

/// Summary of one tool invocation within a turn
#[derive(Debug, Clone, serde::Serialize)]
pub struct ToolSummary {
    pub tool: String,
    pub tool_use_id: String,
    pub success: bool,
}

/// Everything a finished turn produced
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    /// Messages to append to the session history, in order
    pub messages: Vec<Message>,
    /// Final assistant text
    pub final_text: String,
    /// Tools invoked along the way
    pub tool_summaries: Vec<ToolSummary>,
    /// Model round-trips used
    pub iterations: u32,
}

/// Conversation loop with the model endpoint
pub struct ConversationDriver {
    client: Arc<dyn ModelClient>,
    registry: Arc<ToolRegistry>,
    broadcaster: Arc<Broadcaster>,
    options: DriverOptions,
}

impl ConversationDriver {
    /// New driver over a model client and tool registry
    pub fn new(
        client: Arc<dyn ModelClient>,
        registry: Arc<ToolRegistry>,
        broadcaster: Arc<Broadcaster>,
        options: DriverOptions,
    ) -> Self {
        Self {
            client,
            registry,
            broadcaster,
            options,
        }
    }

    /// Run one user turn against the session history
    ///
    /// `history` is the persisted conversation so far; the returned
    /// outcome carries the new messages (the user message included) for
    /// the caller to persist.
    pub async fn run_turn(
        &self,
        session_id: &str,
        project_root: &std::path::Path,
        history: &[Message],
        user_text: &str,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, ClassifiedError> {
        let mut messages: Vec<Message> = history.to_vec();
        let mut appended: Vec<Message> = Vec::new();
        let mut tool_summaries = Vec::new();

        let user_message = Message::user(user_text);
        self.publish_appended(session_id, Role::User, None);
        messages.push(user_message.clone());
        appended.push(user_message);

        let mut iterations = 0u32;
        let final_text = loop {
            if iterations >= MAX_ITERATIONS {
                warn!(session = session_id, "turn hit the iteration cap");
                let terminal = Message::assistant(
                    "Stopping: this request exceeded the tool-use iteration limit.",
                );
                self.publish_appended(session_id, Role::Assistant, None);
                let text = terminal.text();
                messages.push(terminal.clone());
                appended.push(terminal);
                break text;
            }
            iterations += 1;

            let response = self.exchange(session_id, &messages, cancel).await?;
            let assistant = response.into_message();
            let has_tools = !assistant.tool_uses().is_empty();
            self.publish_appended(session_id, Role::Assistant, None);
            messages.push(assistant.clone());
            appended.push(assistant.clone());

            if !has_tools {
                break assistant.text();
            }

            // Tool-use blocks within one assistant message run
            // sequentially in their declared order
            let mut results: Vec<ToolResult> = Vec::new();
            for tool_use in assistant.tool_uses() {
                let ctx = ToolContext::new(Some(session_id.to_string()), project_root)
                    .with_cancel(cancel.clone());
                let result = self.registry.execute(&tool_use, &ctx).await;
                tool_summaries.push(ToolSummary {
                    tool: tool_use.name.clone(),
                    tool_use_id: tool_use.id.clone(),
                    success: !result.is_error,
                });
                results.push(result);
            }

            let results_message = Message::tool_results(results);
            self.publish_appended(session_id, Role::User, None);
            messages.push(results_message.clone());
            appended.push(results_message);
        };

        info!(
            session = session_id,
            iterations,
            tools = tool_summaries.len(),
            "turn complete"
        );

        Ok(TurnOutcome {
            messages: appended,
            final_text,
            tool_summaries,
            iterations,
        })
    }

    /// One request/response exchange under the overload retry policy
    async fn exchange(
        &self,
        session_id: &str,
        messages: &[Message],
        cancel: &CancellationToken,
    ) -> Result<MessagesResponse, ClassifiedError> {
        let request = MessagesRequest {
            model: self.options.model.clone(),
            max_tokens: self.options.max_tokens,
            system: Some(SYSTEM_PROMPT.to_string()),
            messages: messages.to_vec(),
            tools: self
                .registry
                .definitions()
                .iter()
                .map(|d| d.to_model_schema())
                .collect(),
            stream: None,
        };

        let policy = RetryPolicy::llm_overload();
        let outcome = retry(&policy, cancel, || async {
            if self.options.streaming {
                let broadcaster = self.broadcaster.clone();
                let session = session_id.to_string();
                let on_text = move |text: &str| {
                    let seq = broadcaster.next_seq(&session);
                    broadcaster.publish(ProgressEvent::MessageAppended {
                        session_id: session.clone(),
                        seq,
                        role: Role::Assistant.as_str().to_string(),
                        delta: Some(text.to_string()),
                    });
                };
                self.client.stream(&request, &on_text).await
            } else {
                self.client.complete(&request).await
            }
        })
        .await;

        outcome.map_err(|err| match err {
            RetryError::Cancelled => ClassifiedError::permanent("turn cancelled"),
            other => other
                .classified()
                .cloned()
                .unwrap_or_else(|| ClassifiedError::permanent(other.to_string())),
        })
    }

    fn publish_appended(&self, session_id: &str, role: Role, delta: Option<String>) {
        let seq = self.broadcaster.next_seq(session_id);
        self.broadcaster.publish(ProgressEvent::MessageAppended {
            session_id: session_id.to_string(),
            seq,
            role: role.as_str().to_string(),
            delta,
        });
    }
}
