//! Scripted model client for tests
//!
//! Plays back a queue of canned outcomes and records every request it
//! received, so conversation-loop tests run without a network.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::ClassifiedError;

use super::client::{ModelClient, TextSink};
use super::types::{ContentBlock, MessagesRequest, MessagesResponse};

/// One scripted outcome
pub type ScriptedResult = Result<MessagesResponse, ClassifiedError>;

/// Queue-backed model client
pub struct StubModelClient {
    script: Mutex<Vec<ScriptedResult>>,
    requests: Mutex<Vec<MessagesRequest>>,
}

impl StubModelClient {
    /// Client that will play `script` front to back
    pub fn new(script: Vec<ScriptedResult>) -> Self {
        let mut script = script;
        script.reverse();
        Self {
            script: Mutex::new(script),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Convenience: a single plain-text response
    pub fn text_once(text: impl Into<String>) -> Self {
        Self::new(vec![Ok(text_response(text))])
    }

    /// Requests observed so far
    pub fn requests(&self) -> Vec<MessagesRequest> {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Number of scripted responses not yet consumed
    pub fn remaining(&self) -> usize {
        self.script.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn next(&self, request: &MessagesRequest) -> ScriptedResult {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.clone());
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop()
            .unwrap_or_else(|| {
                Err(ClassifiedError::permanent(
                    "stub model client: script exhausted",
                ))
            })
    }
}

#[async_trait]
impl ModelClient for StubModelClient {
    async fn complete(
        &self,
        request: &MessagesRequest,
    ) -> Result<MessagesResponse, ClassifiedError> {
        self.next(request)
    }

    async fn stream(
        &self,
        request: &MessagesRequest,
        on_text: TextSink<'_>,
    ) -> Result<MessagesResponse, ClassifiedError> {
        let response = self.next(request)?;
        for block in &response.content {
            if let Some(text) = block.as_text() {
                on_text(text);
            }
        }
        Ok(response)
    }
}

/// Response with a single text block
pub fn text_response(text: impl Into<String>) -> MessagesResponse {
    MessagesResponse {
        content: vec![ContentBlock::Text { text: text.into() }],
        stop_reason: Some("end_turn".to_string()),
    }
}

/// Response requesting a tool call, optionally preceded by text
pub fn tool_use_response(
    text: Option<&str>,
    id: &str,
    name: &str,
    input: serde_json::Value,
) -> MessagesResponse {
    let mut content = Vec::new();
    if let Some(t) = text {
        content.push(ContentBlock::Text {
            text: t.to_string(),
        });
    }
    content.push(ContentBlock::ToolUse {
        id: id.to_string(),
        name: name.to_string(),
        input,
    });
    MessagesResponse {
        content,
        stop_reason: Some("tool_use".to_string()),
    }
}
