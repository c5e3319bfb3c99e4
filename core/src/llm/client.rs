//! Model endpoint client
//!
//! Speaks the provider's messages protocol over HTTP: single-turn
//! completion and the streaming SSE variant. Transport failures and
//! status codes come back pre-classified so the driver's retry policy can
//! act on them directly.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tracing::{debug, warn};

use crate::error::{classify_http_status, ClassifiedError, ErrorCategory};

use super::auth::AuthProvider;
use super::types::{ContentBlock, MessagesRequest, MessagesResponse};

/// Request timeout for non-streaming completions
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Idle timeout between streaming chunks
pub const STREAM_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Sink receiving partial text as a stream arrives
pub type TextSink<'a> = &'a (dyn Fn(&str) + Send + Sync);

/// Exchange with an external model endpoint
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Single-turn request
    async fn complete(&self, request: &MessagesRequest)
        -> Result<MessagesResponse, ClassifiedError>;

    /// Streaming request; `on_text` observes text deltas as they arrive
    async fn stream(
        &self,
        request: &MessagesRequest,
        on_text: TextSink<'_>,
    ) -> Result<MessagesResponse, ClassifiedError>;
}

/// HTTP client for the provider's `/v1/messages` endpoint
pub struct AnthropicClient {
    http: reqwest::Client,
    endpoint: String,
    auth: Arc<dyn AuthProvider>,
}

impl AnthropicClient {
    /// New client against `endpoint` (no trailing slash)
    pub fn new(endpoint: impl Into<String>, auth: Arc<dyn AuthProvider>) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
            endpoint: endpoint.into(),
            auth,
        }
    }

    fn url(&self) -> String {
        format!("{}/v1/messages", self.endpoint.trim_end_matches('/'))
    }

    async fn send_once(
        &self,
        body: &serde_json::Value,
        token: &str,
        streaming: bool,
    ) -> Result<reqwest::Response, ClassifiedError> {
        let mut builder = self
            .http
            .post(self.url())
            .header("Authorization", format!("Bearer {token}"))
            .header("anthropic-beta", "oauth-2025-04-20")
            .header("Content-Type", "application/json")
            .json(body);
        if streaming {
            // Let the idle timeout govern streams instead of the total
            // request timeout
            builder = builder.timeout(Duration::from_secs(24 * 3600));
        }

        let response = builder.send().await.map_err(|e| {
            let category = if e.is_timeout() || e.is_connect() {
                ErrorCategory::Retryable
            } else {
                ErrorCategory::Permanent
            };
            ClassifiedError {
                message: format!("model request failed: {e}"),
                category,
            }
        })?;

        let status = response.status().as_u16();
        if status >= 400 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            let category = classify_http_status(status, retry_after);
            let body = response.text().await.unwrap_or_default();
            warn!(status, "model endpoint returned error");
            return Err(ClassifiedError {
                message: format!("model endpoint returned {status}: {body}"),
                category,
            });
        }

        Ok(response)
    }

    /// Send with a single token-refresh retry on 401
    async fn send_with_auth(
        &self,
        body: &serde_json::Value,
        streaming: bool,
    ) -> Result<reqwest::Response, ClassifiedError> {
        let token = self.auth.bearer().await?;
        match self.send_once(body, &token, streaming).await {
            Err(err) if err.message.contains("401") => {
                debug!("bearer token rejected, refreshing once");
                let fresh = self.auth.refresh().await?;
                self.send_once(body, &fresh, streaming).await
            }
            other => other,
        }
    }
}

#[async_trait]
impl ModelClient for AnthropicClient {
    async fn complete(
        &self,
        request: &MessagesRequest,
    ) -> Result<MessagesResponse, ClassifiedError> {
        let body = serde_json::to_value(request)
            .map_err(|e| ClassifiedError::permanent(format!("request serialization: {e}")))?;

        let response = self.send_with_auth(&body, false).await?;
        response
            .json::<MessagesResponse>()
            .await
            .map_err(|e| ClassifiedError::permanent(format!("response parse: {e}")))
    }

    async fn stream(
        &self,
        request: &MessagesRequest,
        on_text: TextSink<'_>,
    ) -> Result<MessagesResponse, ClassifiedError> {
        let mut streaming_request = request.clone();
        streaming_request.stream = Some(true);
        let body = serde_json::to_value(&streaming_request)
            .map_err(|e| ClassifiedError::permanent(format!("request serialization: {e}")))?;

        let response = self.send_with_auth(&body, true).await?;
        let mut accumulator = BlockAccumulator::new();
        let mut stream = response.bytes_stream();
        let mut buffer = String::new();

        loop {
            let chunk = match tokio::time::timeout(STREAM_IDLE_TIMEOUT, stream.next()).await {
                Err(_) => {
                    return Err(ClassifiedError::retryable("stream idle timeout"));
                }
                Ok(None) => break,
                Ok(Some(Err(e))) => {
                    return Err(ClassifiedError::retryable(format!("stream read: {e}")));
                }
                Ok(Some(Ok(bytes))) => bytes,
            };

            buffer.push_str(&String::from_utf8_lossy(&chunk));
            while let Some(newline) = buffer.find('\n') {
                let line = buffer[..newline].trim_end_matches('\r').to_string();
                buffer.drain(..=newline);
                if let Some(text) = accumulator.feed_line(&line)? {
                    on_text(&text);
                }
            }
        }

        Ok(accumulator.finish())
    }
}

/// One partially accumulated content block
enum PartialBlock {
    Text(String),
    ToolUse {
        id: String,
        name: String,
        json: String,
    },
}

/// Assembles SSE delta events into structured content blocks
pub struct BlockAccumulator {
    blocks: Vec<PartialBlock>,
    stopped: bool,
}

impl BlockAccumulator {
    pub fn new() -> Self {
        Self {
            blocks: Vec::new(),
            stopped: false,
        }
    }

    /// Feed one SSE line; returns text to forward when the line carried a
    /// text delta
    pub fn feed_line(&mut self, line: &str) -> Result<Option<String>, ClassifiedError> {
        let Some(data) = line.strip_prefix("data:").map(str::trim) else {
            return Ok(None);
        };
        if data.is_empty() || data == "[DONE]" {
            return Ok(None);
        }

        let event: serde_json::Value = serde_json::from_str(data)
            .map_err(|e| ClassifiedError::permanent(format!("malformed stream event: {e}")))?;

        match event["type"].as_str().unwrap_or_default() {
            "content_block_start" => {
                let index = event["index"].as_u64().unwrap_or(self.blocks.len() as u64) as usize;
                let block = &event["content_block"];
                let partial = match block["type"].as_str().unwrap_or("text") {
                    "tool_use" => PartialBlock::ToolUse {
                        id: block["id"].as_str().unwrap_or_default().to_string(),
                        name: block["name"].as_str().unwrap_or_default().to_string(),
                        json: String::new(),
                    },
                    _ => PartialBlock::Text(
                        block["text"].as_str().unwrap_or_default().to_string(),
                    ),
                };
                if index >= self.blocks.len() {
                    self.blocks.push(partial);
                } else {
                    self.blocks[index] = partial;
                }
                Ok(None)
            }
            "content_block_delta" => {
                let index = event["index"].as_u64().unwrap_or_default() as usize;
                let delta = &event["delta"];
                let Some(block) = self.blocks.get_mut(index) else {
                    return Ok(None);
                };
                match delta["type"].as_str().unwrap_or_default() {
                    "text_delta" => {
                        let text = delta["text"].as_str().unwrap_or_default().to_string();
                        if let PartialBlock::Text(existing) = block {
                            existing.push_str(&text);
                        }
                        Ok(Some(text))
                    }
                    "input_json_delta" => {
                        if let PartialBlock::ToolUse { json, .. } = block {
                            json.push_str(delta["partial_json"].as_str().unwrap_or_default());
                        }
                        Ok(None)
                    }
                    _ => Ok(None),
                }
            }
            "message_stop" => {
                self.stopped = true;
                Ok(None)
            }
            _ => Ok(None),
        }
    }

    /// Final structured response
    pub fn finish(self) -> MessagesResponse {
        let content = self
            .blocks
            .into_iter()
            .map(|block| match block {
                PartialBlock::Text(text) => ContentBlock::Text { text },
                PartialBlock::ToolUse { id, name, json } => {
                    let input = if json.is_empty() {
                        serde_json::json!({})
                    } else {
                        serde_json::from_str(&json).unwrap_or(serde_json::json!({}))
                    };
                    ContentBlock::ToolUse { id, name, input }
                }
            })
            .collect();
        MessagesResponse {
            content,
            stop_reason: None,
        }
    }
}

impl Default for BlockAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accumulates_text_deltas() {
        let mut acc = BlockAccumulator::new();
        acc.feed_line(r#"data: {"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}"#).unwrap();
        let t1 = acc
            .feed_line(r#"data: {"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hel"}}"#)
            .unwrap();
        let t2 = acc
            .feed_line(r#"data: {"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"lo"}}"#)
            .unwrap();
        acc.feed_line(r#"data: {"type":"message_stop"}"#).unwrap();

        assert_eq!(t1.as_deref(), Some("Hel"));
        assert_eq!(t2.as_deref(), Some("lo"));

        let response = acc.finish();
        assert_eq!(response.content.len(), 1);
        assert_eq!(response.content[0].as_text(), Some("Hello"));
    }

    #[test]
    fn test_accumulates_tool_use_json() {
        let mut acc = BlockAccumulator::new();
        acc.feed_line(r#"data: {"type":"content_block_start","index":0,"content_block":{"type":"tool_use","id":"tu_9","name":"read_file"}}"#).unwrap();
        acc.feed_line(r#"data: {"type":"content_block_delta","index":0,"delta":{"type":"input_json_delta","partial_json":"{\"path\":"}}"#).unwrap();
        acc.feed_line(r#"data: {"type":"content_block_delta","index":0,"delta":{"type":"input_json_delta","partial_json":"\"main.go\"}"}}"#).unwrap();
        acc.feed_line(r#"data: {"type":"message_stop"}"#).unwrap();

        let response = acc.finish();
        assert!(response.has_tool_use());
        match &response.content[0] {
            ContentBlock::ToolUse { id, name, input } => {
                assert_eq!(id, "tu_9");
                assert_eq!(name, "read_file");
                assert_eq!(input["path"], "main.go");
            }
            other => panic!("unexpected block {other:?}"),
        }
    }

    #[test]
    fn test_ignores_non_data_lines() {
        let mut acc = BlockAccumulator::new();
        assert!(acc.feed_line("event: content_block_start").unwrap().is_none());
        assert!(acc.feed_line("").unwrap().is_none());
        assert!(acc.feed_line("data: [DONE]").unwrap().is_none());
    }

    #[test]
    fn test_malformed_event_is_permanent() {
        let mut acc = BlockAccumulator::new();
        let err = acc.feed_line("data: {not json").unwrap_err();
        assert_eq!(err.category, ErrorCategory::Permanent);
    }

    #[test]
    fn test_mixed_text_and_tool_use() {
        let mut acc = BlockAccumulator::new();
        acc.feed_line(r#"data: {"type":"content_block_start","index":0,"content_block":{"type":"text","text":"I'll read it."}}"#).unwrap();
        acc.feed_line(r#"data: {"type":"content_block_start","index":1,"content_block":{"type":"tool_use","id":"t1","name":"read_file"}}"#).unwrap();
        acc.feed_line(r#"data: {"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"{}"}}"#).unwrap();

        let response = acc.finish();
        assert_eq!(response.content.len(), 2);
        assert_eq!(response.content[0].as_text(), Some("I'll read it."));
        assert!(response.has_tool_use());
    }
}
