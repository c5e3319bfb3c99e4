//! Web tools — HTTP fetch

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use rcode_core::error::{classify_http_status, ClassifiedError, ErrorCategory};
use rcode_core::tool::definition::{Tool, ToolCapabilities, ToolContext, ToolDefinition};
use rcode_core::tool::schema::{InputSchema, ParamSpec, ParamType};
use rcode_core::tool::value::ToolInput;

/// Default fetch timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: i64 = 30;

/// Response bodies beyond this many characters are truncated
const MAX_BODY_CHARS: usize = 100_000;

/// Fetch a URL and return the response body
pub struct WebFetchTool {
    http: reqwest::Client,
}

impl WebFetchTool {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }
}

impl Default for WebFetchTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for WebFetchTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "web_fetch",
            "Fetch a URL over HTTP and return the body",
            InputSchema::new()
                .with_param(
                    ParamSpec::new("url", ParamType::String, true, "URL to fetch")
                        .with_pattern("^https?://"),
                )
                .with_param(
                    ParamSpec::new(
                        "timeout_secs",
                        ParamType::Integer,
                        false,
                        "Timeout in seconds",
                    )
                    .with_range(1, 120),
                ),
        )
    }

    fn capabilities(&self) -> ToolCapabilities {
        ToolCapabilities::network()
    }

    async fn execute(
        &self,
        input: ToolInput,
        _ctx: &ToolContext,
    ) -> Result<String, ClassifiedError> {
        let url = input["url"].as_str().unwrap_or_default();
        let timeout_secs = input
            .get("timeout_secs")
            .and_then(|v| v.as_i64())
            .unwrap_or(DEFAULT_TIMEOUT_SECS) as u64;

        debug!(url, timeout_secs, "fetching url");

        let response = self
            .http
            .get(url)
            .timeout(Duration::from_secs(timeout_secs))
            .send()
            .await
            .map_err(|e| {
                let category = if e.is_timeout() || e.is_connect() {
                    ErrorCategory::Retryable
                } else {
                    ErrorCategory::Permanent
                };
                ClassifiedError {
                    message: format!("fetch failed: {e}"),
                    category,
                }
            })?;

        let status = response.status().as_u16();
        if status >= 400 {
            return Err(ClassifiedError {
                message: format!("fetch returned {status}"),
                category: classify_http_status(status, None),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| ClassifiedError::retryable(format!("body read failed: {e}")))?;

        if body.len() > MAX_BODY_CHARS {
            let mut cut = MAX_BODY_CHARS;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            Ok(format!("{}\n[body truncated]", &body[..cut]))
        } else {
            Ok(body)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_definition_requires_http_scheme() {
        let def = WebFetchTool::new().definition();
        let url_param = def.input_schema.param("url").unwrap();
        assert_eq!(url_param.pattern.as_deref(), Some("^https?://"));
    }

    #[tokio::test]
    async fn test_rejects_unreachable_host_as_retryable() {
        let tool = WebFetchTool::new();
        let ctx = ToolContext::new(None, "/tmp");
        let input = rcode_core::tool::value::input_from_json(serde_json::json!({
            "url": "http://127.0.0.1:1",
            "timeout_secs": 1,
        }));
        let err = tool.execute(input, &ctx).await.unwrap_err();
        assert_eq!(err.category, ErrorCategory::Retryable);
    }
}
