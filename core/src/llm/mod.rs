//! Conversation loop with the LLM provider
//!
//! Wire types, the endpoint client (plain and streaming), the bearer
//! token provider, and the tool-calling conversation driver.

pub mod auth;
pub mod client;
pub mod driver;
pub mod stub;
pub mod types;

pub use auth::{AuthProvider, AuthTokens, FileAuthProvider, StaticAuthProvider};
pub use client::{AnthropicClient, BlockAccumulator, ModelClient};
pub use driver::{ConversationDriver, DriverOptions, ToolSummary, TurnOutcome, MAX_ITERATIONS};
pub use stub::{text_response, tool_use_response, StubModelClient};
pub use types::{ContentBlock, Message, MessagesRequest, MessagesResponse, Role};
