//! RCode HTTP surface
//!
//! axum handlers over the core engine, the SSE progress stream, and the
//! server with its optional TLS binding.

pub mod handlers;
pub mod models;
pub mod server;
pub mod sse;
pub mod state;

pub use server::ApiServer;
pub use state::{ApiState, SharedState};
