//! RCode binary crate
//!
//! The engine lives in `rcode-core`, the built-in tools in `rcode-tools`,
//! and the HTTP surface in `rcode-api`; this crate wires them into a
//! runnable server.

pub mod cli;
