//! Out-of-process protocol client.
//!
//! Each session gets its own bridge process speaking newline-delimited
//! JSON-RPC 2.0 on stdin/stdout. Requests (`initialize`, `connect`,
//! `disconnect`, `login.open`) drive the connection; `login` and `event`
//! notifications flow back.

pub mod client;
pub mod transport;
pub mod types;

pub use client::{BridgeClient, BridgeClientFactory};
