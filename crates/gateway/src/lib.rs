//! Gateway: HTTP front end for the session manager.
//!
//! Lifecycle:
//! 1. Build the session manager from config (bridge factory, message sink)
//! 2. Restore sessions from disk and autostart the ones that were running
//! 3. Serve `/health` and `/sessions/*` until Ctrl-C
//! 4. Stop every session

pub mod auth;
pub mod error;
pub mod routes;
pub mod server;
pub mod state;
pub mod webhook;

pub use server::{build_gateway_app, build_manager, start_gateway};
