//! Session lifecycle for chat-protocol connections.
//!
//! A [`SessionManager`] owns the registry of [`Session`]s. Each session owns one
//! protocol client and moves through [`SessionPhase`]s as it connects, logs in
//! via QR code, and stops. Session metadata lives under
//! `<root>/<id>/session.yml` so sessions survive restarts.

pub mod dispatch;
pub mod error;
pub mod id;
mod login;
pub mod manager;
pub mod qr;
pub mod session;
mod state;
pub mod store;

pub use {
    dispatch::{LogSink, MessageSink},
    error::{Result, SessionError},
    id::{generate_session_id, validate_session_id},
    manager::{DEFAULT_QR_TTL, SessionManager},
    qr::QrTicket,
    session::{Session, SessionSnapshot},
    state::SessionPhase,
    store::{SessionRecord, SessionStatus, SessionStore},
};
