use std::sync::Arc;

use {
    anyhow::Result,
    async_trait::async_trait,
    tracing::{debug, info, trace, warn},
    zaapi_channels::{EventHandler, InboundMessage, ProtocolEvent},
};

use crate::state::{SessionCore, SessionPhase};

/// Downstream consumer of inbound messages (webhooks, queues, ...).
///
/// Failures are logged by the dispatcher and never retried there.
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn deliver(&self, session_id: &str, message: &InboundMessage) -> Result<()>;
}

/// Sink that only logs what arrived.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl MessageSink for LogSink {
    async fn deliver(&self, session_id: &str, message: &InboundMessage) -> Result<()> {
        debug!(
            session = %session_id,
            message_id = %message.id,
            from = %message.from,
            chat = %message.chat,
            text = message.text.as_deref().unwrap_or(""),
            "message received"
        );
        Ok(())
    }
}

/// The single handler a session attaches to its protocol client.
pub(crate) struct EventDispatcher {
    core: Arc<SessionCore>,
    sink: Arc<dyn MessageSink>,
}

impl EventDispatcher {
    pub fn new(core: Arc<SessionCore>, sink: Arc<dyn MessageSink>) -> Self {
        Self { core, sink }
    }
}

#[async_trait]
impl EventHandler for EventDispatcher {
    async fn handle(&self, event: ProtocolEvent) {
        let id = &self.core.id;
        if self.core.is_stopped() {
            trace!(session = %id, kind = event.kind(), "session stopped, event dropped");
            return;
        }

        match event {
            ProtocolEvent::LoginSucceeded { identity } => {
                let mut state = self.core.lock();
                if matches!(
                    state.phase,
                    SessionPhase::Connecting | SessionPhase::AwaitingQr
                ) {
                    state.phase = SessionPhase::LoggedIn;
                }
                state.last_qr = None;
                info!(session = %id, identity = %identity, "device paired");
                state.identity = Some(identity);
            },
            ProtocolEvent::Connected => {
                let mut state = self.core.lock();
                // Transport-level connects during pairing do not count.
                if state.phase == SessionPhase::LoggedIn {
                    state.phase = SessionPhase::Connected;
                }
                debug!(session = %id, phase = %state.phase, "connected");
            },
            ProtocolEvent::MessageReceived(message) => {
                if let Err(e) = self.sink.deliver(id, &message).await {
                    warn!(
                        session = %id,
                        message_id = %message.id,
                        error = %e,
                        "message delivery failed, dropping"
                    );
                }
            },
            ProtocolEvent::LoginCodeIssued { .. } => {
                trace!(session = %id, "login code event, handled by the login flow");
            },
            ProtocolEvent::Other { kind } => {
                trace!(session = %id, kind = %kind, "unhandled event");
            },
        }
    }
}
