//! QR login flow: one background task per login attempt.
//!
//! The task opens a login stream, connects, and turns each code into a
//! rendered [`QrArtifact`] on the session until a terminal event, a stop, or
//! the stream closing.

use std::sync::Arc;

use {
    anyhow::{Context, Result},
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
    zaapi_channels::{LoginEvent, LoginStream, ProtocolClient},
};

use crate::{
    qr::{QrArtifact, render_png_base64},
    state::{LoginFlowSlot, SessionCore, SessionPhase, SessionState},
};

/// Why a flow ended.
#[derive(Debug, Clone, PartialEq, Eq)]
enum FlowEnd {
    Success,
    Timeout,
    Failed(String),
    /// The stream closed without a terminal event.
    Closed,
    Cancelled,
}

/// Start a flow unless one is already running. Caller holds the state lock,
/// so the check and the claim are atomic.
pub(crate) fn launch(
    core: &Arc<SessionCore>,
    state: &mut SessionState,
    client: &Arc<dyn ProtocolClient>,
) -> bool {
    if state.login_flow.is_some() {
        return false;
    }

    let generation = state.next_generation();
    let cancel = CancellationToken::new();
    state.login_flow = Some(LoginFlowSlot {
        generation,
        cancel: cancel.clone(),
    });

    let flow = QrLoginFlow {
        core: Arc::clone(core),
        client: Arc::clone(client),
        generation,
        cancel,
    };
    debug!(session = %core.id, generation, "launching QR login flow");
    tokio::spawn(flow.run());
    true
}

struct QrLoginFlow {
    core: Arc<SessionCore>,
    client: Arc<dyn ProtocolClient>,
    generation: u64,
    cancel: CancellationToken,
}

impl QrLoginFlow {
    async fn run(self) {
        let end = match self.drive().await {
            Ok(end) => end,
            Err(e) => {
                warn!(session = %self.core.id, error = %e, "QR login flow failed");
                FlowEnd::Failed(e.to_string())
            },
        };
        info!(session = %self.core.id, outcome = ?end, "QR login flow finished");
        self.finish(&end);
    }

    fn should_exit(&self) -> bool {
        self.cancel.is_cancelled() || self.core.is_stopped()
    }

    /// Open the login stream and connect. Returns `None` when the flow was
    /// cancelled meanwhile, after undoing its own connection.
    /// Runs under the session's connection gate.
    async fn open_and_connect(&self) -> Result<Option<LoginStream>> {
        let _gate = self.core.connection_gate().await;
        if self.should_exit() {
            return Ok(None);
        }

        // A previous attempt may have left an unauthenticated connection up.
        if self.client.is_connected() && !self.client.is_logged_in() {
            self.client.disconnect().await;
        }

        // The stream has to exist before connecting.
        let stream = self
            .client
            .open_login_stream()
            .await
            .context("open login stream")?;
        if self.should_exit() {
            return Ok(None);
        }

        self.client.connect().await.context("connect")?;
        if self.should_exit() {
            if self.client.is_connected() {
                self.client.disconnect().await;
            }
            return Ok(None);
        }
        Ok(Some(stream))
    }

    async fn drive(&self) -> Result<FlowEnd> {
        let Some(mut stream) = self.open_and_connect().await? else {
            return Ok(FlowEnd::Cancelled);
        };

        loop {
            let event = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Ok(FlowEnd::Cancelled),
                event = stream.recv() => event,
            };
            if self.core.is_stopped() {
                return Ok(FlowEnd::Cancelled);
            }

            match event {
                Some(LoginEvent::Code(code)) => self.store_code(code),
                Some(LoginEvent::Success) => return Ok(FlowEnd::Success),
                Some(LoginEvent::Timeout) => return Ok(FlowEnd::Timeout),
                Some(LoginEvent::Error(reason)) => return Ok(FlowEnd::Failed(reason)),
                None => return Ok(FlowEnd::Closed),
            }
        }
    }

    fn store_code(&self, code: String) {
        let image = match render_png_base64(&code) {
            Ok(image) => image,
            Err(e) => {
                warn!(session = %self.core.id, error = %e, "failed to render QR code, skipping");
                return;
            },
        };

        let mut state = self.core.lock();
        if self.core.is_stopped() || !state.owns_login_flow(self.generation) {
            return;
        }
        state.last_qr = Some(QrArtifact::new(code, image));
        debug!(session = %self.core.id, "new QR code available");
    }

    fn finish(&self, end: &FlowEnd) {
        let mut state = self.core.lock();
        // Stop already released the slot.
        if !state.owns_login_flow(self.generation) {
            return;
        }
        state.login_flow = None;
        state.last_qr = None;
        if *end == FlowEnd::Success
            && !self.core.is_stopped()
            && matches!(
                state.phase,
                SessionPhase::Connecting | SessionPhase::AwaitingQr
            )
        {
            state.phase = SessionPhase::LoggedIn;
        }
    }
}
