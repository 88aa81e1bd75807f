use std::{sync::Arc, time::Duration};

use {
    serde::Serialize,
    tracing::{debug, info, warn},
    zaapi_channels::ProtocolClient,
};

use crate::{
    dispatch::{EventDispatcher, MessageSink},
    error::{Result, SessionError},
    login,
    qr::QrTicket,
    state::{SessionCore, SessionPhase},
    store::{SessionStatus, SessionStore},
};

/// Point-in-time view of a session for status endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub id: String,
    pub phase: SessionPhase,
    pub running: bool,
    pub connected: bool,
    pub logged_in: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,
    pub login_in_progress: bool,
    /// Seconds left on the current QR code, if one is being served.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qr_expires_in: Option<u64>,
}

/// One logical chat account and the protocol client it exclusively owns.
pub struct Session {
    core: Arc<SessionCore>,
    client: Arc<dyn ProtocolClient>,
    sink: Arc<dyn MessageSink>,
    store: SessionStore,
    qr_ttl: Duration,
}

impl Session {
    pub(crate) fn new(
        id: &str,
        client: Arc<dyn ProtocolClient>,
        sink: Arc<dyn MessageSink>,
        store: SessionStore,
        qr_ttl: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            core: Arc::new(SessionCore::new(id)),
            client,
            sink,
            store,
            qr_ttl,
        })
    }

    pub fn id(&self) -> &str {
        &self.core.id
    }

    /// Lock-free; safe to call from hot paths.
    pub fn is_stopped(&self) -> bool {
        self.core.is_stopped()
    }

    pub fn phase(&self) -> SessionPhase {
        self.core.lock().phase
    }

    pub fn identity(&self) -> Option<String> {
        self.core.lock().identity.clone()
    }

    /// Bring the session up.
    ///
    /// With stored credentials this connects and reports the outcome. Without,
    /// it starts a QR login flow in the background and returns immediately.
    pub async fn start(&self) -> Result<()> {
        let (epoch, has_credentials) = {
            let mut state = self.core.lock();
            if !self.core.is_stopped() {
                return Err(SessionError::AlreadyRunning(self.id().to_string()));
            }
            self.core.set_stopped(false);
            state.epoch += 1;
            state.phase = SessionPhase::Connecting;

            if !state.listener_registered {
                let dispatcher = EventDispatcher::new(Arc::clone(&self.core), Arc::clone(&self.sink));
                self.client.register_event_handler(Arc::new(dispatcher));
                state.listener_registered = true;
            }

            let has_credentials = self.client.has_credentials();
            if !has_credentials {
                state.phase = SessionPhase::AwaitingQr;
                login::launch(&self.core, &mut state, &self.client);
            }
            (state.epoch, has_credentials)
        };
        self.persist_status(SessionStatus::Running);

        if !has_credentials {
            info!(session = %self.id(), "session started, waiting for QR login");
            return Ok(());
        }

        // Stop waits here for an in-flight connect, then finds it undone.
        let _gate = self.core.connection_gate().await;
        if !self.core.is_current(epoch) {
            return Err(SessionError::NotRunning(self.id().to_string()));
        }

        match self.client.connect().await {
            Ok(()) => {
                let current = {
                    let mut state = self.core.lock();
                    let current = state.epoch == epoch && !self.core.is_stopped();
                    if current {
                        state.phase = SessionPhase::Connected;
                    }
                    current
                };
                if !current {
                    self.client.disconnect().await;
                    info!(session = %self.id(), "session stopped while connecting, connection dropped");
                    return Err(SessionError::NotRunning(self.id().to_string()));
                }
                info!(session = %self.id(), "session started and connected");
                Ok(())
            },
            Err(e) => {
                let reverted = {
                    let mut state = self.core.lock();
                    let current = state.epoch == epoch && !self.core.is_stopped();
                    if current {
                        self.core.set_stopped(true);
                        state.phase = SessionPhase::Stopped;
                    }
                    current
                };
                if reverted {
                    self.persist_status(SessionStatus::Stopped);
                }
                warn!(session = %self.id(), error = %e, "connect failed");
                Err(SessionError::ConnectFailure {
                    id: self.id().to_string(),
                    reason: e.to_string(),
                })
            },
        }
    }

    /// Take the session down. Stopping a stopped session is a no-op.
    ///
    /// Returns once no connect started by this run can still be in flight.
    pub async fn stop(&self) -> Result<()> {
        let (epoch, flow) = {
            let mut state = self.core.lock();
            if self.core.is_stopped() {
                return Ok(());
            }
            // Flag first so in-flight callbacks turn into no-ops.
            self.core.set_stopped(true);
            state.phase = SessionPhase::Stopped;
            state.last_qr = None;
            (state.epoch, state.login_flow.take())
        };
        if let Some(flow) = flow {
            flow.cancel.cancel();
        }

        let _gate = self.core.connection_gate().await;
        let restarted = self.core.lock().epoch != epoch;
        if restarted {
            // A newer start owns the client now.
            debug!(session = %self.id(), "session restarted while stopping");
            return Ok(());
        }
        if self.client.is_connected() {
            self.client.disconnect().await;
        }
        self.persist_status(SessionStatus::Stopped);
        info!(session = %self.id(), "session stopped");
        Ok(())
    }

    /// Current QR code for pairing.
    ///
    /// Never waits: a fresh code comes back directly, otherwise a login flow is
    /// (re)started and [`SessionError::LoginPending`] tells the caller to poll.
    pub fn qr(&self) -> Result<QrTicket> {
        let id = self.id();
        if self.core.is_stopped() {
            return Err(SessionError::NotRunning(id.to_string()));
        }
        // Paired clients log in through `start()`; a QR flow would race it.
        if self.client.is_logged_in() || self.client.has_credentials() {
            return Err(SessionError::AlreadyLoggedIn(id.to_string()));
        }

        let mut state = self.core.lock();
        if state.phase.is_authenticated() {
            return Err(SessionError::AlreadyLoggedIn(id.to_string()));
        }

        if let Some(artifact) = &state.last_qr {
            if let Some(remaining) = artifact.remaining(self.qr_ttl) {
                return Ok(QrTicket::from_artifact(artifact, remaining));
            }
            debug!(session = %id, "QR code expired");
            state.last_qr = None;
        }

        state.phase = SessionPhase::AwaitingQr;
        if login::launch(&self.core, &mut state, &self.client) {
            info!(session = %id, "requested a new QR code");
        }
        Err(SessionError::LoginPending(id.to_string()))
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.core.lock();
        SessionSnapshot {
            id: self.id().to_string(),
            phase: state.phase,
            running: !self.core.is_stopped(),
            connected: self.client.is_connected(),
            logged_in: self.client.is_logged_in() || state.phase.is_authenticated(),
            identity: state.identity.clone(),
            login_in_progress: state.login_flow.is_some(),
            qr_expires_in: state
                .last_qr
                .as_ref()
                .and_then(|qr| qr.remaining(self.qr_ttl))
                .map(|left| left.as_millis().div_ceil(1000) as u64),
        }
    }

    pub(crate) fn has_credentials(&self) -> bool {
        self.client.has_credentials()
    }

    fn persist_status(&self, status: SessionStatus) {
        if let Err(e) = self.store.set_status(self.id(), status) {
            warn!(session = %self.id(), error = %e, "failed to persist session status");
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.core.id)
            .field("stopped", &self.core.is_stopped())
            .finish_non_exhaustive()
    }
}
