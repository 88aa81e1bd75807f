use std::{
    fmt,
    sync::{
        Mutex, MutexGuard,
        atomic::{AtomicBool, Ordering},
    },
};

use {
    serde::Serialize,
    tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard},
    tokio_util::sync::CancellationToken,
};

use crate::qr::QrArtifact;

/// Where a session is in its login/connection lifecycle.
///
/// `Stopped → Connecting → AwaitingQr → LoggedIn → Connected`; `stop()`
/// returns to `Stopped` from anywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Stopped,
    Connecting,
    AwaitingQr,
    LoggedIn,
    Connected,
}

impl SessionPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Connecting => "connecting",
            Self::AwaitingQr => "awaiting_qr",
            Self::LoggedIn => "logged_in",
            Self::Connected => "connected",
        }
    }

    pub fn is_authenticated(self) -> bool {
        matches!(self, Self::LoggedIn | Self::Connected)
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Marker for the one login flow a session may run at a time.
#[derive(Debug)]
pub(crate) struct LoginFlowSlot {
    pub generation: u64,
    pub cancel: CancellationToken,
}

/// Everything mutable about a session, guarded by one lock.
#[derive(Debug)]
pub(crate) struct SessionState {
    pub phase: SessionPhase,
    pub last_qr: Option<QrArtifact>,
    pub listener_registered: bool,
    pub login_flow: Option<LoginFlowSlot>,
    pub identity: Option<String>,
    /// Bumped on every successful `start()`; late connect results compare against it.
    pub epoch: u64,
    next_generation: u64,
}

impl SessionState {
    fn new() -> Self {
        Self {
            phase: SessionPhase::Stopped,
            last_qr: None,
            listener_registered: false,
            login_flow: None,
            identity: None,
            epoch: 0,
            next_generation: 0,
        }
    }

    pub fn next_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    pub fn owns_login_flow(&self, generation: u64) -> bool {
        self.login_flow
            .as_ref()
            .is_some_and(|slot| slot.generation == generation)
    }
}

/// State shared between a session, its login flow task and its dispatcher.
///
/// `stopped` lives outside the lock so the event path can bail out without
/// contending with lifecycle calls.
#[derive(Debug)]
pub(crate) struct SessionCore {
    pub id: String,
    stopped: AtomicBool,
    state: Mutex<SessionState>,
    /// Held across every connect or disconnect sequence on the client.
    gate: AsyncMutex<()>,
}

impl SessionCore {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            stopped: AtomicBool::new(true),
            state: Mutex::new(SessionState::new()),
            gate: AsyncMutex::new(()),
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub fn set_stopped(&self, stopped: bool) {
        self.stopped.store(stopped, Ordering::Release);
    }

    /// True while `epoch` is the latest start and no stop followed it.
    pub fn is_current(&self, epoch: u64) -> bool {
        let state = self.lock();
        state.epoch == epoch && !self.is_stopped()
    }

    pub async fn connection_gate(&self) -> AsyncMutexGuard<'_, ()> {
        self.gate.lock().await
    }

    pub fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
