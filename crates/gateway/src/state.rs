use std::{sync::Arc, time::Instant};

use zaapi_sessions::SessionManager;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<SessionManager>,
    /// Bearer token required on `/sessions` routes. `None` disables auth.
    pub token: Option<Arc<str>>,
    pub version: &'static str,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(manager: Arc<SessionManager>, token: Option<String>) -> Self {
        Self {
            manager,
            token: token.filter(|t| !t.is_empty()).map(Arc::from),
            version: env!("CARGO_PKG_VERSION"),
            started_at: Instant::now(),
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
