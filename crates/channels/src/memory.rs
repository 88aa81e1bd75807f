//! In-process protocol client. The login stream and inbound events are driven
//! by the caller, and every call into the client is counted.

use std::{
    collections::HashMap,
    path::Path,
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};

use {
    anyhow::{Result, bail},
    async_trait::async_trait,
    tokio::sync::mpsc,
};

use crate::{
    client::{ClientFactory, EventHandler, LoginStream, ProtocolClient},
    event::{LoginEvent, ProtocolEvent},
};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
pub struct MemoryClient {
    connected: AtomicBool,
    logged_in: AtomicBool,
    credentials: AtomicBool,
    fail_connect: AtomicBool,
    connect_delay_ms: AtomicU64,
    connects: AtomicUsize,
    connects_in_flight: AtomicUsize,
    peak_connects_in_flight: AtomicUsize,
    disconnects: AtomicUsize,
    login_streams: AtomicUsize,
    login_tx: Mutex<Option<mpsc::Sender<LoginEvent>>>,
    handlers: Mutex<Vec<Arc<dyn EventHandler>>>,
}

impl MemoryClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// A client that behaves as if a device was paired earlier.
    pub fn with_credentials() -> Self {
        let client = Self::default();
        client.credentials.store(true, Ordering::SeqCst);
        client
    }

    pub fn set_fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    /// Make every `connect()` take `delay` before it resolves.
    pub fn set_connect_delay(&self, delay: Duration) {
        self.connect_delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Pretend the server reports the device as logged in.
    pub fn set_logged_in(&self, logged_in: bool) {
        self.logged_in.store(logged_in, Ordering::SeqCst);
    }

    /// Feed one event into the open login stream.
    ///
    /// Returns false when no stream is open or the consumer went away.
    /// Terminal events close the stream; `Success` also stores credentials.
    pub fn push_login(&self, event: LoginEvent) -> bool {
        let mut slot = lock(&self.login_tx);
        let Some(tx) = slot.as_ref() else {
            return false;
        };
        let terminal = event.is_terminal();
        if matches!(event, LoginEvent::Success) {
            self.credentials.store(true, Ordering::SeqCst);
            self.logged_in.store(true, Ordering::SeqCst);
        }
        let sent = tx.try_send(event).is_ok();
        if terminal || !sent {
            slot.take();
        }
        sent
    }

    /// Deliver an inbound event to every registered handler.
    pub async fn emit(&self, event: ProtocolEvent) {
        let handlers: Vec<_> = lock(&self.handlers).iter().cloned().collect();
        for handler in handlers {
            handler.handle(event.clone()).await;
        }
    }

    pub fn has_open_login_stream(&self) -> bool {
        lock(&self.login_tx)
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    /// Most `connect()` calls ever running at the same time.
    pub fn peak_concurrent_connects(&self) -> usize {
        self.peak_connects_in_flight.load(Ordering::SeqCst)
    }

    pub fn login_stream_count(&self) -> usize {
        self.login_streams.load(Ordering::SeqCst)
    }

    pub fn handler_count(&self) -> usize {
        lock(&self.handlers).len()
    }
}

#[async_trait]
impl ProtocolClient for MemoryClient {
    async fn connect(&self) -> Result<()> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let in_flight = self.connects_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_connects_in_flight.fetch_max(in_flight, Ordering::SeqCst);
        let delay = self.connect_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.connects_in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.fail_connect.load(Ordering::SeqCst) {
            bail!("connection refused");
        }
        self.connected.store(true, Ordering::SeqCst);
        if self.credentials.load(Ordering::SeqCst) {
            self.logged_in.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        self.logged_in.store(false, Ordering::SeqCst);
        lock(&self.login_tx).take();
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn is_logged_in(&self) -> bool {
        self.logged_in.load(Ordering::SeqCst)
    }

    fn has_credentials(&self) -> bool {
        self.credentials.load(Ordering::SeqCst)
    }

    async fn open_login_stream(&self) -> Result<LoginStream> {
        if self.has_credentials() {
            bail!("device already has credentials");
        }
        if self.is_connected() {
            bail!("login stream must be opened before connecting");
        }
        let (tx, rx) = mpsc::channel(8);
        *lock(&self.login_tx) = Some(tx);
        self.login_streams.fetch_add(1, Ordering::SeqCst);
        Ok(rx)
    }

    fn register_event_handler(&self, handler: Arc<dyn EventHandler>) {
        lock(&self.handlers).push(handler);
    }
}

/// Hands out [`MemoryClient`]s and keeps them reachable by session id.
#[derive(Default)]
pub struct MemoryClientFactory {
    clients: Mutex<HashMap<String, Arc<MemoryClient>>>,
    paired: Mutex<Vec<String>>,
    unreachable: Mutex<Vec<String>>,
}

impl MemoryClientFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clients built for `session_id` start with credentials.
    pub fn mark_paired(&self, session_id: &str) {
        lock(&self.paired).push(session_id.to_string());
    }

    /// Clients built for `session_id` fail every `connect()`.
    pub fn mark_unreachable(&self, session_id: &str) {
        lock(&self.unreachable).push(session_id.to_string());
    }

    /// The most recent client built for `session_id`.
    pub fn client(&self, session_id: &str) -> Option<Arc<MemoryClient>> {
        lock(&self.clients).get(session_id).cloned()
    }
}

#[async_trait]
impl ClientFactory for MemoryClientFactory {
    async fn build(&self, session_id: &str, _store_dir: &Path) -> Result<Arc<dyn ProtocolClient>> {
        let paired = lock(&self.paired).iter().any(|id| id == session_id);
        let client = Arc::new(if paired {
            MemoryClient::with_credentials()
        } else {
            MemoryClient::new()
        });
        if lock(&self.unreachable).iter().any(|id| id == session_id) {
            client.set_fail_connect(true);
        }
        lock(&self.clients).insert(session_id.to_string(), Arc::clone(&client));
        Ok(client)
    }
}
