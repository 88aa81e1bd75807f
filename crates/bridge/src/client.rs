//! Bridge-backed protocol client: one bridge process per session.

use std::{
    path::Path,
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use {
    anyhow::{Context, Result, bail},
    async_trait::async_trait,
    tokio::{sync::mpsc, task::JoinHandle},
    tracing::{debug, info, trace, warn},
    zaapi_channels::{
        ClientFactory, EventHandler, LoginEvent, LoginStream, ProtocolClient, ProtocolEvent,
    },
    zaapi_config::{BridgeConfig, DeviceConfig},
};

use crate::{
    transport::{SpawnSpec, StdioTransport},
    types::{
        BridgeStatus, InitializeParams, JsonRpcNotification, LoginNotification, decode_event,
        methods,
    },
};

/// Login codes buffered before the session's flow catches up.
const LOGIN_BUFFER: usize = 8;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// State shared with the notification router.
#[derive(Default)]
struct Shared {
    connected: AtomicBool,
    logged_in: AtomicBool,
    has_credentials: AtomicBool,
    login_tx: Mutex<Option<mpsc::Sender<LoginEvent>>>,
    handlers: Mutex<Vec<Arc<dyn EventHandler>>>,
}

impl Shared {
    /// Credentials only ever appear here; losing them takes a `logged_out` event.
    fn apply_status(&self, status: &BridgeStatus) {
        if status.has_credentials || status.logged_in {
            self.has_credentials.store(true, Ordering::SeqCst);
        }
        self.connected.store(status.connected, Ordering::SeqCst);
        self.logged_in.store(status.logged_in, Ordering::SeqCst);
    }

    async fn route(&self, session_id: &str, notification: JsonRpcNotification) {
        let params = notification.params.unwrap_or_default();
        match notification.method.as_str() {
            methods::NOTIFY_LOGIN => match serde_json::from_value::<LoginNotification>(params) {
                Ok(n) => self.on_login(session_id, n.into()).await,
                Err(e) => warn!(session = %session_id, error = %e, "invalid login notification"),
            },
            methods::NOTIFY_EVENT => match decode_event(params) {
                Ok(event) => self.on_event(event),
                Err(e) => warn!(session = %session_id, error = %e, "invalid event notification"),
            },
            other => trace!(session = %session_id, method = %other, "ignoring notification"),
        }
    }

    async fn on_login(&self, session_id: &str, event: LoginEvent) {
        if event == LoginEvent::Success {
            self.has_credentials.store(true, Ordering::SeqCst);
            self.logged_in.store(true, Ordering::SeqCst);
        }
        let terminal = event.is_terminal();
        let tx = if terminal {
            lock(&self.login_tx).take()
        } else {
            lock(&self.login_tx).clone()
        };
        let Some(tx) = tx else {
            debug!(session = %session_id, event = event.name(), "login event without an open stream");
            return;
        };
        if tx.send(event).await.is_err() {
            lock(&self.login_tx).take();
        }
    }

    fn on_event(&self, event: ProtocolEvent) {
        match &event {
            ProtocolEvent::Connected => self.connected.store(true, Ordering::SeqCst),
            ProtocolEvent::LoginSucceeded { .. } => {
                self.has_credentials.store(true, Ordering::SeqCst);
                self.logged_in.store(true, Ordering::SeqCst);
            },
            ProtocolEvent::Other { kind } if kind == "disconnected" => {
                self.connected.store(false, Ordering::SeqCst);
            },
            ProtocolEvent::Other { kind } if kind == "logged_out" => {
                self.logged_in.store(false, Ordering::SeqCst);
                self.has_credentials.store(false, Ordering::SeqCst);
            },
            _ => {},
        }

        let handlers: Vec<_> = lock(&self.handlers).iter().cloned().collect();
        for handler in handlers {
            let event = event.clone();
            tokio::spawn(async move { handler.handle(event).await });
        }
    }
}

/// A [`ProtocolClient`] backed by an external bridge process.
pub struct BridgeClient {
    session_id: String,
    transport: Arc<StdioTransport>,
    shared: Arc<Shared>,
    router: JoinHandle<()>,
}

impl BridgeClient {
    /// Spawn the bridge for `session_id` and run the `initialize` handshake.
    pub async fn spawn(
        session_id: &str,
        store_dir: &Path,
        bridge: &BridgeConfig,
        device: &DeviceConfig,
    ) -> Result<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let transport = StdioTransport::spawn(
            SpawnSpec {
                command: &bridge.command,
                args: &bridge.args,
                env: &bridge.env,
                cwd: Some(store_dir),
                request_timeout: Duration::from_secs(bridge.request_timeout_secs.max(1)),
            },
            tx,
        )
        .await?;

        let shared = Arc::new(Shared::default());
        let router_shared = Arc::clone(&shared);
        let router_id = session_id.to_string();
        let router = tokio::spawn(async move {
            while let Some(notification) = rx.recv().await {
                router_shared.route(&router_id, notification).await;
            }
            router_shared.connected.store(false, Ordering::SeqCst);
            router_shared.logged_in.store(false, Ordering::SeqCst);
            lock(&router_shared.login_tx).take();
            debug!(session = %router_id, "bridge notification stream ended");
        });

        let client = Self {
            session_id: session_id.to_string(),
            transport,
            shared,
            router,
        };
        client.initialize(store_dir, device).await?;
        Ok(client)
    }

    async fn initialize(&self, store_dir: &Path, device: &DeviceConfig) -> Result<()> {
        let store_path = store_dir.to_string_lossy();
        let params = InitializeParams {
            session_id: &self.session_id,
            store_path: &store_path,
            device,
        };
        let status = self
            .status_request(methods::INITIALIZE, Some(serde_json::to_value(&params)?))
            .await
            .context("bridge initialize failed")?;
        info!(
            session = %self.session_id,
            has_credentials = status.has_credentials,
            identity = status.identity.as_deref().unwrap_or(""),
            "bridge initialized"
        );
        Ok(())
    }

    async fn status_request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<BridgeStatus> {
        let resp = self.transport.request(method, params).await?;
        let status: BridgeStatus = match resp.result {
            Some(value) if !value.is_null() => serde_json::from_value(value)
                .with_context(|| format!("invalid {method} result"))?,
            _ => BridgeStatus::default(),
        };
        self.shared.apply_status(&status);
        Ok(status)
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

impl Drop for BridgeClient {
    fn drop(&mut self) {
        self.router.abort();
    }
}

#[async_trait]
impl ProtocolClient for BridgeClient {
    async fn connect(&self) -> Result<()> {
        let status = self.status_request(methods::CONNECT, None).await?;
        if !status.connected {
            bail!("bridge reported no connection");
        }
        Ok(())
    }

    async fn disconnect(&self) {
        if self.transport.is_alive().await
            && let Err(e) = self.transport.request(methods::DISCONNECT, None).await
        {
            warn!(session = %self.session_id, error = %e, "bridge disconnect failed");
        }
        self.shared.connected.store(false, Ordering::SeqCst);
        self.shared.logged_in.store(false, Ordering::SeqCst);
        lock(&self.shared.login_tx).take();
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    fn is_logged_in(&self) -> bool {
        self.shared.logged_in.load(Ordering::SeqCst)
    }

    fn has_credentials(&self) -> bool {
        self.shared.has_credentials.load(Ordering::SeqCst)
    }

    async fn open_login_stream(&self) -> Result<LoginStream> {
        if self.has_credentials() {
            bail!("device already has credentials");
        }
        if self.is_connected() {
            bail!("login stream must be opened before connecting");
        }

        let (tx, rx) = mpsc::channel(LOGIN_BUFFER);
        *lock(&self.shared.login_tx) = Some(tx);
        if let Err(e) = self.transport.request(methods::LOGIN_OPEN, None).await {
            lock(&self.shared.login_tx).take();
            return Err(e).context("bridge refused login stream");
        }
        Ok(rx)
    }

    fn register_event_handler(&self, handler: Arc<dyn EventHandler>) {
        lock(&self.shared.handlers).push(handler);
    }
}

/// Spawns a [`BridgeClient`] per session from configuration.
#[derive(Debug, Clone)]
pub struct BridgeClientFactory {
    bridge: BridgeConfig,
    device: DeviceConfig,
}

impl BridgeClientFactory {
    pub fn new(bridge: BridgeConfig, device: DeviceConfig) -> Self {
        Self { bridge, device }
    }
}

#[async_trait]
impl ClientFactory for BridgeClientFactory {
    async fn build(&self, session_id: &str, store_dir: &Path) -> Result<Arc<dyn ProtocolClient>> {
        let client = BridgeClient::spawn(session_id, store_dir, &self.bridge, &self.device).await?;
        Ok(Arc::new(client))
    }
}
