use std::{path::Path, sync::Arc};

use {anyhow::Result, async_trait::async_trait, tokio::sync::mpsc};

use crate::event::{LoginEvent, ProtocolEvent};

/// Receiving end of a login attempt. Closed by the client after a terminal event.
pub type LoginStream = mpsc::Receiver<LoginEvent>;

/// One connection to the chat protocol, owned by exactly one session.
#[async_trait]
pub trait ProtocolClient: Send + Sync {
    /// Open the transport. With stored credentials this also logs in.
    async fn connect(&self) -> Result<()>;

    /// Close the transport. Safe to call when already disconnected.
    async fn disconnect(&self);

    fn is_connected(&self) -> bool;

    fn is_logged_in(&self) -> bool;

    /// Device credentials are present in the client's store.
    fn has_credentials(&self) -> bool;

    /// Start a QR login attempt.
    ///
    /// Must be called before [`connect`](Self::connect); the protocol rejects
    /// login streams requested on a live connection.
    async fn open_login_stream(&self) -> Result<LoginStream>;

    /// Subscribe `handler` to every inbound event from now on.
    fn register_event_handler(&self, handler: Arc<dyn EventHandler>);
}

/// Receives inbound protocol events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: ProtocolEvent);
}

/// Builds the protocol client for a session, bound to its storage directory.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    async fn build(&self, session_id: &str, store_dir: &Path) -> Result<Arc<dyn ProtocolClient>>;
}
