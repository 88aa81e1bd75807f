//! Config schema types (server, sessions, bridge, device identity, webhook).

use std::{collections::HashMap, path::PathBuf};

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ZaapiConfig {
    pub server: ServerConfig,
    pub sessions: SessionsConfig,
    pub bridge: BridgeConfig,
    pub whatsapp: DeviceConfig,
    pub webhook: WebhookConfig,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Bearer token required on every request except `/health`.
    /// `None` disables auth.
    pub token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
            token: None,
        }
    }
}

/// Session storage and login behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    /// Root directory holding one sub-directory per session.
    /// Defaults to `<data_dir>/sessions`.
    pub dir: Option<PathBuf>,
    /// How long a rendered QR code is served before a fresh one is required.
    pub qr_ttl_secs: u64,
    /// Rebuild sessions from disk when the gateway starts.
    pub restore_on_start: bool,
    /// Start restored sessions whose record says they were running.
    pub autostart: bool,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            dir: None,
            qr_ttl_secs: 45,
            restore_on_start: true,
            autostart: true,
        }
    }
}

impl SessionsConfig {
    /// Resolve the session root, falling back to `<data_dir>/sessions`.
    pub fn root(&self) -> PathBuf {
        self.dir
            .clone()
            .unwrap_or_else(|| crate::loader::data_dir().join("sessions"))
    }
}

/// External protocol bridge process, spawned once per session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Executable speaking the bridge JSON-RPC protocol on stdio.
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    /// Per-request timeout.
    pub request_timeout_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            command: "zaapi-bridge".into(),
            args: Vec::new(),
            env: HashMap::new(),
            request_timeout_secs: 30,
        }
    }
}

/// Identity the companion device presents when pairing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub os: String,
    pub platform: String,
    /// `[primary, secondary, tertiary]` app version.
    pub version: [u32; 3],
    /// Ask the phone for message history after pairing.
    pub history_sync: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            os: "Windows".into(),
            platform: "chrome".into(),
            version: [118, 0, 2],
            history_sync: false,
        }
    }
}

/// Outbound delivery of inbound messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    pub enabled: bool,
    pub url: Option<String>,
    pub timeout_secs: u64,
    /// Extra attempts after the first failure.
    pub retries: u32,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: None,
            timeout_secs: 5,
            retries: 3,
        }
    }
}

impl WebhookConfig {
    /// The target URL, only when delivery is switched on.
    pub fn active_url(&self) -> Option<&str> {
        if !self.enabled {
            return None;
        }
        self.url.as_deref().filter(|u| !u.trim().is_empty())
    }
}
