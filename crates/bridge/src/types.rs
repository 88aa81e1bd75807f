//! JSON-RPC 2.0 messages and the bridge's method payloads.

use {
    anyhow::{Context, Result},
    serde::{Deserialize, Serialize},
    serde_json::Value,
    zaapi_channels::{InboundMessage, LoginEvent, ProtocolEvent},
    zaapi_config::DeviceConfig,
};

pub const JSONRPC_VERSION: &str = "2.0";

#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id,
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    pub id: Value,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Anything the bridge writes to stdout, before classification.
#[derive(Debug, Deserialize)]
pub(crate) struct IncomingMessage {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

pub(crate) enum Incoming {
    Response(JsonRpcResponse),
    Notification(JsonRpcNotification),
}

impl IncomingMessage {
    /// Messages with a method are notifications; the rest must carry an id.
    pub fn classify(self) -> Option<Incoming> {
        match (self.method, self.id) {
            (Some(method), _) => Some(Incoming::Notification(JsonRpcNotification {
                jsonrpc: JSONRPC_VERSION.into(),
                method,
                params: self.params,
            })),
            (None, Some(id)) => Some(Incoming::Response(JsonRpcResponse {
                id,
                result: self.result,
                error: self.error,
            })),
            (None, None) => None,
        }
    }
}

// ── Bridge methods ──────────────────────────────────────────

pub mod methods {
    pub const INITIALIZE: &str = "initialize";
    pub const CONNECT: &str = "connect";
    pub const DISCONNECT: &str = "disconnect";
    pub const LOGIN_OPEN: &str = "login.open";

    pub const NOTIFY_LOGIN: &str = "login";
    pub const NOTIFY_EVENT: &str = "event";
}

#[derive(Debug, Clone, Serialize)]
pub struct InitializeParams<'a> {
    pub session_id: &'a str,
    /// Directory the bridge keeps the device store in.
    pub store_path: &'a str,
    pub device: &'a DeviceConfig,
}

/// Connection status reported by `initialize` and `connect`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct BridgeStatus {
    #[serde(default)]
    pub has_credentials: bool,
    #[serde(default)]
    pub connected: bool,
    #[serde(default)]
    pub logged_in: bool,
    #[serde(default)]
    pub identity: Option<String>,
}

/// Payload of a `login` notification.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum LoginNotification {
    Code {
        code: String,
    },
    Timeout,
    Error {
        #[serde(default)]
        message: Option<String>,
    },
    Success,
}

impl From<LoginNotification> for LoginEvent {
    fn from(n: LoginNotification) -> Self {
        match n {
            LoginNotification::Code { code } => Self::Code(code),
            LoginNotification::Timeout => Self::Timeout,
            LoginNotification::Error { message } => {
                Self::Error(message.unwrap_or_else(|| "login failed".into()))
            },
            LoginNotification::Success => Self::Success,
        }
    }
}

/// Decode the params of an `event` notification.
///
/// Known types: `qr`, `pair_success`, `connected`, `disconnected`, `message`.
/// Everything else becomes [`ProtocolEvent::Other`].
pub fn decode_event(params: Value) -> Result<ProtocolEvent> {
    let kind = params
        .get("type")
        .and_then(Value::as_str)
        .context("event without type")?
        .to_string();

    let str_field = |name: &str| -> Result<String> {
        params
            .get(name)
            .and_then(Value::as_str)
            .map(str::to_string)
            .with_context(|| format!("{kind} event without {name}"))
    };

    Ok(match kind.as_str() {
        "qr" => ProtocolEvent::LoginCodeIssued {
            code: str_field("code")?,
        },
        "pair_success" => ProtocolEvent::LoginSucceeded {
            identity: str_field("identity")?,
        },
        "connected" => ProtocolEvent::Connected,
        "message" => {
            let message: InboundMessage = serde_json::from_value(
                params
                    .get("message")
                    .cloned()
                    .context("message event without message")?,
            )
            .context("invalid message payload")?;
            ProtocolEvent::MessageReceived(message)
        },
        _ => ProtocolEvent::Other { kind },
    })
}
