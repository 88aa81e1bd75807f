use serde::{Deserialize, Serialize};

/// One step of a QR login attempt, as delivered on a login stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginEvent {
    /// A new login code to show the user. Codes rotate while the stream is open.
    Code(String),
    /// The user did not scan in time.
    Timeout,
    /// The protocol rejected the attempt.
    Error(String),
    /// The device was paired.
    Success,
}

impl LoginEvent {
    /// Terminal events close the stream; nothing follows them.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Code(_))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Code(_) => "code",
            Self::Timeout => "timeout",
            Self::Error(_) => "error",
            Self::Success => "success",
        }
    }
}

/// An inbound chat message, normalized just enough to route it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub id: String,
    /// Sender address.
    pub from: String,
    /// Conversation the message belongs to (equals `from` for direct chats).
    pub chat: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default)]
    pub timestamp_ms: u64,
    /// Full protocol payload, untouched.
    #[serde(default)]
    pub raw: serde_json::Value,
}

/// Inbound protocol events a session reacts to.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolEvent {
    LoginCodeIssued { code: String },
    /// Pairing finished; `identity` is the account address now bound to the device.
    LoginSucceeded { identity: String },
    MessageReceived(InboundMessage),
    /// Transport is up and authenticated.
    Connected,
    /// Anything else the client surfaces; carried by name for logging.
    Other { kind: String },
}

impl ProtocolEvent {
    pub fn kind(&self) -> &str {
        match self {
            Self::LoginCodeIssued { .. } => "login_code",
            Self::LoginSucceeded { .. } => "pair_success",
            Self::MessageReceived(_) => "message",
            Self::Connected => "connected",
            Self::Other { kind } => kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_codes_keep_the_stream_open() {
        assert!(!LoginEvent::Code("2@abc".into()).is_terminal());
        assert!(LoginEvent::Timeout.is_terminal());
        assert!(LoginEvent::Error("boom".into()).is_terminal());
        assert!(LoginEvent::Success.is_terminal());
    }

    #[test]
    fn message_deserializes_with_missing_optionals() {
        let msg: InboundMessage = serde_json::from_str(
            r#"{"id":"ABC","from":"5511@s.whatsapp.net","chat":"5511@s.whatsapp.net"}"#,
        )
        .unwrap();
        assert_eq!(msg.text, None);
        assert_eq!(msg.timestamp_ms, 0);
        assert!(msg.raw.is_null());
    }

    #[test]
    fn other_events_report_their_kind() {
        let evt = ProtocolEvent::Other {
            kind: "receipt".into(),
        };
        assert_eq!(evt.kind(), "receipt");
        assert_eq!(ProtocolEvent::Connected.kind(), "connected");
    }
}
