use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = SessionError> = std::result::Result<T, E>;

/// Failures surfaced by the session layer.
///
/// Every variant is an expected condition under misuse (duplicate start,
/// unknown id, ...) and carries a stable [`code`](SessionError::code).
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid session id {id:?}: {reason}")]
    InvalidId { id: String, reason: &'static str },

    #[error("session {0} already exists")]
    AlreadyExists(String),

    #[error("session {0} is already running")]
    AlreadyRunning(String),

    #[error("session {0} is already logged in")]
    AlreadyLoggedIn(String),

    #[error("session {0} is not running")]
    NotRunning(String),

    #[error("session {0} not found")]
    NotFound(String),

    /// Retryable: a QR code is being generated.
    #[error("QR code for session {0} is being generated, try again in a few seconds")]
    LoginPending(String),

    #[error("session {id} failed to connect: {reason}")]
    ConnectFailure { id: String, reason: String },

    #[error("session storage error at {}: {reason}", path.display())]
    PersistenceFailure { path: PathBuf, reason: String },

    #[error("failed to set up protocol client for session {id}: {reason}")]
    ClientSetup { id: String, reason: String },
}

impl SessionError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidId { .. } => "invalid_id",
            Self::AlreadyExists(_) => "already_exists",
            Self::AlreadyRunning(_) => "already_running",
            Self::AlreadyLoggedIn(_) => "already_logged_in",
            Self::NotRunning(_) => "not_running",
            Self::NotFound(_) => "not_found",
            Self::LoginPending(_) => "login_pending",
            Self::ConnectFailure { .. } => "connect_failure",
            Self::PersistenceFailure { .. } => "persistence_failure",
            Self::ClientSetup { .. } => "client_setup",
        }
    }

    /// The caller should poll again shortly instead of treating this as a failure.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::LoginPending(_))
    }

    pub(crate) fn persistence(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        Self::PersistenceFailure {
            path: path.into(),
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_login_pending_is_retryable() {
        assert!(SessionError::LoginPending("abc".into()).is_retryable());
        assert!(!SessionError::AlreadyLoggedIn("abc".into()).is_retryable());
        assert!(!SessionError::NotFound("abc".into()).is_retryable());
    }

    #[test]
    fn messages_carry_the_reason() {
        let err = SessionError::ConnectFailure {
            id: "abc".into(),
            reason: "connection refused".into(),
        };
        assert_eq!(err.to_string(), "session abc failed to connect: connection refused");
        assert_eq!(err.code(), "connect_failure");

        let err = SessionError::persistence("/tmp/s/abc/session.yml", "permission denied");
        assert_eq!(
            err.to_string(),
            "session storage error at /tmp/s/abc/session.yml: permission denied"
        );
    }
}
