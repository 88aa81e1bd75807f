use {
    axum::{
        http::StatusCode,
        response::{IntoResponse, Json, Response},
    },
    serde_json::json,
    tracing::warn,
    zaapi_sessions::SessionError,
};

/// Code returned with `202 Accepted` while a QR code is being generated.
pub const LOGIN_PENDING_CODE: &str = "ZAAPI-0001";

#[derive(Debug)]
pub enum ApiError {
    Session(SessionError),
    BadRequest(String),
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        Self::Session(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Session(err) => match err {
                SessionError::InvalidId { .. } => StatusCode::BAD_REQUEST,
                SessionError::NotFound(_) => StatusCode::NOT_FOUND,
                SessionError::AlreadyExists(_)
                | SessionError::AlreadyRunning(_)
                | SessionError::AlreadyLoggedIn(_)
                | SessionError::NotRunning(_) => StatusCode::CONFLICT,
                SessionError::LoginPending(_) => StatusCode::ACCEPTED,
                SessionError::ConnectFailure { .. } => StatusCode::BAD_GATEWAY,
                SessionError::PersistenceFailure { .. } | SessionError::ClientSetup { .. } => {
                    StatusCode::INTERNAL_SERVER_ERROR
                },
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            Self::BadRequest(message) => json!({ "error": message, "code": "bad_request" }),
            Self::Session(err @ SessionError::LoginPending(_)) => {
                json!({ "message": err.to_string(), "code": LOGIN_PENDING_CODE })
            },
            Self::Session(err) => {
                if status.is_server_error() {
                    warn!(error = %err, code = err.code(), "request failed");
                }
                json!({ "error": err.to_string(), "code": err.code() })
            },
        };
        (status, Json(body)).into_response()
    }
}
