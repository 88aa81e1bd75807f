use axum::{
    extract::{Request, State},
    http::{StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Json, Response},
};

use crate::state::AppState;

// ── Helpers ──────────────────────────────────────────────────────────────────

/// Constant-time string comparison (prevents timing attacks).
fn safe_equal(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let diff = a
        .as_bytes()
        .iter()
        .zip(b.as_bytes())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y));
    diff == 0
}

/// Pull the token out of `Authorization: Bearer <token>`.
fn bearer_token(value: &str) -> Option<&str> {
    let (scheme, token) = value.split_once(' ')?;
    scheme
        .eq_ignore_ascii_case("bearer")
        .then(|| token.trim())
        .filter(|t| !t.is_empty())
}

/// Result of checking a request against the configured token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    /// No token configured.
    Open,
    Accepted,
    Missing,
    Mismatch,
}

impl AuthOutcome {
    pub fn is_ok(self) -> bool {
        matches!(self, Self::Open | Self::Accepted)
    }

    fn reason(self) -> &'static str {
        match self {
            Self::Open | Self::Accepted => "ok",
            Self::Missing => "token_missing",
            Self::Mismatch => "token_mismatch",
        }
    }
}

pub fn authorize(expected: Option<&str>, authorization: Option<&str>) -> AuthOutcome {
    let Some(expected) = expected else {
        return AuthOutcome::Open;
    };
    let Some(given) = authorization.and_then(bearer_token) else {
        return AuthOutcome::Missing;
    };
    if safe_equal(given, expected) {
        AuthOutcome::Accepted
    } else {
        AuthOutcome::Mismatch
    }
}

// ── Middleware ───────────────────────────────────────────────────────────────

pub async fn require_token(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let authorization = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    let outcome = authorize(state.token.as_deref(), authorization);
    if outcome.is_ok() {
        return next.run(request).await;
    }

    tracing::debug!(reason = outcome.reason(), path = %request.uri().path(), "rejected request");
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({
            "error": "missing or invalid bearer token",
            "code": outcome.reason(),
        })),
    )
        .into_response()
}
