//! `/sessions` handlers.

use std::sync::Arc;

use {
    axum::{
        body::Bytes,
        extract::{Path, Query, State},
        http::StatusCode,
        response::{IntoResponse, Json},
    },
    serde::Deserialize,
    serde_json::json,
    tracing::{info, warn},
    zaapi_sessions::{Session, SessionError, SessionSnapshot, generate_session_id},
};

use crate::{error::ApiError, state::AppState};

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Default, Deserialize)]
pub struct CreateSessionRequest {
    #[serde(default)]
    pub id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DeleteQuery {
    #[serde(default)]
    pub purge: bool,
}

async fn lookup(state: &AppState, id: &str) -> ApiResult<Arc<Session>> {
    state
        .manager
        .get(id)
        .await
        .ok_or_else(|| SessionError::NotFound(id.to_string()).into())
}

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": state.version,
        "sessions": state.manager.len().await,
        "uptime_secs": state.uptime_secs(),
    }))
}

pub async fn list_sessions(State(state): State<AppState>) -> Json<Vec<SessionSnapshot>> {
    Json(state.manager.list().await)
}

/// Body is optional; an empty body gets a generated id.
pub async fn create_session(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    let request: CreateSessionRequest = if body.iter().all(u8::is_ascii_whitespace) {
        CreateSessionRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?
    };
    let id = request
        .id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .unwrap_or_else(generate_session_id);

    let session = state.manager.create(&id).await?;
    let session = state.manager.register(session).await?;
    if let Err(e) = session.start().await {
        // Nothing was handed out yet; the record on disk stays for a later restore.
        state.manager.remove(&id).await;
        warn!(session = %id, error = %e, "new session failed to start, deregistered");
        return Err(e.into());
    }
    info!(session = %id, "session created");

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "session created",
            "session_id": id,
        })),
    ))
}

pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<SessionSnapshot>> {
    Ok(Json(lookup(&state, &id).await?.snapshot()))
}

pub async fn start_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let session = lookup(&state, &id).await?;
    session.start().await?;
    Ok(Json(json!({
        "message": "session started",
        "session_id": id,
        "phase": session.phase(),
    })))
}

pub async fn stop_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    lookup(&state, &id).await?.stop().await?;
    Ok(Json(json!({
        "message": "session stopped",
        "session_id": id,
    })))
}

pub async fn session_qr(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let ticket = lookup(&state, &id).await?.qr()?;
    Ok(Json(ticket))
}

pub async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<DeleteQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    state.manager.stop_and_remove(&id, query.purge).await?;
    Ok(Json(json!({
        "message": "session deleted",
        "session_id": id,
        "purged": query.purge,
    })))
}
