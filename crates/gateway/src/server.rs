use std::{net::SocketAddr, sync::Arc, time::Duration};

use {
    anyhow::Context,
    axum::{
        Router,
        extract::Request,
        http::HeaderName,
        middleware,
        routing::{get, post},
    },
    tower::ServiceBuilder,
    tower_http::{
        cors::{Any, CorsLayer},
        request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
        trace::TraceLayer,
    },
    tracing::{info, info_span, warn},
    zaapi_bridge::BridgeClientFactory,
    zaapi_config::ZaapiConfig,
    zaapi_sessions::{LogSink, MessageSink, SessionManager},
};

use crate::{auth, routes, state::AppState, webhook::WebhookSink};

const REQUEST_ID_HEADER: &str = "x-request-id";

// ── Router ───────────────────────────────────────────────────────────────────

/// Build the gateway router (shared between production startup and tests).
pub fn build_gateway_app(state: AppState) -> Router {
    let request_id = HeaderName::from_static(REQUEST_ID_HEADER);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let sessions = Router::new()
        .route(
            "/sessions",
            get(routes::list_sessions).post(routes::create_session),
        )
        .route(
            "/sessions/{id}",
            get(routes::get_session).delete(routes::delete_session),
        )
        .route("/sessions/{id}/start", post(routes::start_session))
        .route("/sessions/{id}/stop", post(routes::stop_session))
        .route("/sessions/{id}/qr", get(routes::session_qr))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_token,
        ));

    let trace = TraceLayer::new_for_http().make_span_with(|request: &Request| {
        let request_id = request
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("-");
        info_span!(
            "http",
            method = %request.method(),
            path = %request.uri().path(),
            request_id = %request_id,
        )
    });

    Router::new()
        .route("/health", get(routes::health))
        .merge(sessions)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(request_id.clone(), MakeRequestUuid))
                .layer(trace)
                .layer(PropagateRequestIdLayer::new(request_id))
                .layer(cors),
        )
        .with_state(state)
}

// ── Server startup ───────────────────────────────────────────────────────────

/// Build the session manager described by `config`.
pub fn build_manager(config: &ZaapiConfig) -> anyhow::Result<SessionManager> {
    let root = config.sessions.root();
    std::fs::create_dir_all(&root)
        .with_context(|| format!("failed to create session root {}", root.display()))?;

    let sink: Arc<dyn MessageSink> = match WebhookSink::from_config(&config.webhook)? {
        Some(sink) => {
            info!(url = %sink.url(), "forwarding inbound messages to webhook");
            Arc::new(sink)
        },
        None => Arc::new(LogSink),
    };
    let factory = Arc::new(BridgeClientFactory::new(
        config.bridge.clone(),
        config.whatsapp.clone(),
    ));

    Ok(SessionManager::new(root, factory)
        .with_sink(sink)
        .with_qr_ttl(Duration::from_secs(config.sessions.qr_ttl_secs.max(1))))
}

/// Start the HTTP gateway and run until Ctrl-C.
pub async fn start_gateway(config: ZaapiConfig) -> anyhow::Result<()> {
    let manager = Arc::new(build_manager(&config)?);

    let mut restored = Vec::new();
    if config.sessions.restore_on_start {
        match manager.restore_all().await {
            Ok(sessions) => restored = sessions,
            Err(e) => warn!(error = %e, "failed to restore sessions"),
        }
    }
    let autostarted = if config.sessions.autostart {
        manager.autostart_restored(&restored).await
    } else {
        0
    };

    let state = AppState::new(Arc::clone(&manager), config.server.token.clone());
    let app = build_gateway_app(state.clone());

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .with_context(|| {
            format!(
                "invalid bind address {}:{}",
                config.server.host, config.server.port
            )
        })?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    // Startup banner.
    let lines = [
        format!("zaapi gateway v{}", state.version),
        format!("listening on {addr}"),
        format!(
            "sessions: {} restored, {} started",
            restored.len(),
            autostarted
        ),
        format!("session root: {}", manager.store().root().display()),
        format!(
            "auth: {}",
            if state.token.is_some() {
                "bearer token"
            } else {
                "disabled"
            }
        ),
    ];
    let width = lines.iter().map(|l| l.len()).max().unwrap_or(0) + 4;
    info!("┌{}┐", "─".repeat(width));
    for line in &lines {
        info!("│  {:<w$}│", line, w = width - 2);
    }
    info!("└{}┘", "─".repeat(width));

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    manager.shutdown().await;
    served.context("gateway server error")
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        axum::{
            body::{Body, to_bytes},
            http::{self, Method, StatusCode},
        },
        serde_json::Value,
        tower::ServiceExt,
        zaapi_channels::{LoginEvent, ProtocolClient, memory::MemoryClientFactory},
    };

    struct Harness {
        dir: tempfile::TempDir,
        factory: Arc<MemoryClientFactory>,
        app: Router,
    }

    fn harness_with_token(token: Option<&str>) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let factory = Arc::new(MemoryClientFactory::new());
        let manager = Arc::new(SessionManager::new(dir.path(), factory.clone()));
        let app = build_gateway_app(AppState::new(manager, token.map(str::to_string)));
        Harness { dir, factory, app }
    }

    fn harness() -> Harness {
        harness_with_token(None)
    }

    async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        call_with(app, method, uri, body, None).await
    }

    async fn call_with(
        app: &Router,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> (StatusCode, Value) {
        let mut request = http::Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            request = request.header("authorization", format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let h = harness();
        let (status, body) = call(&h.app, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["sessions"], 0);
    }

    #[tokio::test]
    async fn responses_carry_a_request_id() {
        let h = harness();
        let request = http::Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let response = h.app.clone().oneshot(request).await.unwrap();
        assert!(response.headers().contains_key(REQUEST_ID_HEADER));
    }

    #[tokio::test]
    async fn create_without_body_generates_an_id() {
        let h = harness();
        let (status, body) = call(&h.app, Method::POST, "/sessions", None).await;
        assert_eq!(status, StatusCode::CREATED);
        let id = body["session_id"].as_str().unwrap();
        assert_eq!(id.len(), 32);

        let (status, list) = call(&h.app, Method::GET, "/sessions", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(list[0]["id"], id);
        assert_eq!(list[0]["running"], true);
    }

    #[tokio::test]
    async fn create_rejects_bad_input() {
        let h = harness();
        let (status, body) = call(
            &h.app,
            Method::POST,
            "/sessions",
            Some(serde_json::json!({"id": "bad id!"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "invalid_id");

        let request = http::Request::builder()
            .method(Method::POST)
            .uri("/sessions")
            .body(Body::from("{not json"))
            .unwrap();
        let response = h.app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn duplicate_create_conflicts() {
        let h = harness();
        let body = Some(serde_json::json!({"id": "abc"}));
        let (status, _) = call(&h.app, Method::POST, "/sessions", body.clone()).await;
        assert_eq!(status, StatusCode::CREATED);
        let (status, body) = call(&h.app, Method::POST, "/sessions", body).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "already_exists");
    }

    #[tokio::test]
    async fn create_that_cannot_connect_is_not_left_registered() {
        let h = harness();
        h.factory.mark_paired("abc");
        h.factory.mark_unreachable("abc");

        let (status, body) = call(
            &h.app,
            Method::POST,
            "/sessions",
            Some(serde_json::json!({"id": "abc"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["code"], "connect_failure");

        let (status, _) = call(&h.app, Method::GET, "/sessions/abc", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(h.dir.path().join("abc").join("session.yml").exists());
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let h = harness();
        for (method, uri) in [
            (Method::GET, "/sessions/nope"),
            (Method::GET, "/sessions/nope/qr"),
            (Method::POST, "/sessions/nope/start"),
            (Method::POST, "/sessions/nope/stop"),
            (Method::DELETE, "/sessions/nope"),
        ] {
            let (status, body) = call(&h.app, method, uri, None).await;
            assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
            assert_eq!(body["code"], "not_found");
        }
    }

    #[tokio::test]
    async fn qr_is_pending_then_served_then_blocked_after_login() {
        let h = harness();
        call(
            &h.app,
            Method::POST,
            "/sessions",
            Some(serde_json::json!({"id": "abc"})),
        )
        .await;

        let (status, body) = call(&h.app, Method::GET, "/sessions/abc/qr", None).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["code"], "ZAAPI-0001");

        let client = h.factory.client("abc").unwrap();
        for _ in 0..100 {
            if client.has_open_login_stream() && client.is_connected() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(client.push_login(LoginEvent::Code("2@first".into())));

        let mut served = None;
        for _ in 0..100 {
            let (status, body) = call(&h.app, Method::GET, "/sessions/abc/qr", None).await;
            if status == StatusCode::OK {
                served = Some(body);
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let served = served.unwrap();
        assert!(!served["base64"].as_str().unwrap().is_empty());
        assert!(served["expires_in"].as_u64().unwrap() > 0);

        client.push_login(LoginEvent::Success);
        for _ in 0..100 {
            if !client.has_open_login_stream() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let (status, body) = call(&h.app, Method::GET, "/sessions/abc/qr", None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "already_logged_in");
    }

    #[tokio::test]
    async fn start_stop_and_delete() {
        let h = harness();
        call(
            &h.app,
            Method::POST,
            "/sessions",
            Some(serde_json::json!({"id": "abc"})),
        )
        .await;

        let (status, _) = call(&h.app, Method::POST, "/sessions/abc/start", None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = call(&h.app, Method::POST, "/sessions/abc/stop", None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) = call(&h.app, Method::GET, "/sessions/abc/qr", None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "not_running");

        let (status, body) = call(&h.app, Method::GET, "/sessions/abc", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["phase"], "stopped");

        let (status, _) = call(&h.app, Method::DELETE, "/sessions/abc?purge=true", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(!h.dir.path().join("abc").exists());
        let (status, _) = call(&h.app, Method::GET, "/sessions/abc", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn token_guards_session_routes_only() {
        let h = harness_with_token(Some("s3cret"));

        let (status, _) = call(&h.app, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = call(&h.app, Method::GET, "/sessions", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "token_missing");

        let (status, _) =
            call_with(&h.app, Method::GET, "/sessions", None, Some("wrong")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) =
            call_with(&h.app, Method::GET, "/sessions", None, Some("s3cret")).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[test]
    fn manager_builds_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ZaapiConfig::default();
        config.sessions.dir = Some(dir.path().join("sessions"));
        let manager = build_manager(&config).unwrap();
        assert!(dir.path().join("sessions").is_dir());
        assert_eq!(manager.store().root(), dir.path().join("sessions"));
    }
}
