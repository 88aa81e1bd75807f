//! Stdio transport: spawn the bridge process and exchange JSON-RPC over stdin/stdout.

use std::{
    collections::HashMap,
    path::Path,
    process::Stdio,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use {
    anyhow::{Context, Result, bail},
    tokio::{
        io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
        process::{Child, ChildStdin, Command},
        sync::{Mutex, mpsc, oneshot},
        task::JoinHandle,
    },
    tracing::{debug, trace, warn},
};

use crate::types::{Incoming, IncomingMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};

type Pending = Arc<Mutex<HashMap<String, oneshot::Sender<JsonRpcResponse>>>>;

/// How to launch a bridge process.
#[derive(Debug, Clone)]
pub struct SpawnSpec<'a> {
    pub command: &'a str,
    pub args: &'a [String],
    pub env: &'a HashMap<String, String>,
    pub cwd: Option<&'a Path>,
    pub request_timeout: Duration,
}

/// One bridge child process. Notifications are forwarded to the channel given
/// at spawn time; the channel closes when the process's stdout does.
pub struct StdioTransport {
    child: Mutex<Child>,
    stdin: Mutex<ChildStdin>,
    pending: Pending,
    next_id: AtomicU64,
    request_timeout: Duration,
    reader_handle: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl StdioTransport {
    /// Spawn the process and start the reader loop.
    pub async fn spawn(
        spec: SpawnSpec<'_>,
        notifications: mpsc::UnboundedSender<JsonRpcNotification>,
    ) -> Result<Arc<Self>> {
        let mut cmd = Command::new(spec.command);
        cmd.args(spec.args)
            .envs(spec.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = spec.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd
            .spawn()
            .with_context(|| format!("failed to spawn bridge: {}", spec.command))?;

        let stdin = child.stdin.take().context("failed to capture stdin")?;
        let stdout = child.stdout.take().context("failed to capture stdout")?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(target: "zaapi_bridge::stderr", "{line}");
                }
            });
        }

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let reader_pending = Arc::clone(&pending);
        let handle = tokio::spawn(async move {
            let mut reader = BufReader::new(stdout);
            let mut line = String::new();
            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => {
                        debug!("bridge stdout closed");
                        break;
                    },
                    Ok(_) => {
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            continue;
                        }
                        trace!(raw = %trimmed, "bridge -> client");

                        let message = match serde_json::from_str::<IncomingMessage>(trimmed) {
                            Ok(message) => message,
                            Err(e) => {
                                warn!(error = %e, "unparsable line from bridge");
                                continue;
                            },
                        };
                        match message.classify() {
                            Some(Incoming::Response(resp)) => {
                                let key = resp.id.to_string();
                                if let Some(tx) = reader_pending.lock().await.remove(&key) {
                                    let _ = tx.send(resp);
                                } else {
                                    warn!(id = %key, "received response for unknown request id");
                                }
                            },
                            Some(Incoming::Notification(notification)) => {
                                if notifications.send(notification).is_err() {
                                    trace!("notification receiver gone");
                                }
                            },
                            None => warn!("bridge message without id or method"),
                        }
                    },
                    Err(e) => {
                        warn!(error = %e, "error reading from bridge stdout");
                        break;
                    },
                }
            }
            // Fail every in-flight request instead of letting it time out.
            reader_pending.lock().await.clear();
        });

        Ok(Arc::new(Self {
            child: Mutex::new(child),
            stdin: Mutex::new(stdin),
            pending,
            next_id: AtomicU64::new(1),
            request_timeout: spec.request_timeout,
            reader_handle: std::sync::Mutex::new(Some(handle)),
        }))
    }

    /// Send a request and wait for its response. JSON-RPC errors become `Err`.
    pub async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<JsonRpcResponse> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let req = JsonRpcRequest::new(id, method, params);
        let id_key = serde_json::Value::from(id).to_string();

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id_key.clone(), tx);

        let mut payload = serde_json::to_string(&req)?;
        payload.push('\n');
        trace!(method = %method, id = %id, "client -> bridge");

        let written = {
            let mut stdin = self.stdin.lock().await;
            match stdin.write_all(payload.as_bytes()).await {
                Ok(()) => stdin.flush().await,
                Err(e) => Err(e),
            }
        };
        if let Err(e) = written {
            self.pending.lock().await.remove(&id_key);
            return Err(e).context("failed to write to bridge");
        }

        let resp = match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(resp) => resp.context("bridge closed before responding")?,
            Err(_) => {
                self.pending.lock().await.remove(&id_key);
                bail!("bridge request {method} timed out");
            },
        };

        if let Some(ref err) = resp.error {
            bail!("bridge error {}: {}", err.code, err.message);
        }
        Ok(resp)
    }

    pub async fn is_alive(&self) -> bool {
        let mut child = self.child.lock().await;
        matches!(child.try_wait(), Ok(None))
    }

    pub async fn kill(&self) {
        self.abort_reader();
        let mut child = self.child.lock().await;
        let _ = child.kill().await;
    }

    fn abort_reader(&self) {
        let handle = self
            .reader_handle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        // The child itself goes with `kill_on_drop`.
        self.abort_reader();
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn spec<'a>(command: &'a str, args: &'a [String], env: &'a HashMap<String, String>) -> SpawnSpec<'a> {
        SpawnSpec {
            command,
            args,
            env,
            cwd: None,
            request_timeout: Duration::from_millis(300),
        }
    }

    #[tokio::test]
    async fn spawn_and_kill() {
        let env = HashMap::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let transport = StdioTransport::spawn(spec("cat", &[], &env), tx).await.unwrap();
        assert!(transport.is_alive().await);
        transport.kill().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!transport.is_alive().await);
    }

    #[tokio::test]
    async fn spawn_nonexistent_command() {
        let env = HashMap::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let result = StdioTransport::spawn(spec("nonexistent_command_xyz_42", &[], &env), tx).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn silent_bridge_times_out() {
        let env = HashMap::new();
        let args = vec!["-c".to_string(), "while read line; do :; done".to_string()];
        let (tx, _rx) = mpsc::unbounded_channel();
        let transport = StdioTransport::spawn(spec("sh", &args, &env), tx).await.unwrap();

        let err = transport.request("connect", None).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
        assert!(transport.pending.lock().await.is_empty());
    }

    #[tokio::test]
    async fn routes_responses_and_notifications() {
        let env = HashMap::new();
        let script = r#"read line
echo '{"jsonrpc":"2.0","method":"event","params":{"type":"connected"}}'
echo '{"jsonrpc":"2.0","id":1,"result":{"ok":true}}'
read line"#;
        let args = vec!["-c".to_string(), script.to_string()];
        let (tx, mut rx) = mpsc::unbounded_channel();
        let transport = StdioTransport::spawn(spec("sh", &args, &env), tx).await.unwrap();

        let resp = transport.request("connect", None).await.unwrap();
        assert_eq!(resp.result, Some(serde_json::json!({"ok": true})));

        let notification = rx.recv().await.unwrap();
        assert_eq!(notification.method, "event");
    }

    #[tokio::test]
    async fn error_responses_fail_the_request() {
        let env = HashMap::new();
        let script = r#"read line
echo '{"jsonrpc":"2.0","id":1,"error":{"code":-32601,"message":"no such method"}}'
read line"#;
        let args = vec!["-c".to_string(), script.to_string()];
        let (tx, _rx) = mpsc::unbounded_channel();
        let transport = StdioTransport::spawn(spec("sh", &args, &env), tx).await.unwrap();

        let err = transport.request("bogus", None).await.unwrap_err();
        assert!(err.to_string().contains("no such method"));
    }
}
