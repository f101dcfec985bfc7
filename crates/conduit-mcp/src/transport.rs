//! Transports that deliver one JSON-RPC request and return its correlated reply.
//!
//! The stdio transport spawns a child process and speaks newline-delimited
//! JSON-RPC over stdin/stdout; the HTTP transport lives in [`crate::http`].

use crate::error::McpError;
use crate::http::HttpTransport;
use crate::jsonrpc::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;

/// How long a child gets to exit after stdin closes before it is killed.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>;

/// A connected transport, chosen by the server's configured kind.
pub enum Transport {
    Stdio(StdioTransport),
    Http(HttpTransport),
}

impl Transport {
    /// Send a request and wait for the reply carrying the same id.
    pub async fn request(&self, request: &JsonRpcRequest) -> Result<JsonRpcResponse, McpError> {
        match self {
            Self::Stdio(t) => t.request(request).await,
            Self::Http(t) => t.request(request).await,
        }
    }

    /// Send a notification; no reply is expected.
    pub async fn notify(&self, notification: &JsonRpcNotification) -> Result<(), McpError> {
        match self {
            Self::Stdio(t) => t.notify(notification).await,
            Self::Http(t) => t.notify(notification).await,
        }
    }

    /// Release the transport. Never fails.
    pub async fn close(&self) {
        match self {
            Self::Stdio(t) => t.shutdown().await,
            Self::Http(_) => {}
        }
    }
}

/// Async stdio transport for communicating with an MCP server process.
pub struct StdioTransport {
    name: String,
    write_tx: Mutex<Option<mpsc::Sender<String>>>,
    pending: PendingMap,
    reader_handle: JoinHandle<()>,
    writer_handle: JoinHandle<()>,
    child: Arc<Mutex<Child>>,
    timeout_ms: u64,
}

impl StdioTransport {
    /// Spawn a child process and start background reader/writer tasks.
    pub fn spawn(
        name: &str,
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
        timeout_ms: u64,
    ) -> Result<Self, McpError> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| McpError::SpawnFailed {
            name: command.to_string(),
            source: e,
        })?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(McpError::Protocol(format!(
                "MCP server '{name}' started without piped stdio"
            )));
        };

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));

        // Writer task: drains channel and writes to child stdin
        let (write_tx, mut write_rx) = mpsc::channel::<String>(64);
        let writer_handle = tokio::spawn(async move {
            let mut stdin = stdin;
            while let Some(msg) = write_rx.recv().await {
                if stdin.write_all(msg.as_bytes()).await.is_err()
                    || stdin.write_all(b"\n").await.is_err()
                    || stdin.flush().await.is_err()
                {
                    break;
                }
            }
        });

        // Reader task: routes replies to waiting requests by id
        let pending_for_reader = Arc::clone(&pending);
        let server = name.to_string();
        let reader_handle = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let Some(resp) = parse_line(&server, &line) else {
                    continue;
                };
                match resp.id {
                    Some(id) => {
                        if let Some(tx) = pending_for_reader.lock().await.remove(&id) {
                            let _ = tx.send(resp);
                        }
                    }
                    None => tracing::debug!(server = %server, "Ignoring MCP message without id"),
                }
            }
            // Process gone: fail everything still waiting
            pending_for_reader.lock().await.clear();
            tracing::debug!(server = %server, "MCP stdout closed");
        });

        Ok(Self {
            name: name.to_string(),
            write_tx: Mutex::new(Some(write_tx)),
            pending,
            reader_handle,
            writer_handle,
            child: Arc::new(Mutex::new(child)),
            timeout_ms,
        })
    }

    async fn write(&self, line: String) -> Result<(), McpError> {
        let tx = self
            .write_tx
            .lock()
            .await
            .clone()
            .ok_or_else(|| McpError::NotConnected {
                server: self.name.clone(),
            })?;
        tx.send(line)
            .await
            .map_err(|_| McpError::Protocol("Writer channel closed".to_string()))
    }

    /// Send a JSON-RPC request and wait for the response.
    pub async fn request(&self, request: &JsonRpcRequest) -> Result<JsonRpcResponse, McpError> {
        let serialized = serde_json::to_string(request)?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(request.id, tx);

        if let Err(e) = self.write(serialized).await {
            self.pending.lock().await.remove(&request.id);
            return Err(e);
        }

        match tokio::time::timeout(Duration::from_millis(self.timeout_ms), rx).await {
            Ok(Ok(resp)) => Ok(resp),
            Ok(Err(_)) => Err(McpError::Protocol(format!(
                "MCP server '{}' closed the connection",
                self.name
            ))),
            Err(_) => {
                self.pending.lock().await.remove(&request.id);
                Err(McpError::Timeout {
                    name: request.method.clone(),
                    timeout_ms: self.timeout_ms,
                })
            }
        }
    }

    /// Send a JSON-RPC notification (fire-and-forget, no response expected).
    pub async fn notify(&self, notification: &JsonRpcNotification) -> Result<(), McpError> {
        self.write(serde_json::to_string(notification)?).await
    }

    /// Close stdin, give the child a moment to exit, then kill it.
    ///
    /// Safe to call more than once.
    pub async fn shutdown(&self) {
        let Some(write_tx) = self.write_tx.lock().await.take() else {
            return;
        };
        drop(write_tx);

        let graceful = tokio::time::timeout(SHUTDOWN_GRACE, async {
            let _ = self.child.lock().await.wait().await;
        })
        .await;

        if graceful.is_err() {
            tracing::debug!(server = %self.name, "MCP server did not exit, killing");
            let _ = self.child.lock().await.kill().await;
        }

        self.reader_handle.abort();
        self.writer_handle.abort();
    }
}

/// Decode one stdout line: plain JSON, or an event-stream `data:` line.
fn parse_line(server: &str, line: &str) -> Option<JsonRpcResponse> {
    let line = line.trim();
    if line.is_empty() || line.starts_with("event:") || line.starts_with(':') {
        return None;
    }
    let payload = line.strip_prefix("data:").map(str::trim_start).unwrap_or(line);
    match serde_json::from_str(payload) {
        Ok(resp) => Some(resp),
        Err(e) => {
            tracing::warn!(server = %server, "Failed to parse MCP message: {e}: {payload}");
            None
        }
    }
}
