//! MCP client: one protocol conversation with one configured server.
//!
//! Owns the transport, assigns request ids, and implements the handshake
//! (initialize + initialized notification), tool discovery and invocation,
//! and the optional resource methods.

use crate::config::{ServerConfig, TransportConfig};
use crate::error::McpError;
use crate::http::HttpTransport;
use crate::jsonrpc::{JsonRpcNotification, JsonRpcRequest};
use crate::transport::{StdioTransport, Transport};
use crate::types::{
    CallToolResult, InitializeParams, InitializeResult, McpResource, McpToolDef,
    ReadResourceResult, ResourcesListResult, ToolsListResult,
};
use serde::de::DeserializeOwned;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Method names tried in order when listing tools.
const LIST_TOOLS_METHODS: [&str; 2] = ["tools/list", "listTools"];

/// Client for a single MCP server.
pub struct McpClient {
    config: ServerConfig,
    transport: Option<Transport>,
    next_id: AtomicU64,
    connected: AtomicBool,
    initialized: AtomicBool,
}

impl McpClient {
    /// Create an unconnected client. No I/O happens until [`connect`](Self::connect).
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            transport: None,
            next_id: AtomicU64::new(1),
            connected: AtomicBool::new(false),
            initialized: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Establish the transport: spawn the process, or validate the endpoint.
    ///
    /// Sends no protocol traffic.
    pub async fn connect(&mut self) -> Result<(), McpError> {
        let transport = match &self.config.transport {
            TransportConfig::Stdio { command, args, env } => {
                if command.trim().is_empty() {
                    return Err(McpError::MissingEndpoint {
                        server: self.config.id.clone(),
                    });
                }
                Transport::Stdio(StdioTransport::spawn(
                    &self.config.id,
                    command,
                    args,
                    env,
                    self.config.timeout_ms,
                )?)
            }
            TransportConfig::Http { url, headers } => {
                if url.trim().is_empty() {
                    return Err(McpError::MissingEndpoint {
                        server: self.config.id.clone(),
                    });
                }
                Transport::Http(HttpTransport::new(url, headers, self.config.timeout_ms)?)
            }
        };

        if let Some(old) = self.transport.replace(transport) {
            old.close().await;
        }
        self.initialized.store(false, Ordering::Release);
        self.connected.store(true, Ordering::Release);
        tracing::debug!(
            server = %self.config.id,
            kind = self.config.transport.kind(),
            "MCP transport established"
        );
        Ok(())
    }

    fn transport(&self) -> Result<&Transport, McpError> {
        match &self.transport {
            Some(t) if self.is_connected() => Ok(t),
            _ => Err(McpError::NotConnected {
                server: self.config.id.clone(),
            }),
        }
    }

    /// Send one request and unwrap its envelope.
    async fn call(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, McpError> {
        let transport = self.transport()?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(server = %self.config.id, id, method, "MCP request");
        transport
            .request(&JsonRpcRequest::new(id, method, params))
            .await?
            .into_result(&self.config.id)
    }

    async fn call_as<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<T, McpError> {
        let result = self.call(method, params).await?;
        serde_json::from_value(result)
            .map_err(|e| McpError::Protocol(format!("Failed to parse {method} result: {e}")))
    }

    /// Perform the handshake and send `notifications/initialized`.
    pub async fn initialize(&self) -> Result<InitializeResult, McpError> {
        let params = serde_json::to_value(InitializeParams::default())?;
        let result: InitializeResult = self.call_as("initialize", Some(params)).await?;

        let notification = JsonRpcNotification::new("notifications/initialized", None);
        if let Err(e) = self.transport()?.notify(&notification).await {
            tracing::warn!(
                server = %self.config.id,
                "Failed to send initialized notification: {e}"
            );
        }

        self.initialized.store(true, Ordering::Release);
        tracing::info!(
            server = %self.config.id,
            remote = result.server_info.as_ref().map(|i| i.name.as_str()).unwrap_or("unknown"),
            "MCP server initialized"
        );
        Ok(result)
    }

    async fn ensure_initialized(&self) -> Result<(), McpError> {
        if !self.initialized.load(Ordering::Acquire) {
            self.initialize().await?;
        }
        Ok(())
    }

    /// Discover the server's tools.
    ///
    /// Tries `tools/list`, then the legacy `listTools`; if both fail the
    /// server is treated as having no tools.
    pub async fn list_tools(&self) -> Vec<McpToolDef> {
        if let Err(e) = self.ensure_initialized().await {
            tracing::warn!(server = %self.config.id, "Cannot list tools: {e}");
            return Vec::new();
        }
        for method in LIST_TOOLS_METHODS {
            match self.call_as::<ToolsListResult>(method, None).await {
                Ok(list) => return list.tools,
                Err(e) => {
                    tracing::warn!(server = %self.config.id, method, "Tool listing failed: {e}")
                }
            }
        }
        Vec::new()
    }

    /// Call a tool by its server-local name.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<CallToolResult, McpError> {
        self.ensure_initialized().await?;
        let params = serde_json::json!({
            "name": name,
            "arguments": arguments,
        });
        self.call_as("tools/call", Some(params)).await
    }

    /// List the server's resources; any failure means none.
    pub async fn list_resources(&self) -> Vec<McpResource> {
        let listed = match self.ensure_initialized().await {
            Ok(()) => self.call_as::<ResourcesListResult>("resources/list", None).await,
            Err(e) => Err(e),
        };
        match listed {
            Ok(list) => list.resources,
            Err(e) => {
                tracing::debug!(server = %self.config.id, "No resources: {e}");
                Vec::new()
            }
        }
    }

    /// Read a resource, returning its first content item's text.
    ///
    /// Any failure, or a first item without text, yields `None`.
    pub async fn read_resource(&self, uri: &str) -> Option<String> {
        let read = match self.ensure_initialized().await {
            Ok(()) => {
                self.call_as::<ReadResourceResult>(
                    "resources/read",
                    Some(serde_json::json!({ "uri": uri })),
                )
                .await
            }
            Err(e) => Err(e),
        };
        match read {
            Ok(result) => result.contents.into_iter().next().and_then(|c| c.text),
            Err(e) => {
                tracing::warn!(server = %self.config.id, uri, "Failed to read resource: {e}");
                None
            }
        }
    }

    /// Tear down the transport. Safe to call at any time, never fails.
    pub async fn disconnect(&self) {
        if !self.connected.swap(false, Ordering::AcqRel) {
            return;
        }
        self.initialized.store(false, Ordering::Release);
        if let Some(transport) = &self.transport {
            transport.close().await;
        }
        tracing::debug!(server = %self.config.id, "MCP transport closed");
    }
}
