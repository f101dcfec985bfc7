//! HTTP transport for remote MCP servers.
//!
//! Each call is a single POST. The reply is either a plain JSON body or an
//! event-stream body, selected by the response's Content-Type.

use crate::error::McpError;
use crate::jsonrpc::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use reqwest::Client;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;

const MCP_SESSION_ID_HEADER: &str = "Mcp-Session-Id";
const ACCEPT_HEADER: &str = "application/json, text/event-stream";

/// HTTP transport for a remote MCP server.
pub struct HttpTransport {
    client: Client,
    url: String,
    headers: HashMap<String, String>,
    /// Session identifier issued by the server, echoed on later requests.
    session_id: RwLock<Option<String>>,
    timeout_ms: u64,
}

impl HttpTransport {
    pub fn new(
        url: &str,
        headers: &HashMap<String, String>,
        timeout_ms: u64,
    ) -> Result<Self, McpError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| McpError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            url: url.to_string(),
            headers: headers.clone(),
            session_id: RwLock::new(None),
            timeout_ms,
        })
    }

    async fn post(
        &self,
        method: &str,
        body: &impl serde::Serialize,
    ) -> Result<reqwest::Response, McpError> {
        let mut req = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(reqwest::header::ACCEPT, ACCEPT_HEADER);

        for (name, value) in &self.headers {
            req = req.header(name.as_str(), value.as_str());
        }

        if let Some(session_id) = self.session_id.read().await.clone() {
            req = req.header(MCP_SESSION_ID_HEADER, session_id);
        }

        tracing::debug!(url = %self.url, method, "MCP HTTP request");

        let resp = req.json(body).send().await.map_err(|e| self.map_send_error(method, e))?;
        self.store_session_id(&resp).await;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(McpError::Http {
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp)
    }

    fn map_send_error(&self, method: &str, e: reqwest::Error) -> McpError {
        if e.is_timeout() {
            McpError::Timeout {
                name: method.to_string(),
                timeout_ms: self.timeout_ms,
            }
        } else {
            McpError::Network(e.to_string())
        }
    }

    async fn store_session_id(&self, resp: &reqwest::Response) {
        let Some(session_id) = resp
            .headers()
            .get(MCP_SESSION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty())
        else {
            return;
        };

        let mut slot = self.session_id.write().await;
        if slot.as_deref() != Some(session_id) {
            tracing::debug!(url = %self.url, session_id, "Updated MCP session id");
            *slot = Some(session_id.to_string());
        }
    }

    /// POST a request and decode the single reply.
    pub async fn request(&self, request: &JsonRpcRequest) -> Result<JsonRpcResponse, McpError> {
        let resp = self.post(&request.method, request).await?;
        let event_stream = response_is_event_stream(&resp);
        let body = resp
            .text()
            .await
            .map_err(|e| self.map_send_error(&request.method, e))?;

        if event_stream {
            parse_event_stream(&body)
        } else {
            Ok(serde_json::from_str(&body)?)
        }
    }

    /// POST a notification; any 2xx status is accepted and the body ignored.
    pub async fn notify(&self, notification: &JsonRpcNotification) -> Result<(), McpError> {
        self.post(&notification.method, notification).await?;
        Ok(())
    }

    /// Lightweight reachability check with an OPTIONS request.
    ///
    /// Any HTTP response, error statuses included, counts as reachable.
    pub async fn probe(&self) -> Result<u16, McpError> {
        let resp = self
            .client
            .request(reqwest::Method::OPTIONS, &self.url)
            .send()
            .await
            .map_err(|e| self.map_send_error("OPTIONS", e))?;
        Ok(resp.status().as_u16())
    }
}

fn response_is_event_stream(resp: &reqwest::Response) -> bool {
    resp.headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|ct| ct.split(';').next())
        .is_some_and(|base| base.trim() == "text/event-stream")
}

/// Parse the first `data:` line of an event-stream body; the rest is discarded.
fn parse_event_stream(body: &str) -> Result<JsonRpcResponse, McpError> {
    let data = body
        .lines()
        .find_map(|line| line.strip_prefix("data:"))
        .ok_or_else(|| McpError::Protocol("event stream reply carried no data line".to_string()))?;
    Ok(serde_json::from_str(data.trim())?)
}
