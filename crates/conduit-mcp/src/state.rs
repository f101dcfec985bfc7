//! Per-server connection state, replaced wholesale on every transition.

use crate::types::{McpResource, ToolDescriptor};
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// Snapshot of one server's connection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionState {
    pub server_id: String,
    pub status: ConnectionStatus,
    pub tools: Vec<ToolDescriptor>,
    pub resources: Vec<McpResource>,
    pub error: Option<String>,
    pub connected_at: Option<DateTime<Utc>>,
}

impl ConnectionState {
    fn empty(server_id: &str, status: ConnectionStatus) -> Self {
        Self {
            server_id: server_id.to_string(),
            status,
            tools: Vec::new(),
            resources: Vec::new(),
            error: None,
            connected_at: None,
        }
    }

    pub fn disconnected(server_id: &str) -> Self {
        Self::empty(server_id, ConnectionStatus::Disconnected)
    }

    pub fn connecting(server_id: &str) -> Self {
        Self::empty(server_id, ConnectionStatus::Connecting)
    }

    pub fn connected(
        server_id: &str,
        tools: Vec<ToolDescriptor>,
        resources: Vec<McpResource>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            tools,
            resources,
            connected_at: Some(at),
            ..Self::empty(server_id, ConnectionStatus::Connected)
        }
    }

    pub fn failed(server_id: &str, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::empty(server_id, ConnectionStatus::Error)
        }
    }

    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }
}
