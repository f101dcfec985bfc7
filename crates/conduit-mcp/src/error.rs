//! Error types for MCP operations.

use thiserror::Error;

/// Errors from MCP server communication and connection management.
#[derive(Debug, Error)]
pub enum McpError {
    #[error("Failed to spawn MCP server '{name}': {source}")]
    SpawnFailed {
        name: String,
        source: std::io::Error,
    },

    #[error("MCP server {server} not connected")]
    NotConnected { server: String },

    #[error("MCP server '{server}' has no endpoint configured")]
    MissingEndpoint { server: String },

    #[error("{message}")]
    JsonRpc {
        server: String,
        code: i64,
        message: String,
    },

    #[error("HTTP {status} from MCP server: {body}")]
    Http { status: u16, body: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("MCP protocol error: {0}")]
    Protocol(String),

    #[error("MCP request '{name}' timed out after {timeout_ms}ms")]
    Timeout { name: String, timeout_ms: u64 },

    #[error("MCP server '{id}' already exists")]
    DuplicateServer { id: String },

    #[error("Unknown MCP server '{id}'")]
    UnknownServer { id: String },

    #[error("Invalid MCP server id '{id}': {reason}")]
    InvalidServerId { id: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<reqwest::Error> for McpError {
    fn from(e: reqwest::Error) -> Self {
        Self::Network(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_rpc_error_displays_server_message() {
        let err = McpError::JsonRpc {
            server: "fs".into(),
            code: -32000,
            message: "file not found".into(),
        };
        assert_eq!(err.to_string(), "file not found");
    }

    #[test]
    fn not_connected_names_server() {
        let err = McpError::NotConnected {
            server: "fs".into(),
        };
        assert_eq!(err.to_string(), "MCP server fs not connected");
    }
}
