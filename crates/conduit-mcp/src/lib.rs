//! MCP (Model Context Protocol) client side for Conduit.
//!
//! Servers are reached either as child processes speaking newline-delimited
//! JSON-RPC 2.0 over stdio, or as remote endpoints over HTTP. A single
//! [`ConnectionRegistry`] tracks every server's connection and catalog, and a
//! [`ToolOrchestrator`] exposes a selection of servers' tools to the model
//! under collision-safe qualified names.

pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod jsonrpc;
pub mod orchestrator;
pub mod registry;
pub mod state;
pub mod transport;
pub mod types;

pub use client::McpClient;
pub use config::{McpSettings, ServerConfig, TransportConfig, validate_server_id};
pub use error::McpError;
pub use orchestrator::{ToolOrchestrator, format_call_result, validate_arguments};
pub use registry::ConnectionRegistry;
pub use state::{ConnectionState, ConnectionStatus};
pub use types::{
    CallToolResult, McpResource, McpToolDef, TOOL_NAME_SEPARATOR, ToolContent, ToolDescriptor,
    qualified_name, split_qualified_name,
};
