//! MCP protocol payloads and the tool descriptors derived from them.

use serde::{Deserialize, Serialize};

/// MCP protocol version we speak.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Separator between server id and local tool name in a qualified name.
pub const TOOL_NAME_SEPARATOR: &str = "__";

/// Name and version of a protocol participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Implementation {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub protocol_version: String,
    pub capabilities: serde_json::Value,
    pub client_info: Implementation,
}

impl Default for InitializeParams {
    fn default() -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: serde_json::json!({}),
            client_info: Implementation {
                name: "conduit".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    #[serde(default)]
    pub protocol_version: Option<String>,
    #[serde(default)]
    pub capabilities: serde_json::Value,
    #[serde(default)]
    pub server_info: Option<Implementation>,
}

/// A tool as advertised by a server's `tools/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpToolDef {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_schema")]
    pub input_schema: serde_json::Value,
}

fn default_schema() -> serde_json::Value {
    serde_json::json!({"type": "object", "properties": {}})
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ToolsListResult {
    #[serde(default)]
    pub tools: Vec<McpToolDef>,
}

/// One typed part of a `tools/call` result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolContent {
    Text {
        #[serde(default)]
        text: String,
    },
    Image {
        #[serde(default)]
        data: String,
        #[serde(
            default,
            rename = "mimeType",
            skip_serializing_if = "Option::is_none"
        )]
        mime_type: Option<String>,
    },
    Resource {
        #[serde(default)]
        resource: serde_json::Value,
    },
    #[serde(other)]
    Unknown,
}

/// Normalized `tools/call` result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallToolResult {
    #[serde(default)]
    pub content: Vec<ToolContent>,
    #[serde(default, rename = "isError")]
    pub is_error: bool,
}

impl CallToolResult {
    /// Non-empty text parts in order, skipping other content.
    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.content.iter().filter_map(|c| match c {
            ToolContent::Text { text } if !text.is_empty() => Some(text.as_str()),
            _ => None,
        })
    }
}

/// A resource advertised by `resources/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpResource {
    pub uri: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ResourcesListResult {
    #[serde(default)]
    pub resources: Vec<McpResource>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ReadResourceResult {
    #[serde(default)]
    pub contents: Vec<ResourceContents>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ResourceContents {
    #[serde(default)]
    pub text: Option<String>,
}

/// A server tool exposed under its collision-safe qualified name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDescriptor {
    pub qualified_name: String,
    pub server_id: String,
    pub local_name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

impl ToolDescriptor {
    pub fn new(server_id: &str, def: &McpToolDef) -> Self {
        Self {
            qualified_name: qualified_name(server_id, &def.name),
            server_id: server_id.to_string(),
            local_name: def.name.clone(),
            description: def.description.clone().unwrap_or_default(),
            parameters: def.input_schema.clone(),
        }
    }
}

/// Join a server id and a local tool name.
pub fn qualified_name(server_id: &str, tool: &str) -> String {
    format!("{server_id}{TOOL_NAME_SEPARATOR}{tool}")
}

/// Split a qualified name into `(server_id, local_name)`.
///
/// The server id is everything before the first separator; the remainder,
/// which may itself contain the separator, is the local name.
pub fn split_qualified_name(name: &str) -> Option<(&str, &str)> {
    let (server, tool) = name.split_once(TOOL_NAME_SEPARATOR)?;
    if server.is_empty() || tool.is_empty() {
        return None;
    }
    Some((server, tool))
}
