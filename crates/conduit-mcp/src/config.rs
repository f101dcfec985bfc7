//! Server configuration and the server catalog.

use crate::error::McpError;
use crate::types::TOOL_NAME_SEPARATOR;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

fn default_timeout() -> u64 {
    30000
}

fn default_true() -> bool {
    true
}

/// How a server is reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportConfig {
    /// A subprocess speaking over stdin/stdout.
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
    },
    /// A remote endpoint reached with HTTP POST.
    Http {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
}

impl TransportConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Stdio { .. } => "stdio",
            Self::Http { .. } => "http",
        }
    }
}

/// Configuration for a single MCP server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Stable identifier; also the prefix of the server's qualified tool names.
    pub id: String,
    pub name: String,
    #[serde(flatten)]
    pub transport: TransportConfig,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Timeout for requests in milliseconds (default: 30000).
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_connected: Option<DateTime<Utc>>,
}

impl ServerConfig {
    fn with_transport(name: impl Into<String>, transport: TransportConfig) -> Self {
        Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            name: name.into(),
            transport,
            enabled: true,
            timeout_ms: default_timeout(),
            created_at: Utc::now(),
            last_connected: None,
        }
    }

    /// A subprocess server with a freshly generated id.
    pub fn stdio(name: impl Into<String>, command: impl Into<String>, args: Vec<String>) -> Self {
        Self::with_transport(
            name,
            TransportConfig::Stdio {
                command: command.into(),
                args,
                env: HashMap::new(),
            },
        )
    }

    /// A remote HTTP server with a freshly generated id.
    pub fn http(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self::with_transport(
            name,
            TransportConfig::Http {
                url: url.into(),
                headers: HashMap::new(),
            },
        )
    }

    /// Replace the generated id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }
}

/// Server catalog plus the global toggle and the per-chat selection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct McpSettings {
    /// Global MCP toggle.
    #[serde(default)]
    pub enabled: bool,
    /// Server ids whose tools are offered to the model.
    #[serde(default)]
    pub selected: Vec<String>,
    #[serde(default)]
    pub servers: Vec<ServerConfig>,
}

/// Check that `id` can be embedded in a qualified tool name.
pub fn validate_server_id(id: &str) -> Result<(), McpError> {
    let reason = if id.trim().is_empty() {
        "must not be empty".to_string()
    } else if id.contains(TOOL_NAME_SEPARATOR) {
        format!("must not contain '{TOOL_NAME_SEPARATOR}'")
    } else {
        return Ok(());
    };
    Err(McpError::InvalidServerId {
        id: id.to_string(),
        reason,
    })
}

impl McpSettings {
    /// Check every server id in the catalog, e.g. after loading it from disk.
    pub fn validate(&self) -> Result<(), McpError> {
        self.servers
            .iter()
            .try_for_each(|s| validate_server_id(&s.id))
    }

    pub fn get(&self, id: &str) -> Option<&ServerConfig> {
        self.servers.iter().find(|s| s.id == id)
    }

    fn get_mut(&mut self, id: &str) -> Result<&mut ServerConfig, McpError> {
        self.servers
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| McpError::UnknownServer { id: id.to_string() })
    }

    pub fn add(&mut self, config: ServerConfig) -> Result<(), McpError> {
        validate_server_id(&config.id)?;
        if self.get(&config.id).is_some() {
            return Err(McpError::DuplicateServer { id: config.id });
        }
        self.servers.push(config);
        Ok(())
    }

    /// Replace the config with the same id wholesale.
    pub fn replace(&mut self, config: ServerConfig) -> Result<(), McpError> {
        validate_server_id(&config.id)?;
        let slot = self.get_mut(&config.id)?;
        *slot = config;
        Ok(())
    }

    /// Remove a server and drop it from the selection.
    pub fn remove(&mut self, id: &str) -> Result<ServerConfig, McpError> {
        let pos = self
            .servers
            .iter()
            .position(|s| s.id == id)
            .ok_or_else(|| McpError::UnknownServer { id: id.to_string() })?;
        self.selected.retain(|s| s != id);
        Ok(self.servers.remove(pos))
    }

    pub fn set_enabled(&mut self, id: &str, enabled: bool) -> Result<(), McpError> {
        self.get_mut(id)?.enabled = enabled;
        Ok(())
    }

    /// Flip a server's enabled flag, returning the new value.
    pub fn toggle_enabled(&mut self, id: &str) -> Result<bool, McpError> {
        let server = self.get_mut(id)?;
        server.enabled = !server.enabled;
        Ok(server.enabled)
    }

    pub fn touch_connected(&mut self, id: &str, at: DateTime<Utc>) -> Result<(), McpError> {
        self.get_mut(id)?.last_connected = Some(at);
        Ok(())
    }

    pub fn enabled_servers(&self) -> impl Iterator<Item = &ServerConfig> {
        self.servers.iter().filter(|s| s.enabled)
    }

    /// Set the selection, dropping unknown and duplicate ids.
    pub fn set_selected(&mut self, ids: Vec<String>) {
        let mut selected: Vec<String> = Vec::with_capacity(ids.len());
        for id in ids {
            if self.get(&id).is_some() && !selected.contains(&id) {
                selected.push(id);
            }
        }
        self.selected = selected;
    }

    /// Add or remove a server from the selection, returning whether it is now selected.
    pub fn toggle_selected(&mut self, id: &str) -> Result<bool, McpError> {
        if self.get(id).is_none() {
            return Err(McpError::UnknownServer { id: id.to_string() });
        }
        if let Some(pos) = self.selected.iter().position(|s| s == id) {
            self.selected.remove(pos);
            Ok(false)
        } else {
            self.selected.push(id.to_string());
            Ok(true)
        }
    }

    pub fn clear_selected(&mut self) {
        self.selected.clear();
    }
}
