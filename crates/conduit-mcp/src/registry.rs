//! Connection registry: lifecycle and state for every configured server.
//!
//! One registry is built at startup and shared by handle. It owns the server
//! catalog, at most one live [`McpClient`] per server id, and the latest
//! [`ConnectionState`] for each server. Connect and disconnect for the same
//! id are serialized; distinct ids proceed in parallel. Network I/O never
//! happens while the state lock is held.

use crate::client::McpClient;
use crate::config::{McpSettings, ServerConfig, TransportConfig, validate_server_id};
use crate::error::McpError;
use crate::http::HttpTransport;
use crate::state::ConnectionState;
use crate::types::{CallToolResult, McpResource, McpToolDef, ToolDescriptor};
use chrono::Utc;
use futures_util::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock, broadcast};

const EVENT_CAPACITY: usize = 64;

struct RegistryInner {
    settings: McpSettings,
    clients: HashMap<String, Arc<McpClient>>,
    states: HashMap<String, Arc<ConnectionState>>,
}

/// Process-wide manager of MCP server connections.
pub struct ConnectionRegistry {
    inner: RwLock<RegistryInner>,
    id_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    events: broadcast::Sender<Arc<ConnectionState>>,
}

impl ConnectionRegistry {
    pub fn new(settings: McpSettings) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: RwLock::new(RegistryInner {
                settings,
                clients: HashMap::new(),
                states: HashMap::new(),
            }),
            id_locks: Mutex::new(HashMap::new()),
            events,
        }
    }

    /// Receive every state published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<ConnectionState>> {
        self.events.subscribe()
    }

    async fn lock_id(&self, id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.id_locks.lock().await;
            Arc::clone(locks.entry(id.to_string()).or_default())
        };
        lock.lock_owned().await
    }

    async fn publish(&self, state: ConnectionState) -> Arc<ConnectionState> {
        let state = Arc::new(state);
        self.inner
            .write()
            .await
            .states
            .insert(state.server_id.clone(), Arc::clone(&state));
        tracing::debug!(server = %state.server_id, status = %state.status, "Connection state");
        // No subscribers is fine
        let _ = self.events.send(Arc::clone(&state));
        state
    }

    // --- Lifecycle ---

    /// Connect, handshake and discover a server's catalog.
    ///
    /// On failure the error is published as the server's state and returned.
    /// An id that cannot be embedded in a qualified tool name is rejected
    /// before anything is published.
    pub async fn connect_server(
        &self,
        config: ServerConfig,
    ) -> Result<Arc<ConnectionState>, McpError> {
        validate_server_id(&config.id)?;
        let _guard = self.lock_id(&config.id).await;
        self.connect_locked(config).await
    }

    async fn connect_locked(&self, config: ServerConfig) -> Result<Arc<ConnectionState>, McpError> {
        let id = config.id.clone();
        self.publish(ConnectionState::connecting(&id)).await;

        let mut client = McpClient::new(config);
        let (tools, resources) = match handshake(&mut client).await {
            Ok(catalog) => catalog,
            Err(e) => {
                client.disconnect().await;
                // A failed attempt leaves no live client behind for the id
                let stale = self.inner.write().await.clients.remove(&id);
                if let Some(old) = stale {
                    old.disconnect().await;
                }
                tracing::warn!(server = %id, "MCP connection failed: {e}");
                self.publish(ConnectionState::failed(&id, e.to_string())).await;
                return Err(e);
            }
        };

        let at = Utc::now();
        let descriptors: Vec<ToolDescriptor> =
            tools.iter().map(|t| ToolDescriptor::new(&id, t)).collect();
        let tool_count = descriptors.len();

        let replaced = {
            let mut inner = self.inner.write().await;
            if inner.settings.get(&id).is_some() {
                let _ = inner.settings.touch_connected(&id, at);
            }
            inner.clients.insert(id.clone(), Arc::new(client))
        };
        if let Some(old) = replaced {
            old.disconnect().await;
        }

        let state = self
            .publish(ConnectionState::connected(&id, descriptors, resources, at))
            .await;
        tracing::info!(server = %id, tools = tool_count, "MCP server connected");
        Ok(state)
    }

    /// Disconnect a server if tracked; always ends in `disconnected`.
    pub async fn disconnect_server(&self, id: &str) {
        let _guard = self.lock_id(id).await;
        self.disconnect_locked(id).await;
    }

    async fn disconnect_locked(&self, id: &str) {
        let client = self.inner.write().await.clients.remove(id);
        if let Some(client) = client {
            client.disconnect().await;
            tracing::info!(server = %id, "MCP server disconnected");
        }
        self.publish(ConnectionState::disconnected(id)).await;
    }

    /// Disconnect then connect, with no other lifecycle call for the id in between.
    pub async fn reconnect_server(
        &self,
        config: ServerConfig,
    ) -> Result<Arc<ConnectionState>, McpError> {
        validate_server_id(&config.id)?;
        let _guard = self.lock_id(&config.id).await;
        self.disconnect_locked(&config.id).await;
        self.connect_locked(config).await
    }

    /// Disconnect every tracked server concurrently.
    pub async fn disconnect_all(&self) {
        let ids: Vec<String> = self.inner.read().await.clients.keys().cloned().collect();
        join_all(ids.iter().map(|id| self.disconnect_server(id))).await;
    }

    /// Connect every enabled server when the global toggle is on.
    ///
    /// Failures are logged and skipped. Returns the ids that connected.
    pub async fn connect_enabled(&self) -> Vec<String> {
        let configs: Vec<ServerConfig> = {
            let inner = self.inner.read().await;
            if !inner.settings.enabled {
                return Vec::new();
            }
            inner.settings.enabled_servers().cloned().collect()
        };

        let results = join_all(configs.into_iter().map(|config| async move {
            let id = config.id.clone();
            (id, self.connect_server(config).await)
        }))
        .await;

        results
            .into_iter()
            .filter_map(|(id, result)| match result {
                Ok(_) => Some(id),
                Err(e) => {
                    tracing::warn!(server = %id, "Skipping MCP server: {e}");
                    None
                }
            })
            .collect()
    }

    /// Probe a config without touching tracked state.
    ///
    /// HTTP: any response to a preflight request is success. Stdio: a full
    /// connect and initialize, always followed by a disconnect.
    pub async fn test_connection(&self, config: &ServerConfig) -> Result<(), McpError> {
        match &config.transport {
            TransportConfig::Http { url, headers } => {
                if url.trim().is_empty() {
                    return Err(McpError::MissingEndpoint {
                        server: config.id.clone(),
                    });
                }
                let status = HttpTransport::new(url, headers, config.timeout_ms)?
                    .probe()
                    .await?;
                tracing::debug!(server = %config.id, status, "MCP endpoint reachable");
                Ok(())
            }
            TransportConfig::Stdio { .. } => {
                let mut client = McpClient::new(config.clone());
                let result = match client.connect().await {
                    Ok(()) => client.initialize().await.map(|_| ()),
                    Err(e) => Err(e),
                };
                client.disconnect().await;
                result
            }
        }
    }

    // --- Read-only projections ---

    pub async fn state(&self, id: &str) -> Option<Arc<ConnectionState>> {
        self.inner.read().await.states.get(id).cloned()
    }

    /// States of all catalog servers, in catalog order; untracked ones read as disconnected.
    pub async fn states(&self) -> Vec<Arc<ConnectionState>> {
        let inner = self.inner.read().await;
        inner
            .settings
            .servers
            .iter()
            .map(|s| {
                inner
                    .states
                    .get(&s.id)
                    .cloned()
                    .unwrap_or_else(|| Arc::new(ConnectionState::disconnected(&s.id)))
            })
            .collect()
    }

    pub async fn server_tools(&self, id: &str) -> Vec<ToolDescriptor> {
        self.inner
            .read()
            .await
            .states
            .get(id)
            .map(|s| s.tools.clone())
            .unwrap_or_default()
    }

    /// Tools of every server that is both enabled and connected.
    pub async fn all_tools(&self) -> Vec<ToolDescriptor> {
        let inner = self.inner.read().await;
        inner
            .settings
            .enabled_servers()
            .filter_map(|s| inner.states.get(&s.id))
            .filter(|state| state.is_connected())
            .flat_map(|state| state.tools.iter().cloned())
            .collect()
    }

    pub async fn server_resources(&self, id: &str) -> Vec<McpResource> {
        self.inner
            .read()
            .await
            .states
            .get(id)
            .map(|s| s.resources.clone())
            .unwrap_or_default()
    }

    async fn client(&self, id: &str) -> Result<Arc<McpClient>, McpError> {
        self.inner
            .read()
            .await
            .clients
            .get(id)
            .cloned()
            .ok_or_else(|| McpError::NotConnected {
                server: id.to_string(),
            })
    }

    /// Call a tool on a tracked server by its local name.
    pub async fn call_tool(
        &self,
        id: &str,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<CallToolResult, McpError> {
        let client = self.client(id).await?;
        tracing::debug!(server = %id, tool = name, "Calling MCP tool");
        client.call_tool(name, arguments).await
    }

    pub async fn read_resource(&self, id: &str, uri: &str) -> Result<Option<String>, McpError> {
        let client = self.client(id).await?;
        Ok(client.read_resource(uri).await)
    }

    // --- Catalog ---

    pub async fn settings(&self) -> McpSettings {
        self.inner.read().await.settings.clone()
    }

    pub async fn server(&self, id: &str) -> Option<ServerConfig> {
        self.inner.read().await.settings.get(id).cloned()
    }

    pub async fn is_enabled(&self) -> bool {
        self.inner.read().await.settings.enabled
    }

    pub async fn set_enabled(&self, enabled: bool) {
        self.inner.write().await.settings.enabled = enabled;
    }

    pub async fn add_server(&self, config: ServerConfig) -> Result<(), McpError> {
        self.inner.write().await.settings.add(config)
    }

    pub async fn update_server(&self, config: ServerConfig) -> Result<(), McpError> {
        self.inner.write().await.settings.replace(config)
    }

    /// Remove a server from the catalog, disconnecting it and forgetting its state.
    pub async fn remove_server(&self, id: &str) -> Result<ServerConfig, McpError> {
        let _guard = self.lock_id(id).await;
        let removed = self.inner.write().await.settings.remove(id)?;
        self.disconnect_locked(id).await;
        self.inner.write().await.states.remove(id);
        self.id_locks.lock().await.remove(id);
        Ok(removed)
    }

    pub async fn set_server_enabled(&self, id: &str, enabled: bool) -> Result<(), McpError> {
        self.inner.write().await.settings.set_enabled(id, enabled)
    }

    pub async fn toggle_server_enabled(&self, id: &str) -> Result<bool, McpError> {
        self.inner.write().await.settings.toggle_enabled(id)
    }

    pub async fn selected(&self) -> Vec<String> {
        self.inner.read().await.settings.selected.clone()
    }

    pub async fn set_selected(&self, ids: Vec<String>) {
        self.inner.write().await.settings.set_selected(ids);
    }

    pub async fn toggle_selected(&self, id: &str) -> Result<bool, McpError> {
        self.inner.write().await.settings.toggle_selected(id)
    }

    pub async fn clear_selected(&self) {
        self.inner.write().await.settings.clear_selected();
    }
}

async fn handshake(
    client: &mut McpClient,
) -> Result<(Vec<McpToolDef>, Vec<McpResource>), McpError> {
    client.connect().await?;
    client.initialize().await?;
    let tools = client.list_tools().await;
    let resources = client.list_resources().await;
    Ok((tools, resources))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ConnectionStatus;

    fn broken_stdio(id: &str) -> ServerConfig {
        ServerConfig::stdio(id, "this_command_does_not_exist_xyz123", vec![]).with_id(id)
    }

    #[tokio::test]
    async fn empty_registry_has_no_tools() {
        let registry = ConnectionRegistry::new(McpSettings::default());
        assert!(registry.all_tools().await.is_empty());
        assert!(registry.states().await.is_empty());
        assert!(registry.connect_enabled().await.is_empty());
        registry.disconnect_all().await;
    }

    #[tokio::test]
    async fn failed_connect_publishes_error_and_returns_it() {
        let registry = ConnectionRegistry::new(McpSettings::default());
        let mut events = registry.subscribe();

        let err = registry.connect_server(broken_stdio("bad")).await.unwrap_err();
        assert!(matches!(err, McpError::SpawnFailed { .. }));

        assert_eq!(events.recv().await.unwrap().status, ConnectionStatus::Connecting);
        let failed = events.recv().await.unwrap();
        assert_eq!(failed.status, ConnectionStatus::Error);
        assert!(failed.error.as_deref().unwrap().contains("xyz123"));

        let state = registry.state("bad").await.unwrap();
        assert_eq!(state.status, ConnectionStatus::Error);
    }

    #[tokio::test]
    async fn disconnect_untracked_still_publishes() {
        let registry = ConnectionRegistry::new(McpSettings::default());
        registry.disconnect_server("ghost").await;
        let state = registry.state("ghost").await.unwrap();
        assert_eq!(state.status, ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn call_tool_on_untracked_server_is_not_connected() {
        let registry = ConnectionRegistry::new(McpSettings::default());
        let err = registry
            .call_tool("fs", "list_dir", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::NotConnected { server } if server == "fs"));
        assert!(matches!(
            registry.read_resource("fs", "file:///x").await,
            Err(McpError::NotConnected { .. })
        ));
    }

    #[tokio::test]
    async fn connect_enabled_respects_global_toggle() {
        let mut settings = McpSettings::default();
        settings.add(broken_stdio("bad")).unwrap();
        let registry = ConnectionRegistry::new(settings);

        assert!(registry.connect_enabled().await.is_empty());
        assert!(registry.state("bad").await.is_none());

        registry.set_enabled(true).await;
        assert!(registry.connect_enabled().await.is_empty());
        assert_eq!(
            registry.state("bad").await.unwrap().status,
            ConnectionStatus::Error
        );
    }

    #[tokio::test]
    async fn remove_server_forgets_state_and_selection() {
        let mut settings = McpSettings::default();
        settings.add(broken_stdio("bad")).unwrap();
        settings.set_selected(vec!["bad".into()]);
        let registry = ConnectionRegistry::new(settings);
        let _ = registry.connect_server(broken_stdio("bad")).await;

        registry.remove_server("bad").await.unwrap();
        assert!(registry.state("bad").await.is_none());
        assert!(registry.selected().await.is_empty());
        assert!(registry.server("bad").await.is_none());
        assert!(!registry.id_locks.lock().await.contains_key("bad"));
    }

    #[tokio::test]
    async fn separator_in_id_is_rejected_without_publishing() {
        let registry = ConnectionRegistry::new(McpSettings::default());
        let mut events = registry.subscribe();

        let err = registry.connect_server(broken_stdio("my__srv")).await.unwrap_err();
        assert!(matches!(err, McpError::InvalidServerId { id, .. } if id == "my__srv"));
        assert!(matches!(
            registry.reconnect_server(broken_stdio("")).await,
            Err(McpError::InvalidServerId { .. })
        ));
        assert!(matches!(
            registry.add_server(broken_stdio("a__b")).await,
            Err(McpError::InvalidServerId { .. })
        ));

        assert!(registry.state("my__srv").await.is_none());
        assert!(registry.settings().await.servers.is_empty());
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_connection_stdio_failure_leaves_no_state() {
        let registry = ConnectionRegistry::new(McpSettings::default());
        assert!(registry.test_connection(&broken_stdio("bad")).await.is_err());
        assert!(registry.state("bad").await.is_none());
    }
}
