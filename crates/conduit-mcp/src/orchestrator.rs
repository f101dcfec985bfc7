//! Tool orchestration: exposes the selected servers' tools to the model and
//! routes the model's qualified tool calls back to the owning server.

use crate::registry::ConnectionRegistry;
use crate::types::{CallToolResult, ToolContent, ToolDescriptor, split_qualified_name};
use conduit_types::{FunctionSchema, ToolError, ToolExecutor, ToolOutput};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Routes tool calls for a fixed selection of servers.
pub struct ToolOrchestrator {
    registry: Arc<ConnectionRegistry>,
    selection: Vec<String>,
}

impl ToolOrchestrator {
    pub fn new(registry: Arc<ConnectionRegistry>, selection: Vec<String>) -> Self {
        Self {
            registry,
            selection,
        }
    }

    /// Build an orchestrator over the registry's current selection.
    pub async fn for_selected(registry: Arc<ConnectionRegistry>) -> Self {
        let selection = registry.selected().await;
        Self::new(registry, selection)
    }

    /// Tools of the selected servers that are currently connected.
    pub async fn tools(&self) -> Vec<ToolDescriptor> {
        let mut tools = Vec::new();
        for id in &self.selection {
            if let Some(state) = self.registry.state(id).await {
                if state.is_connected() {
                    tools.extend(state.tools.iter().cloned());
                }
            }
        }
        tools
    }

    /// Function-calling schemas named by qualified tool name.
    pub async fn function_schemas(&self) -> Vec<FunctionSchema> {
        self.tools()
            .await
            .into_iter()
            .map(|t| FunctionSchema::new(t.qualified_name, t.description, t.parameters))
            .collect()
    }

    /// Case-insensitive search over name and description. Empty query matches all.
    pub async fn search(&self, query: &str) -> Vec<ToolDescriptor> {
        let query = query.trim().to_lowercase();
        self.tools()
            .await
            .into_iter()
            .filter(|t| {
                query.is_empty()
                    || t.qualified_name.to_lowercase().contains(&query)
                    || t.description.to_lowercase().contains(&query)
            })
            .collect()
    }

    /// Find the selected, connected tool a qualified name refers to.
    pub async fn resolve(&self, qualified_name: &str) -> Result<ToolDescriptor, ToolError> {
        let not_found = || ToolError::NotFound {
            name: qualified_name.to_string(),
        };
        let (server_id, local_name) = split_qualified_name(qualified_name).ok_or_else(not_found)?;
        if !self.selection.iter().any(|s| s == server_id) {
            return Err(not_found());
        }
        let state = self.registry.state(server_id).await.ok_or_else(not_found)?;
        if !state.is_connected() {
            return Err(not_found());
        }
        state
            .tools
            .iter()
            .find(|t| t.local_name == local_name)
            .cloned()
            .ok_or_else(not_found)
    }

    /// Route and run a call, returning the formatted result text.
    pub async fn call(
        &self,
        qualified_name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolOutput, ToolError> {
        let tool = self.resolve(qualified_name).await?;

        let problems = validate_arguments(&tool.parameters, &arguments);
        if !problems.is_empty() {
            tracing::warn!(
                tool = %qualified_name,
                problems = ?problems,
                "Tool arguments do not match schema, calling anyway"
            );
        }

        let result = self
            .registry
            .call_tool(&tool.server_id, &tool.local_name, arguments)
            .await
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;

        let text = format_call_result(&result);
        Ok(if result.is_error {
            ToolOutput::error(text)
        } else {
            ToolOutput::text(text)
        })
    }
}

impl ToolExecutor for ToolOrchestrator {
    fn execute<'a>(
        &'a self,
        qualified_name: &'a str,
        arguments: serde_json::Value,
    ) -> Pin<Box<dyn Future<Output = Result<ToolOutput, ToolError>> + Send + 'a>> {
        Box::pin(self.call(qualified_name, arguments))
    }
}

/// Check arguments against a tool's declared schema.
///
/// Returns human-readable problems; an empty list means no findings.
pub fn validate_arguments(
    schema: &serde_json::Value,
    arguments: &serde_json::Value,
) -> Vec<String> {
    let Some(args) = arguments.as_object() else {
        return vec!["Arguments must be a JSON object".to_string()];
    };

    let mut problems = Vec::new();
    if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
        for field in required.iter().filter_map(|f| f.as_str()) {
            if !args.contains_key(field) {
                problems.push(format!("Missing required parameter: {field}"));
            }
        }
    }

    let properties = schema.get("properties").and_then(|p| p.as_object());
    for key in args.keys() {
        if !properties.is_some_and(|p| p.contains_key(key)) {
            problems.push(format!("Unknown parameter: {key}"));
        }
    }
    problems
}

/// Render a call result as one string for the conversation.
pub fn format_call_result(result: &CallToolResult) -> String {
    if result.is_error {
        let message = match result.content.first() {
            Some(ToolContent::Text { text }) if !text.is_empty() => text.as_str(),
            _ => "Unknown error",
        };
        return format!("Error: {message}");
    }

    let text = result.texts().collect::<Vec<_>>().join("\n");
    if text.is_empty() {
        "Tool executed successfully".to_string()
    } else {
        text
    }
}
