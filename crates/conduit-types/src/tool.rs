//! Tool execution seam between the chat loop and tool backends.

use crate::ToolError;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

/// Text result of a tool call, as fed back to the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub text: String,
    /// The tool reported failure in-band.
    pub is_error: bool,
}

impl ToolOutput {
    /// Create a successful text output.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: false,
        }
    }

    /// Create an error text output.
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: true,
        }
    }
}

/// Executes tools by qualified name.
///
/// Implemented by the MCP orchestrator; the chat loop only sees this trait.
pub trait ToolExecutor: Send + Sync {
    fn execute<'a>(
        &'a self,
        qualified_name: &'a str,
        arguments: serde_json::Value,
    ) -> Pin<Box<dyn Future<Output = Result<ToolOutput, ToolError>> + Send + 'a>>;
}
