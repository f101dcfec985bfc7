//! JSON-RPC 2.0 envelope used for every MCP call.

use crate::error::McpError;
use serde::{Deserialize, Serialize};

/// A JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method: method.into(),
            params,
        }
    }
}

/// A JSON-RPC 2.0 response: either `result` or `error` is set.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Unwrap the envelope, surfacing an `error` member as `McpError::JsonRpc`.
    ///
    /// A response with neither member yields `null`.
    pub fn into_result(self, server: &str) -> Result<serde_json::Value, McpError> {
        if let Some(err) = self.error {
            return Err(McpError::JsonRpc {
                server: server.to_string(),
                code: err.code,
                message: err.message,
            });
        }
        Ok(self.result.unwrap_or(serde_json::Value::Null))
    }
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

/// A JSON-RPC 2.0 notification (no id, no response expected).
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: &'static str,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            method: method.into(),
            params,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_envelope_fields() {
        let req = JsonRpcRequest::new(7, "tools/call", Some(json!({"name": "read", "arguments": {}})));
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["jsonrpc"], "2.0");
        assert_eq!(v["id"], 7);
        assert_eq!(v["method"], "tools/call");
        assert_eq!(v["params"]["name"], "read");
    }

    #[test]
    fn request_without_params_omits_member() {
        let v = serde_json::to_value(JsonRpcRequest::new(1, "tools/list", None)).unwrap();
        assert!(v.get("params").is_none());
    }

    #[test]
    fn result_envelope_unwraps() {
        let resp: JsonRpcResponse =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":3,"result":{"tools":[]}}"#).unwrap();
        assert_eq!(resp.id, Some(3));
        let result = resp.into_result("fs").unwrap();
        assert_eq!(result, json!({"tools": []}));
    }

    #[test]
    fn error_envelope_becomes_json_rpc_error() {
        let resp: JsonRpcResponse = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32601,"message":"Method not found","data":"tools/list"}}"#,
        )
        .unwrap();
        assert_eq!(resp.error.as_ref().unwrap().data, Some(json!("tools/list")));
        match resp.into_result("fs").unwrap_err() {
            McpError::JsonRpc {
                server,
                code,
                message,
            } => {
                assert_eq!(server, "fs");
                assert_eq!(code, -32601);
                assert_eq!(message, "Method not found");
            }
            other => panic!("Expected JsonRpc, got: {other:?}"),
        }
    }

    #[test]
    fn empty_envelope_is_null() {
        let resp: JsonRpcResponse = serde_json::from_str(r#"{"jsonrpc":"2.0","id":1}"#).unwrap();
        assert!(resp.into_result("fs").unwrap().is_null());
    }

    #[test]
    fn notification_has_no_id() {
        let v = serde_json::to_value(JsonRpcNotification::new("notifications/initialized", None))
            .unwrap();
        assert_eq!(v["method"], "notifications/initialized");
        assert!(v.get("id").is_none());
        assert!(v.get("params").is_none());
    }
}
