//! Native protocol message shapes.
//!
//! Every downstream call is a JSON-RPC 2.0 `tools/call` request:
//!
//! ```text
//! {"jsonrpc":"2.0","id":<request_id>,"method":"tools/call",
//!  "params":{"name":<tool>,"arguments":<enhanced_params>}}
//! ```

use crate::error_map::jsonrpc_error;
use conduit_types::ConduitError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// JSON-RPC protocol version string.
pub const JSONRPC_VERSION: &str = "2.0";

/// Method used for every tool invocation.
pub const TOOLS_CALL: &str = "tools/call";

/// Parameters of a `tools/call` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallParams {
    pub name: String,
    pub arguments: serde_json::Value,
}

/// A protocol-native request handed to a `Connection`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeRequest {
    pub jsonrpc: String,
    pub id: String,
    pub method: String,
    pub params: ToolCallParams,
}

impl NativeRequest {
    pub fn tool_call(
        request_id: impl Into<String>,
        tool: impl Into<String>,
        arguments: serde_json::Value,
    ) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: request_id.into(),
            method: TOOLS_CALL.to_string(),
            params: ToolCallParams {
                name: tool.into(),
                arguments,
            },
        }
    }
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl std::fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)
    }
}

/// A protocol-native response returned by a `Connection`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeResponse {
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl NativeResponse {
    pub fn success(id: impl Into<String>, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id.into()),
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: impl Into<String>, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id.into()),
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }

    /// Extract the tool output.
    ///
    /// A JSON-RPC error object is mapped through the JSON-RPC code table. An
    /// MCP result flagged `isError: true` is a `ToolExecution` failure.
    pub fn into_tool_output(self, tool: &str) -> Result<serde_json::Value, ConduitError> {
        if let Some(err) = self.error {
            return Err(jsonrpc_error(&err));
        }
        let result = self.result.ok_or_else(|| {
            ConduitError::ProtocolAdapter("response has neither result nor error".to_string())
        })?;
        let is_error = result
            .get("isError")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        if is_error {
            return Err(ConduitError::ToolExecution {
                tool: tool.to_string(),
                reason: extract_text(&result).unwrap_or_else(|| result.to_string()),
            });
        }
        Ok(result)
    }
}

/// Concatenate the `text` parts of an MCP `content` array.
pub fn extract_text(result: &serde_json::Value) -> Option<String> {
    let parts: Vec<&str> = result
        .get("content")?
        .as_array()?
        .iter()
        .filter_map(|item| item.get("text").and_then(|t| t.as_str()))
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("\n"))
    }
}

/// Failure reported by a transport connection.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NativeError {
    /// The peer answered with a protocol status code (HTTP status, gRPC code, ...).
    #[error("status {code}: {message}")]
    Status { code: i64, message: String },
    /// The connection dropped or could not be used.
    #[error("disconnected: {0}")]
    Disconnected(String),
    /// The transport gave up waiting.
    #[error("timed out")]
    TimedOut,
    /// The peer sent something that is not a valid native response.
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl NativeError {
    pub fn status(code: i64, message: impl Into<String>) -> Self {
        NativeError::Status {
            code,
            message: message.into(),
        }
    }
}
