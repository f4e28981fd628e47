//! Tool call and tool response payloads.

use serde::{Deserialize, Serialize};

/// A request to invoke one tool on a downstream service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Which tool to call.
    pub tool: String,
    /// The input parameters.
    #[serde(default = "empty_object")]
    pub arguments: serde_json::Value,
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl ToolCall {
    pub fn new(tool: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            tool: tool.into(),
            arguments,
        }
    }
}

/// Result of a downstream tool execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResponse {
    /// The tool that produced this response.
    pub tool: String,
    /// The output content.
    pub content: serde_json::Value,
    /// Set when the response came from a fallback rather than the live service.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub from_fallback: bool,
}

impl ToolResponse {
    pub fn new(tool: impl Into<String>, content: serde_json::Value) -> Self {
        Self {
            tool: tool.into(),
            content,
            from_fallback: false,
        }
    }

    pub fn fallback(tool: impl Into<String>, content: serde_json::Value) -> Self {
        Self {
            tool: tool.into(),
            content,
            from_fallback: true,
        }
    }
}
