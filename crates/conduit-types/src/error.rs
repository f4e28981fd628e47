//! Shared error types and the error taxonomy for the Conduit system.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error classification shared by every transport.
///
/// The kind, not the concrete error, drives retry and policy decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Transport,
    Connection,
    Timeout,
    Serialization,
    ProtocolAdapter,
    Security,
    TenantExtraction,
    Validation,
    NotFound,
    ToolExecution,
    Internal,
    External,
    Config,
}

impl ErrorKind {
    /// Kinds that may be retried, subject to the caller's `ErrorPolicy`.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::Transport | ErrorKind::Connection | ErrorKind::Timeout | ErrorKind::External
        )
    }

    /// Kinds that always propagate, whatever policy the caller asked for.
    pub fn always_fail_fast(self) -> bool {
        matches!(
            self,
            ErrorKind::Validation | ErrorKind::Security | ErrorKind::Config
        )
    }

    /// Stable snake_case name, as used on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Transport => "transport",
            ErrorKind::Connection => "connection",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Serialization => "serialization",
            ErrorKind::ProtocolAdapter => "protocol_adapter",
            ErrorKind::Security => "security",
            ErrorKind::TenantExtraction => "tenant_extraction",
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::ToolExecution => "tool_execution",
            ErrorKind::Internal => "internal",
            ErrorKind::External => "external",
            ErrorKind::Config => "config",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level error type for the Conduit system.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConduitError {
    /// The transport failed while carrying a request.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A connection could not be established or was lost.
    #[error("Connection error: {0}")]
    Connection(String),

    /// An operation did not finish in time.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A native request or response could not be translated.
    #[error("Protocol adapter error: {0}")]
    ProtocolAdapter(String),

    /// Authentication/authorization denied.
    #[error("Security error: {0}")]
    Security(String),

    /// The tenant could not be derived from the request context.
    #[error("Tenant extraction failed: {0}")]
    TenantExtraction(String),

    /// Invalid input.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A service, tool or workflow was not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A downstream tool ran and reported failure.
    #[error("Tool execution failed: {tool} - {reason}")]
    ToolExecution {
        /// The tool that failed.
        tool: String,
        /// Why it failed.
        reason: String,
    },

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),

    /// A downstream dependency failed for reasons outside our control.
    #[error("External service error: {0}")]
    External(String),

    /// A configuration error occurred.
    #[error("Configuration error: {0}")]
    Config(String),

    /// An operation required a bound `Context` and none was in scope.
    #[error("No request context is bound to the current task")]
    MissingContext,

    /// A mapped error together with the native code it was mapped from.
    #[error("{inner}")]
    Native { code: i64, inner: Box<ConduitError> },
}

impl ConduitError {
    /// Taxonomy kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConduitError::Transport(_) => ErrorKind::Transport,
            ConduitError::Connection(_) => ErrorKind::Connection,
            ConduitError::Timeout(_) => ErrorKind::Timeout,
            ConduitError::Serialization(_) => ErrorKind::Serialization,
            ConduitError::ProtocolAdapter(_) => ErrorKind::ProtocolAdapter,
            ConduitError::Security(_) => ErrorKind::Security,
            ConduitError::TenantExtraction(_) => ErrorKind::TenantExtraction,
            ConduitError::Validation(_) => ErrorKind::Validation,
            ConduitError::NotFound(_) => ErrorKind::NotFound,
            ConduitError::ToolExecution { .. } => ErrorKind::ToolExecution,
            ConduitError::Internal(_) | ConduitError::MissingContext => ErrorKind::Internal,
            ConduitError::External(_) => ErrorKind::External,
            ConduitError::Config(_) => ErrorKind::Config,
            ConduitError::Native { inner, .. } => inner.kind(),
        }
    }

    /// Attach the native status or JSON-RPC code this error came from.
    pub fn with_code(self, code: i64) -> Self {
        let inner = match self {
            ConduitError::Native { inner, .. } => inner,
            other => Box::new(other),
        };
        ConduitError::Native { code, inner }
    }

    /// Native code, if the error was mapped from one.
    pub fn code(&self) -> Option<i64> {
        match self {
            ConduitError::Native { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    pub fn always_fail_fast(&self) -> bool {
        self.kind().always_fail_fast()
    }

    /// Build an error of the given kind from a bare message.
    pub fn from_kind(kind: ErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        match kind {
            ErrorKind::Transport => ConduitError::Transport(message),
            ErrorKind::Connection => ConduitError::Connection(message),
            ErrorKind::Timeout => ConduitError::Timeout(message),
            ErrorKind::Serialization => ConduitError::Serialization(message),
            ErrorKind::ProtocolAdapter => ConduitError::ProtocolAdapter(message),
            ErrorKind::Security => ConduitError::Security(message),
            ErrorKind::TenantExtraction => ConduitError::TenantExtraction(message),
            ErrorKind::Validation => ConduitError::Validation(message),
            ErrorKind::NotFound => ConduitError::NotFound(message),
            ErrorKind::ToolExecution => ConduitError::ToolExecution {
                tool: String::new(),
                reason: message,
            },
            ErrorKind::Internal => ConduitError::Internal(message),
            ErrorKind::External => ConduitError::External(message),
            ErrorKind::Config => ConduitError::Config(message),
        }
    }

    /// The message without the kind prefix that `Display` adds.
    pub fn detail(&self) -> String {
        match self {
            ConduitError::Transport(m)
            | ConduitError::Connection(m)
            | ConduitError::Timeout(m)
            | ConduitError::Serialization(m)
            | ConduitError::ProtocolAdapter(m)
            | ConduitError::Security(m)
            | ConduitError::TenantExtraction(m)
            | ConduitError::Validation(m)
            | ConduitError::NotFound(m)
            | ConduitError::Internal(m)
            | ConduitError::External(m)
            | ConduitError::Config(m) => m.clone(),
            ConduitError::ToolExecution { tool, reason } if tool.is_empty() => reason.clone(),
            ConduitError::ToolExecution { tool, reason } => format!("{tool}: {reason}"),
            ConduitError::MissingContext => self.to_string(),
            ConduitError::Native { inner, .. } => inner.detail(),
        }
    }

    /// Serializable projection carried in `Envelope.error`.
    pub fn to_info(&self) -> ErrorInfo {
        ErrorInfo {
            kind: self.kind(),
            message: self.detail(),
            retryable: self.is_retryable(),
            code: self.code(),
            details: None,
        }
    }
}

impl From<serde_json::Error> for ConduitError {
    fn from(e: serde_json::Error) -> Self {
        ConduitError::Serialization(e.to_string())
    }
}

/// Wire form of an error, as carried inside an envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default)]
    pub retryable: bool,
    /// Native protocol code the error was mapped from, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
    /// Structured report attached by the producer, e.g. a failed workflow's
    /// response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorInfo {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable: kind.is_retryable(),
            code: None,
            details: None,
        }
    }

    pub fn with_code(mut self, code: i64) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Rebuild an error value, e.g. when an error envelope crosses a boundary.
    pub fn to_error(&self) -> ConduitError {
        let err = ConduitError::from_kind(self.kind, self.message.clone());
        match self.code {
            Some(code) => err.with_code(code),
            None => err,
        }
    }
}

impl From<&ConduitError> for ErrorInfo {
    fn from(e: &ConduitError) -> Self {
        e.to_info()
    }
}

/// Alias for Result with ConduitError.
pub type ConduitResult<T> = Result<T, ConduitError>;
