//! Deterministic mapping from protocol-native failures to the error taxonomy.
//!
//! The same `(TransportKind, code)` pair always yields the same `ErrorKind`.

use crate::message::{JsonRpcError, NativeError};
use conduit_types::{ConduitError, ErrorKind, TransportKind};

/// Classify a native status code for a transport family.
pub fn classify_status(transport: TransportKind, code: i64) -> ErrorKind {
    match transport {
        TransportKind::Http => match code {
            400 | 422 => ErrorKind::Validation,
            401 | 403 => ErrorKind::Security,
            404 => ErrorKind::NotFound,
            408 | 504 => ErrorKind::Timeout,
            429 | 502 | 503 => ErrorKind::Connection,
            500..=599 => ErrorKind::External,
            _ => ErrorKind::Transport,
        },
        // gRPC status codes.
        TransportKind::Rpc => match code {
            3 => ErrorKind::Validation,
            4 => ErrorKind::Timeout,
            5 => ErrorKind::NotFound,
            7 | 16 => ErrorKind::Security,
            13 => ErrorKind::Internal,
            14 => ErrorKind::Connection,
            _ => ErrorKind::External,
        },
        // WebSocket close codes.
        TransportKind::WebSocket => match code {
            1006 => ErrorKind::Connection,
            1008 => ErrorKind::Security,
            1009 => ErrorKind::Validation,
            1011 => ErrorKind::Internal,
            _ => ErrorKind::Transport,
        },
        TransportKind::MessageBus => match code {
            404 => ErrorKind::NotFound,
            408 => ErrorKind::Timeout,
            // no responders
            503 => ErrorKind::Connection,
            _ => ErrorKind::Transport,
        },
        // Process exit codes.
        TransportKind::LocalProcess => match code {
            124 => ErrorKind::Timeout,
            126 => ErrorKind::Security,
            127 => ErrorKind::NotFound,
            _ => ErrorKind::ToolExecution,
        },
    }
}

/// Classify a JSON-RPC error code. Independent of the carrying transport.
pub fn classify_jsonrpc(code: i64) -> ErrorKind {
    match code {
        -32700 => ErrorKind::Serialization,
        -32600 | -32602 => ErrorKind::Validation,
        -32601 => ErrorKind::NotFound,
        -32603 => ErrorKind::Internal,
        -32099..=-32000 => ErrorKind::ToolExecution,
        _ => ErrorKind::ProtocolAdapter,
    }
}

/// Convert a JSON-RPC error object into a `ConduitError` carrying its code.
pub fn jsonrpc_error(err: &JsonRpcError) -> ConduitError {
    ConduitError::from_kind(classify_jsonrpc(err.code), err.to_string()).with_code(err.code)
}

/// Convert a transport failure into a `ConduitError`.
pub fn map_native_error(transport: TransportKind, service: &str, err: &NativeError) -> ConduitError {
    match err {
        NativeError::Status { code, message } => ConduitError::from_kind(
            classify_status(transport, *code),
            format!("{service} ({transport}) status {code}: {message}"),
        )
        .with_code(*code),
        NativeError::Disconnected(reason) => {
            ConduitError::Connection(format!("{service} ({transport}): {reason}"))
        }
        NativeError::TimedOut => {
            ConduitError::Timeout(format!("{service} ({transport}) did not respond"))
        }
        NativeError::Malformed(reason) => {
            ConduitError::Serialization(format!("{service} ({transport}): {reason}"))
        }
    }
}
