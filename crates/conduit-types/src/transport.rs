//! The closed set of transport families Conduit can sit on top of.

use serde::{Deserialize, Serialize};

/// Transport family of a downstream connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Pub/sub message bus (request/reply over subjects).
    MessageBus,
    /// RPC with gRPC-style status codes.
    Rpc,
    Http,
    WebSocket,
    /// A child process speaking JSON-RPC over stdio.
    LocalProcess,
}

impl TransportKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TransportKind::MessageBus => "message_bus",
            TransportKind::Rpc => "rpc",
            TransportKind::Http => "http",
            TransportKind::WebSocket => "web_socket",
            TransportKind::LocalProcess => "local_process",
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
