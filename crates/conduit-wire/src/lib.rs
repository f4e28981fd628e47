//! Transport contracts for Conduit.
//!
//! Defines what a downstream connection looks like from the adapter's side:
//! the JSON-RPC `tools/call` shapes, the [`Connection`] / [`TransportRegistry`]
//! collaborator traits, and the table that turns protocol-native failures into
//! the shared error taxonomy.

pub mod error_map;
pub mod message;
pub mod registry;
pub mod subject;

pub use conduit_types::TransportKind;
pub use error_map::{classify_jsonrpc, classify_status, map_native_error};
pub use message::{JsonRpcError, NativeError, NativeRequest, NativeResponse};
pub use registry::{Connection, FnConnection, StaticTransportRegistry, TransportRegistry};
pub use subject::{Direction, Subject};
