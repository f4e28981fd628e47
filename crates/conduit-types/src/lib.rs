//! Core types for Conduit.
//!
//! This crate defines the envelope data contract shared by the wire layer,
//! the runtime and the kernel. It contains no business logic.

pub mod config;
pub mod envelope;
pub mod error;
pub mod policy;
pub mod tool;
pub mod transport;
pub mod workflow;

pub use envelope::{Envelope, Meta, SecurityContext, TraceContext, WorkflowContext};
pub use error::{ConduitError, ConduitResult, ErrorInfo, ErrorKind};
pub use policy::{ErrorMode, ErrorPolicy};
pub use tool::{ToolCall, ToolResponse};
pub use transport::TransportKind;
