//! Conduit runtime: context propagation, context injection, error policy and
//! the protocol adapter that ties them to a transport.

pub mod adapter;
pub mod context;
pub mod injector;
pub mod policy;
pub mod retry;

pub use adapter::ProtocolAdapter;
pub use context::Context;
pub use injector::{
    ContextInjector, DatabaseInjector, DefaultInjector, FilesystemInjector, HttpApiInjector,
    InjectorRegistry, ToolSet,
};
pub use policy::{ErrorPolicyEngine, FallbackSource, PolicyOutcome, StaticFallback};
