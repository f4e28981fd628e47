//! Transport collaborator contracts.
//!
//! Concrete codecs (bus clients, HTTP stacks, stdio pipes) live outside this
//! workspace and plug in through [`TransportRegistry`] and [`Connection`].
//! [`StaticTransportRegistry`] is an immutable in-process registry for
//! embedding and tests.

use crate::message::{NativeError, NativeRequest, NativeResponse};
use async_trait::async_trait;
use conduit_types::{ConduitError, TransportKind};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

/// A live channel to one downstream service.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Transport family, used to interpret native error codes.
    fn kind(&self) -> TransportKind;

    /// Send one native request and wait for its response.
    async fn call(&self, request: NativeRequest) -> Result<NativeResponse, NativeError>;
}

/// Resolves a service name to a connection.
#[async_trait]
pub trait TransportRegistry: Send + Sync {
    /// Unknown services fail with `ConduitError::NotFound`.
    async fn connect(&self, service: &str) -> Result<Arc<dyn Connection>, ConduitError>;
}

/// A registry fixed at construction time.
#[derive(Default, Clone)]
pub struct StaticTransportRegistry {
    connections: HashMap<String, Arc<dyn Connection>>,
}

impl StaticTransportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection. A later registration for the same name replaces the earlier one.
    pub fn with(mut self, service: impl Into<String>, connection: Arc<dyn Connection>) -> Self {
        self.connections.insert(service.into(), connection);
        self
    }

    pub fn services(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.connections.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

#[async_trait]
impl TransportRegistry for StaticTransportRegistry {
    async fn connect(&self, service: &str) -> Result<Arc<dyn Connection>, ConduitError> {
        match self.connections.get(service) {
            Some(conn) => {
                debug!(service, transport = %conn.kind(), "Resolved connection");
                Ok(Arc::clone(conn))
            }
            None => Err(ConduitError::NotFound(format!(
                "no transport registered for service '{service}'"
            ))),
        }
    }
}

/// A connection backed by an async closure.
pub struct FnConnection<F> {
    kind: TransportKind,
    handler: F,
}

impl<F, Fut> FnConnection<F>
where
    F: Fn(NativeRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<NativeResponse, NativeError>> + Send,
{
    pub fn new(kind: TransportKind, handler: F) -> Self {
        Self { kind, handler }
    }

    /// Wrap into the trait object the registry stores.
    pub fn shared(kind: TransportKind, handler: F) -> Arc<dyn Connection>
    where
        F: 'static,
    {
        Arc::new(Self::new(kind, handler))
    }
}

#[async_trait]
impl<F, Fut> Connection for FnConnection<F>
where
    F: Fn(NativeRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<NativeResponse, NativeError>> + Send,
{
    fn kind(&self) -> TransportKind {
        self.kind
    }

    async fn call(&self, request: NativeRequest) -> Result<NativeResponse, NativeError> {
        (self.handler)(request).await
    }
}
