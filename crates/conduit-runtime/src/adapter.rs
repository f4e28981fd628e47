//! Envelope to native-protocol translation.
//!
//! One `translate_and_call` is one downstream call: connect, inject context,
//! send a JSON-RPC `tools/call`, and turn the outcome back into an envelope.
//! Retries and failure surfacing are delegated to the [`ErrorPolicyEngine`].

use crate::context::Context;
use crate::injector::InjectorRegistry;
use crate::policy::{ErrorPolicyEngine, PolicyOutcome};
use conduit_types::{ConduitError, Envelope, ErrorPolicy, ToolCall, ToolResponse};
use conduit_wire::{map_native_error, NativeRequest, TransportRegistry};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Translates tool-call envelopes into native requests on a transport.
#[derive(Clone)]
pub struct ProtocolAdapter {
    transports: Arc<dyn TransportRegistry>,
    injectors: Arc<InjectorRegistry>,
    engine: ErrorPolicyEngine,
    default_policy: ErrorPolicy,
}

impl ProtocolAdapter {
    pub fn new(transports: Arc<dyn TransportRegistry>) -> Self {
        Self {
            transports,
            injectors: Arc::new(InjectorRegistry::default()),
            engine: ErrorPolicyEngine::default(),
            default_policy: ErrorPolicy::default(),
        }
    }

    pub fn with_injectors(mut self, injectors: InjectorRegistry) -> Self {
        self.injectors = Arc::new(injectors);
        self
    }

    pub fn with_policy_engine(mut self, engine: ErrorPolicyEngine) -> Self {
        self.engine = engine;
        self
    }

    /// Policy for envelopes that do not declare one.
    pub fn with_default_policy(mut self, policy: ErrorPolicy) -> Self {
        self.default_policy = policy;
        self
    }

    pub fn default_policy(&self) -> &ErrorPolicy {
        &self.default_policy
    }

    /// Call `tool` on `service` and wrap the result in a response envelope.
    ///
    /// Unknown services, injection failures and envelopes without a call fail
    /// immediately. Failures of the downstream call itself go through the
    /// policy engine, which may turn them into partial or fallback envelopes.
    /// The request envelope is only borrowed and never modified.
    pub async fn translate_and_call(
        &self,
        service: &str,
        request: &Envelope<ToolCall>,
    ) -> Result<Envelope<ToolResponse>, ConduitError> {
        let ctx = Context::from_meta(&request.meta, &self.default_policy);
        ctx.clone()
            .run_with(self.call_in_context(&ctx, service, request))
            .await
    }

    async fn call_in_context(
        &self,
        ctx: &Context,
        service: &str,
        request: &Envelope<ToolCall>,
    ) -> Result<Envelope<ToolResponse>, ConduitError> {
        let started = Instant::now();
        let call = request.data.as_ref().ok_or_else(|| {
            ConduitError::Validation(format!(
                "envelope {} carries no tool call",
                request.meta.request_id
            ))
        })?;
        let tool = call.tool.as_str();

        let conn = self.transports.connect(service).await?;
        let transport = conn.kind();
        let injector = self.injectors.resolve(service, tool);
        let params = injector.inject(ctx, tool, &call.arguments)?;
        let native = NativeRequest::tool_call(&ctx.request_id, tool, params);

        info!(
            request_id = %ctx.request_id,
            service,
            tool,
            %transport,
            injector = injector.name(),
            mode = %ctx.policy.mode,
            "Dispatching tool call"
        );

        let result = self
            .engine
            .execute(&ctx.policy, |attempt| {
                let conn = Arc::clone(&conn);
                let native = native.clone();
                async move {
                    if attempt > 0 {
                        debug!(request_id = %native.id, attempt = attempt + 1, "Re-sending tool call");
                    }
                    let response = conn
                        .call(native)
                        .await
                        .map_err(|e| map_native_error(transport, service, &e))?;
                    response.into_tool_output(tool)
                }
            })
            .await;

        match result {
            Ok(content) => {
                let meta = request.meta.with_response_fields(started);
                debug!(
                    request_id = %ctx.request_id,
                    service,
                    tool,
                    duration_ms = meta.duration_ms.unwrap_or_default(),
                    "Tool call succeeded"
                );
                Ok(Envelope::ok(meta, ToolResponse::new(tool, content)))
            }
            Err(err) => {
                let outcome = self
                    .engine
                    .resolve_failure(ctx, service, tool, err, &ctx.policy)
                    .await;
                let meta = request.meta.with_response_fields(started);
                match outcome {
                    PolicyOutcome::Propagate(err) => Err(err),
                    PolicyOutcome::PartialEnvelope { error, data } => Ok(Envelope::partial(
                        meta,
                        data.map(|d| ToolResponse::new(tool, d)),
                        error.to_info(),
                    )),
                    PolicyOutcome::FallbackEnvelope { error, data } => Ok(Envelope::partial(
                        meta,
                        Some(ToolResponse::fallback(tool, data)),
                        error.to_info(),
                    )),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::injector::{ContextInjector, DatabaseInjector};
    use crate::policy::StaticFallback;
    use conduit_types::config::RetrySettings;
    use conduit_types::{ErrorKind, Meta, TransportKind};
    use conduit_wire::{FnConnection, NativeError, NativeResponse, StaticTransportRegistry};
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn echo() -> Arc<dyn conduit_wire::Connection> {
        FnConnection::shared(TransportKind::Rpc, |req: NativeRequest| async move {
            Ok(NativeResponse::success(req.id, req.params.arguments))
        })
    }

    fn failing(counter: Arc<AtomicU32>) -> Arc<dyn conduit_wire::Connection> {
        FnConnection::shared(TransportKind::Http, move |_req: NativeRequest| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(NativeError::status(503, "unavailable")) }
        })
    }

    fn fast_engine() -> ErrorPolicyEngine {
        ErrorPolicyEngine::new(RetrySettings {
            min_delay_ms: 1,
            max_delay_ms: 2,
            jitter: 0.0,
        })
    }

    fn adapter(registry: StaticTransportRegistry) -> ProtocolAdapter {
        ProtocolAdapter::new(Arc::new(registry))
            .with_policy_engine(fast_engine())
            .with_injectors(
                InjectorRegistry::new().with("database", Arc::new(DatabaseInjector::default())),
            )
    }

    fn call(policy: Option<ErrorPolicy>) -> Envelope<ToolCall> {
        let mut meta = Meta::new("r1").with_tenant("t1");
        meta.error_policy = policy;
        Envelope::ok(meta, ToolCall::new("query", json!({"sql": "select 1"})))
    }

    #[tokio::test]
    async fn test_database_injection_leaves_request_untouched() {
        let adapter = adapter(StaticTransportRegistry::new().with("database", echo()));
        let request = call(None);
        let snapshot = request.clone();

        let response = adapter.translate_and_call("database", &request).await.unwrap();
        let content = &response.data.as_ref().unwrap().content;
        assert_eq!(content["tenant_id"], "t1");
        assert_eq!(content["sql"], "select 1");
        assert_eq!(request, snapshot);
        assert!(request.data.unwrap().arguments.get("tenant_id").is_none());

        assert_eq!(response.meta.request_id, "r1");
        assert!(response.meta.timestamp.is_some());
        assert!(response.meta.duration_ms.is_some());
        assert!(response.error.is_none());
    }

    #[tokio::test]
    async fn test_unknown_service() {
        let adapter = adapter(StaticTransportRegistry::new());
        let err = adapter.translate_and_call("nope", &call(None)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_fail_fast_propagates_after_retries() {
        let counter = Arc::new(AtomicU32::new(0));
        let adapter = adapter(StaticTransportRegistry::new().with("api", failing(counter.clone())));
        let policy = ErrorPolicy::fail_fast().with_retries(2);

        let err = adapter
            .translate_and_call("api", &call(Some(policy)))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connection);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_allow_partial_returns_error_envelope() {
        let counter = Arc::new(AtomicU32::new(0));
        let adapter = adapter(StaticTransportRegistry::new().with("api", failing(counter)));

        let env = adapter
            .translate_and_call("api", &call(Some(ErrorPolicy::allow_partial())))
            .await
            .unwrap();
        assert!(env.is_hard_failure());
        let info = env.error.unwrap();
        assert_eq!(info.kind, ErrorKind::Connection);
        assert_eq!(info.code, Some(503));
        assert!(info.retryable);
    }

    #[tokio::test]
    async fn test_best_effort_fallback() {
        let counter = Arc::new(AtomicU32::new(0));
        let adapter = adapter(StaticTransportRegistry::new().with("api", failing(counter)))
            .with_policy_engine(
                fast_engine()
                    .with_fallback(Arc::new(StaticFallback::new().with("query", json!([])))),
            );

        let env = adapter
            .translate_and_call("api", &call(Some(ErrorPolicy::best_effort())))
            .await
            .unwrap();
        assert!(env.is_partial());
        let data = env.data.unwrap();
        assert!(data.from_fallback);
        assert_eq!(data.content, json!([]));
    }

    #[tokio::test]
    async fn test_jsonrpc_error_not_retried() {
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();
        let conn = FnConnection::shared(TransportKind::MessageBus, move |req: NativeRequest| {
            c.fetch_add(1, Ordering::SeqCst);
            async move { Ok(NativeResponse::error(req.id, -32602, "bad params")) }
        });
        let adapter = adapter(StaticTransportRegistry::new().with("bus", conn));
        let policy = ErrorPolicy::allow_partial().with_retries(3);

        let err = adapter
            .translate_and_call("bus", &call(Some(policy)))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_per_call_timeout() {
        let conn = FnConnection::shared(TransportKind::WebSocket, |req: NativeRequest| async move {
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            Ok(NativeResponse::success(req.id, Value::Null))
        });
        let adapter = adapter(StaticTransportRegistry::new().with("ws", conn));
        let policy = ErrorPolicy::fail_fast().with_timeout_ms(20);

        let err = adapter
            .translate_and_call("ws", &call(Some(policy)))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }

    struct CurrentTenant;

    impl ContextInjector for CurrentTenant {
        fn name(&self) -> &str {
            "current"
        }

        fn supports(&self, _tool: &str) -> bool {
            true
        }

        fn inject(&self, _ctx: &Context, _tool: &str, params: &Value) -> Result<Value, ConduitError> {
            let ambient = Context::current()?;
            let mut out = params.clone();
            out["seen_tenant"] = json!(ambient.tenant);
            Ok(out)
        }
    }

    #[tokio::test]
    async fn test_context_is_bound_for_plugins() {
        let adapter = ProtocolAdapter::new(Arc::new(
            StaticTransportRegistry::new().with("svc", echo()),
        ))
        .with_injectors(InjectorRegistry::new().with("svc", Arc::new(CurrentTenant)));

        let env = adapter.translate_and_call("svc", &call(None)).await.unwrap();
        assert_eq!(env.data.unwrap().content["seen_tenant"], "t1");
    }
}
