//! Error policy enforcement.
//!
//! The engine owns two decisions: whether a failed attempt is retried, and
//! how a final failure is surfaced (propagate, partial envelope, fallback).

use crate::context::Context;
use crate::retry::{retry_async, RetryConfig, RetryOutcome};
use async_trait::async_trait;
use conduit_types::config::RetrySettings;
use conduit_types::{ConduitError, ErrorMode, ErrorPolicy};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// How a final failure reaches the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum PolicyOutcome {
    /// Fail the call with this error.
    Propagate(ConduitError),
    /// Return an envelope carrying the error and whatever data exists.
    PartialEnvelope {
        error: ConduitError,
        data: Option<Value>,
    },
    /// Return fallback data, with the original error attached.
    FallbackEnvelope { error: ConduitError, data: Value },
}

impl PolicyOutcome {
    pub fn is_propagate(&self) -> bool {
        matches!(self, PolicyOutcome::Propagate(_))
    }

    pub fn error(&self) -> &ConduitError {
        match self {
            PolicyOutcome::Propagate(error)
            | PolicyOutcome::PartialEnvelope { error, .. }
            | PolicyOutcome::FallbackEnvelope { error, .. } => error,
        }
    }
}

/// Source of substitute results for `best_effort` calls.
#[async_trait]
pub trait FallbackSource: Send + Sync {
    /// Substitute output for `tool` on `service`, if one exists.
    async fn fallback(&self, ctx: &Context, service: &str, tool: &str) -> Option<Value>;
}

/// Fixed fallback values keyed by tool name.
#[derive(Debug, Clone, Default)]
pub struct StaticFallback {
    values: HashMap<String, Value>,
}

impl StaticFallback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, tool: impl Into<String>, value: Value) -> Self {
        self.values.insert(tool.into(), value);
        self
    }
}

#[async_trait]
impl FallbackSource for StaticFallback {
    async fn fallback(&self, _ctx: &Context, _service: &str, tool: &str) -> Option<Value> {
        self.values.get(tool).cloned()
    }
}

/// Applies an [`ErrorPolicy`] to downstream calls.
#[derive(Clone, Default)]
pub struct ErrorPolicyEngine {
    retry: RetrySettings,
    fallback: Option<Arc<dyn FallbackSource>>,
}

impl ErrorPolicyEngine {
    pub fn new(retry: RetrySettings) -> Self {
        Self {
            retry,
            fallback: None,
        }
    }

    pub fn with_fallback(mut self, fallback: Arc<dyn FallbackSource>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn retry_settings(&self) -> &RetrySettings {
        &self.retry
    }

    /// Retry timing for `policy`.
    pub fn retry_config(&self, policy: &ErrorPolicy) -> RetryConfig {
        let config = RetryConfig::from_settings(&self.retry, policy.retry_count);
        if policy.timeout_ms > 0 {
            config.with_attempt_timeout(Duration::from_millis(policy.timeout_ms))
        } else {
            config
        }
    }

    /// Run `op` under the policy's retry budget and per-attempt timeout.
    pub async fn execute<F, Fut, T>(&self, policy: &ErrorPolicy, op: F) -> Result<T, ConduitError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ConduitError>>,
    {
        let config = self.retry_config(policy);
        match retry_async(&config, op).await {
            RetryOutcome::Success { result, attempts } => {
                if attempts > 1 {
                    debug!(attempts, "Call recovered after retry");
                }
                Ok(result)
            }
            RetryOutcome::Exhausted {
                last_error,
                attempts,
            } => {
                debug!(attempts, kind = %last_error.kind(), "Call failed");
                Err(last_error)
            }
        }
    }

    /// Pure decision for a final failure.
    ///
    /// Validation, security and config errors always propagate. Otherwise the
    /// mode decides; `best_effort` without fallback data propagates.
    pub fn decide(
        &self,
        error: ConduitError,
        policy: &ErrorPolicy,
        fallback: Option<Value>,
    ) -> PolicyOutcome {
        if error.always_fail_fast() {
            return PolicyOutcome::Propagate(error);
        }
        match policy.mode {
            ErrorMode::FailFast => PolicyOutcome::Propagate(error),
            ErrorMode::AllowPartial => PolicyOutcome::PartialEnvelope { error, data: None },
            ErrorMode::BestEffort => match fallback {
                Some(data) => PolicyOutcome::FallbackEnvelope { error, data },
                None => PolicyOutcome::Propagate(error),
            },
        }
    }

    /// Resolve a final failure, consulting the fallback source only when the
    /// policy could use it.
    pub async fn resolve_failure(
        &self,
        ctx: &Context,
        service: &str,
        tool: &str,
        error: ConduitError,
        policy: &ErrorPolicy,
    ) -> PolicyOutcome {
        let fallback = match (&self.fallback, policy.mode) {
            (Some(source), ErrorMode::BestEffort) if !error.always_fail_fast() => {
                source.fallback(ctx, service, tool).await
            }
            _ => None,
        };
        let outcome = self.decide(error, policy, fallback);
        match &outcome {
            PolicyOutcome::Propagate(e) => {
                warn!(request_id = %ctx.request_id, service, tool, kind = %e.kind(), mode = %policy.mode, "Propagating failure: {e}");
            }
            PolicyOutcome::PartialEnvelope { error, .. } => {
                warn!(request_id = %ctx.request_id, service, tool, kind = %error.kind(), "Returning partial envelope");
            }
            PolicyOutcome::FallbackEnvelope { error, .. } => {
                warn!(request_id = %ctx.request_id, service, tool, kind = %error.kind(), "Serving fallback result");
            }
        }
        outcome
    }
}
