//! The transport-agnostic request/response envelope and its metadata.
//!
//! Wire projection:
//!
//! ```text
//! {"meta": {...}, "data": <T|null>, "error": <ErrorInfo|null>}
//! ```
//!
//! Optional `meta` fields are omitted when absent so a decode/encode cycle
//! reproduces the exact field set a peer sent.

use crate::error::{ConduitError, ErrorInfo};
use crate::policy::ErrorPolicy;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use uuid::Uuid;

/// Generate a fresh request identifier.
pub fn new_request_id() -> String {
    Uuid::new_v4().to_string()
}

/// Distributed-trace position of a single call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceContext {
    /// Stable across a whole workflow.
    pub trace_id: String,
    /// Unique to this call.
    pub span_id: String,
    /// Span of the immediate caller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<String>,
}

impl TraceContext {
    /// Start a new trace.
    pub fn new_root() -> Self {
        Self {
            trace_id: Uuid::new_v4().simple().to_string(),
            span_id: format!("span-{}", &Uuid::new_v4().simple().to_string()[..16]),
            parent_span_id: None,
        }
    }

    /// A child span in the same trace, parented on `self`.
    pub fn child(&self, span_id: impl Into<String>) -> Self {
        Self {
            trace_id: self.trace_id.clone(),
            span_id: span_id.into(),
            parent_span_id: Some(self.span_id.clone()),
        }
    }
}

/// Caller identity forwarded to downstream services.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub principal: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,
}

/// Where a sub-call sits inside a workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowContext {
    pub workflow_id: String,
    pub operation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<usize>,
}

/// Envelope metadata: identity, correlation, tracing and policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meta {
    pub request_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child_request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    /// Set on responses only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracing: Option<TraceContext>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security: Option<SecurityContext>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_policy: Option<ErrorPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_context: Option<WorkflowContext>,
}

impl Meta {
    /// Bare metadata with only a request id.
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            parent_request_id: None,
            child_request_id: None,
            tenant: None,
            session_id: None,
            agent_id: None,
            timestamp: None,
            duration_ms: None,
            tracing: None,
            security: None,
            error_policy: None,
            workflow_context: None,
        }
    }

    /// Fresh request id, current timestamp and a new root trace.
    pub fn generate() -> Self {
        let mut meta = Self::new(new_request_id());
        meta.timestamp = Some(Utc::now());
        meta.tracing = Some(TraceContext::new_root());
        meta
    }

    pub fn with_tenant(mut self, tenant: impl Into<String>) -> Self {
        self.tenant = Some(tenant.into());
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn with_tracing(mut self, tracing: TraceContext) -> Self {
        self.tracing = Some(tracing);
        self
    }

    pub fn with_security(mut self, security: SecurityContext) -> Self {
        self.security = Some(security);
        self
    }

    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.error_policy = Some(policy);
        self
    }

    /// Copy for a response: same `request_id`, fresh timestamp, and the time
    /// elapsed since `started` (monotonic) as `duration_ms`.
    pub fn with_response_fields(&self, started: Instant) -> Self {
        let mut meta = self.clone();
        meta.timestamp = Some(Utc::now());
        meta.duration_ms = Some(started.elapsed().as_millis() as u64);
        meta
    }
}

/// Uniform request/response container.
///
/// `error` set with `data == None` is a hard failure. Both set is a
/// recovered or partial result that callers treat as a warning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub meta: Meta,
    /// `null` on the wire decodes as `None`, so `Some(Value::Null)` does not
    /// survive a round trip. Payloads that need an explicit null wrap it.
    pub data: Option<T>,
    pub error: Option<ErrorInfo>,
}

impl<T> Envelope<T> {
    pub fn ok(meta: Meta, data: T) -> Self {
        Self {
            meta,
            data: Some(data),
            error: None,
        }
    }

    pub fn failed(meta: Meta, error: &ConduitError) -> Self {
        Self {
            meta,
            data: None,
            error: Some(error.to_info()),
        }
    }

    pub fn partial(meta: Meta, data: Option<T>, error: ErrorInfo) -> Self {
        Self {
            meta,
            data,
            error: Some(error),
        }
    }

    /// Error set and no usable data.
    pub fn is_hard_failure(&self) -> bool {
        self.error.is_some() && self.data.is_none()
    }

    /// Data and error both present.
    pub fn is_partial(&self) -> bool {
        self.error.is_some() && self.data.is_some()
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Data if present; a hard failure becomes its error.
    pub fn into_result(self) -> Result<T, ConduitError> {
        match (self.data, self.error) {
            (Some(data), _) => Ok(data),
            (None, Some(info)) => Err(info.to_error()),
            (None, None) => Err(ConduitError::Validation(format!(
                "envelope {} carries neither data nor error",
                self.meta.request_id
            ))),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Envelope<U> {
        Envelope {
            meta: self.meta,
            data: self.data.map(f),
            error: self.error,
        }
    }
}

impl<T: Serialize> Envelope<T> {
    pub fn to_json(&self) -> Result<String, ConduitError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn to_value(&self) -> Result<serde_json::Value, ConduitError> {
        Ok(serde_json::to_value(self)?)
    }
}

impl<T: DeserializeOwned> Envelope<T> {
    pub fn from_json(s: &str) -> Result<Self, ConduitError> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn from_value(v: serde_json::Value) -> Result<Self, ConduitError> {
        Ok(serde_json::from_value(v)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::policy::ErrorMode;
    use serde_json::json;

    #[test]
    fn test_minimal_envelope_is_lossless() {
        let raw = r#"{"meta":{"request_id":"r1","tenant":"t1"},"data":{"x":1},"error":null}"#;
        let env: Envelope<serde_json::Value> = Envelope::from_json(raw).unwrap();
        assert_eq!(env.meta.request_id, "r1");
        assert_eq!(env.meta.tenant.as_deref(), Some("t1"));
        assert!(env.meta.timestamp.is_none());
        assert!(env.meta.tracing.is_none());
        assert_eq!(env.data, Some(json!({"x": 1})));
        assert!(env.error.is_none());

        let back: serde_json::Value = serde_json::from_str(&env.to_json().unwrap()).unwrap();
        let original: serde_json::Value = serde_json::from_str(raw).unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn test_data_shapes_roundtrip() {
        let shapes = [
            json!(0),
            json!("text"),
            json!(true),
            json!([]),
            json!([1, "two", null, {"three": 3}]),
            json!({}),
            json!({"a": {"b": [1, 2, {"c": null}]}, "d": 1.5}),
        ];
        for data in shapes {
            let env = Envelope::ok(Meta::new("r1").with_tenant("t"), data.clone());
            let decoded: Envelope<serde_json::Value> =
                Envelope::from_json(&env.to_json().unwrap()).unwrap();
            assert_eq!(decoded, env, "{data}");
        }
    }

    #[test]
    fn test_null_data_decodes_as_absent() {
        let env = Envelope::ok(Meta::new("r1"), serde_json::Value::Null);
        let wire = env.to_value().unwrap();
        assert!(wire["data"].is_null());

        let decoded: Envelope<serde_json::Value> = Envelope::from_value(wire).unwrap();
        assert_eq!(decoded.data, None);
        assert_eq!(decoded.meta, env.meta);

        let wrapped = Envelope::ok(Meta::new("r2"), json!({"value": null}));
        let decoded: Envelope<serde_json::Value> =
            Envelope::from_json(&wrapped.to_json().unwrap()).unwrap();
        assert_eq!(decoded, wrapped);
    }

    #[test]
    fn test_full_meta_roundtrip() {
        let meta = Meta::generate()
            .with_tenant("acme")
            .with_session("s-1")
            .with_agent("planner")
            .with_security(SecurityContext {
                principal: Some("alice".to_string()),
                roles: vec!["admin".to_string()],
            })
            .with_error_policy(ErrorPolicy::allow_partial().with_rollback(true));
        let env = Envelope::ok(meta, json!({"items": [1, 2, 3]}));

        let decoded: Envelope<serde_json::Value> =
            Envelope::from_json(&env.to_json().unwrap()).unwrap();
        assert_eq!(decoded, env);
        assert_eq!(
            decoded.meta.error_policy.unwrap().mode,
            ErrorMode::AllowPartial
        );
    }

    #[test]
    fn test_failed_and_partial_classification() {
        let meta = Meta::new("r2");
        let err = ConduitError::Connection("down".to_string());

        let hard: Envelope<u32> = Envelope::failed(meta.clone(), &err);
        assert!(hard.is_hard_failure());
        assert!(!hard.is_partial());
        assert_eq!(hard.clone().into_result().unwrap_err().kind(), ErrorKind::Connection);

        let soft = Envelope::partial(meta, Some(7u32), err.to_info());
        assert!(soft.is_partial());
        assert!(!soft.is_hard_failure());
        assert_eq!(soft.into_result().unwrap(), 7);
    }

    #[test]
    fn test_error_serialized_as_null_when_absent() {
        let env = Envelope::ok(Meta::new("r3"), 1u8);
        let v = env.to_value().unwrap();
        assert!(v["error"].is_null());
        assert!(v.as_object().unwrap().contains_key("error"));
        assert!(v["meta"].get("tenant").is_none());
    }

    #[test]
    fn test_response_fields_keep_request_id() {
        let meta = Meta::new("r4");
        let started = Instant::now();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let resp = meta.with_response_fields(started);
        assert_eq!(resp.request_id, "r4");
        assert!(resp.timestamp.is_some());
        assert!(resp.duration_ms.unwrap() >= 5);
    }

    #[test]
    fn test_child_trace_links_parent() {
        let root = TraceContext::new_root();
        let child = root.child("span-step-001");
        assert_eq!(child.trace_id, root.trace_id);
        assert_eq!(child.parent_span_id.as_deref(), Some(root.span_id.as_str()));
        assert_ne!(child.span_id, root.span_id);
    }
}
