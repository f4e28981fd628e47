//! Context injectors: per-service strategies that enrich outgoing tool
//! arguments with tenant, security and trace fields.
//!
//! Injectors are pure. They read the caller's arguments and return a new
//! object; applying one twice to the same arguments gives the same result.

use crate::context::Context;
use conduit_types::ConduitError;
use serde_json::{json, Map, Value};
use std::collections::{BTreeSet, HashMap};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

/// Strategy for augmenting the arguments of calls to one downstream service.
pub trait ContextInjector: Send + Sync {
    /// Identifier used in config and logs.
    fn name(&self) -> &str;

    /// Whether this injector handles `tool`. Unsupported tools fall back to
    /// the default injector.
    fn supports(&self, tool: &str) -> bool;

    /// Return `params` enriched with context fields. Must not depend on
    /// anything but its inputs.
    fn inject(&self, ctx: &Context, tool: &str, params: &Value) -> Result<Value, ConduitError>;
}

/// The set of tools an injector declares.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ToolSet {
    #[default]
    Any,
    Only(BTreeSet<String>),
}

impl ToolSet {
    pub fn only<I, S>(tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ToolSet::Only(tools.into_iter().map(Into::into).collect())
    }

    pub fn contains(&self, tool: &str) -> bool {
        match self {
            ToolSet::Any => true,
            ToolSet::Only(set) => set.contains(tool),
        }
    }
}

/// Copy `params` into a fresh map. `null` counts as no arguments.
fn base_object(params: &Value) -> Result<Map<String, Value>, ConduitError> {
    match params {
        Value::Object(map) => Ok(map.clone()),
        Value::Null => Ok(Map::new()),
        other => Err(ConduitError::Validation(format!(
            "tool arguments must be a JSON object, got {}",
            type_name(other)
        ))),
    }
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn trace_value(ctx: &Context) -> Value {
    match &ctx.trace {
        Some(t) => serde_json::to_value(t).unwrap_or(Value::Null),
        None => Value::Null,
    }
}

// ---------------------------------------------------------------------------
// Built-in injectors
// ---------------------------------------------------------------------------

/// Adds a generic `_context` object. Used for any service or tool without a
/// more specific injector.
#[derive(Debug, Default, Clone)]
pub struct DefaultInjector;

impl ContextInjector for DefaultInjector {
    fn name(&self) -> &str {
        "default"
    }

    fn supports(&self, _tool: &str) -> bool {
        true
    }

    fn inject(&self, ctx: &Context, _tool: &str, params: &Value) -> Result<Value, ConduitError> {
        let mut out = base_object(params)?;
        let mut context = Map::new();
        context.insert("request_id".into(), json!(ctx.request_id));
        if let Some(parent) = &ctx.parent_request_id {
            context.insert("parent_request_id".into(), json!(parent));
        }
        if let Some(tenant) = &ctx.tenant {
            context.insert("tenant".into(), json!(tenant));
        }
        if let Some(security) = &ctx.security {
            context.insert("security".into(), serde_json::to_value(security)?);
        }
        if ctx.trace.is_some() {
            context.insert("trace".into(), trace_value(ctx));
        }
        out.insert("_context".into(), Value::Object(context));
        Ok(Value::Object(out))
    }
}

/// Database services: every statement is scoped by `tenant_id`.
#[derive(Debug, Default, Clone)]
pub struct DatabaseInjector {
    tools: ToolSet,
}

impl DatabaseInjector {
    pub fn new(tools: ToolSet) -> Self {
        Self { tools }
    }
}

impl ContextInjector for DatabaseInjector {
    fn name(&self) -> &str {
        "database"
    }

    fn supports(&self, tool: &str) -> bool {
        self.tools.contains(tool)
    }

    fn inject(&self, ctx: &Context, _tool: &str, params: &Value) -> Result<Value, ConduitError> {
        let tenant = ctx.require_tenant()?;
        let mut out = base_object(params)?;
        out.insert("tenant_id".into(), json!(tenant));
        if ctx.trace.is_some() {
            out.insert("_trace".into(), trace_value(ctx));
        }
        Ok(Value::Object(out))
    }
}

/// Filesystem services: confines the call to the tenant's directory.
#[derive(Debug, Clone)]
pub struct FilesystemInjector {
    root: PathBuf,
    tools: ToolSet,
}

impl Default for FilesystemInjector {
    fn default() -> Self {
        Self::new("/tenants", ToolSet::Any)
    }
}

impl FilesystemInjector {
    pub fn new(root: impl Into<PathBuf>, tools: ToolSet) -> Self {
        Self {
            root: root.into(),
            tools,
        }
    }
}

impl ContextInjector for FilesystemInjector {
    fn name(&self) -> &str {
        "filesystem"
    }

    fn supports(&self, tool: &str) -> bool {
        self.tools.contains(tool)
    }

    fn inject(&self, ctx: &Context, _tool: &str, params: &Value) -> Result<Value, ConduitError> {
        let tenant = ctx.require_tenant()?;
        // A tenant id is a single path segment.
        let mut components = Path::new(tenant).components();
        if !matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        ) {
            return Err(ConduitError::Security(format!(
                "tenant '{tenant}' is not a valid directory name"
            )));
        }
        let mut out = base_object(params)?;
        out.insert("tenant_id".into(), json!(tenant));
        out.insert(
            "tenant_root".into(),
            json!(self.root.join(tenant).to_string_lossy()),
        );
        Ok(Value::Object(out))
    }
}

/// HTTP APIs: context travels as a `headers` object.
#[derive(Debug, Default, Clone)]
pub struct HttpApiInjector {
    tools: ToolSet,
}

impl HttpApiInjector {
    pub fn new(tools: ToolSet) -> Self {
        Self { tools }
    }
}

impl ContextInjector for HttpApiInjector {
    fn name(&self) -> &str {
        "http"
    }

    fn supports(&self, tool: &str) -> bool {
        self.tools.contains(tool)
    }

    fn inject(&self, ctx: &Context, _tool: &str, params: &Value) -> Result<Value, ConduitError> {
        let mut out = base_object(params)?;
        let mut headers = match out.remove("headers") {
            Some(Value::Object(existing)) => existing,
            Some(Value::Null) | None => Map::new(),
            Some(other) => {
                return Err(ConduitError::Validation(format!(
                    "'headers' must be an object, got {}",
                    type_name(&other)
                )))
            }
        };
        headers.insert("x-request-id".into(), json!(ctx.request_id));
        if let Some(tenant) = &ctx.tenant {
            headers.insert("x-tenant-id".into(), json!(tenant));
        }
        if let Some(t) = &ctx.trace {
            headers.insert(
                "traceparent".into(),
                json!(format!("00-{}-{}-01", t.trace_id, t.span_id)),
            );
        }
        out.insert("headers".into(), Value::Object(headers));
        Ok(Value::Object(out))
    }
}

/// Build a built-in injector by its config name.
pub fn builtin(name: &str) -> Result<Arc<dyn ContextInjector>, ConduitError> {
    match name {
        "default" => Ok(Arc::new(DefaultInjector)),
        "database" => Ok(Arc::new(DatabaseInjector::default())),
        "filesystem" => Ok(Arc::new(FilesystemInjector::default())),
        "http" => Ok(Arc::new(HttpApiInjector::default())),
        other => Err(ConduitError::Config(format!(
            "unknown injector '{other}' (expected default, database, filesystem or http)"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Service name to injector. Built once, then shared read-only.
#[derive(Clone)]
pub struct InjectorRegistry {
    by_service: HashMap<String, Arc<dyn ContextInjector>>,
    fallback: Arc<dyn ContextInjector>,
}

impl Default for InjectorRegistry {
    fn default() -> Self {
        Self {
            by_service: HashMap::new(),
            fallback: Arc::new(DefaultInjector),
        }
    }
}

impl InjectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, service: impl Into<String>, injector: Arc<dyn ContextInjector>) -> Self {
        self.by_service.insert(service.into(), injector);
        self
    }

    /// The service's injector if it supports `tool`, else the default.
    pub fn resolve(&self, service: &str, tool: &str) -> &dyn ContextInjector {
        match self.by_service.get(service) {
            Some(inj) if inj.supports(tool) => inj.as_ref(),
            _ => self.fallback.as_ref(),
        }
    }

    pub fn len(&self) -> usize {
        self.by_service.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_service.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_types::{ErrorKind, Meta, SecurityContext, TraceContext, ToolCall};

    fn ctx() -> Context {
        let meta = Meta::new("r1")
            .with_tenant("acme")
            .with_security(SecurityContext {
                principal: Some("alice".to_string()),
                roles: vec!["admin".to_string()],
            })
            .with_tracing(TraceContext {
                trace_id: "t1".to_string(),
                span_id: "s1".to_string(),
                parent_span_id: None,
            });
        Context::from(&meta)
    }

    #[test]
    fn test_database_adds_tenant_without_touching_source() {
        let call = ToolCall::new("query", json!({"sql": "select 1"}));
        let before = call.clone();
        let out = DatabaseInjector::default()
            .inject(&ctx(), &call.tool, &call.arguments)
            .unwrap();
        assert_eq!(out["tenant_id"], "acme");
        assert_eq!(out["sql"], "select 1");
        assert_eq!(out["_trace"]["trace_id"], "t1");
        assert_eq!(call, before);
        assert!(call.arguments.get("tenant_id").is_none());
    }

    #[test]
    fn test_database_requires_tenant() {
        let err = DatabaseInjector::default()
            .inject(&Context::from(&Meta::new("r")), "query", &json!({}))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TenantExtraction);
    }

    #[test]
    fn test_injectors_are_idempotent() {
        let injectors: Vec<Arc<dyn ContextInjector>> = vec![
            Arc::new(DefaultInjector),
            Arc::new(DatabaseInjector::default()),
            Arc::new(FilesystemInjector::default()),
            Arc::new(HttpApiInjector::default()),
        ];
        let params = json!({"path": "a.txt", "tenant_id": "spoofed"});
        for inj in injectors {
            let once = inj.inject(&ctx(), "t", &params).unwrap();
            let twice = inj.inject(&ctx(), "t", &once).unwrap();
            assert_eq!(once, twice, "{} is not idempotent", inj.name());
            assert_eq!(params["tenant_id"], "spoofed");
        }
    }

    #[test]
    fn test_default_context_object() {
        let out = DefaultInjector.inject(&ctx(), "t", &json!({"x": 1})).unwrap();
        assert_eq!(out["x"], 1);
        assert_eq!(out["_context"]["tenant"], "acme");
        assert_eq!(out["_context"]["request_id"], "r1");
        assert_eq!(out["_context"]["security"]["principal"], "alice");
        assert_eq!(out["_context"]["trace"]["span_id"], "s1");
    }

    #[test]
    fn test_filesystem_root() {
        let inj = FilesystemInjector::new("/srv/data", ToolSet::Any);
        let out = inj.inject(&ctx(), "read_file", &Value::Null).unwrap();
        assert_eq!(out["tenant_root"], "/srv/data/acme");

        let bad = Context::from(&Meta::new("r").with_tenant("../etc"));
        assert_eq!(
            inj.inject(&bad, "read_file", &json!({})).unwrap_err().kind(),
            ErrorKind::Security
        );
    }

    #[test]
    fn test_http_headers_merge() {
        let out = HttpApiInjector::default()
            .inject(&ctx(), "get", &json!({"headers": {"accept": "json"}}))
            .unwrap();
        let headers = &out["headers"];
        assert_eq!(headers["accept"], "json");
        assert_eq!(headers["x-tenant-id"], "acme");
        assert_eq!(headers["x-request-id"], "r1");
        assert_eq!(headers["traceparent"], "00-t1-s1-01");
    }

    #[test]
    fn test_non_object_arguments_rejected() {
        let err = DefaultInjector.inject(&ctx(), "t", &json!([1, 2])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_registry_resolution() {
        let registry = InjectorRegistry::new().with(
            "database",
            Arc::new(DatabaseInjector::new(ToolSet::only(["query"]))),
        );
        assert_eq!(registry.resolve("database", "query").name(), "database");
        assert_eq!(registry.resolve("database", "vacuum").name(), "default");
        assert_eq!(registry.resolve("search", "find").name(), "default");
    }

    #[test]
    fn test_builtin_names() {
        for name in ["default", "database", "filesystem", "http"] {
            assert_eq!(builtin(name).unwrap().name(), name);
        }
        assert_eq!(builtin("ldap").err().unwrap().kind(), ErrorKind::Config);
    }
}
