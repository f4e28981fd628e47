//! Per-call ambient context.
//!
//! A [`Context`] is derived from an envelope's [`Meta`] at the adapter or
//! coordinator boundary. Core signatures take it explicitly. For user plugins
//! (injectors, compensators, fallbacks) it is also bound as a tokio task-local
//! through [`Context::run_with`], which follows the task across `.await`
//! points and worker threads.

use conduit_types::envelope::new_request_id;
use conduit_types::workflow::WorkflowStep;
use conduit_types::{
    ConduitError, ErrorPolicy, Meta, SecurityContext, TraceContext, WorkflowContext,
};
use std::future::Future;

tokio::task_local! {
    static CURRENT: Context;
}

/// Ambient metadata for one call or one workflow run.
#[derive(Debug, Clone, PartialEq)]
pub struct Context {
    pub request_id: String,
    /// Set when this call is a workflow sub-call.
    pub parent_request_id: Option<String>,
    pub tenant: Option<String>,
    pub session_id: Option<String>,
    pub agent_id: Option<String>,
    pub trace: Option<TraceContext>,
    pub security: Option<SecurityContext>,
    /// The resolved policy. Read-only once the context exists.
    pub policy: ErrorPolicy,
    pub workflow: Option<WorkflowContext>,
}

impl From<&Meta> for Context {
    fn from(meta: &Meta) -> Self {
        Self::from_meta(meta, &ErrorPolicy::default())
    }
}

impl Context {
    /// Extract ambient fields, resolving the policy against `default_policy`.
    pub fn from_meta(meta: &Meta, default_policy: &ErrorPolicy) -> Self {
        Self {
            request_id: meta.request_id.clone(),
            parent_request_id: meta.parent_request_id.clone(),
            tenant: meta.tenant.clone(),
            session_id: meta.session_id.clone(),
            agent_id: meta.agent_id.clone(),
            trace: meta.tracing.clone(),
            security: meta.security.clone(),
            policy: ErrorPolicy::resolve(meta.error_policy.as_ref(), default_policy),
            workflow: meta.workflow_context.clone(),
        }
    }

    /// Start a trace if the caller did not send one.
    pub fn ensure_trace(mut self) -> Self {
        if self.trace.is_none() {
            self.trace = Some(TraceContext::new_root());
        }
        self
    }

    pub fn with_workflow(mut self, workflow: WorkflowContext) -> Self {
        self.workflow = Some(workflow);
        self
    }

    /// Tenant, or `TenantExtraction` if the caller did not send one.
    pub fn require_tenant(&self) -> Result<&str, ConduitError> {
        self.tenant.as_deref().ok_or_else(|| {
            ConduitError::TenantExtraction(format!(
                "request {} carries no tenant",
                self.request_id
            ))
        })
    }

    pub fn trace_id(&self) -> Option<&str> {
        self.trace.as_ref().map(|t| t.trace_id.as_str())
    }

    /// Run `fut` with this context bound. Nested scopes shadow the outer one
    /// and the outer context is visible again once `fut` completes.
    pub async fn run_with<F>(self, fut: F) -> F::Output
    where
        F: Future,
    {
        CURRENT.scope(self, fut).await
    }

    /// The context bound to the current task.
    pub fn current() -> Result<Context, ConduitError> {
        CURRENT
            .try_with(|ctx| ctx.clone())
            .map_err(|_| ConduitError::MissingContext)
    }

    /// Meta for a workflow sub-call.
    ///
    /// The child gets a fresh request id that is also its `child_request_id`,
    /// points back at this context's request, keeps the trace id and opens
    /// `span_id` under the current span.
    pub fn child_meta(&self, step: &WorkflowStep, span_id: impl Into<String>) -> Meta {
        let child_id = new_request_id();
        let trace = match &self.trace {
            Some(parent) => parent.child(span_id),
            None => TraceContext {
                span_id: span_id.into(),
                ..TraceContext::new_root()
            },
        };
        let workflow = self.workflow.as_ref().map(|wf| WorkflowContext {
            workflow_id: wf.workflow_id.clone(),
            operation: wf.operation.clone(),
            step: Some(step.name.clone()),
            index: Some(step.index),
            total: Some(step.total),
        });

        let mut meta = Meta::new(child_id.clone());
        meta.parent_request_id = Some(self.request_id.clone());
        meta.child_request_id = Some(child_id);
        meta.tenant = self.tenant.clone();
        meta.session_id = self.session_id.clone();
        meta.agent_id = self.agent_id.clone();
        meta.tracing = Some(trace);
        meta.security = self.security.clone();
        meta.error_policy = Some(self.policy.clone());
        meta.workflow_context = workflow;
        meta
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_types::policy::ErrorMode;
    use conduit_types::workflow::StepKind;

    fn meta() -> Meta {
        Meta::new("wf-1")
            .with_tenant("acme")
            .with_tracing(TraceContext {
                trace_id: "trace-1".to_string(),
                span_id: "span-root".to_string(),
                parent_span_id: None,
            })
    }

    fn step(name: &str, index: usize) -> WorkflowStep {
        WorkflowStep {
            name: name.to_string(),
            index,
            total: 3,
            kind: StepKind::Sequential,
            compensating_action: None,
        }
    }

    #[test]
    fn test_from_meta_resolves_policy() {
        let ctx = Context::from_meta(&meta(), &ErrorPolicy::allow_partial());
        assert_eq!(ctx.policy.mode, ErrorMode::AllowPartial);

        let own = meta().with_error_policy(ErrorPolicy::best_effort());
        let ctx = Context::from_meta(&own, &ErrorPolicy::allow_partial());
        assert_eq!(ctx.policy.mode, ErrorMode::BestEffort);
    }

    #[test]
    fn test_require_tenant() {
        let ctx = Context::from(&Meta::new("r"));
        let err = tokio_test::assert_err!(ctx.require_tenant());
        assert!(matches!(err, ConduitError::TenantExtraction(_)));
        let ctx = Context::from(&meta());
        let tenant = tokio_test::assert_ok!(ctx.require_tenant());
        assert_eq!(tenant, "acme");
    }

    #[tokio::test]
    async fn test_current_without_scope() {
        assert_eq!(Context::current().unwrap_err(), ConduitError::MissingContext);
    }

    #[tokio::test]
    async fn test_nested_scopes_revert() {
        let outer = Context::from(&meta());
        let inner = Context::from(&Meta::new("inner"));

        outer
            .run_with(async {
                assert_eq!(Context::current().unwrap().request_id, "wf-1");
                inner
                    .run_with(async {
                        assert_eq!(Context::current().unwrap().request_id, "inner");
                    })
                    .await;
                assert_eq!(Context::current().unwrap().request_id, "wf-1");
            })
            .await;

        assert!(Context::current().is_err());
    }

    #[tokio::test]
    async fn test_context_survives_await_points() {
        Context::from(&meta())
            .run_with(async {
                tokio::task::yield_now().await;
                tokio::time::sleep(std::time::Duration::from_millis(1)).await;
                assert_eq!(Context::current().unwrap().tenant.as_deref(), Some("acme"));
            })
            .await;
    }

    #[test]
    fn test_child_meta_correlation() {
        let ctx = Context::from(&meta()).with_workflow(WorkflowContext {
            workflow_id: "wf-1".to_string(),
            operation: "checkout".to_string(),
            step: None,
            index: None,
            total: None,
        });
        let s = step("charge", 2);
        let child = ctx.child_meta(&s, s.span_id());

        assert_ne!(child.request_id, "wf-1");
        assert_eq!(child.child_request_id.as_deref(), Some(child.request_id.as_str()));
        assert_eq!(child.parent_request_id.as_deref(), Some("wf-1"));
        assert_eq!(child.tenant.as_deref(), Some("acme"));

        let trace = child.tracing.unwrap();
        assert_eq!(trace.trace_id, "trace-1");
        assert_eq!(trace.span_id, "span-charge-002");
        assert_eq!(trace.parent_span_id.as_deref(), Some("span-root"));

        let wf = child.workflow_context.unwrap();
        assert_eq!(wf.step.as_deref(), Some("charge"));
        assert_eq!(wf.index, Some(2));
        assert_eq!(wf.total, Some(3));
    }

    #[test]
    fn test_sibling_children_get_distinct_ids() {
        let ctx = Context::from(&meta());
        let a = ctx.child_meta(&step("a", 1), "span-a-001");
        let b = ctx.child_meta(&step("b", 2), "span-b-002");
        assert_ne!(a.request_id, b.request_id);
        assert_eq!(
            a.tracing.unwrap().trace_id,
            b.tracing.unwrap().trace_id
        );
    }
}
