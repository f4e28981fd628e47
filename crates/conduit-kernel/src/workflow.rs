//! Workflow coordinator: parallel fan-out, sequential chaining, and
//! compensating rollback across protocol-adapter calls.
//!
//! A plan is an ordered list of phases. A parallel group launches every
//! member at once and awaits all of them; a sequential step receives the
//! previous phase's output as `arguments.input`. Completed sequential steps
//! are kept on a stack so they can be compensated in reverse order.

use async_trait::async_trait;
use conduit_runtime::{Context, ProtocolAdapter};
use conduit_types::workflow::{
    validate_plan, CompensationSpec, PhaseSpec, StepFailure, StepKind, StepSpec,
    WorkflowDefinition, WorkflowRequest, WorkflowResponse, WorkflowState, WorkflowStep,
};
use conduit_types::{
    ConduitError, Envelope, ErrorInfo, ErrorKind, ErrorMode, ErrorPolicy, Meta, ToolCall,
    WorkflowContext,
};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// A user-supplied inverse of a completed step.
#[async_trait]
pub trait CompensatingAction: Send + Sync {
    /// Undo `step`, whose call returned `output`. `ctx` is the compensation
    /// call's own context and is also bound as the task-local context.
    async fn compensate(
        &self,
        ctx: &Context,
        step: &WorkflowStep,
        output: &Value,
    ) -> Result<(), ConduitError>;
}

/// One phase after decomposition, with its steps numbered across the plan.
#[derive(Debug, Clone)]
pub struct PlannedPhase<'a> {
    pub kind: StepKind,
    pub name: &'a str,
    pub steps: Vec<(WorkflowStep, &'a StepSpec)>,
}

/// Number every step of `phases` (1-based) and attach its compensation.
pub fn decompose(phases: &[PhaseSpec]) -> Vec<PlannedPhase<'_>> {
    let total = phases.iter().map(|p| p.steps().len()).sum();
    let mut index = 0;
    phases
        .iter()
        .map(|phase| {
            let kind = phase.kind();
            let steps = phase
                .steps()
                .into_iter()
                .map(|spec| {
                    index += 1;
                    let step = WorkflowStep {
                        name: spec.name.clone(),
                        index,
                        total,
                        kind,
                        compensating_action: spec.compensation.clone(),
                    };
                    (step, spec)
                })
                .collect();
            PlannedPhase {
                kind,
                name: phase.name(),
                steps,
            }
        })
        .collect()
}

struct CompletedStep {
    step: WorkflowStep,
    output: Value,
}

/// Why a run stopped early.
struct RunFailure {
    step: String,
    error: ErrorInfo,
}

/// Builder for [`WorkflowCoordinator`].
pub struct WorkflowCoordinatorBuilder {
    adapter: ProtocolAdapter,
    definitions: HashMap<String, WorkflowDefinition>,
    compensators: HashMap<String, Arc<dyn CompensatingAction>>,
}

impl WorkflowCoordinatorBuilder {
    pub fn definition(mut self, definition: WorkflowDefinition) -> Self {
        self.definitions
            .insert(definition.operation.clone(), definition);
        self
    }

    /// Register an action referenced by `CompensationSpec::Named { name }`.
    pub fn compensator(
        mut self,
        name: impl Into<String>,
        action: Arc<dyn CompensatingAction>,
    ) -> Self {
        self.compensators.insert(name.into(), action);
        self
    }

    /// Validate every definition and freeze the registry.
    pub fn build(self) -> Result<WorkflowCoordinator, ConduitError> {
        for def in self.definitions.values() {
            def.validate().map_err(|e| {
                ConduitError::Config(format!("workflow '{}': {e}", def.operation))
            })?;
            for phase in &def.phases {
                for step in phase.steps() {
                    if let Some(CompensationSpec::Named { name }) = &step.compensation {
                        if !self.compensators.contains_key(name) {
                            return Err(ConduitError::Config(format!(
                                "workflow '{}' step '{}' uses unregistered compensator '{name}'",
                                def.operation, step.name
                            )));
                        }
                    }
                }
            }
        }
        info!(
            definitions = self.definitions.len(),
            compensators = self.compensators.len(),
            "Workflow coordinator ready"
        );
        Ok(WorkflowCoordinator {
            adapter: self.adapter,
            definitions: Arc::new(self.definitions),
            compensators: Arc::new(self.compensators),
        })
    }
}

/// Runs workflow requests. Cheap to clone; all registries are immutable.
#[derive(Clone)]
pub struct WorkflowCoordinator {
    adapter: ProtocolAdapter,
    definitions: Arc<HashMap<String, WorkflowDefinition>>,
    compensators: Arc<HashMap<String, Arc<dyn CompensatingAction>>>,
}

impl WorkflowCoordinator {
    pub fn builder(adapter: ProtocolAdapter) -> WorkflowCoordinatorBuilder {
        WorkflowCoordinatorBuilder {
            adapter,
            definitions: HashMap::new(),
            compensators: HashMap::new(),
        }
    }

    pub fn definition(&self, operation: &str) -> Option<&WorkflowDefinition> {
        self.definitions.get(operation)
    }

    pub fn operations(&self) -> Vec<&str> {
        let mut ops: Vec<&str> = self.definitions.keys().map(String::as_str).collect();
        ops.sort_unstable();
        ops
    }

    /// Execute a workflow request.
    ///
    /// `completed` runs return data only. `partial_success` returns data plus
    /// the first step error as a warning. `failed` and `failed_with_rollback`
    /// are hard failures: no data, and the [`WorkflowResponse`] rides in the
    /// error's `details` (see [`WorkflowResponse::from_error`]).
    pub async fn execute(&self, request: Envelope<WorkflowRequest>) -> Envelope<WorkflowResponse> {
        let started = Instant::now();
        let workflow_id = request.meta.request_id.clone();
        let operation = request
            .data
            .as_ref()
            .map(|r| r.operation.clone())
            .unwrap_or_default();

        let ctx = Context::from_meta(&request.meta, self.adapter.default_policy())
            .ensure_trace()
            .with_workflow(WorkflowContext {
                workflow_id: workflow_id.clone(),
                operation: operation.clone(),
                step: None,
                index: None,
                total: None,
            });

        let mut response = WorkflowResponse::new(&workflow_id, &operation);

        let Some(body) = request.data.as_ref() else {
            let err = ConduitError::Validation("workflow envelope carries no request".to_string());
            response.state = WorkflowState::Failed;
            let mut meta = request.meta.with_response_fields(started);
            meta.tracing = ctx.trace.clone();
            return finish(meta, response, Some(err.to_info()));
        };

        info!(
            workflow_id = %workflow_id,
            operation = %operation,
            trace_id = ctx.trace_id().unwrap_or_default(),
            mode = %ctx.policy.mode,
            rollback = ctx.policy.rollback_on_failure,
            "Starting workflow"
        );

        let error = ctx
            .clone()
            .run_with(self.run(&ctx, body, &mut response))
            .await;

        let mut meta = request.meta.with_response_fields(started);
        meta.tracing = ctx.trace.clone();
        info!(
            workflow_id = %workflow_id,
            state = ?response.state,
            completed = response.completed.len(),
            compensated = response.compensated.len(),
            duration_ms = meta.duration_ms.unwrap_or_default(),
            "Workflow finished"
        );
        finish(meta, response, error)
    }

    fn resolve_plan<'a>(&'a self, request: &'a WorkflowRequest) -> Result<&'a [PhaseSpec], ConduitError> {
        let phases = match &request.plan {
            Some(inline) => inline.as_slice(),
            None => self
                .definitions
                .get(&request.operation)
                .map(|d| d.phases.as_slice())
                .ok_or_else(|| {
                    ConduitError::NotFound(format!("unknown workflow operation '{}'", request.operation))
                })?,
        };
        validate_plan(phases)?;
        Ok(phases)
    }

    /// Run the plan, filling `response`. Returns the error that ended the run,
    /// or for `partial_success` the first step error.
    async fn run(
        &self,
        ctx: &Context,
        request: &WorkflowRequest,
        response: &mut WorkflowResponse,
    ) -> Option<ErrorInfo> {
        let phases = match self.resolve_plan(request) {
            Ok(phases) => phases,
            Err(e) => {
                warn!(workflow_id = %ctx.request_id, "Workflow rejected: {e}");
                response.state = WorkflowState::Failed;
                return Some(e.to_info());
            }
        };

        let plan = decompose(phases);
        let mut completed: Vec<CompletedStep> = Vec::new();
        let mut input = request.input.clone();
        let mut failure: Option<RunFailure> = None;

        for phase in &plan {
            debug!(
                workflow_id = %ctx.request_id,
                phase = phase.name,
                kind = ?phase.kind,
                steps = phase.steps.len(),
                "Running phase"
            );

            // Every member is awaited even if one fails early.
            let outcomes = futures::future::join_all(
                phase
                    .steps
                    .iter()
                    .map(|(step, spec)| self.run_step(ctx, step, spec, &input)),
            )
            .await;

            let mut group_output = Map::new();
            let mut phase_failure: Option<RunFailure> = None;
            for ((step, spec), outcome) in phase.steps.iter().zip(outcomes) {
                match outcome {
                    Ok((output, recovered)) => {
                        if let Some(error) = recovered {
                            warn!(
                                workflow_id = %ctx.request_id,
                                step = %step.name,
                                kind = %error.kind,
                                "Step recovered: {}", error.message
                            );
                            response.failures.push(StepFailure {
                                step: step.name.clone(),
                                error,
                            });
                        }
                        response.results.insert(step.name.clone(), output.clone());
                        response.completed.push(step.name.clone());
                        group_output.insert(step.name.clone(), output.clone());
                        if step.kind == StepKind::Sequential {
                            completed.push(CompletedStep {
                                step: step.clone(),
                                output,
                            });
                        }
                    }
                    Err(error) => {
                        warn!(
                            workflow_id = %ctx.request_id,
                            step = %step.name,
                            kind = %error.kind,
                            required = spec.required,
                            "Step failed: {}", error.message
                        );
                        response.failures.push(StepFailure {
                            step: step.name.clone(),
                            error: error.clone(),
                        });
                        if spec.required && phase_failure.is_none() {
                            phase_failure = Some(RunFailure {
                                step: step.name.clone(),
                                error,
                            });
                        }
                    }
                }
            }

            if phase_failure.is_some() {
                failure = phase_failure;
                break;
            }

            input = match phase.kind {
                StepKind::ParallelGroup => Value::Object(group_output),
                StepKind::Sequential => group_output
                    .into_iter()
                    .next()
                    .map(|(_, v)| v)
                    .unwrap_or(input),
            };
        }

        let Some(failure) = failure else {
            // Optional members failed or results came from a fallback.
            if let Some(first) = response.failures.first() {
                response.state = WorkflowState::PartialSuccess;
                return Some(first.error.clone());
            }
            response.state = WorkflowState::Completed;
            return None;
        };

        response.failed = Some(failure.step.clone());
        let policy = &ctx.policy;
        if policy.mode == ErrorMode::AllowPartial && !failure.error.kind.always_fail_fast() {
            info!(workflow_id = %ctx.request_id, failed = %failure.step, "Stopping with partial results");
            response.state = WorkflowState::PartialSuccess;
        } else if policy.rollback_on_failure {
            self.rollback(ctx, &completed, response).await;
            response.state = if response.compensation_failures.is_empty()
                && response.uncompensated.is_empty()
            {
                WorkflowState::FailedWithRollback
            } else {
                WorkflowState::Failed
            };
        } else {
            response.state = WorkflowState::Failed;
        }
        Some(failure.error)
    }

    async fn run_step(
        &self,
        ctx: &Context,
        step: &WorkflowStep,
        spec: &StepSpec,
        input: &Value,
    ) -> Result<(Value, Option<ErrorInfo>), ErrorInfo> {
        let mut arguments = match &spec.arguments {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            _ => {
                return Err(ErrorInfo::new(
                    ErrorKind::Validation,
                    format!("arguments of step '{}' must be an object", step.name),
                ))
            }
        };
        if !input.is_null() {
            arguments.insert("input".to_string(), input.clone());
        }

        let meta = ctx.child_meta(step, step.span_id());
        debug!(
            workflow_id = %ctx.request_id,
            step = %step.name,
            index = step.index,
            request_id = %meta.request_id,
            service = %spec.service,
            tool = %spec.tool,
            "Dispatching step"
        );
        let call = Envelope::ok(meta, ToolCall::new(&spec.tool, Value::Object(arguments)));
        let envelope = self
            .adapter
            .translate_and_call(&spec.service, &call)
            .await
            .map_err(|e| e.to_info())?;
        step_output(envelope)
    }

    /// Compensate completed sequential steps, newest first. A failed
    /// compensation is recorded and the rest still run. A step with no
    /// compensating action is listed in `uncompensated`.
    async fn rollback(
        &self,
        ctx: &Context,
        completed: &[CompletedStep],
        response: &mut WorkflowResponse,
    ) {
        info!(workflow_id = %ctx.request_id, steps = completed.len(), "Rolling back");
        for done in completed.iter().rev() {
            let Some(action) = &done.step.compensating_action else {
                warn!(step = %done.step.name, "Completed step has no compensating action");
                response.uncompensated.push(done.step.name.clone());
                continue;
            };
            match self.compensate(ctx, &done.step, action, &done.output).await {
                Ok(()) => {
                    info!(step = %done.step.name, "Step compensated");
                    response.compensated.push(done.step.name.clone());
                }
                Err(error) => {
                    warn!(step = %done.step.name, kind = %error.kind, "Compensation failed: {}", error.message);
                    response.compensation_failures.push(StepFailure {
                        step: done.step.name.clone(),
                        error,
                    });
                }
            }
        }
    }

    async fn compensate(
        &self,
        ctx: &Context,
        step: &WorkflowStep,
        action: &CompensationSpec,
        output: &Value,
    ) -> Result<(), ErrorInfo> {
        let mut meta = ctx.child_meta(step, step.compensation_span_id());
        // A compensation either happened or it did not.
        meta.error_policy = Some(ErrorPolicy {
            mode: ErrorMode::FailFast,
            ..ctx.policy.clone()
        });

        match action {
            CompensationSpec::Tool {
                service,
                tool,
                arguments,
            } => {
                let mut args = match arguments {
                    Value::Object(map) => map.clone(),
                    _ => Map::new(),
                };
                args.insert("input".to_string(), output.clone());
                let call = Envelope::ok(meta, ToolCall::new(tool, Value::Object(args)));
                let envelope = self
                    .adapter
                    .translate_and_call(service, &call)
                    .await
                    .map_err(|e| e.to_info())?;
                // Fallback data does not prove the inverse ran.
                match step_output(envelope)? {
                    (_, Some(error)) => Err(error),
                    (_, None) => Ok(()),
                }
            }
            CompensationSpec::Named { name } => {
                let handler = self.compensators.get(name).ok_or_else(|| {
                    ErrorInfo::new(
                        ErrorKind::NotFound,
                        format!("no compensating action named '{name}'"),
                    )
                })?;
                let comp_ctx = Context::from(&meta);
                comp_ctx
                    .clone()
                    .run_with(handler.compensate(&comp_ctx, step, output))
                    .await
                    .map_err(|e| e.to_info())
            }
        }
    }
}

/// Hard-failure states drop `data` and carry the response in the error's
/// `details`. Everything else keeps the response as data.
fn finish(
    meta: Meta,
    response: WorkflowResponse,
    error: Option<ErrorInfo>,
) -> Envelope<WorkflowResponse> {
    match error {
        None => Envelope::ok(meta, response),
        Some(info) if response.state == WorkflowState::PartialSuccess => {
            Envelope::partial(meta, Some(response), info)
        }
        Some(info) => {
            let info = match serde_json::to_value(&response) {
                Ok(details) => info.with_details(details),
                Err(e) => {
                    warn!(workflow_id = %response.workflow_id, "Could not attach workflow report: {e}");
                    info
                }
            };
            Envelope::partial(meta, None, info)
        }
    }
}

/// A step succeeds if its envelope carries data. Data that arrives with an
/// error (a fallback) is returned together with that error.
fn step_output(
    envelope: Envelope<conduit_types::ToolResponse>,
) -> Result<(Value, Option<ErrorInfo>), ErrorInfo> {
    match (envelope.data, envelope.error) {
        (Some(response), error) => Ok((response.content, error)),
        (None, Some(error)) => Err(error),
        (None, None) => Err(ErrorInfo::new(
            ErrorKind::ProtocolAdapter,
            "step response carries neither data nor error",
        )),
    }
}
