//! Workflow request/response and plan types.
//!
//! A plan is an ordered list of phases. Each phase is either one sequential
//! step or a parallel group of steps. The model is acyclic by construction.

use crate::error::{ConduitError, ErrorInfo};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

fn default_required() -> bool {
    true
}

/// How a step was scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    ParallelGroup,
    Sequential,
}

/// The inverse operation that undoes a completed step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CompensationSpec {
    /// Call another tool through the protocol adapter.
    Tool {
        service: String,
        tool: String,
        #[serde(default = "empty_object")]
        arguments: serde_json::Value,
    },
    /// A compensating action registered with the coordinator under this name.
    Named { name: String },
}

/// One downstream call inside a workflow plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSpec {
    /// Step name. Unique within a plan.
    pub name: String,
    /// Downstream service the call is routed to.
    pub service: String,
    /// Tool invoked on that service.
    pub tool: String,
    /// Static arguments. The previous phase's output is added as `input`.
    #[serde(default = "empty_object")]
    pub arguments: serde_json::Value,
    /// Whether a failure of this step fails its phase.
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compensation: Option<CompensationSpec>,
}

impl StepSpec {
    pub fn new(name: impl Into<String>, service: impl Into<String>, tool: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            service: service.into(),
            tool: tool.into(),
            arguments: empty_object(),
            required: true,
            compensation: None,
        }
    }

    pub fn with_arguments(mut self, arguments: serde_json::Value) -> Self {
        self.arguments = arguments;
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn with_compensation(mut self, compensation: CompensationSpec) -> Self {
        self.compensation = Some(compensation);
        self
    }
}

/// One phase of a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PhaseSpec {
    /// All steps launched together and awaited together.
    Parallel { name: String, steps: Vec<StepSpec> },
    /// A single step fed by the previous phase's output.
    Sequential(StepSpec),
}

impl PhaseSpec {
    pub fn steps(&self) -> Vec<&StepSpec> {
        match self {
            PhaseSpec::Parallel { steps, .. } => steps.iter().collect(),
            PhaseSpec::Sequential(step) => vec![step],
        }
    }

    pub fn kind(&self) -> StepKind {
        match self {
            PhaseSpec::Parallel { .. } => StepKind::ParallelGroup,
            PhaseSpec::Sequential(_) => StepKind::Sequential,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            PhaseSpec::Parallel { name, .. } => name,
            PhaseSpec::Sequential(step) => &step.name,
        }
    }
}

/// Check that a plan can be executed: non-empty, no empty groups, unique names.
pub fn validate_plan(phases: &[PhaseSpec]) -> Result<(), ConduitError> {
    if phases.is_empty() {
        return Err(ConduitError::Validation("workflow plan has no phases".to_string()));
    }
    let mut seen = HashSet::new();
    for phase in phases {
        if let PhaseSpec::Parallel { name, steps } = phase {
            if steps.is_empty() {
                return Err(ConduitError::Validation(format!(
                    "parallel group '{name}' has no steps"
                )));
            }
        }
        for step in phase.steps() {
            if step.name.trim().is_empty() {
                return Err(ConduitError::Validation("step name is empty".to_string()));
            }
            if !seen.insert(step.name.as_str()) {
                return Err(ConduitError::Validation(format!(
                    "duplicate step name '{}'",
                    step.name
                )));
            }
        }
    }
    Ok(())
}

/// A named, reusable plan registered with the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Operation name requests refer to.
    pub operation: String,
    #[serde(default)]
    pub description: String,
    pub phases: Vec<PhaseSpec>,
}

impl WorkflowDefinition {
    pub fn new(operation: impl Into<String>, phases: Vec<PhaseSpec>) -> Self {
        Self {
            operation: operation.into(),
            description: String::new(),
            phases,
        }
    }

    pub fn validate(&self) -> Result<(), ConduitError> {
        validate_plan(&self.phases)
    }
}

/// Payload of a workflow request envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRequest {
    pub operation: String,
    /// Input handed to the first phase.
    #[serde(default)]
    pub input: serde_json::Value,
    /// Inline plan. Takes precedence over a registered definition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<Vec<PhaseSpec>>,
}

impl WorkflowRequest {
    pub fn new(operation: impl Into<String>, input: serde_json::Value) -> Self {
        Self {
            operation: operation.into(),
            input,
            plan: None,
        }
    }

    pub fn with_plan(mut self, plan: Vec<PhaseSpec>) -> Self {
        self.plan = Some(plan);
        self
    }
}

/// A decomposed step, alive for the duration of one workflow run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub name: String,
    /// 1-based position across the whole plan.
    pub index: usize,
    pub total: usize,
    pub kind: StepKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compensating_action: Option<CompensationSpec>,
}

impl WorkflowStep {
    /// Span id for this step: `span-{name}-{index:03}`.
    pub fn span_id(&self) -> String {
        format!("span-{}-{:03}", self.name, self.index)
    }

    /// Span id for this step's compensation call.
    pub fn compensation_span_id(&self) -> String {
        format!("span-compensate-{}-{:03}", self.name, self.index)
    }
}

/// Terminal state of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    Completed,
    PartialSuccess,
    FailedWithRollback,
    Failed,
}

/// A failed step (or failed compensation) and why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepFailure {
    pub step: String,
    pub error: ErrorInfo,
}

/// Payload of a workflow response envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowResponse {
    pub workflow_id: String,
    pub operation: String,
    pub state: WorkflowState,
    /// Step name to step output, for every step that completed.
    #[serde(default)]
    pub results: BTreeMap<String, serde_json::Value>,
    /// Completed steps in completion order.
    #[serde(default)]
    pub completed: Vec<String>,
    /// The step that failed the workflow.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed: Option<String>,
    /// Every step failure, including optional steps and steps whose result
    /// was recovered from a fallback.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<StepFailure>,
    /// Steps whose compensating action ran successfully, in rollback order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub compensated: Vec<String>,
    /// Compensations that failed. Non-empty means state may be inconsistent.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub compensation_failures: Vec<StepFailure>,
    /// Completed sequential steps that had no compensating action during a
    /// rollback. Non-empty means their effects are still in place.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub uncompensated: Vec<String>,
}

impl WorkflowResponse {
    pub fn new(workflow_id: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            operation: operation.into(),
            state: WorkflowState::Completed,
            results: BTreeMap::new(),
            completed: Vec::new(),
            failed: None,
            failures: Vec::new(),
            compensated: Vec::new(),
            compensation_failures: Vec::new(),
            uncompensated: Vec::new(),
        }
    }

    /// The report attached to a failed workflow's error.
    pub fn from_error(error: &ErrorInfo) -> Option<Self> {
        error
            .details
            .clone()
            .and_then(|details| serde_json::from_value(details).ok())
    }
}
