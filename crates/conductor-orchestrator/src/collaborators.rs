//! Seams to the services the loop delegates to.
//!
//! The orchestrator never assumes these succeed: every call is made at a
//! phase boundary that falls back to a conservative default on error.

use async_trait::async_trait;
use conductor_bus::{BusMessage, TaskBus, Topic};
use conductor_core::{
    Classification, ConductorError, ConductorResult, PlanStep, TaskDispatch,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Executor role used when a plan step names none.
pub const DEFAULT_DELEGATE: &str = "executor";

/// Free-form request context passed to collaborators.
pub type RequestContext = HashMap<String, Value>;

/// Classifies a command during AWARENESS.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(
        &self,
        command: &str,
        context: &RequestContext,
    ) -> ConductorResult<Classification>;
}

/// Turns a command into plan steps during PLANNING.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(
        &self,
        command: &str,
        classification: &Classification,
        context: &RequestContext,
    ) -> ConductorResult<Vec<PlanStep>>;
}

/// Hands one dispatch to an executor. Returns the task id it was accepted under.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(&self, dispatch: &TaskDispatch) -> ConductorResult<String>;
}

/// Optional status source for dispatched tasks.
///
/// A returned object is treated as a raw observation (`status`, `result`,
/// `issues`, `confidence`); `None` means "unknown, wait on the bus".
#[async_trait]
pub trait TaskTracker: Send + Sync {
    async fn status(&self, task_id: &str) -> ConductorResult<Option<Value>>;
}

/// Classifier used when none is configured.
///
/// Reads `type` / `scope` / `risk` hints from the request context and
/// otherwise returns the generic classification.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultClassifier;

#[async_trait]
impl Classifier for DefaultClassifier {
    async fn classify(
        &self,
        _command: &str,
        context: &RequestContext,
    ) -> ConductorResult<Classification> {
        let mut classification = Classification::generic();
        let hint = |key: &str| context.get(key).and_then(Value::as_str).map(str::to_string);
        if let Some(kind) = hint("type") {
            classification.kind = kind;
        }
        if let Some(scope) = hint("scope") {
            classification.scope = scope;
        }
        if let Some(risk) = hint("risk") {
            classification.risk = risk;
        }
        Ok(classification)
    }
}

/// Planner producing a single step carrying the raw command.
#[derive(Debug, Clone)]
pub struct DirectPlanner {
    delegate_to: String,
}

impl DirectPlanner {
    pub fn new(delegate_to: impl Into<String>) -> Self {
        Self {
            delegate_to: delegate_to.into(),
        }
    }

    /// The single-step plan, also used as the PLANNING fallback.
    pub fn single_step(command: &str, delegate_to: &str) -> Vec<PlanStep> {
        vec![PlanStep::new("step-1", command, delegate_to)]
    }
}

impl Default for DirectPlanner {
    fn default() -> Self {
        Self::new(DEFAULT_DELEGATE)
    }
}

#[async_trait]
impl Planner for DirectPlanner {
    async fn plan(
        &self,
        command: &str,
        _classification: &Classification,
        _context: &RequestContext,
    ) -> ConductorResult<Vec<PlanStep>> {
        Ok(Self::single_step(command, &self.delegate_to))
    }
}

/// Planner chaining one step per role, each depending on the previous one.
///
/// With roles `spec, coder, tester, reviewer` a command becomes the usual
/// specify → implement → test → review pipeline.
#[derive(Debug, Clone)]
pub struct StagedPlanner {
    roles: Vec<String>,
}

impl StagedPlanner {
    pub fn new(roles: Vec<String>) -> Self {
        Self { roles }
    }
}

#[async_trait]
impl Planner for StagedPlanner {
    async fn plan(
        &self,
        command: &str,
        classification: &Classification,
        _context: &RequestContext,
    ) -> ConductorResult<Vec<PlanStep>> {
        let mut steps: Vec<PlanStep> = Vec::with_capacity(self.roles.len());
        for (index, role) in self.roles.iter().enumerate() {
            let step_id = format!("{}-{role}", index + 1);
            let deps = steps.last().map(|s| vec![s.step_id.clone()]).unwrap_or_default();
            steps.push(
                PlanStep::new(step_id, format!("{role}: {command}"), role)
                    .with_dependencies(deps)
                    .with_risk(classification.risk.clone()),
            );
        }
        Ok(steps)
    }
}

/// Dispatcher publishing on the task bus.
///
/// Fails when no executor is subscribed to `TASK_DISPATCH`, since such a
/// dispatch could never be answered.
pub struct BusDispatcher {
    bus: Arc<TaskBus>,
}

impl BusDispatcher {
    pub fn new(bus: Arc<TaskBus>) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl Dispatcher for BusDispatcher {
    async fn dispatch(&self, dispatch: &TaskDispatch) -> ConductorResult<String> {
        if self.bus.subscriber_count(Topic::TaskDispatch) == 0 {
            return Err(ConductorError::Collaborator(format!(
                "No executor subscribed to {} for task {}",
                Topic::TaskDispatch,
                dispatch.task_id
            )));
        }
        let errors = self.bus.publish(BusMessage::dispatch(dispatch.clone())).await;
        if !errors.is_empty() {
            tracing::debug!(
                task_id = %dispatch.task_id,
                failures = errors.len(),
                "Some dispatch subscribers failed"
            );
        }
        Ok(dispatch.task_id.clone())
    }
}
