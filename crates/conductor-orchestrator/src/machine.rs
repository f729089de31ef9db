//! The five-phase orchestration loop.
//!
//! `AWARENESS → PLANNING → DELEGATION → OBSERVATION → DECISION`, then back to
//! PLANNING (extend plan) or DELEGATION (retry), or on to COMPLETE. Every
//! phase's state is persisted before the next phase runs, so a session can
//! be replayed from the store alone. A RETRY or EXTEND_PLAN taken on the
//! last allowed iteration is stored as decided and ends the run.

use crate::aggregator::{Observation, ObservationAggregator};
use crate::collaborators::{
    BusDispatcher, Classifier, DefaultClassifier, DirectPlanner, Dispatcher, Planner,
    RequestContext, TaskTracker, DEFAULT_DELEGATE,
};
use crate::config::OrchestratorConfig;
use crate::plan::{task_id_for, validate_plan};
use conductor_bus::{BusMessage, TaskBus};
use conductor_core::{
    Classification, ConductorError, ConductorResult, Decision, DecisionAction, DecisionLog,
    Delegation, FanInPolicy, Issue, ObservationSummary, OrchestrationState, Phase, PlanStep,
    TaskDispatch, TaskStatus,
};
use conductor_policy::{PolicyContext, PolicyEngine};
use conductor_store::{InMemoryStateStore, StateStore};
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

/// DECISION-state metadata key set when the iteration cap stopped the loop.
pub const LOOP_EXHAUSTED: &str = "loop_exhausted";

/// What the loop does after a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Halt,
    Continue { next_phase: Phase, iteration: u32 },
}

/// Map a decision onto the next step of the loop.
pub fn transition(decision: &Decision, iteration: u32) -> Transition {
    match decision.action {
        DecisionAction::Complete | DecisionAction::Escalate => Transition::Halt,
        DecisionAction::Retry => Transition::Continue {
            next_phase: Phase::Delegation,
            iteration: iteration + 1,
        },
        DecisionAction::ExtendPlan => Transition::Continue {
            next_phase: Phase::Planning,
            iteration: iteration + 1,
        },
        DecisionAction::Unrecognized => {
            warn!(iteration, "Unrecognized decision action, halting");
            Transition::Halt
        }
    }
}

/// Decision taken when no policy rule asserts one.
pub fn fallback_decision(summary: &ObservationSummary) -> Decision {
    if summary.success_rate >= 1.0 && !summary.blocking_issues {
        Decision::new(
            DecisionAction::Complete,
            Some("All delegated tasks succeeded".into()),
        )
    } else if summary.blocking_issues {
        Decision::new(
            DecisionAction::Retry,
            Some("Blocking issues in observations".into()),
        )
    } else {
        Decision::new(
            DecisionAction::ExtendPlan,
            Some("Partial progress, extending plan".into()),
        )
    }
}

/// Outcome of [`StateMachine::execute`] or [`StateMachine::replay`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub session_id: String,
    pub success: bool,
    pub final_phase: Phase,
    /// Last decision, observations, plan and delegations of the run.
    pub result: Value,
    pub error: Option<String>,
    pub total_iterations: u32,
    pub history: Vec<OrchestrationState>,
}

impl ExecutionResult {
    /// Derive the result from persisted states alone.
    pub fn from_history(session_id: &str, history: Vec<OrchestrationState>) -> Self {
        let Some(last) = history.last() else {
            return Self {
                session_id: session_id.to_string(),
                success: false,
                final_phase: Phase::Awareness,
                result: Value::Null,
                error: Some("No states recorded".into()),
                total_iterations: 0,
                history,
            };
        };
        let final_phase = last.phase;
        let total_iterations = last.iteration + 1;
        let success = final_phase == Phase::Complete;

        let decision = history.iter().rev().find_map(|s| s.decision.clone());
        let observations = history.iter().rev().find_map(|s| s.observations.clone());
        let plan = history.iter().rev().find_map(|s| s.plan.clone());
        let delegations = history.iter().rev().find_map(|s| s.delegations.clone());

        let error = if success {
            None
        } else {
            let exhausted = last.metadata.get(LOOP_EXHAUSTED) == Some(&Value::Bool(true));
            Some(match &decision {
                Some(_) if exhausted => match last.metadata.get("max_iterations") {
                    Some(max) => format!("Iteration limit of {max} reached"),
                    None => format!("Iteration limit reached after {total_iterations} iterations"),
                },
                Some(d) if final_phase == Phase::Decision => match d.action {
                    DecisionAction::Escalate => format!(
                        "Escalated: {}",
                        d.reason.as_deref().unwrap_or("no reason given")
                    ),
                    DecisionAction::Unrecognized => "Unrecognized decision action".to_string(),
                    _ => format!("Run stopped after deciding {}", d.action),
                },
                _ => format!("Run stopped in {final_phase} phase"),
            })
        };

        Self {
            session_id: session_id.to_string(),
            success,
            final_phase,
            result: json!({
                "decision": decision,
                "observations": observations,
                "plan": plan,
                "delegations": delegations,
            }),
            error,
            total_iterations,
            history,
        }
    }
}

/// Mutable loop state of one session.
struct Run {
    session_id: String,
    correlation_id: String,
    command: String,
    context: RequestContext,
    iteration: u32,
    classification: Classification,
    plan: Vec<PlanStep>,
    delegations: Vec<Delegation>,
    summary: Option<ObservationSummary>,
    fan_in: FanInPolicy,
    capabilities: Option<(Vec<String>, Vec<String>)>,
    backoff: Option<Duration>,
    history: Vec<OrchestrationState>,
}

impl Run {
    fn state(&self, phase: Phase) -> OrchestrationState {
        let mut state = OrchestrationState::new(&self.session_id, self.iteration, phase);
        state
            .input_signature
            .insert("command".into(), Value::String(self.command.clone()));
        state.input_signature.insert(
            "context".into(),
            Value::Object(self.context.clone().into_iter().collect()),
        );
        state.correlation_id = Some(self.correlation_id.clone());
        state
    }

    fn constraints(&self) -> HashMap<String, Value> {
        match self.context.get("constraints") {
            Some(Value::Object(map)) => map.clone().into_iter().collect(),
            _ => HashMap::new(),
        }
    }

    fn dispatch_for(&self, step: &PlanStep, task_id: &str, timeout_sec: u64) -> TaskDispatch {
        let mut dispatch = TaskDispatch::new(
            &self.session_id,
            self.iteration,
            task_id,
            &step.delegate_to,
            &step.objective,
        )
        .with_timeout(timeout_sec);
        dispatch.correlation_id = self.correlation_id.clone();
        dispatch.context = self.context.clone();
        dispatch
            .context
            .insert("command".into(), Value::String(self.command.clone()));
        dispatch
            .context
            .insert("step_id".into(), Value::String(step.step_id.clone()));
        dispatch
            .context
            .insert("risk".into(), Value::String(step.risk.clone()));
        dispatch.context.insert(
            "dependencies".into(),
            step.dependencies
                .iter()
                .map(|dep| Value::String(task_id_for(&self.session_id, self.iteration, dep)))
                .collect(),
        );
        if let Some(Value::Array(criteria)) = self.context.get("success_criteria") {
            dispatch.success_criteria = criteria
                .iter()
                .filter_map(|c| c.as_str().map(str::to_string))
                .collect();
        }
        if let Some((allow, forbid)) = &self.capabilities {
            dispatch.policy.insert("allow".into(), json!(allow));
            dispatch.policy.insert("forbid".into(), json!(forbid));
        }
        dispatch
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Run a collaborator call, turning a panic into a collaborator error.
async fn guarded<T, F>(call: F) -> ConductorResult<T>
where
    F: Future<Output = ConductorResult<T>>,
{
    match AssertUnwindSafe(call).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(ConductorError::Collaborator(format!(
            "Collaborator panicked: {}",
            panic_message(&*payload)
        ))),
    }
}

/// The orchestration loop with its injected components.
pub struct StateMachine {
    config: OrchestratorConfig,
    store: Arc<dyn StateStore>,
    bus: Arc<TaskBus>,
    policy: Arc<PolicyEngine>,
    aggregator: Arc<ObservationAggregator>,
    classifier: Arc<dyn Classifier>,
    planner: Arc<dyn Planner>,
    dispatcher: Arc<dyn Dispatcher>,
    tracker: Option<Arc<dyn TaskTracker>>,
}

impl StateMachine {
    pub fn builder() -> StateMachineBuilder {
        StateMachineBuilder::default()
    }

    /// Machine with in-memory store, fresh bus, empty policy and default
    /// collaborators.
    pub fn in_memory() -> Self {
        StateMachineBuilder::default().assemble(OrchestratorConfig::default())
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn bus(&self) -> &Arc<TaskBus> {
        &self.bus
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    pub fn policy(&self) -> &Arc<PolicyEngine> {
        &self.policy
    }

    pub fn aggregator(&self) -> &Arc<ObservationAggregator> {
        &self.aggregator
    }

    /// Run the loop for `command` until it completes or halts.
    ///
    /// Never fails: errors and panics end the run with `success: false` and
    /// the message in `error`. With `clear_bus_on_finish` the session's
    /// results and mailbox are dropped from the bus before returning.
    pub async fn execute(
        &self,
        command: &str,
        context: RequestContext,
        session_id: Option<String>,
    ) -> ExecutionResult {
        let session_id = session_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let fan_in = self
            .policy
            .current()
            .and_then(|p| p.defaults.fan_in)
            .unwrap_or(self.config.fan_in);
        let mut run = Run {
            session_id: session_id.clone(),
            correlation_id: Uuid::new_v4().to_string(),
            command: command.to_string(),
            context,
            iteration: 0,
            classification: Classification::generic(),
            plan: Vec::new(),
            delegations: Vec::new(),
            summary: None,
            fan_in,
            capabilities: None,
            backoff: None,
            history: Vec::new(),
        };

        info!(session_id = %session_id, command = %command, "Orchestration started");
        let outcome = AssertUnwindSafe(self.drive(&mut run)).catch_unwind().await;

        let history = std::mem::take(&mut run.history);
        let mut result = ExecutionResult::from_history(&session_id, history);
        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(payload) => Some(format!("Run panicked: {}", panic_message(&*payload))),
        };
        if let Some(message) = failure {
            error!(session_id = %session_id, error = %message, "Orchestration failed");
            result.success = false;
            result.error = Some(message);
        }
        if self.config.clear_bus_on_finish {
            self.bus.clear_session(&session_id);
        }
        info!(
            session_id = %session_id,
            success = result.success,
            final_phase = %result.final_phase,
            iterations = result.total_iterations,
            "Orchestration finished"
        );
        result
    }

    /// Rebuild a session's result from the store.
    pub async fn replay(&self, session_id: &str) -> ConductorResult<ExecutionResult> {
        let states = self.store.states_for_session(session_id).await?;
        if states.is_empty() {
            return Err(ConductorError::NotFound(format!(
                "No orchestration states for session {session_id}"
            )));
        }
        Ok(ExecutionResult::from_history(session_id, states))
    }

    async fn drive(&self, run: &mut Run) -> ConductorResult<()> {
        let mut phase = Phase::Awareness;
        loop {
            info!(
                session_id = %run.session_id,
                iteration = run.iteration,
                phase = %phase,
                "Entering phase"
            );
            phase = match phase {
                Phase::Awareness => {
                    self.awareness(run).await?;
                    Phase::Planning
                }
                Phase::Planning => {
                    self.planning(run).await?;
                    Phase::Delegation
                }
                Phase::Delegation => {
                    self.delegation(run).await?;
                    Phase::Observation
                }
                Phase::Observation => {
                    self.observation(run).await?;
                    Phase::Decision
                }
                Phase::Decision => {
                    let decision = self.decision(run).await?;
                    if self.loop_exhausted(&decision, run.iteration) {
                        warn!(
                            session_id = %run.session_id,
                            action = %decision.action,
                            max_iterations = self.config.max_iterations,
                            "Iteration limit reached"
                        );
                        return Ok(());
                    }
                    match transition(&decision, run.iteration) {
                        Transition::Halt => {
                            if decision.action == DecisionAction::Complete {
                                let mut done = run.state(Phase::Complete);
                                done.decision = Some(decision);
                                done.observations = run.summary.clone();
                                self.persist(run, done).await?;
                            }
                            return Ok(());
                        }
                        Transition::Continue {
                            next_phase,
                            iteration,
                        } => {
                            run.iteration = iteration;
                            next_phase
                        }
                    }
                }
                Phase::Complete => return Ok(()),
            };
        }
    }

    async fn persist(&self, run: &mut Run, state: OrchestrationState) -> ConductorResult<()> {
        self.store.create_state(&state).await?;
        run.history.push(state);
        Ok(())
    }

    async fn awareness(&self, run: &mut Run) -> ConductorResult<()> {
        run.classification =
            match guarded(self.classifier.classify(&run.command, &run.context)).await {
                Ok(classification) => classification,
                Err(e) => {
                    warn!(session_id = %run.session_id, error = %e, "Classifier failed, using generic classification");
                    Classification::generic()
                }
            };
        let mut state = run.state(Phase::Awareness);
        state
            .metadata
            .insert("classification".into(), serde_json::to_value(&run.classification)?);
        self.persist(run, state).await
    }

    async fn planning(&self, run: &mut Run) -> ConductorResult<()> {
        let mut context = run.context.clone();
        if let Some(previous) = &run.summary {
            context.insert("previous_observations".into(), serde_json::to_value(previous)?);
        }
        let planned = guarded(self.planner.plan(&run.command, &run.classification, &context))
            .await
            .and_then(|steps| {
                if steps.is_empty() {
                    return Err(ConductorError::Collaborator(
                        "Planner returned an empty plan".into(),
                    ));
                }
                validate_plan(&steps)?;
                Ok(steps)
            });
        run.plan = match planned {
            Ok(steps) => steps,
            Err(e) => {
                warn!(session_id = %run.session_id, error = %e, "Planning failed, falling back to a single step");
                DirectPlanner::single_step(&run.command, DEFAULT_DELEGATE)
            }
        };
        let mut state = run.state(Phase::Planning);
        state.plan = Some(run.plan.clone());
        state.metadata.insert(
            "classification".into(),
            serde_json::to_value(&run.classification)?,
        );
        self.persist(run, state).await
    }

    async fn delegation(&self, run: &mut Run) -> ConductorResult<()> {
        if let Some(backoff) = run.backoff.take().filter(|b| !b.is_zero()) {
            info!(session_id = %run.session_id, backoff_ms = backoff.as_millis() as u64, "Backing off before retry");
            tokio::time::sleep(backoff).await;
        }

        let mut delegations = Vec::with_capacity(run.plan.len());
        for step in &run.plan {
            let task_id = task_id_for(&run.session_id, run.iteration, &step.step_id);
            let dispatch = run.dispatch_for(step, &task_id, self.config.default_task_timeout_secs);
            let delegation = match guarded(self.dispatcher.dispatch(&dispatch)).await {
                Ok(accepted) => Delegation {
                    task_id: accepted,
                    step_id: step.step_id.clone(),
                    delegate_to: step.delegate_to.clone(),
                    objective: step.objective.clone(),
                    dispatched: true,
                    error: None,
                },
                Err(e) => {
                    warn!(session_id = %run.session_id, task_id = %task_id, error = %e, "Dispatch failed, recording local fallback");
                    Delegation {
                        task_id,
                        step_id: step.step_id.clone(),
                        delegate_to: step.delegate_to.clone(),
                        objective: step.objective.clone(),
                        dispatched: false,
                        error: Some(e.to_string()),
                    }
                }
            };
            delegations.push(delegation);
        }
        info!(
            session_id = %run.session_id,
            iteration = run.iteration,
            dispatched = delegations.iter().filter(|d| d.dispatched).count(),
            total = delegations.len(),
            "Delegation done"
        );
        run.delegations = delegations;

        let mut state = run.state(Phase::Delegation);
        state.delegations = Some(run.delegations.clone());
        state.plan = Some(run.plan.clone());
        self.persist(run, state).await
    }

    async fn observation(&self, run: &mut Run) -> ConductorResult<()> {
        let summary = if run.delegations.is_empty() {
            ObservationSummary::nothing_delegated()
        } else {
            let waiting = self.prefill_observations(run).await;
            let collect = self.aggregator.collect(
                &run.session_id,
                &waiting,
                self.config.observation_timeout(),
                run.fan_in,
                Some(self.bus.as_ref()),
            );
            match AssertUnwindSafe(collect).catch_unwind().await {
                Ok(summary) => summary,
                Err(payload) => {
                    warn!(session_id = %run.session_id, error = %panic_message(&*payload), "Observation collection failed");
                    ObservationSummary::empty()
                }
            }
        };

        info!(
            session_id = %run.session_id,
            iteration = run.iteration,
            success_rate = summary.success_rate,
            blocking = summary.blocking_issues,
            total = summary.total_count,
            "Observation summary"
        );
        self.bus
            .publish(BusMessage::summary(
                &run.session_id,
                run.iteration,
                summary.clone(),
            ))
            .await;

        let mut state = run.state(Phase::Observation);
        state.observations = Some(summary.clone());
        state
            .metadata
            .insert("fan_in".into(), serde_json::to_value(run.fan_in)?);
        run.summary = Some(summary);
        self.persist(run, state).await
    }

    /// Feed the aggregator everything known without waiting and return the
    /// task ids still to wait for on the bus.
    async fn prefill_observations(&self, run: &Run) -> Vec<String> {
        let mut waiting = Vec::new();
        for delegation in &run.delegations {
            if !delegation.dispatched {
                self.aggregator.add_observation(
                    &run.session_id,
                    Observation::failed(
                        &delegation.task_id,
                        Issue::new(
                            "dispatch_failed",
                            delegation.error.clone().unwrap_or_default(),
                        ),
                    ),
                );
                continue;
            }
            if let Some(tracker) = &self.tracker {
                match guarded(tracker.status(&delegation.task_id)).await {
                    Ok(Some(Value::Object(mut raw))) => {
                        let terminal = raw
                            .get("status")
                            .and_then(Value::as_str)
                            .and_then(TaskStatus::from_external)
                            .is_some_and(|s| s != TaskStatus::Partial);
                        if terminal {
                            raw.entry("task_id")
                                .or_insert_with(|| Value::String(delegation.task_id.clone()));
                            self.aggregator
                                .add_observation(&run.session_id, Observation::Raw(raw));
                            continue;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(task_id = %delegation.task_id, error = %e, "Task tracker lookup failed");
                    }
                }
            }
            waiting.push(delegation.task_id.clone());
        }
        waiting
    }

    async fn decision(&self, run: &mut Run) -> ConductorResult<Decision> {
        let summary = run
            .summary
            .clone()
            .unwrap_or_else(ObservationSummary::empty);
        let context = PolicyContext {
            classification: Some(run.classification.clone()),
            constraints: run.constraints(),
            plan: run.plan.clone(),
            observations: summary.observations.clone(),
            observation_summary: Some(summary.clone()),
            retry_count: run.iteration,
            capability_registry: self.config.capability_registry.clone(),
            extra: HashMap::from([
                ("command".to_string(), Value::String(run.command.clone())),
                ("session_id".to_string(), Value::String(run.session_id.clone())),
            ]),
        };
        let effective = self.policy.evaluate(&context);

        let mut decision = match &effective.decision {
            Some(asserted) => Decision::new(asserted.action, asserted.reason.clone()),
            None => fallback_decision(&summary),
        };

        let retry = effective
            .retry
            .or_else(|| self.policy.current().and_then(|p| p.defaults.retry));
        if decision.action == DecisionAction::Retry {
            if let Some(max_retry) = retry.and_then(|r| r.max_retry) {
                if run.iteration >= max_retry {
                    decision = Decision::new(
                        DecisionAction::Escalate,
                        Some(format!("Retry budget of {max_retry} exhausted")),
                    );
                }
            }
        }

        run.backoff = match decision.action {
            DecisionAction::Retry => retry
                .and_then(|r| Duration::try_from_secs_f64(r.backoff_sec.max(0.0)).ok()),
            _ => None,
        };
        if let Some(fan_in) = effective.fan_in {
            run.fan_in = fan_in;
        }
        if !effective.allow.is_empty() || !effective.forbid.is_empty() {
            run.capabilities = Some((effective.allow.clone(), effective.forbid.clone()));
        }

        info!(
            session_id = %run.session_id,
            iteration = run.iteration,
            action = %decision.action,
            rule_hits = ?effective.rule_hits,
            "Decision taken"
        );

        let mut state = run.state(Phase::Decision);
        state.decision = Some(decision.clone());
        state.observations = Some(summary);
        state
            .metadata
            .insert("rule_hits".into(), json!(effective.rule_hits));
        state
            .metadata
            .insert("effective_policy".into(), serde_json::to_value(&effective)?);
        if self.loop_exhausted(&decision, run.iteration) {
            state.metadata.insert(LOOP_EXHAUSTED.into(), json!(true));
            state
                .metadata
                .insert("max_iterations".into(), json!(self.config.max_iterations));
        }
        // Log before state: a stored DECISION state always has its log.
        let log = DecisionLog::from_state(&state).ok_or_else(|| {
            ConductorError::Orchestrator("Decision state without a decision".into())
        })?;
        self.store.append_decision(&log).await?;
        self.persist(run, state).await?;
        Ok(decision)
    }

    /// A looping decision taken on the last allowed iteration.
    fn loop_exhausted(&self, decision: &Decision, iteration: u32) -> bool {
        matches!(
            decision.action,
            DecisionAction::Retry | DecisionAction::ExtendPlan
        ) && iteration + 1 >= self.config.max_iterations
    }
}

/// Builder wiring a [`StateMachine`]; unset components get defaults.
#[derive(Default)]
pub struct StateMachineBuilder {
    config: Option<OrchestratorConfig>,
    store: Option<Arc<dyn StateStore>>,
    bus: Option<Arc<TaskBus>>,
    policy: Option<Arc<PolicyEngine>>,
    aggregator: Option<Arc<ObservationAggregator>>,
    classifier: Option<Arc<dyn Classifier>>,
    planner: Option<Arc<dyn Planner>>,
    dispatcher: Option<Arc<dyn Dispatcher>>,
    tracker: Option<Arc<dyn TaskTracker>>,
}

impl StateMachineBuilder {
    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn bus(mut self, bus: Arc<TaskBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn policy(mut self, policy: Arc<PolicyEngine>) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn aggregator(mut self, aggregator: Arc<ObservationAggregator>) -> Self {
        self.aggregator = Some(aggregator);
        self
    }

    pub fn classifier(mut self, classifier: Arc<dyn Classifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn planner(mut self, planner: Arc<dyn Planner>) -> Self {
        self.planner = Some(planner);
        self
    }

    /// Defaults to a [`BusDispatcher`] on the machine's bus.
    pub fn dispatcher(mut self, dispatcher: Arc<dyn Dispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn tracker(mut self, tracker: Arc<dyn TaskTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn build(mut self) -> ConductorResult<StateMachine> {
        let config = self.config.take().unwrap_or_default();
        config.validate()?;
        Ok(self.assemble(config))
    }

    fn assemble(self, config: OrchestratorConfig) -> StateMachine {
        let bus = self
            .bus
            .unwrap_or_else(|| Arc::new(TaskBus::with_poll_interval(config.poll_interval())));
        let dispatcher = self
            .dispatcher
            .unwrap_or_else(|| Arc::new(BusDispatcher::new(bus.clone())));
        StateMachine {
            store: self
                .store
                .unwrap_or_else(|| Arc::new(InMemoryStateStore::new())),
            policy: self.policy.unwrap_or_default(),
            aggregator: self.aggregator.unwrap_or_default(),
            classifier: self
                .classifier
                .unwrap_or_else(|| Arc::new(DefaultClassifier)),
            planner: self
                .planner
                .unwrap_or_else(|| Arc::new(DirectPlanner::default())),
            dispatcher,
            tracker: self.tracker,
            bus,
            config,
        }
    }
}
