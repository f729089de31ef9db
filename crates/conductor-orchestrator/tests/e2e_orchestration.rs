#![allow(clippy::unwrap_used, clippy::expect_used)]
//! End-to-end orchestration tests.
//!
//! Executors are simulated by bus subscribers answering every dispatch
//! immediately, so each test runs the real loop, store and aggregator.

use async_trait::async_trait;
use conductor_bus::{BusMessage, Heartbeat, MessageHandler, TaskBus, Topic};
use conductor_core::{
    Classification, ConductorError, ConductorResult, DecisionAction, Issue, Outcome, Phase,
    PlanStep, TaskDispatch, TaskResult, TaskStatus,
};
use conductor_orchestrator::{
    Classifier, Dispatcher, OrchestratorConfig, Planner, RequestContext, StagedPlanner,
    StateMachine, TaskTracker,
};
use conductor_policy::PolicyEngine;
use conductor_store::{FileStateStore, StateStore};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;

type Script = dyn Fn(&TaskDispatch) -> TaskResult + Send + Sync;

/// Answers every dispatch with the result produced by `script`.
struct ScriptedExecutor {
    bus: Arc<TaskBus>,
    script: Box<Script>,
    seen: Mutex<Vec<TaskDispatch>>,
}

impl ScriptedExecutor {
    fn install(bus: &Arc<TaskBus>, script: Box<Script>) -> Arc<Self> {
        let executor = Arc::new(Self {
            bus: bus.clone(),
            script,
            seen: Mutex::new(Vec::new()),
        });
        bus.subscribe(Topic::TaskDispatch, executor.clone());
        executor
    }

    fn dispatches(&self) -> Vec<TaskDispatch> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl MessageHandler for ScriptedExecutor {
    async fn handle(&self, message: &BusMessage) -> ConductorResult<()> {
        let Some(dispatch) = message.as_dispatch() else {
            return Ok(());
        };
        self.seen.lock().push(dispatch.clone());
        self.bus
            .publish(BusMessage::heartbeat(
                Heartbeat::new("scripted").for_task(&dispatch.session_id, &dispatch.task_id),
            ))
            .await;
        let result = (self.script)(dispatch);
        self.bus.publish(BusMessage::result(result)).await;
        Ok(())
    }
}

fn succeed(dispatch: &TaskDispatch) -> TaskResult {
    TaskResult::success_for(dispatch, "scripted").with_confidence(0.9)
}

fn fail(dispatch: &TaskDispatch) -> TaskResult {
    TaskResult::failed_for(dispatch, "scripted", Issue::new("test_failure", "assertion failed"))
}

fn quick_config() -> OrchestratorConfig {
    OrchestratorConfig {
        max_iterations: 5,
        observation_timeout_secs: 2,
        poll_interval_ms: 10,
        ..Default::default()
    }
}

fn policy_engine(yaml: &str) -> (Arc<PolicyEngine>, tempfile::TempDir) {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("policy.yaml");
    std::fs::write(&path, yaml).unwrap();
    let engine = Arc::new(PolicyEngine::new());
    engine.load(&path).unwrap();
    (engine, tmp)
}

#[tokio::test]
async fn test_simple_task_completes() {
    let config = OrchestratorConfig {
        clear_bus_on_finish: false,
        ..quick_config()
    };
    let machine = StateMachine::builder().config(config).build().unwrap();
    let executor = ScriptedExecutor::install(machine.bus(), Box::new(succeed));

    let result = machine
        .execute("simple task", RequestContext::new(), Some("e2e-ok".into()))
        .await;

    assert!(result.success, "error: {:?}", result.error);
    assert_eq!(result.final_phase, Phase::Complete);
    assert!(result.total_iterations >= 1);
    assert!(result.error.is_none());

    let phases: Vec<Phase> = result.history.iter().map(|s| s.phase).collect();
    assert_eq!(
        phases,
        vec![
            Phase::Awareness,
            Phase::Planning,
            Phase::Delegation,
            Phase::Observation,
            Phase::Decision,
            Phase::Complete,
        ]
    );

    let dispatches = executor.dispatches();
    assert_eq!(dispatches.len(), 1);
    assert_eq!(dispatches[0].task_id, "e2e-ok-i0-step-1");
    assert_eq!(dispatches[0].objective, "simple task");

    let logs = machine.store().decisions_for_session("e2e-ok").await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].outcome, Outcome::Success);

    let summaries = machine
        .bus()
        .mailbox("e2e-ok")
        .into_iter()
        .filter(|m| m.topic() == Topic::ObservationSummary)
        .count();
    assert_eq!(summaries, 1);
}

#[tokio::test]
async fn test_always_failing_executor_retries_then_escalates() {
    let (policy, _tmp) = policy_engine("defaults: { retry: { max_retry: 2, backoff_sec: 0 } }\n");
    let machine = StateMachine::builder()
        .config(quick_config())
        .policy(policy)
        .build()
        .unwrap();
    let executor = ScriptedExecutor::install(machine.bus(), Box::new(fail));

    let result = machine
        .execute("flaky task", RequestContext::new(), Some("e2e-retry".into()))
        .await;

    assert!(!result.success);
    assert_eq!(result.final_phase, Phase::Decision);
    assert_eq!(result.total_iterations, 3);
    assert!(result.error.unwrap().contains("Retry budget"));

    let logs = machine.store().decisions_for_session("e2e-retry").await.unwrap();
    assert_eq!(logs.len(), 3);
    for log in &logs[..2] {
        assert_eq!(log.decision.action, DecisionAction::Retry);
        assert_eq!(log.outcome, Outcome::Partial);
    }
    assert_eq!(logs[2].decision.action, DecisionAction::Escalate);
    assert_eq!(logs[2].outcome, Outcome::Failure);

    let ids: Vec<String> = executor.dispatches().into_iter().map(|d| d.task_id).collect();
    assert_eq!(
        ids,
        vec!["e2e-retry-i0-step-1", "e2e-retry-i1-step-1", "e2e-retry-i2-step-1"]
    );
    // Retries skip AWARENESS and PLANNING.
    let planning_visits = result
        .history
        .iter()
        .filter(|s| s.phase == Phase::Planning)
        .count();
    assert_eq!(planning_visits, 1);
}

#[tokio::test]
async fn test_failing_executor_without_policy_retries_until_limit() {
    let config = OrchestratorConfig {
        observation_timeout_secs: 2,
        poll_interval_ms: 10,
        ..Default::default()
    };
    let machine = StateMachine::builder().config(config).build().unwrap();
    let executor = ScriptedExecutor::install(machine.bus(), Box::new(fail));

    let result = machine
        .execute("never works", RequestContext::new(), Some("e2e-limit".into()))
        .await;

    assert!(!result.success);
    assert_eq!(result.final_phase, Phase::Decision);
    assert_eq!(result.total_iterations, 10);
    assert_eq!(result.error.as_deref(), Some("Iteration limit of 10 reached"));
    assert_eq!(executor.dispatches().len(), 10);

    let logs = machine.store().decisions_for_session("e2e-limit").await.unwrap();
    assert_eq!(logs.len(), 10);
    for log in &logs {
        assert_eq!(log.decision.action, DecisionAction::Retry);
        assert_eq!(log.outcome, Outcome::Partial);
    }

    let replayed = machine.replay("e2e-limit").await.unwrap();
    assert!(!replayed.success);
    assert_eq!(replayed.total_iterations, 10);
    assert_eq!(replayed.error, result.error);
}

#[tokio::test]
async fn test_finished_session_is_cleared_from_bus() {
    let machine = StateMachine::builder().config(quick_config()).build().unwrap();
    ScriptedExecutor::install(machine.bus(), Box::new(succeed));
    let bystander = TaskResult::new("other-session", "other-task", "w", TaskStatus::Success);
    machine.bus().publish(BusMessage::result(bystander)).await;

    let result = machine
        .execute("tidy up", RequestContext::new(), Some("e2e-clean".into()))
        .await;
    assert!(result.success, "error: {:?}", result.error);

    assert!(machine.bus().get_result("e2e-clean-i0-step-1").is_none());
    assert!(machine.bus().mailbox("e2e-clean").is_empty());
    assert!(machine.bus().get_result("other-task").is_some());
    assert_eq!(machine.bus().mailbox("other-session").len(), 1);
}

#[tokio::test]
async fn test_replay_matches_execution() {
    let tmp = tempfile::tempdir().unwrap();
    let store: Arc<dyn StateStore> =
        Arc::new(FileStateStore::new(tmp.path().join("states")).await.unwrap());
    let machine = StateMachine::builder()
        .config(quick_config())
        .store(store.clone())
        .build()
        .unwrap();
    let attempts = Arc::new(Mutex::new(0u32));
    let counter = attempts.clone();
    ScriptedExecutor::install(
        machine.bus(),
        Box::new(move |dispatch: &TaskDispatch| {
            let mut n = counter.lock();
            *n += 1;
            if *n == 1 {
                fail(dispatch)
            } else {
                succeed(dispatch)
            }
        }),
    );

    let executed = machine
        .execute("build it", RequestContext::new(), Some("e2e-replay".into()))
        .await;
    assert!(executed.success);
    assert_eq!(executed.total_iterations, 2);

    let replayed = machine.replay("e2e-replay").await.unwrap();
    assert_eq!(replayed.session_id, executed.session_id);
    assert_eq!(replayed.success, executed.success);
    assert_eq!(replayed.final_phase, executed.final_phase);
    assert_eq!(replayed.total_iterations, executed.total_iterations);
    assert_eq!(replayed.error, executed.error);
    assert_eq!(replayed.result, executed.result);
    let keys = |r: &conductor_orchestrator::ExecutionResult| {
        r.history.iter().map(|s| s.key()).collect::<Vec<_>>()
    };
    assert_eq!(keys(&replayed), keys(&executed));

    let missing = machine.replay("never-ran").await.unwrap_err();
    assert!(matches!(missing, ConductorError::NotFound(_)));
}

struct BrokenClassifier;

#[async_trait]
impl Classifier for BrokenClassifier {
    async fn classify(&self, _: &str, _: &RequestContext) -> ConductorResult<Classification> {
        Err(ConductorError::Collaborator("classifier offline".into()))
    }
}

struct PanickingPlanner;

#[async_trait]
impl Planner for PanickingPlanner {
    async fn plan(
        &self,
        _: &str,
        _: &Classification,
        _: &RequestContext,
    ) -> ConductorResult<Vec<PlanStep>> {
        panic!("planner crashed");
    }
}

#[tokio::test]
async fn test_collaborator_failures_fall_back() {
    let machine = StateMachine::builder()
        .config(quick_config())
        .classifier(Arc::new(BrokenClassifier))
        .planner(Arc::new(PanickingPlanner))
        .build()
        .unwrap();
    ScriptedExecutor::install(machine.bus(), Box::new(succeed));

    let result = machine
        .execute("do the thing", RequestContext::new(), Some("e2e-fallback".into()))
        .await;
    assert!(result.success, "error: {:?}", result.error);

    let awareness = &result.history[0];
    assert_eq!(awareness.metadata["classification"]["type"], "generic");
    assert_eq!(awareness.metadata["classification"]["risk"], "safe");
    let plan = result.history[1].plan.as_ref().unwrap();
    assert_eq!(plan.len(), 1);
    assert_eq!(plan[0].objective, "do the thing");
}

#[tokio::test]
async fn test_policy_capabilities_reach_retried_dispatch() {
    let (policy, _tmp) = policy_engine(
        r#"
defaults:
  allow: [read_repo]
rules:
  - name: retry-with-write
    when:
      observation_summary.blocking_issues: true
      retry_count: { lt: 1 }
    then:
      decision: { action: retry, reason: first attempt failed }
      allow: { capabilities: [write_fs, deploy] }
      forbid: { capabilities: [deploy] }
"#,
    );
    let machine = StateMachine::builder()
        .config(quick_config())
        .policy(policy)
        .build()
        .unwrap();
    let attempts = Arc::new(Mutex::new(0u32));
    let counter = attempts.clone();
    let executor = ScriptedExecutor::install(
        machine.bus(),
        Box::new(move |dispatch: &TaskDispatch| {
            let mut n = counter.lock();
            *n += 1;
            if *n == 1 {
                fail(dispatch)
            } else {
                succeed(dispatch)
            }
        }),
    );

    let result = machine
        .execute("migrate", RequestContext::new(), Some("e2e-caps".into()))
        .await;
    assert!(result.success, "error: {:?}", result.error);

    let dispatches = executor.dispatches();
    assert_eq!(dispatches.len(), 2);
    assert!(dispatches[0].policy.is_empty());
    assert_eq!(dispatches[1].policy["allow"], json!(["read_repo", "write_fs"]));
    assert_eq!(dispatches[1].policy["forbid"], json!(["deploy"]));

    let first_decision = result
        .history
        .iter()
        .find(|s| s.phase == Phase::Decision)
        .unwrap();
    assert_eq!(first_decision.metadata["rule_hits"], json!(["retry-with-write"]));
}

#[tokio::test]
async fn test_security_issue_escalates() {
    let (policy, _tmp) = policy_engine(
        r#"
rules:
  - name: security-escalation
    priority: 200
    when:
      observations: { any_issue_type_in: [security] }
    then:
      decision: { action: escalate, reason: security issue reported }
  - name: always-retry
    then:
      decision: retry
"#,
    );
    let machine = StateMachine::builder()
        .config(quick_config())
        .policy(policy)
        .build()
        .unwrap();
    ScriptedExecutor::install(
        machine.bus(),
        Box::new(|dispatch: &TaskDispatch| {
            TaskResult::failed_for(dispatch, "scripted", Issue::new("security", "secret leaked"))
        }),
    );

    let result = machine
        .execute("ship", RequestContext::new(), Some("e2e-sec".into()))
        .await;
    assert!(!result.success);
    assert_eq!(result.total_iterations, 1);
    assert_eq!(
        result.error.as_deref(),
        Some("Escalated: security issue reported")
    );
}

#[tokio::test]
async fn test_quorum_fan_in_from_policy_defaults() {
    let (policy, _tmp) = policy_engine(
        r#"
defaults:
  fan_in: { mode: quorum, threshold: 0.5 }
"#,
    );
    let machine = StateMachine::builder()
        .config(quick_config())
        .policy(policy)
        .planner(Arc::new(StagedPlanner::new(vec![
            "coder".into(),
            "tester".into(),
        ])))
        .build()
        .unwrap();
    ScriptedExecutor::install(
        machine.bus(),
        Box::new(|dispatch: &TaskDispatch| {
            if dispatch.delegate_to == "tester" {
                fail(dispatch)
            } else {
                succeed(dispatch)
            }
        }),
    );

    let result = machine
        .execute("feature", RequestContext::new(), Some("e2e-quorum".into()))
        .await;

    let observation = result
        .history
        .iter()
        .find(|s| s.phase == Phase::Observation)
        .unwrap();
    assert_eq!(observation.metadata["fan_in"]["mode"], "quorum");
    let summary = observation.observations.as_ref().unwrap();
    assert_eq!(summary.total_count, 2);
    assert!(!summary.blocking_issues);

    // Non-blocking but not clean: the plan is extended until the limit.
    let decision = result
        .history
        .iter()
        .find(|s| s.phase == Phase::Decision)
        .unwrap();
    assert_eq!(
        decision.decision.as_ref().unwrap().action,
        DecisionAction::ExtendPlan
    );
    assert!(!result.success);
    assert_eq!(result.total_iterations, 5);
    assert_eq!(result.error.as_deref(), Some("Iteration limit of 5 reached"));
}

/// Accepts every dispatch without publishing anything.
struct SilentDispatcher;

#[async_trait]
impl Dispatcher for SilentDispatcher {
    async fn dispatch(&self, dispatch: &TaskDispatch) -> ConductorResult<String> {
        Ok(dispatch.task_id.clone())
    }
}

/// Reports every task as completed.
struct CompletedTracker;

#[async_trait]
impl TaskTracker for CompletedTracker {
    async fn status(&self, _task_id: &str) -> ConductorResult<Option<Value>> {
        Ok(Some(json!({"status": "completed", "confidence": 0.8})))
    }
}

#[tokio::test]
async fn test_tracker_statuses_skip_bus_wait() {
    let config = OrchestratorConfig {
        observation_timeout_secs: 60,
        ..quick_config()
    };
    let machine = StateMachine::builder()
        .config(config)
        .dispatcher(Arc::new(SilentDispatcher))
        .tracker(Arc::new(CompletedTracker))
        .build()
        .unwrap();

    let started = std::time::Instant::now();
    let result = machine
        .execute("tracked", RequestContext::new(), Some("e2e-tracker".into()))
        .await;
    assert!(result.success, "error: {:?}", result.error);
    assert!(started.elapsed() < std::time::Duration::from_secs(30));
}

#[tokio::test]
async fn test_reused_session_id_is_reported_not_raised() {
    let machine = StateMachine::builder().config(quick_config()).build().unwrap();
    ScriptedExecutor::install(machine.bus(), Box::new(succeed));

    let first = machine
        .execute("once", RequestContext::new(), Some("e2e-dup".into()))
        .await;
    assert!(first.success);

    let second = machine
        .execute("twice", RequestContext::new(), Some("e2e-dup".into()))
        .await;
    assert!(!second.success);
    assert!(second.error.unwrap().contains("Duplicate"));
}
