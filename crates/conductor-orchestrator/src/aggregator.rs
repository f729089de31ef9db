//! Fan-in of task outcomes into an [`ObservationSummary`].

use conductor_bus::{FnHandler, TaskBus, Topic};
use conductor_core::{
    FanInMode, FanInPolicy, Issue, NormalizedObservation, ObservationSummary, TaskResult,
    TaskStatus,
};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// A task outcome as it reaches the aggregator.
#[derive(Debug, Clone)]
pub enum Observation {
    /// A result published on the bus.
    Typed(TaskResult),
    /// A loosely-shaped record, e.g. from an external task tracker.
    Raw(Map<String, Value>),
}

impl From<TaskResult> for Observation {
    fn from(result: TaskResult) -> Self {
        Self::Typed(result)
    }
}

impl Observation {
    /// Failed observation for a task that never produced a result.
    pub fn failed(task_id: &str, issue: Issue) -> Self {
        let mut raw = Map::new();
        raw.insert("task_id".into(), Value::String(task_id.to_string()));
        raw.insert("status".into(), Value::String("failed".into()));
        raw.insert(
            "issues".into(),
            serde_json::to_value(vec![issue]).unwrap_or(Value::Null),
        );
        Self::Raw(raw)
    }

    pub fn task_id(&self) -> Option<&str> {
        match self {
            Self::Typed(result) => Some(&result.task_id),
            Self::Raw(raw) => raw.get("task_id").and_then(Value::as_str),
        }
    }

    pub fn normalize(&self) -> NormalizedObservation {
        match self {
            Self::Typed(result) => NormalizedObservation {
                task_id: result.task_id.clone(),
                status: result.status,
                result: result.result.clone(),
                confidence: result.confidence.map(|c| c.clamp(0.0, 1.0)),
                issues: result.issues.clone(),
            },
            Self::Raw(raw) => normalize_raw(raw),
        }
    }
}

fn normalize_raw(raw: &Map<String, Value>) -> NormalizedObservation {
    let task_id = raw
        .get("task_id")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let status = match raw.get("status").and_then(Value::as_str) {
        Some(s) => TaskStatus::from_external(s).unwrap_or_else(|| {
            warn!(task_id = %task_id, status = %s, "Unknown task status, treating as failed");
            TaskStatus::Failed
        }),
        None => {
            warn!(task_id = %task_id, "Observation without status, treating as failed");
            TaskStatus::Failed
        }
    };
    let issues = raw
        .get("issues")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(issue_from_value).collect())
        .unwrap_or_default();
    NormalizedObservation {
        task_id,
        status,
        result: raw.get("result").cloned().unwrap_or(Value::Null),
        confidence: raw
            .get("confidence")
            .and_then(Value::as_f64)
            .map(|c| c.clamp(0.0, 1.0)),
        issues,
    }
}

fn issue_from_value(value: &Value) -> Option<Issue> {
    match value {
        Value::String(message) => Some(Issue::new("generic", message.clone())),
        Value::Object(obj) => {
            let kind = obj.get("type").and_then(Value::as_str).unwrap_or("generic");
            let message = obj.get("message").and_then(Value::as_str).unwrap_or_default();
            let mut issue = Issue::new(kind, message);
            if let Some(severity) = obj.get("severity").and_then(Value::as_str) {
                issue = issue.with_severity(severity);
            }
            Some(issue)
        }
        _ => None,
    }
}

/// Whether a round with `success_rate` blocks progress under `mode`.
pub fn is_blocking(mode: FanInMode, success_rate: f64, threshold: f64) -> bool {
    match mode {
        FanInMode::All => success_rate < 1.0,
        FanInMode::Any => success_rate == 0.0,
        FanInMode::Quorum => success_rate < threshold,
        FanInMode::Unrecognized => {
            warn!("Unrecognized fan-in mode, treating round as blocking");
            true
        }
    }
}

/// Fold observations into a summary. Pure apart from warnings.
pub fn fan_in(observations: &[Observation], mode: FanInMode, threshold: f64) -> ObservationSummary {
    if observations.is_empty() {
        return ObservationSummary::empty();
    }
    let normalized: Vec<NormalizedObservation> =
        observations.iter().map(Observation::normalize).collect();

    let count = |status| normalized.iter().filter(|o| o.status == status).count();
    let success_count = count(TaskStatus::Success);
    let failure_count = count(TaskStatus::Failed);
    let partial_count = count(TaskStatus::Partial);
    let total_count = normalized.len();
    let success_rate = success_count as f64 / total_count as f64;

    let lowest_confidence = normalized
        .iter()
        .filter_map(|o| o.confidence)
        .reduce(f64::min)
        .unwrap_or(0.0);
    let issues = normalized.iter().flat_map(|o| o.issues.clone()).collect();

    ObservationSummary {
        success_rate,
        blocking_issues: is_blocking(mode, success_rate, threshold),
        lowest_confidence,
        total_count,
        success_count,
        failure_count,
        partial_count,
        issues,
        observations: normalized,
    }
}

/// Collects observations per session and folds them with [`fan_in`].
#[derive(Default)]
pub struct ObservationAggregator {
    pending: Mutex<HashMap<String, Vec<Observation>>>,
}

impl ObservationAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer an observation for the next [`collect`](Self::collect) of `session_id`.
    pub fn add_observation(&self, session_id: &str, observation: Observation) {
        self.pending
            .lock()
            .entry(session_id.to_string())
            .or_default()
            .push(observation);
    }

    pub fn pending_count(&self, session_id: &str) -> usize {
        self.pending.lock().get(session_id).map_or(0, Vec::len)
    }

    /// Gather the outcome of a round.
    ///
    /// Buffered observations are always drained. With a bus, results for
    /// `task_ids` are awaited up to `timeout`; a requested task that is
    /// neither buffered nor answered in time counts as a failed
    /// observation with a `timeout` issue. Never fails.
    pub async fn collect(
        &self,
        session_id: &str,
        task_ids: &[String],
        timeout: Duration,
        policy: FanInPolicy,
        bus: Option<&TaskBus>,
    ) -> ObservationSummary {
        let mut observations = self.pending.lock().remove(session_id).unwrap_or_default();

        if let Some(bus) = bus {
            let covered: HashSet<String> = observations
                .iter()
                .filter_map(|o| o.task_id().map(str::to_string))
                .collect();
            let waiting: Vec<String> = task_ids
                .iter()
                .filter(|id| !covered.contains(*id))
                .cloned()
                .collect();

            if !waiting.is_empty() {
                let arrived = Arc::new(AtomicUsize::new(0));
                let wanted: HashSet<String> = waiting.iter().cloned().collect();
                let counter = arrived.clone();
                let _subscription = bus.subscribe_scoped(
                    Topic::TaskResult,
                    Arc::new(FnHandler::new(move |message| {
                        if let Some(result) = message.as_result() {
                            if wanted.contains(&result.task_id) {
                                counter.fetch_add(1, Ordering::Relaxed);
                                debug!(task_id = %result.task_id, "Result arrived");
                            }
                        }
                        Ok(())
                    })),
                );

                let results = bus.wait_for_results(session_id, &waiting, timeout).await;
                let answered: HashSet<String> =
                    results.iter().map(|r| r.task_id.clone()).collect();
                info!(
                    session_id = %session_id,
                    requested = waiting.len(),
                    collected = results.len(),
                    arrived_while_waiting = arrived.load(Ordering::Relaxed),
                    "Observation wait finished"
                );
                observations.extend(results.into_iter().map(Observation::Typed));
                for id in waiting.iter().filter(|id| !answered.contains(*id)) {
                    warn!(session_id = %session_id, task_id = %id, "No result before timeout");
                    observations.push(Observation::failed(
                        id,
                        Issue::new("timeout", format!("No result within {}s", timeout.as_secs())),
                    ));
                }
            }
        }

        fan_in(&observations, policy.mode, policy.threshold)
    }
}
