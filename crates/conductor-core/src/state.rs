use crate::observation::ObservationSummary;
use crate::plan::{Delegation, PlanStep};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Phase of the orchestration loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Awareness,
    Planning,
    Delegation,
    Observation,
    Decision,
    /// Terminal phase reached after a `complete` decision.
    Complete,
}

impl Phase {
    /// Position of the phase within one iteration; orders replayed states.
    pub fn ordinal(self) -> u8 {
        match self {
            Phase::Awareness => 0,
            Phase::Planning => 1,
            Phase::Delegation => 2,
            Phase::Observation => 3,
            Phase::Decision => 4,
            Phase::Complete => 5,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Awareness => "awareness",
            Phase::Planning => "planning",
            Phase::Delegation => "delegation",
            Phase::Observation => "observation",
            Phase::Decision => "decision",
            Phase::Complete => "complete",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Phase {
    type Err = crate::ConductorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "awareness" => Ok(Phase::Awareness),
            "planning" => Ok(Phase::Planning),
            "delegation" => Ok(Phase::Delegation),
            "observation" => Ok(Phase::Observation),
            "decision" => Ok(Phase::Decision),
            "complete" => Ok(Phase::Complete),
            other => Err(crate::ConductorError::Store(format!("Unknown phase: {other}"))),
        }
    }
}

/// What the loop should do after a DECISION phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionAction {
    Complete,
    Retry,
    ExtendPlan,
    Escalate,
    /// An action name that is not understood; the loop halts on it.
    #[serde(other)]
    Unrecognized,
}

impl DecisionAction {
    /// Outcome recorded in the decision log for this action.
    pub fn outcome(self) -> Outcome {
        match self {
            DecisionAction::Complete => Outcome::Success,
            DecisionAction::Retry | DecisionAction::ExtendPlan => Outcome::Partial,
            DecisionAction::Escalate | DecisionAction::Unrecognized => Outcome::Failure,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DecisionAction::Complete => "complete",
            DecisionAction::Retry => "retry",
            DecisionAction::ExtendPlan => "extend_plan",
            DecisionAction::Escalate => "escalate",
            DecisionAction::Unrecognized => "unrecognized",
        }
    }
}

impl std::fmt::Display for DecisionAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a DECISION phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub action: DecisionAction,
    #[serde(default)]
    pub reason: Option<String>,
    /// Phase the loop continues with; `None` when the loop halts.
    #[serde(default)]
    pub next_phase: Option<Phase>,
}

impl Decision {
    /// Create a decision whose `next_phase` follows from `action`.
    pub fn new(action: DecisionAction, reason: Option<String>) -> Self {
        let next_phase = match action {
            DecisionAction::Complete => Some(Phase::Complete),
            DecisionAction::Retry => Some(Phase::Delegation),
            DecisionAction::ExtendPlan => Some(Phase::Planning),
            DecisionAction::Escalate | DecisionAction::Unrecognized => None,
        };
        Self {
            action,
            reason,
            next_phase,
        }
    }
}

/// Final classification of a decision, recorded in the [`DecisionLog`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failure,
    Partial,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Failure => "failure",
            Outcome::Partial => "partial",
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Outcome {
    type Err = crate::ConductorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Outcome::Success),
            "failure" => Ok(Outcome::Failure),
            "partial" => Ok(Outcome::Partial),
            other => Err(crate::ConductorError::Store(format!("Unknown outcome: {other}"))),
        }
    }
}

/// Unique key of a persisted [`OrchestrationState`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StateKey {
    pub session_id: String,
    pub iteration: u32,
    pub phase: Phase,
}

impl std::fmt::Display for StateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.session_id, self.iteration, self.phase)
    }
}

/// Snapshot of the loop after one phase. Never mutated once persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationState {
    pub session_id: String,
    pub iteration: u32,
    pub phase: Phase,
    #[serde(default)]
    pub input_signature: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub observations: Option<ObservationSummary>,
    #[serde(default)]
    pub decision: Option<Decision>,
    #[serde(default)]
    pub plan: Option<Vec<PlanStep>>,
    #[serde(default)]
    pub delegations: Option<Vec<Delegation>>,
    #[serde(default)]
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub parent_task_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl OrchestrationState {
    pub fn new(session_id: impl Into<String>, iteration: u32, phase: Phase) -> Self {
        Self {
            session_id: session_id.into(),
            iteration,
            phase,
            input_signature: HashMap::new(),
            observations: None,
            decision: None,
            plan: None,
            delegations: None,
            correlation_id: None,
            parent_task_id: None,
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    pub fn key(&self) -> StateKey {
        StateKey {
            session_id: self.session_id.clone(),
            iteration: self.iteration,
            phase: self.phase,
        }
    }
}

/// Append-only audit record written once per visited DECISION phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionLog {
    pub session_id: String,
    pub iteration: u32,
    pub phase: Phase,
    #[serde(default)]
    pub input_signature: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub observations: Option<ObservationSummary>,
    pub decision: Decision,
    pub outcome: Outcome,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl DecisionLog {
    /// Build the log entry for a DECISION-phase state. Returns `None` when
    /// the state carries no decision.
    pub fn from_state(state: &OrchestrationState) -> Option<Self> {
        let decision = state.decision.clone()?;
        Some(Self {
            session_id: state.session_id.clone(),
            iteration: state.iteration,
            phase: state.phase,
            input_signature: state.input_signature.clone(),
            observations: state.observations.clone(),
            outcome: decision.action.outcome(),
            decision,
            timestamp: state.timestamp,
            correlation_id: state.correlation_id.clone(),
            metadata: state.metadata.clone(),
        })
    }

    pub fn key(&self) -> StateKey {
        StateKey {
            session_id: self.session_id.clone(),
            iteration: self.iteration,
            phase: self.phase,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_next_phase() {
        assert_eq!(
            Decision::new(DecisionAction::Retry, None).next_phase,
            Some(Phase::Delegation)
        );
        assert_eq!(
            Decision::new(DecisionAction::ExtendPlan, None).next_phase,
            Some(Phase::Planning)
        );
        assert_eq!(
            Decision::new(DecisionAction::Complete, None).next_phase,
            Some(Phase::Complete)
        );
        assert_eq!(Decision::new(DecisionAction::Escalate, None).next_phase, None);
    }

    #[test]
    fn test_action_outcome_mapping() {
        assert_eq!(DecisionAction::Complete.outcome(), Outcome::Success);
        assert_eq!(DecisionAction::Retry.outcome(), Outcome::Partial);
        assert_eq!(DecisionAction::ExtendPlan.outcome(), Outcome::Partial);
        assert_eq!(DecisionAction::Escalate.outcome(), Outcome::Failure);
    }

    #[test]
    fn test_unknown_action_deserializes() {
        let decision: Decision = serde_json::from_str(r#"{"action": "reboot"}"#).unwrap();
        assert_eq!(decision.action, DecisionAction::Unrecognized);
    }

    #[test]
    fn test_decision_log_from_state() {
        let mut state = OrchestrationState::new("s1", 2, Phase::Decision);
        assert!(DecisionLog::from_state(&state).is_none());

        state.decision = Some(Decision::new(DecisionAction::Escalate, Some("stuck".into())));
        let log = DecisionLog::from_state(&state).unwrap();
        assert_eq!(log.outcome, Outcome::Failure);
        assert_eq!(log.key().to_string(), "s1/2/decision");
    }

    #[test]
    fn test_phase_round_trip_through_str() {
        for phase in [Phase::Awareness, Phase::Observation, Phase::Complete] {
            assert_eq!(phase.as_str().parse::<Phase>().unwrap(), phase);
        }
    }
}
