use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Classifier verdict for an incoming command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    #[serde(rename = "type")]
    pub kind: String,
    pub scope: String,
    pub risk: String,
    /// Classifier-specific extras (intent tags, detected entities, ...).
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl Classification {
    pub fn new(kind: impl Into<String>, scope: impl Into<String>, risk: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            scope: scope.into(),
            risk: risk.into(),
            extra: HashMap::new(),
        }
    }

    /// Conservative classification used when the classifier is unavailable.
    pub fn generic() -> Self {
        Self::new("generic", "single-step", "safe")
    }
}

/// One step of a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub step_id: String,
    pub objective: String,
    /// Executor role that should carry out the step.
    pub delegate_to: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default = "default_risk")]
    pub risk: String,
}

fn default_risk() -> String {
    "safe".to_string()
}

impl PlanStep {
    pub fn new(
        step_id: impl Into<String>,
        objective: impl Into<String>,
        delegate_to: impl Into<String>,
    ) -> Self {
        Self {
            step_id: step_id.into(),
            objective: objective.into(),
            delegate_to: delegate_to.into(),
            dependencies: Vec::new(),
            risk: default_risk(),
        }
    }

    pub fn with_dependencies(mut self, deps: Vec<String>) -> Self {
        self.dependencies = deps;
        self
    }

    pub fn with_risk(mut self, risk: impl Into<String>) -> Self {
        self.risk = risk.into();
        self
    }
}

/// Record of one step handed to an executor (or the local stand-in when
/// dispatch failed).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delegation {
    pub task_id: String,
    pub step_id: String,
    pub delegate_to: String,
    pub objective: String,
    /// `false` when the dispatcher failed and this record was synthesized locally.
    pub dispatched: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
