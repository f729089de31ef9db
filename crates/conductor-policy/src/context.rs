use conductor_core::{Classification, NormalizedObservation, ObservationSummary, PlanStep};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Everything a rule's `when` clause can reference.
///
/// Rules address fields by dot-path over the JSON form of this struct, e.g.
/// `classification.risk`, `observation_summary.success_rate` or
/// `retry_count`. Keys in `extra` appear at the top level.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyContext {
    pub classification: Option<Classification>,
    pub constraints: HashMap<String, serde_json::Value>,
    pub plan: Vec<PlanStep>,
    pub observations: Vec<NormalizedObservation>,
    pub observation_summary: Option<ObservationSummary>,
    pub retry_count: u32,
    pub capability_registry: Vec<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl PolicyContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_summary(mut self, summary: ObservationSummary) -> Self {
        self.observations = summary.observations.clone();
        self.observation_summary = Some(summary);
        self
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// JSON view used for path resolution.
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
