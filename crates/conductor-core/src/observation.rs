use crate::task::{Issue, TaskStatus};
use serde::{Deserialize, Serialize};

/// Default success-rate threshold for [`FanInMode::Quorum`].
pub const DEFAULT_QUORUM_THRESHOLD: f64 = 0.7;

/// How N task outcomes are folded into a blocking / non-blocking verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FanInMode {
    /// Every task must succeed.
    All,
    /// At least one task must succeed.
    Any,
    /// The success rate must reach a threshold.
    Quorum,
    /// A mode name this build does not understand; always blocking.
    #[serde(other)]
    Unrecognized,
}

impl std::str::FromStr for FanInMode {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "all" => Self::All,
            "any" => Self::Any,
            "quorum" => Self::Quorum,
            _ => Self::Unrecognized,
        })
    }
}

impl std::fmt::Display for FanInMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FanInMode::All => write!(f, "all"),
            FanInMode::Any => write!(f, "any"),
            FanInMode::Quorum => write!(f, "quorum"),
            FanInMode::Unrecognized => write!(f, "unrecognized"),
        }
    }
}

fn default_threshold() -> f64 {
    DEFAULT_QUORUM_THRESHOLD
}

/// Fan-in mode plus its quorum threshold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FanInPolicy {
    pub mode: FanInMode,
    #[serde(default = "default_threshold")]
    pub threshold: f64,
}

impl Default for FanInPolicy {
    fn default() -> Self {
        Self {
            mode: FanInMode::All,
            threshold: DEFAULT_QUORUM_THRESHOLD,
        }
    }
}

/// One task outcome after normalization at the aggregator boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedObservation {
    pub task_id: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub result: serde_json::Value,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub issues: Vec<Issue>,
}

/// Decision-ready digest of a fan-in round.
///
/// `success_count + failure_count + partial_count == total_count` always holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationSummary {
    pub success_rate: f64,
    pub blocking_issues: bool,
    pub lowest_confidence: f64,
    pub total_count: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub partial_count: usize,
    /// Issues of every observation, in observation order, not deduplicated.
    #[serde(default)]
    pub issues: Vec<Issue>,
    #[serde(default)]
    pub observations: Vec<NormalizedObservation>,
}

impl ObservationSummary {
    /// Summary for a round that produced no observations at all.
    ///
    /// Absence of evidence is always blocking.
    pub fn empty() -> Self {
        Self {
            success_rate: 0.0,
            blocking_issues: true,
            lowest_confidence: 0.0,
            total_count: 0,
            success_count: 0,
            failure_count: 0,
            partial_count: 0,
            issues: Vec::new(),
            observations: Vec::new(),
        }
    }

    /// Summary for a round with nothing to wait on.
    pub fn nothing_delegated() -> Self {
        Self {
            success_rate: 1.0,
            blocking_issues: false,
            lowest_confidence: 1.0,
            ..Self::empty()
        }
    }

    /// Whether every observed task succeeded and nothing blocks.
    pub fn is_clean(&self) -> bool {
        !self.blocking_issues && self.success_rate >= 1.0
    }
}
