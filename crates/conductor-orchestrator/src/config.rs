use conductor_core::{ConductorError, ConductorResult, FanInPolicy};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables of the orchestration loop.
///
/// Every field has a default, so a partial `[orchestrator]` table is accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Iterations allowed before the loop stops on RETRY / EXTEND_PLAN.
    pub max_iterations: u32,
    /// Upper bound of one OBSERVATION wait.
    pub observation_timeout_secs: u64,
    /// Longest a result waiter sleeps between scans.
    pub poll_interval_ms: u64,
    /// Fan-in used until a policy says otherwise.
    pub fan_in: FanInPolicy,
    /// `timeout_sec` stamped on every dispatch.
    pub default_task_timeout_secs: u64,
    /// Capabilities known to exist; exposed to policies.
    pub capability_registry: Vec<String>,
    /// Drop the session's results and mailbox from the bus once `execute` returns.
    pub clear_bus_on_finish: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            observation_timeout_secs: 300,
            poll_interval_ms: 100,
            fan_in: FanInPolicy::default(),
            default_task_timeout_secs: 300,
            capability_registry: Vec::new(),
            clear_bus_on_finish: true,
        }
    }
}

impl OrchestratorConfig {
    pub fn observation_timeout(&self) -> Duration {
        Duration::from_secs(self.observation_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn validate(&self) -> ConductorResult<()> {
        if self.max_iterations == 0 {
            return Err(ConductorError::Config(
                "max_iterations must be at least 1".into(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConductorError::Config(
                "poll_interval_ms must be positive".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.fan_in.threshold) {
            return Err(ConductorError::Config(format!(
                "fan_in.threshold must be within [0, 1], got {}",
                self.fan_in.threshold
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use conductor_core::FanInMode;

    #[test]
    fn test_partial_config_uses_defaults() {
        let cfg: OrchestratorConfig =
            serde_json::from_str(r#"{"max_iterations": 3, "fan_in": {"mode": "any"}}"#).unwrap();
        assert_eq!(cfg.max_iterations, 3);
        assert_eq!(cfg.fan_in.mode, FanInMode::Any);
        assert!((cfg.fan_in.threshold - 0.7).abs() < f64::EPSILON);
        assert_eq!(cfg.observation_timeout(), Duration::from_secs(300));
        assert!(cfg.clear_bus_on_finish);
        cfg.validate().unwrap();
    }

    #[test]
    fn test_validation() {
        let zero = OrchestratorConfig {
            max_iterations: 0,
            ..Default::default()
        };
        assert!(zero.validate().is_err());

        let mut bad_threshold = OrchestratorConfig::default();
        bad_threshold.fan_in.threshold = 1.5;
        assert!(bad_threshold.validate().is_err());
    }
}
