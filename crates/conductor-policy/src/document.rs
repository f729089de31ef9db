//! Policy document model.
//!
//! ```yaml
//! spec_version: "1.0"
//! defaults:
//!   retry: { max_retry: 3, backoff_sec: 0.5 }
//!   fan_in: { mode: quorum, threshold: 0.7 }
//!   allow: [read_repo]
//! rules:
//!   - name: security-escalation
//!     priority: 200
//!     when:
//!       observations: { any_issue_type_in: [security] }
//!     then:
//!       decision: { action: escalate, reason: security issue reported }
//!       forbid: { capabilities: [deploy] }
//! ```

use crate::condition::Condition;
use conductor_core::{ConductorError, DecisionAction, FanInPolicy};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Priority given to rules that do not declare one.
pub const DEFAULT_RULE_PRIORITY: i64 = 100;

/// A parsed policy document.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Policy {
    #[serde(default)]
    pub spec_version: Option<String>,
    #[serde(default)]
    pub defaults: PolicyDefaults,
    /// Rules in declaration order.
    #[serde(default)]
    pub rules: Vec<Rule>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PolicyDefaults {
    #[serde(default)]
    pub retry: Option<RetryPolicy>,
    #[serde(default)]
    pub fan_in: Option<FanInPolicy>,
    #[serde(default)]
    pub allow: Vec<String>,
    #[serde(default)]
    pub forbid: Vec<String>,
}

/// Retry budget and pause between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default)]
    pub max_retry: Option<u32>,
    #[serde(default)]
    pub backoff_sec: f64,
}

/// Decision asserted by a rule.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolicyDecision {
    pub action: DecisionAction,
    pub reason: Option<String>,
}

impl<'de> Deserialize<'de> for PolicyDecision {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Detailed {
                action: DecisionAction,
                #[serde(default)]
                reason: Option<String>,
            },
            Bare(DecisionAction),
        }
        Ok(match Raw::deserialize(deserializer)? {
            Raw::Bare(action) => Self {
                action,
                reason: None,
            },
            Raw::Detailed { action, reason } => Self { action, reason },
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CapabilityList {
    #[serde(default)]
    pub capabilities: Vec<String>,
}

/// The `then` block of a rule.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RuleEffect {
    #[serde(default)]
    pub decision: Option<PolicyDecision>,
    #[serde(default)]
    pub allow: Option<CapabilityList>,
    #[serde(default)]
    pub forbid: Option<CapabilityList>,
    #[serde(default)]
    pub retry: Option<RetryPolicy>,
    #[serde(default)]
    pub fan_in: Option<FanInPolicy>,
}

/// A rule with its `when` clause compiled.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "RawRule")]
pub struct Rule {
    pub name: String,
    pub priority: i64,
    /// Conjunction of (dot-path, condition) pairs; empty matches everything.
    pub conditions: Vec<(String, Condition)>,
    pub effect: RuleEffect,
}

fn default_priority() -> i64 {
    DEFAULT_RULE_PRIORITY
}

#[derive(Deserialize)]
struct RawRule {
    name: String,
    #[serde(default = "default_priority")]
    priority: i64,
    #[serde(default)]
    when: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    then: RuleEffect,
}

impl TryFrom<RawRule> for Rule {
    type Error = ConductorError;

    fn try_from(raw: RawRule) -> Result<Self, Self::Error> {
        let conditions = raw
            .when
            .iter()
            .map(|(path, value)| {
                Condition::compile(path, value)
                    .map(|c| (path.clone(), c))
                    .map_err(|e| ConductorError::Config(format!("Rule '{}': {e}", raw.name)))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            name: raw.name,
            priority: raw.priority,
            conditions,
            effect: raw.then,
        })
    }
}
