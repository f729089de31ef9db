use crate::condition::resolve;
use crate::context::PolicyContext;
use crate::document::{Policy, PolicyDecision, RetryPolicy, Rule};
use conductor_core::FanInPolicy;
use serde::Serialize;
use std::collections::BTreeSet;

/// Merged outcome of every rule that matched a context.
///
/// `allow` and `forbid` are sorted and disjoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EffectivePolicy {
    pub decision: Option<PolicyDecision>,
    pub allow: Vec<String>,
    pub forbid: Vec<String>,
    pub retry: Option<RetryPolicy>,
    pub fan_in: Option<FanInPolicy>,
    /// Names of matched rules in priority order.
    pub rule_hits: Vec<String>,
}

impl Rule {
    /// Whether every condition holds against `context`.
    pub fn matches(&self, context: &serde_json::Value) -> bool {
        self.conditions
            .iter()
            .all(|(path, condition)| condition.matches(resolve(context, path)))
    }
}

impl Policy {
    /// Evaluate all rules against `context`.
    pub fn evaluate(&self, context: &PolicyContext) -> EffectivePolicy {
        let view = context.to_value();

        let mut matched: Vec<&Rule> = self.rules.iter().filter(|r| r.matches(&view)).collect();
        // sort_by is stable: equal priorities keep declaration order.
        matched.sort_by(|a, b| b.priority.cmp(&a.priority));

        let mut allow: BTreeSet<String> = self.defaults.allow.iter().cloned().collect();
        let mut forbid: BTreeSet<String> = self.defaults.forbid.iter().cloned().collect();
        for rule in &matched {
            if let Some(list) = &rule.effect.allow {
                allow.extend(list.capabilities.iter().cloned());
            }
            if let Some(list) = &rule.effect.forbid {
                forbid.extend(list.capabilities.iter().cloned());
            }
        }
        allow.retain(|cap| !forbid.contains(cap));

        EffectivePolicy {
            decision: matched.iter().find_map(|r| r.effect.decision.clone()),
            allow: allow.into_iter().collect(),
            forbid: forbid.into_iter().collect(),
            retry: matched.iter().find_map(|r| r.effect.retry),
            fan_in: matched.iter().find_map(|r| r.effect.fan_in),
            rule_hits: matched.iter().map(|r| r.name.clone()).collect(),
        }
    }
}
