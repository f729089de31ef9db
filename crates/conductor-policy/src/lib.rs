//! Declarative policy engine for the Conductor orchestration loop.
//!
//! A policy document (YAML or JSON) holds defaults plus prioritized rules.
//! Each rule's `when` clause is compiled at load time into a small condition
//! AST over dot-paths of a [`PolicyContext`]; evaluation merges every
//! matching rule into one [`EffectivePolicy`].
//!
//! # Main types
//!
//! - [`PolicyEngine`] — Loads, caches, hot-swaps and evaluates the active policy.
//! - [`Policy`] / [`Rule`] — Parsed document and compiled rules.
//! - [`Condition`] — Closed set of `when` operators.
//! - [`EffectivePolicy`] — Decision, capabilities, retry and fan-in outcome.
//! - [`PolicyWatcher`] — File watcher driving hot reload.

/// Condition AST and path resolution.
pub mod condition;
/// Evaluation input.
pub mod context;
/// Policy document model.
pub mod document;
/// Loading, caching and hot swap.
pub mod engine;
/// Rule matching and merge.
pub mod evaluate;
/// File watcher for hot reload.
pub mod watcher;

pub use condition::Condition;
pub use context::PolicyContext;
pub use document::{
    CapabilityList, Policy, PolicyDecision, PolicyDefaults, RetryPolicy, Rule, RuleEffect,
    DEFAULT_RULE_PRIORITY,
};
pub use engine::{FilePolicyParser, PolicyEngine, PolicyParser};
pub use evaluate::EffectivePolicy;
pub use watcher::{PolicyWatcher, DEFAULT_DEBOUNCE_MS};
