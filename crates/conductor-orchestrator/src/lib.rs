//! Orchestration loop for Conductor: classify, plan, delegate, observe, decide.
//!
//! The [`StateMachine`] drives each session through five phases, delegating
//! steps over the [`TaskBus`](conductor_bus::TaskBus), folding results with
//! the [`ObservationAggregator`], asking the
//! [`PolicyEngine`](conductor_policy::PolicyEngine) for a decision, and
//! persisting every phase to a [`StateStore`](conductor_store::StateStore).
//!
//! # Main types
//!
//! - [`StateMachine`] — The loop itself; build with [`StateMachine::builder`].
//! - [`ExecutionResult`] — Outcome of a run or a replay.
//! - [`ObservationAggregator`] / [`fan_in`] — All/any/quorum fan-in.
//! - [`Classifier`], [`Planner`], [`Dispatcher`], [`TaskTracker`] — Collaborator seams.
//! - [`ExecutorMonitor`] — Executor liveness from heartbeats and results.
//! - [`OrchestratorConfig`] — Loop tunables.

/// Observation normalization and fan-in.
pub mod aggregator;
/// Collaborator traits and their defaults.
pub mod collaborators;
/// Loop configuration.
pub mod config;
/// The phase loop.
pub mod machine;
/// Executor liveness tracking.
pub mod monitor;
/// Plan validation and task ids.
pub mod plan;

pub use aggregator::{fan_in, is_blocking, Observation, ObservationAggregator};
pub use collaborators::{
    BusDispatcher, Classifier, DefaultClassifier, DirectPlanner, Dispatcher, Planner,
    RequestContext, StagedPlanner, TaskTracker, DEFAULT_DELEGATE,
};
pub use config::OrchestratorConfig;
pub use machine::{
    fallback_decision, transition, ExecutionResult, StateMachine, StateMachineBuilder,
    Transition, LOOP_EXHAUSTED,
};
pub use monitor::{ExecutorMetrics, ExecutorMonitor, ExecutorState, ExecutorStatus};
pub use plan::{task_id_for, validate_plan};
