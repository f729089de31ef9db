//! Core types and error definitions for the Conductor orchestration loop.
//!
//! This crate provides the foundational types shared across all Conductor
//! crates: the unified error type, the executor wire contract, observation
//! summaries, and the persisted orchestration records.
//!
//! # Main types
//!
//! - [`ConductorError`] — Unified error enum for all Conductor subsystems.
//! - [`ConductorResult`] — Convenience alias for `Result<T, ConductorError>`.
//! - [`TaskDispatch`] / [`TaskResult`] — Request and response exchanged with executors.
//! - [`ObservationSummary`] — Fan-in digest consumed by the decision phase.
//! - [`OrchestrationState`] / [`DecisionLog`] — Immutable audit records.

/// Error types.
pub mod error;
/// Observation summaries and fan-in modes.
pub mod observation;
/// Classification, plan steps, and delegation records.
pub mod plan;
/// Phases, decisions, and persisted orchestration records.
pub mod state;
/// Executor wire contract.
pub mod task;

pub use error::{ConductorError, ConductorResult};
pub use observation::{
    FanInMode, FanInPolicy, NormalizedObservation, ObservationSummary,
    DEFAULT_QUORUM_THRESHOLD,
};
pub use plan::{Classification, Delegation, PlanStep};
pub use state::{
    Decision, DecisionAction, DecisionLog, OrchestrationState, Outcome, Phase, StateKey,
};
pub use task::{Issue, TaskDispatch, TaskResult, TaskStatus};
