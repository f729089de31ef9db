//! Audit and state persistence for the Conductor orchestration loop.
//!
//! Every phase transition is written here before the loop moves on, and
//! every DECISION phase appends one decision log. Records are append-only
//! and keyed by `(session_id, iteration, phase)`.
//!
//! # Main types
//!
//! - [`StateStore`] — Backend-agnostic persistence trait.
//! - [`DecisionFilter`] — Filtered query over decision logs.
//! - [`InMemoryStateStore`] — Process-local backend, used by tests and `run`.
//! - [`FileStateStore`] — JSONL files on disk, one per session.
//! - `SqliteStateStore` — Indexed SQLite backend (feature `sqlite`).

/// JSONL file backend.
pub mod file;
/// SQLite backend.
#[cfg(feature = "sqlite")]
pub mod sqlite;
/// Store trait, query filter, and in-memory backend.
pub mod store;

pub use file::FileStateStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStateStore;
pub use store::{DecisionFilter, InMemoryStateStore, StateStore};
