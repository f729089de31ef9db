//! In-process task bus for the Conductor orchestration loop.
//!
//! Carries task dispatches to executors, correlates their results by task id,
//! and keeps a per-session mailbox of everything published.
//!
//! # Main types
//!
//! - [`TaskBus`] — Topic pub/sub with result storage and bounded waits.
//! - [`BusMessage`] / [`Topic`] — Message envelope and the topic it travels on.
//! - [`MessageHandler`] — Subscriber trait; [`FnHandler`] wraps closures.
//! - [`Subscription`] — Guard that unsubscribes on drop.

/// Bus implementation.
pub mod bus;
/// Subscriber trait.
pub mod handler;
/// Topics and message envelopes.
pub mod message;

pub use bus::{Subscription, SubscriptionId, TaskBus, DEFAULT_POLL_INTERVAL};
pub use handler::{FnHandler, MessageHandler};
pub use message::{BusMessage, BusPayload, Heartbeat, Topic};
