//! In-process executor used by `conductor run`.
//!
//! Answers every `TASK_DISPATCH` on the bus with a heartbeat followed by a
//! result echoing the objective. The first `fail_first` attempts fail, which
//! makes retry behavior observable without a real executor fleet.

use async_trait::async_trait;
use conductor_bus::{BusMessage, Heartbeat, MessageHandler, TaskBus, Topic};
use conductor_core::{ConductorResult, Issue, TaskResult};
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::debug;

pub const LOOPBACK_AGENT_ID: &str = "loopback";

pub struct LoopbackExecutor {
    bus: Arc<TaskBus>,
    fail_first: u32,
    attempts: AtomicU32,
}

impl LoopbackExecutor {
    pub fn new(bus: Arc<TaskBus>) -> Self {
        Self {
            bus,
            fail_first: 0,
            attempts: AtomicU32::new(0),
        }
    }

    pub fn failing_first(mut self, attempts: u32) -> Self {
        self.fail_first = attempts;
        self
    }

    /// Subscribe to `TASK_DISPATCH` on the executor's own bus.
    pub fn attach(self) -> Arc<Self> {
        let executor = Arc::new(self);
        executor
            .bus
            .subscribe(Topic::TaskDispatch, executor.clone());
        executor
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl MessageHandler for LoopbackExecutor {
    async fn handle(&self, message: &BusMessage) -> ConductorResult<()> {
        let Some(dispatch) = message.as_dispatch() else {
            return Ok(());
        };
        self.bus
            .publish(BusMessage::heartbeat(
                Heartbeat::new(LOOPBACK_AGENT_ID).for_task(&dispatch.session_id, &dispatch.task_id),
            ))
            .await;

        let attempt = self.attempts.fetch_add(1, Ordering::Relaxed) + 1;
        let result = if attempt <= self.fail_first {
            TaskResult::failed_for(
                dispatch,
                LOOPBACK_AGENT_ID,
                Issue::new(
                    "loopback_failure",
                    format!("Simulated failure {attempt} of {}", self.fail_first),
                ),
            )
        } else {
            TaskResult::success_for(dispatch, LOOPBACK_AGENT_ID)
                .with_result(json!({
                    "echo": dispatch.objective,
                    "delegate_to": dispatch.delegate_to,
                }))
                .with_confidence(1.0)
        };
        debug!(task_id = %dispatch.task_id, status = %result.status, "Loopback answering");
        self.bus.publish(BusMessage::result(result)).await;
        Ok(())
    }
}
