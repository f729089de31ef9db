use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conductor_bus::{BusMessage, BusPayload, MessageHandler, SubscriptionId, TaskBus, Topic};
use conductor_core::{ConductorResult, TaskStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorStatus {
    Idle,
    Working,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorMetrics {
    pub heartbeats: u64,
    pub succeeded: u64,
    pub partial: u64,
    pub failed: u64,
}

/// Liveness and throughput of one executor, as seen on the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorState {
    pub agent_id: String,
    pub status: ExecutorStatus,
    pub current_task: Option<String>,
    pub last_seen: DateTime<Utc>,
    pub metrics: ExecutorMetrics,
}

impl ExecutorState {
    fn new(agent_id: &str, seen: DateTime<Utc>) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            status: ExecutorStatus::Idle,
            current_task: None,
            last_seen: seen,
            metrics: ExecutorMetrics::default(),
        }
    }
}

/// Tracks executors from the heartbeats and results they publish.
pub struct ExecutorMonitor {
    states: RwLock<HashMap<String, ExecutorState>>,
}

impl ExecutorMonitor {
    pub fn new() -> Self {
        Self {
            states: RwLock::new(HashMap::new()),
        }
    }

    /// Subscribe to `HEARTBEAT` and `TASK_RESULT` on `bus`.
    pub fn attach(self: &Arc<Self>, bus: &TaskBus) -> Vec<(Topic, SubscriptionId)> {
        let handler: Arc<dyn MessageHandler> = Arc::new(MonitorHandler {
            monitor: self.clone(),
        });
        [Topic::Heartbeat, Topic::TaskResult]
            .into_iter()
            .map(|topic| (topic, bus.subscribe(topic, handler.clone())))
            .collect()
    }

    /// Fold one bus message into the executor table.
    pub async fn observe(&self, message: &BusMessage) {
        let mut states = self.states.write().await;
        match &message.payload {
            BusPayload::Heartbeat(hb) => {
                let state = states
                    .entry(hb.agent_id.clone())
                    .or_insert_with(|| ExecutorState::new(&hb.agent_id, hb.timestamp));
                state.last_seen = hb.timestamp;
                state.metrics.heartbeats += 1;
                if let Some(task_id) = &hb.task_id {
                    state.current_task = Some(task_id.clone());
                    state.status = ExecutorStatus::Working;
                }
            }
            BusPayload::Result(result) => {
                let state = states
                    .entry(result.agent_id.clone())
                    .or_insert_with(|| ExecutorState::new(&result.agent_id, result.completed_at));
                state.last_seen = result.completed_at;
                match result.status {
                    TaskStatus::Success => state.metrics.succeeded += 1,
                    TaskStatus::Partial => state.metrics.partial += 1,
                    TaskStatus::Failed => state.metrics.failed += 1,
                }
                if state.current_task.as_deref() == Some(result.task_id.as_str()) {
                    state.current_task = None;
                    state.status = ExecutorStatus::Idle;
                }
            }
            _ => {}
        }
    }

    pub async fn snapshot(&self) -> Vec<ExecutorState> {
        let states = self.states.read().await;
        let mut all: Vec<ExecutorState> = states.values().cloned().collect();
        all.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        all
    }

    pub async fn get_state(&self, agent_id: &str) -> Option<ExecutorState> {
        self.states.read().await.get(agent_id).cloned()
    }

    /// Executors not heard from within `max_silence`.
    pub async fn stale(&self, max_silence: Duration) -> Vec<String> {
        let Some(cutoff) = chrono::Duration::from_std(max_silence)
            .ok()
            .and_then(|d| Utc::now().checked_sub_signed(d))
        else {
            return Vec::new();
        };
        let states = self.states.read().await;
        let mut ids: Vec<String> = states
            .values()
            .filter(|s| s.last_seen < cutoff)
            .map(|s| s.agent_id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub async fn to_json(&self) -> serde_json::Value {
        serde_json::json!({ "executors": self.snapshot().await })
    }
}

impl Default for ExecutorMonitor {
    fn default() -> Self {
        Self::new()
    }
}

struct MonitorHandler {
    monitor: Arc<ExecutorMonitor>,
}

#[async_trait]
impl MessageHandler for MonitorHandler {
    async fn handle(&self, message: &BusMessage) -> ConductorResult<()> {
        self.monitor.observe(message).await;
        Ok(())
    }
}
