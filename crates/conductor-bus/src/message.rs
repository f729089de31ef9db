use chrono::{DateTime, Utc};
use conductor_core::{ObservationSummary, TaskDispatch, TaskResult};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Bus topics. Every message belongs to exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Topic {
    TaskDispatch,
    TaskResult,
    Heartbeat,
    ObservationSummary,
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Topic::TaskDispatch => write!(f, "TASK_DISPATCH"),
            Topic::TaskResult => write!(f, "TASK_RESULT"),
            Topic::Heartbeat => write!(f, "HEARTBEAT"),
            Topic::ObservationSummary => write!(f, "OBSERVATION_SUMMARY"),
        }
    }
}

/// Liveness ping from an executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heartbeat {
    pub agent_id: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub task_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Heartbeat {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            session_id: None,
            task_id: None,
            timestamp: Utc::now(),
        }
    }

    pub fn for_task(mut self, session_id: impl Into<String>, task_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self.task_id = Some(task_id.into());
        self
    }
}

/// Message body; the variant determines the topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BusPayload {
    Dispatch(TaskDispatch),
    Result(TaskResult),
    Heartbeat(Heartbeat),
    Summary {
        session_id: String,
        iteration: u32,
        summary: ObservationSummary,
    },
}

/// Envelope published on the [`TaskBus`](crate::TaskBus).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusMessage {
    pub id: Uuid,
    pub payload: BusPayload,
    pub published_at: DateTime<Utc>,
}

impl BusMessage {
    pub fn new(payload: BusPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            payload,
            published_at: Utc::now(),
        }
    }

    pub fn dispatch(dispatch: TaskDispatch) -> Self {
        Self::new(BusPayload::Dispatch(dispatch))
    }

    pub fn result(result: TaskResult) -> Self {
        Self::new(BusPayload::Result(result))
    }

    pub fn heartbeat(heartbeat: Heartbeat) -> Self {
        Self::new(BusPayload::Heartbeat(heartbeat))
    }

    pub fn summary(
        session_id: impl Into<String>,
        iteration: u32,
        summary: ObservationSummary,
    ) -> Self {
        Self::new(BusPayload::Summary {
            session_id: session_id.into(),
            iteration,
            summary,
        })
    }

    pub fn topic(&self) -> Topic {
        match &self.payload {
            BusPayload::Dispatch(_) => Topic::TaskDispatch,
            BusPayload::Result(_) => Topic::TaskResult,
            BusPayload::Heartbeat(_) => Topic::Heartbeat,
            BusPayload::Summary { .. } => Topic::ObservationSummary,
        }
    }

    /// Session the message belongs to, if any.
    pub fn session_id(&self) -> Option<&str> {
        match &self.payload {
            BusPayload::Dispatch(d) => Some(&d.session_id),
            BusPayload::Result(r) => Some(&r.session_id),
            BusPayload::Heartbeat(h) => h.session_id.as_deref(),
            BusPayload::Summary { session_id, .. } => Some(session_id),
        }
    }

    pub fn as_dispatch(&self) -> Option<&TaskDispatch> {
        match &self.payload {
            BusPayload::Dispatch(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_result(&self) -> Option<&TaskResult> {
        match &self.payload {
            BusPayload::Result(r) => Some(r),
            _ => None,
        }
    }
}
