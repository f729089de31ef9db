use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Normalized outcome of a single delegated task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// The task met its success criteria.
    Success,
    /// The task produced something, but not everything, or is still in flight.
    Partial,
    /// The task failed, was cancelled, or never produced a usable result.
    Failed,
}

impl TaskStatus {
    /// Map an executor / tracker status string onto a [`TaskStatus`].
    ///
    /// Returns `None` for statuses that have no defined mapping.
    pub fn from_external(status: &str) -> Option<Self> {
        match status.trim().to_ascii_lowercase().as_str() {
            "success" | "completed" => Some(Self::Success),
            "failed" | "cancelled" => Some(Self::Failed),
            "partial" | "pending" | "running" | "assigned" => Some(Self::Partial),
            _ => None,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Success => write!(f, "success"),
            TaskStatus::Partial => write!(f, "partial"),
            TaskStatus::Failed => write!(f, "failed"),
        }
    }
}

/// A problem reported by an executor alongside its result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    /// Issue category, matched by `any_issue_type_in` policy conditions.
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
}

impl Issue {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            severity: None,
        }
    }

    pub fn with_severity(mut self, severity: impl Into<String>) -> Self {
        self.severity = Some(severity.into());
        self
    }
}

/// Request sent to an executor for one planned step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDispatch {
    pub session_id: String,
    pub iteration: u32,
    pub task_id: String,
    /// Target executor role.
    pub delegate_to: String,
    pub objective: String,
    #[serde(default)]
    pub context: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub success_criteria: Vec<String>,
    pub timeout_sec: u64,
    /// Effective capability policy the executor must honour.
    #[serde(default)]
    pub policy: HashMap<String, serde_json::Value>,
    pub correlation_id: String,
    #[serde(default)]
    pub parent_task_id: Option<String>,
}

impl TaskDispatch {
    pub fn new(
        session_id: impl Into<String>,
        iteration: u32,
        task_id: impl Into<String>,
        delegate_to: impl Into<String>,
        objective: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            iteration,
            task_id: task_id.into(),
            delegate_to: delegate_to.into(),
            objective: objective.into(),
            context: HashMap::new(),
            success_criteria: Vec::new(),
            timeout_sec: 300,
            policy: HashMap::new(),
            correlation_id: Uuid::new_v4().to_string(),
            parent_task_id: None,
        }
    }

    pub fn with_timeout(mut self, timeout_sec: u64) -> Self {
        self.timeout_sec = timeout_sec;
        self
    }

    pub fn with_parent(mut self, parent_task_id: impl Into<String>) -> Self {
        self.parent_task_id = Some(parent_task_id.into());
        self
    }
}

/// Response published by an executor once a dispatched task finishes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub session_id: String,
    pub task_id: String,
    pub agent_id: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub result: serde_json::Value,
    #[serde(default)]
    pub issues: Vec<Issue>,
    /// Executor self-assessment in `[0, 1]`, when it reports one.
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub correlation_id: Option<String>,
    pub completed_at: DateTime<Utc>,
}

impl TaskResult {
    pub fn new(
        session_id: impl Into<String>,
        task_id: impl Into<String>,
        agent_id: impl Into<String>,
        status: TaskStatus,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            task_id: task_id.into(),
            agent_id: agent_id.into(),
            status,
            result: serde_json::Value::Null,
            issues: Vec::new(),
            confidence: None,
            metadata: HashMap::new(),
            correlation_id: None,
            completed_at: Utc::now(),
        }
    }

    /// Build a successful result answering `dispatch`.
    pub fn success_for(dispatch: &TaskDispatch, agent_id: impl Into<String>) -> Self {
        let mut result = Self::new(
            &dispatch.session_id,
            &dispatch.task_id,
            agent_id,
            TaskStatus::Success,
        );
        result.correlation_id = Some(dispatch.correlation_id.clone());
        result
    }

    /// Build a failed result answering `dispatch`, carrying one issue.
    pub fn failed_for(
        dispatch: &TaskDispatch,
        agent_id: impl Into<String>,
        issue: Issue,
    ) -> Self {
        let mut result = Self::new(
            &dispatch.session_id,
            &dispatch.task_id,
            agent_id,
            TaskStatus::Failed,
        );
        result.correlation_id = Some(dispatch.correlation_id.clone());
        result.issues.push(issue);
        result
    }

    pub fn with_result(mut self, result: serde_json::Value) -> Self {
        self.result = result;
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence.clamp(0.0, 1.0));
        self
    }

    pub fn with_issue(mut self, issue: Issue) -> Self {
        self.issues.push(issue);
        self
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_external_status_mapping() {
        assert_eq!(TaskStatus::from_external("completed"), Some(TaskStatus::Success));
        assert_eq!(TaskStatus::from_external("failed"), Some(TaskStatus::Failed));
        assert_eq!(TaskStatus::from_external("cancelled"), Some(TaskStatus::Failed));
        assert_eq!(TaskStatus::from_external("pending"), Some(TaskStatus::Partial));
        assert_eq!(TaskStatus::from_external("Running"), Some(TaskStatus::Partial));
        assert_eq!(TaskStatus::from_external("assigned"), Some(TaskStatus::Partial));
        assert_eq!(TaskStatus::from_external("exploded"), None);
    }

    #[test]
    fn test_result_answers_dispatch() {
        let dispatch = TaskDispatch::new("s1", 0, "s1-i0-step-1", "coder", "write it");
        let result = TaskResult::success_for(&dispatch, "worker-1").with_confidence(1.7);
        assert_eq!(result.task_id, "s1-i0-step-1");
        assert_eq!(result.correlation_id.as_deref(), Some(dispatch.correlation_id.as_str()));
        assert_eq!(result.confidence, Some(1.0));
    }

    #[test]
    fn test_issue_type_field_name() {
        let issue = Issue::new("security", "unsanitized input").with_severity("high");
        let json = serde_json::to_value(&issue).unwrap();
        assert_eq!(json["type"], "security");
        assert_eq!(json["severity"], "high");
    }
}
