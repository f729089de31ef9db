use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conductor_core::{
    ConductorError, ConductorResult, DecisionAction, DecisionLog, OrchestrationState, Outcome,
    StateKey,
};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

/// Persistence backend for orchestration states and decision logs.
///
/// Both record kinds are append-only: writing a key that already exists must
/// fail with [`ConductorError::Duplicate`] and leave the stored record intact.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Persist a new state.
    async fn create_state(&self, state: &OrchestrationState) -> ConductorResult<()>;

    /// Fetch one state by key.
    async fn get_state(&self, key: &StateKey) -> ConductorResult<Option<OrchestrationState>>;

    /// All states of a session ordered by iteration, then phase.
    async fn states_for_session(&self, session_id: &str)
        -> ConductorResult<Vec<OrchestrationState>>;

    /// Append a decision log entry.
    ///
    /// The loop appends a DECISION phase's log before persisting the state
    /// itself, so a stored DECISION state always has a matching log.
    async fn append_decision(&self, log: &DecisionLog) -> ConductorResult<()>;

    /// Decision logs matching `filter`, ordered by timestamp then iteration.
    async fn query_decisions(&self, filter: &DecisionFilter) -> ConductorResult<Vec<DecisionLog>>;

    /// Ids of every session with at least one persisted state.
    async fn list_sessions(&self) -> ConductorResult<Vec<String>>;

    /// All decision logs of a session.
    async fn decisions_for_session(&self, session_id: &str) -> ConductorResult<Vec<DecisionLog>> {
        self.query_decisions(&DecisionFilter::new().session(session_id))
            .await
    }
}

/// Filtered query over decision logs. Empty filter matches everything.
#[derive(Debug, Clone, Default)]
pub struct DecisionFilter {
    pub session_id: Option<String>,
    pub outcome: Option<Outcome>,
    pub action: Option<DecisionAction>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl DecisionFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn outcome(mut self, outcome: Outcome) -> Self {
        self.outcome = Some(outcome);
        self
    }

    pub fn action(mut self, action: DecisionAction) -> Self {
        self.action = Some(action);
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn until(mut self, until: DateTime<Utc>) -> Self {
        self.until = Some(until);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether a single log entry passes every set criterion.
    pub fn matches(&self, log: &DecisionLog) -> bool {
        self.session_id
            .as_deref()
            .map_or(true, |sid| log.session_id == sid)
            && self.outcome.map_or(true, |o| log.outcome == o)
            && self.action.map_or(true, |a| log.decision.action == a)
            && self.since.map_or(true, |t| log.timestamp >= t)
            && self.until.map_or(true, |t| log.timestamp <= t)
    }

    /// Filter, order and truncate a batch of logs.
    pub fn apply(&self, logs: impl IntoIterator<Item = DecisionLog>) -> Vec<DecisionLog> {
        let mut matched: Vec<DecisionLog> = logs.into_iter().filter(|l| self.matches(l)).collect();
        matched.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.iteration.cmp(&b.iteration))
        });
        if let Some(limit) = self.limit {
            matched.truncate(limit);
        }
        matched
    }
}

/// In-memory store. Records live as long as the store does.
pub struct InMemoryStateStore {
    states: RwLock<BTreeMap<StateKey, OrchestrationState>>,
    decisions: RwLock<BTreeMap<StateKey, DecisionLog>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self {
            states: RwLock::new(BTreeMap::new()),
            decisions: RwLock::new(BTreeMap::new()),
        }
    }

    /// Number of persisted states across all sessions.
    pub async fn state_count(&self) -> usize {
        self.states.read().await.len()
    }
}

impl Default for InMemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn create_state(&self, state: &OrchestrationState) -> ConductorResult<()> {
        let key = state.key();
        let mut states = self.states.write().await;
        if states.contains_key(&key) {
            return Err(ConductorError::Duplicate(format!("state {key}")));
        }
        states.insert(key, state.clone());
        Ok(())
    }

    async fn get_state(&self, key: &StateKey) -> ConductorResult<Option<OrchestrationState>> {
        Ok(self.states.read().await.get(key).cloned())
    }

    async fn states_for_session(
        &self,
        session_id: &str,
    ) -> ConductorResult<Vec<OrchestrationState>> {
        // BTreeMap order on StateKey is (session, iteration, phase).
        Ok(self
            .states
            .read()
            .await
            .values()
            .filter(|s| s.session_id == session_id)
            .cloned()
            .collect())
    }

    async fn append_decision(&self, log: &DecisionLog) -> ConductorResult<()> {
        let key = log.key();
        let mut decisions = self.decisions.write().await;
        if decisions.contains_key(&key) {
            return Err(ConductorError::Duplicate(format!("decision {key}")));
        }
        decisions.insert(key, log.clone());
        Ok(())
    }

    async fn query_decisions(&self, filter: &DecisionFilter) -> ConductorResult<Vec<DecisionLog>> {
        let decisions = self.decisions.read().await;
        Ok(filter.apply(decisions.values().cloned()))
    }

    async fn list_sessions(&self) -> ConductorResult<Vec<String>> {
        let states = self.states.read().await;
        let mut ids: Vec<String> = states.keys().map(|k| k.session_id.clone()).collect();
        ids.dedup();
        Ok(ids)
    }
}
