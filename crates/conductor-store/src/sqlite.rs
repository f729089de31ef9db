//! SQLite-backed store with indexes on session, iteration, outcome and time.

use crate::store::{DecisionFilter, StateStore};
use async_trait::async_trait;
use chrono::SecondsFormat;
use conductor_core::{ConductorError, ConductorResult, DecisionLog, OrchestrationState, StateKey};
use parking_lot::Mutex;
use rusqlite::{params, Connection, ErrorCode};
use std::path::Path;
use std::sync::Arc;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS orchestration_states (
    session_id TEXT NOT NULL,
    iteration  INTEGER NOT NULL,
    phase      TEXT NOT NULL,
    timestamp  TEXT NOT NULL,
    body       TEXT NOT NULL,
    PRIMARY KEY (session_id, iteration, phase)
);
CREATE INDEX IF NOT EXISTS idx_states_session ON orchestration_states(session_id);
CREATE INDEX IF NOT EXISTS idx_states_iteration ON orchestration_states(iteration);
CREATE INDEX IF NOT EXISTS idx_states_timestamp ON orchestration_states(timestamp);

CREATE TABLE IF NOT EXISTS decision_logs (
    session_id TEXT NOT NULL,
    iteration  INTEGER NOT NULL,
    phase      TEXT NOT NULL,
    action     TEXT NOT NULL,
    outcome    TEXT NOT NULL,
    timestamp  TEXT NOT NULL,
    body       TEXT NOT NULL,
    PRIMARY KEY (session_id, iteration, phase)
);
CREATE INDEX IF NOT EXISTS idx_decisions_session ON decision_logs(session_id);
CREATE INDEX IF NOT EXISTS idx_decisions_outcome ON decision_logs(outcome);
CREATE INDEX IF NOT EXISTS idx_decisions_timestamp ON decision_logs(timestamp);
";

/// Store backed by a single SQLite database file.
pub struct SqliteStateStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStateStore {
    /// Open (or create) the database at `path` and apply the schema.
    pub fn open(path: &Path) -> ConductorResult<Self> {
        let conn = Connection::open(path).map_err(store_err)?;
        Self::with_connection(conn)
    }

    /// Database that lives only as long as the store.
    pub fn open_in_memory() -> ConductorResult<Self> {
        let conn = Connection::open_in_memory().map_err(store_err)?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> ConductorResult<Self> {
        conn.execute_batch(SCHEMA).map_err(store_err)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn run<T, F>(&self, f: F) -> ConductorResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> ConductorResult<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock();
            f(&guard)
        })
        .await
        .map_err(|e| ConductorError::Store(format!("SQLite worker failed: {e}")))?
    }
}

fn store_err(e: rusqlite::Error) -> ConductorError {
    ConductorError::Store(e.to_string())
}

/// Map a primary-key violation to [`ConductorError::Duplicate`].
fn insert_err(e: rusqlite::Error, key: &StateKey) -> ConductorError {
    match &e {
        rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::ConstraintViolation => {
            ConductorError::Duplicate(key.to_string())
        }
        _ => store_err(e),
    }
}

fn decode<T: serde::de::DeserializeOwned>(body: &str) -> ConductorResult<T> {
    serde_json::from_str(body).map_err(|e| ConductorError::Store(format!("Corrupt record: {e}")))
}

#[async_trait]
impl StateStore for SqliteStateStore {
    async fn create_state(&self, state: &OrchestrationState) -> ConductorResult<()> {
        let key = state.key();
        let body = serde_json::to_string(state)?;
        let timestamp = state.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true);
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO orchestration_states (session_id, iteration, phase, timestamp, body)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![key.session_id, key.iteration, key.phase.as_str(), timestamp, body],
            )
            .map_err(|e| insert_err(e, &key))?;
            Ok(())
        })
        .await
    }

    async fn get_state(&self, key: &StateKey) -> ConductorResult<Option<OrchestrationState>> {
        let key = key.clone();
        self.run(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT body FROM orchestration_states
                     WHERE session_id = ?1 AND iteration = ?2 AND phase = ?3",
                )
                .map_err(store_err)?;
            let mut rows = stmt
                .query(params![key.session_id, key.iteration, key.phase.as_str()])
                .map_err(store_err)?;
            match rows.next().map_err(store_err)? {
                Some(row) => {
                    let body: String = row.get(0).map_err(store_err)?;
                    Ok(Some(decode(&body)?))
                }
                None => Ok(None),
            }
        })
        .await
    }

    async fn states_for_session(
        &self,
        session_id: &str,
    ) -> ConductorResult<Vec<OrchestrationState>> {
        let session_id = session_id.to_string();
        let mut states: Vec<OrchestrationState> = self
            .run(move |conn| {
                let mut stmt = conn
                    .prepare("SELECT body FROM orchestration_states WHERE session_id = ?1")
                    .map_err(store_err)?;
                let bodies = stmt
                    .query_map(params![session_id], |row| row.get::<_, String>(0))
                    .map_err(store_err)?
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(store_err)?;
                bodies.iter().map(|b| decode(b)).collect()
            })
            .await?;
        states.sort_by_key(|s| (s.iteration, s.phase.ordinal()));
        Ok(states)
    }

    async fn append_decision(&self, log: &DecisionLog) -> ConductorResult<()> {
        let key = log.key();
        let body = serde_json::to_string(log)?;
        let action = log.decision.action.as_str();
        let outcome = log.outcome.as_str();
        let timestamp = log.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true);
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO decision_logs
                 (session_id, iteration, phase, action, outcome, timestamp, body)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    key.session_id,
                    key.iteration,
                    key.phase.as_str(),
                    action,
                    outcome,
                    timestamp,
                    body
                ],
            )
            .map_err(|e| insert_err(e, &key))?;
            Ok(())
        })
        .await
    }

    async fn query_decisions(&self, filter: &DecisionFilter) -> ConductorResult<Vec<DecisionLog>> {
        let mut clauses: Vec<&'static str> = Vec::new();
        let mut args: Vec<String> = Vec::new();
        if let Some(session_id) = &filter.session_id {
            clauses.push("session_id = ?");
            args.push(session_id.clone());
        }
        if let Some(outcome) = filter.outcome {
            clauses.push("outcome = ?");
            args.push(outcome.as_str().to_string());
        }
        if let Some(action) = filter.action {
            clauses.push("action = ?");
            args.push(action.as_str().to_string());
        }
        if let Some(since) = filter.since {
            clauses.push("timestamp >= ?");
            args.push(since.to_rfc3339_opts(SecondsFormat::Micros, true));
        }
        if let Some(until) = filter.until {
            clauses.push("timestamp <= ?");
            args.push(until.to_rfc3339_opts(SecondsFormat::Micros, true));
        }

        let mut sql = String::from("SELECT body FROM decision_logs");
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY timestamp, iteration");
        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        self.run(move |conn| {
            let mut stmt = conn.prepare(&sql).map_err(store_err)?;
            let bodies = stmt
                .query_map(rusqlite::params_from_iter(args.iter()), |row| {
                    row.get::<_, String>(0)
                })
                .map_err(store_err)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(store_err)?;
            bodies.iter().map(|b| decode(b)).collect()
        })
        .await
    }

    async fn list_sessions(&self) -> ConductorResult<Vec<String>> {
        self.run(|conn| {
            let mut stmt = conn
                .prepare("SELECT DISTINCT session_id FROM orchestration_states ORDER BY session_id")
                .map_err(store_err)?;
            let ids = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(store_err)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(store_err)?;
            Ok(ids)
        })
        .await
    }
}
