use crate::store::{DecisionFilter, StateStore};
use async_trait::async_trait;
use conductor_core::{ConductorError, ConductorResult, DecisionLog, OrchestrationState, StateKey};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

const STATES_SUFFIX: &str = ".states.jsonl";
const DECISIONS_SUFFIX: &str = ".decisions.jsonl";

/// File-based store: one append-only JSONL file per session and record kind.
pub struct FileStateStore {
    dir: PathBuf,
    /// Serializes the duplicate check with the append that follows it.
    write_lock: Mutex<()>,
}

impl FileStateStore {
    pub async fn new(dir: PathBuf) -> ConductorResult<Self> {
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn states_path(&self, session_id: &str) -> ConductorResult<PathBuf> {
        validate_session_id(session_id)?;
        Ok(self.dir.join(format!("{session_id}{STATES_SUFFIX}")))
    }

    fn decisions_path(&self, session_id: &str) -> ConductorResult<PathBuf> {
        validate_session_id(session_id)?;
        Ok(self.dir.join(format!("{session_id}{DECISIONS_SUFFIX}")))
    }

    async fn read_all_decisions(&self) -> ConductorResult<Vec<DecisionLog>> {
        let mut logs = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                if name.ends_with(DECISIONS_SUFFIX) {
                    logs.extend(read_jsonl::<DecisionLog>(&entry.path()).await?);
                }
            }
        }
        Ok(logs)
    }
}

/// Session ids become file names, so only a conservative alphabet is allowed.
fn validate_session_id(session_id: &str) -> ConductorResult<()> {
    let valid = !session_id.is_empty()
        && !session_id.starts_with('.')
        && session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(ConductorError::Store(format!(
            "Invalid session id for file store: {session_id:?}"
        )))
    }
}

async fn read_jsonl<T: DeserializeOwned>(path: &Path) -> ConductorResult<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let data = tokio::fs::read_to_string(path).await?;
    data.lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| {
            serde_json::from_str(l).map_err(|e| {
                ConductorError::Store(format!("Corrupt record in {}: {e}", path.display()))
            })
        })
        .collect()
}

async fn append_jsonl<T: Serialize>(path: &Path, record: &T) -> ConductorResult<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    let mut line = serde_json::to_string(record)?;
    line.push('\n');
    file.write_all(line.as_bytes()).await?;
    file.flush().await?;
    Ok(())
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn create_state(&self, state: &OrchestrationState) -> ConductorResult<()> {
        let path = self.states_path(&state.session_id)?;
        let key = state.key();
        let _guard = self.write_lock.lock().await;

        let existing: Vec<OrchestrationState> = read_jsonl(&path).await?;
        if existing.iter().any(|s| s.key() == key) {
            return Err(ConductorError::Duplicate(format!("state {key}")));
        }
        append_jsonl(&path, state).await?;
        debug!(key = %key, "State persisted");
        Ok(())
    }

    async fn get_state(&self, key: &StateKey) -> ConductorResult<Option<OrchestrationState>> {
        let path = self.states_path(&key.session_id)?;
        let states: Vec<OrchestrationState> = read_jsonl(&path).await?;
        Ok(states.into_iter().find(|s| &s.key() == key))
    }

    async fn states_for_session(
        &self,
        session_id: &str,
    ) -> ConductorResult<Vec<OrchestrationState>> {
        let path = self.states_path(session_id)?;
        let mut states: Vec<OrchestrationState> = read_jsonl(&path).await?;
        states.sort_by_key(|s| (s.iteration, s.phase.ordinal()));
        Ok(states)
    }

    async fn append_decision(&self, log: &DecisionLog) -> ConductorResult<()> {
        let path = self.decisions_path(&log.session_id)?;
        let key = log.key();
        let _guard = self.write_lock.lock().await;

        let existing: Vec<DecisionLog> = read_jsonl(&path).await?;
        if existing.iter().any(|l| l.key() == key) {
            return Err(ConductorError::Duplicate(format!("decision {key}")));
        }
        append_jsonl(&path, log).await
    }

    async fn query_decisions(&self, filter: &DecisionFilter) -> ConductorResult<Vec<DecisionLog>> {
        let logs = match filter.session_id.as_deref() {
            Some(session_id) => read_jsonl(&self.decisions_path(session_id)?).await?,
            None => self.read_all_decisions().await?,
        };
        Ok(filter.apply(logs))
    }

    async fn list_sessions(&self) -> ConductorResult<Vec<String>> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                if let Some(stem) = name.strip_suffix(STATES_SUFFIX) {
                    ids.push(stem.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}
