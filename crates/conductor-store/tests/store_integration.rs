#![allow(clippy::unwrap_used, clippy::expect_used)]

use conductor_core::{
    ConductorError, Decision, DecisionAction, DecisionLog, OrchestrationState, Outcome, Phase,
};
use conductor_store::{DecisionFilter, FileStateStore, InMemoryStateStore, StateStore};
use std::sync::Arc;

/// Helper: create a FileStateStore in a temp directory.
async fn temp_file_store() -> (FileStateStore, tempfile::TempDir) {
    let tmp = tempfile::tempdir().unwrap();
    let store = FileStateStore::new(tmp.path().join("audit")).await.unwrap();
    (store, tmp)
}

/// Write one full RETRY iteration followed by a COMPLETE iteration.
async fn write_two_iterations(store: &dyn StateStore, session: &str) {
    for phase in [
        Phase::Awareness,
        Phase::Planning,
        Phase::Delegation,
        Phase::Observation,
    ] {
        store
            .create_state(&OrchestrationState::new(session, 0, phase))
            .await
            .unwrap();
    }
    let mut retry = OrchestrationState::new(session, 0, Phase::Decision);
    retry.decision = Some(Decision::new(DecisionAction::Retry, Some("blocking".into())));
    store.create_state(&retry).await.unwrap();
    store
        .append_decision(&DecisionLog::from_state(&retry).unwrap())
        .await
        .unwrap();

    for phase in [Phase::Delegation, Phase::Observation] {
        store
            .create_state(&OrchestrationState::new(session, 1, phase))
            .await
            .unwrap();
    }
    let mut done = OrchestrationState::new(session, 1, Phase::Decision);
    done.decision = Some(Decision::new(DecisionAction::Complete, None));
    store.create_state(&done).await.unwrap();
    store
        .append_decision(&DecisionLog::from_state(&done).unwrap())
        .await
        .unwrap();
    store
        .create_state(&OrchestrationState::new(session, 1, Phase::Complete))
        .await
        .unwrap();
}

async fn assert_history(store: &dyn StateStore, session: &str) {
    let states = store.states_for_session(session).await.unwrap();
    assert_eq!(states.len(), 9);
    let phases: Vec<(u32, Phase)> = states.iter().map(|s| (s.iteration, s.phase)).collect();
    assert_eq!(phases[0], (0, Phase::Awareness));
    assert_eq!(phases[4], (0, Phase::Decision));
    assert_eq!(phases[5], (1, Phase::Delegation));
    assert_eq!(phases[8], (1, Phase::Complete));

    let logs = store.decisions_for_session(session).await.unwrap();
    assert_eq!(logs.len(), 2);
    assert_eq!(logs[0].outcome, Outcome::Partial);
    assert_eq!(logs[1].outcome, Outcome::Success);
}

#[tokio::test]
async fn test_in_memory_history() {
    let store = InMemoryStateStore::new();
    write_two_iterations(&store, "react-a").await;
    assert_history(&store, "react-a").await;
}

#[tokio::test]
async fn test_file_history() {
    let (store, _tmp) = temp_file_store().await;
    write_two_iterations(&store, "react-b").await;
    assert_history(&store, "react-b").await;
}

#[tokio::test]
async fn test_duplicate_decision_rejected() {
    let (store, _tmp) = temp_file_store().await;
    let mut state = OrchestrationState::new("react-c", 0, Phase::Decision);
    state.decision = Some(Decision::new(DecisionAction::Escalate, None));
    let log = DecisionLog::from_state(&state).unwrap();
    store.append_decision(&log).await.unwrap();
    assert!(matches!(
        store.append_decision(&log).await.unwrap_err(),
        ConductorError::Duplicate(_)
    ));
}

#[tokio::test]
async fn test_concurrent_writers_one_wins() {
    let store: Arc<dyn StateStore> = Arc::new(InMemoryStateStore::new());
    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store
                .create_state(&OrchestrationState::new("react-d", 0, Phase::Awareness))
                .await
        }));
    }
    let mut ok = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            ok += 1;
        }
    }
    assert_eq!(ok, 1);
}

#[tokio::test]
async fn test_cross_session_query() {
    let store = InMemoryStateStore::new();
    write_two_iterations(&store, "react-e").await;
    write_two_iterations(&store, "react-f").await;

    let completes = store
        .query_decisions(&DecisionFilter::new().action(DecisionAction::Complete))
        .await
        .unwrap();
    assert_eq!(completes.len(), 2);
    assert_eq!(store.list_sessions().await.unwrap(), vec!["react-e", "react-f"]);
}
