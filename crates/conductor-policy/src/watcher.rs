//! Policy hot-reload watcher.
//!
//! Watches the directory holding a policy file and calls
//! [`PolicyEngine::check_and_reload`] after a debounce window, so editors that
//! replace the file by rename are picked up as well as in-place writes.

use crate::engine::PolicyEngine;
use conductor_core::{ConductorError, ConductorResult};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Debounce used by the CLI when none is configured.
pub const DEFAULT_DEBOUNCE_MS: u64 = 500;

/// Keeps the file-system watch alive; dropping it stops reloading.
pub struct PolicyWatcher {
    _watcher: RecommendedWatcher,
}

impl PolicyWatcher {
    /// Start watching `policy_path`. `on_change` runs on the watcher thread
    /// each time a new policy was swapped in.
    pub fn start<F>(
        engine: Arc<PolicyEngine>,
        policy_path: PathBuf,
        debounce_ms: u64,
        on_change: F,
    ) -> ConductorResult<Self>
    where
        F: Fn(&Path) + Send + 'static,
    {
        let dir = policy_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        let (tx, rx) = std_mpsc::channel();

        let target = policy_path.clone();
        let mut watcher =
            notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
                if let Ok(event) = res {
                    if is_relevant(&event, &target) {
                        let _ = tx.send(());
                    }
                }
            })
            .map_err(|e| ConductorError::Config(format!("Failed to create policy watcher: {e}")))?;

        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|e| ConductorError::Config(format!("Failed to watch '{}': {e}", dir.display())))?;

        let path = policy_path.clone();
        std::thread::spawn(move || {
            let debounce = Duration::from_millis(debounce_ms);
            while rx.recv().is_ok() {
                // Let a burst of writes settle, then reload once.
                std::thread::sleep(debounce);
                while rx.try_recv().is_ok() {}

                let started = Instant::now();
                if engine.check_and_reload(&path) {
                    tracing::info!(
                        path = %path.display(),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Policy hot-reloaded"
                    );
                    on_change(&path);
                }
            }
            tracing::debug!("Policy watcher thread exiting");
        });

        tracing::info!(path = %policy_path.display(), "Policy hot-reload watcher started");
        Ok(Self { _watcher: watcher })
    }
}

/// Whether `event` touches `target` in a way that may change its content.
fn is_relevant(event: &Event, target: &Path) -> bool {
    let kind_matters = matches!(
        event.kind,
        EventKind::Modify(_) | EventKind::Create(_)
    );
    let file_name = target.file_name();
    kind_matters
        && event
            .paths
            .iter()
            .any(|p| p == target || (file_name.is_some() && p.file_name() == file_name))
}
