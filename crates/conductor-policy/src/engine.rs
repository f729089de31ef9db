use crate::context::PolicyContext;
use crate::document::Policy;
use crate::evaluate::EffectivePolicy;
use conductor_core::{ConductorError, ConductorResult};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, info, warn};

/// Turns a policy file into a [`Policy`].
pub trait PolicyParser: Send + Sync {
    fn parse(&self, path: &Path) -> ConductorResult<Policy>;
}

/// Parser choosing YAML or JSON by file extension.
#[derive(Debug, Default, Clone, Copy)]
pub struct FilePolicyParser;

impl PolicyParser for FilePolicyParser {
    fn parse(&self, path: &Path) -> ConductorResult<Policy> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        let yaml = match ext.as_deref() {
            Some("yaml") | Some("yml") => true,
            Some("json") => false,
            _ => {
                return Err(ConductorError::Config(format!(
                    "Unsupported policy format: {}",
                    path.display()
                )))
            }
        };
        let content = std::fs::read_to_string(path).map_err(|e| {
            ConductorError::Config(format!("Failed to read policy '{}': {e}", path.display()))
        })?;
        let parsed = if yaml {
            serde_yaml_ng::from_str(&content).map_err(|e| e.to_string())
        } else {
            serde_json::from_str(&content).map_err(|e| e.to_string())
        };
        parsed.map_err(|e| {
            ConductorError::Config(format!("Failed to parse policy '{}': {e}", path.display()))
        })
    }
}

#[derive(Clone)]
struct LoadedPolicy {
    policy: Arc<Policy>,
    path: Option<PathBuf>,
    modified: Option<SystemTime>,
}

/// Holds the active policy and swaps it atomically on reload.
pub struct PolicyEngine {
    parser: Arc<dyn PolicyParser>,
    current: RwLock<Option<LoadedPolicy>>,
}

impl PolicyEngine {
    /// Engine with no policy loaded; [`evaluate`](Self::evaluate) returns an
    /// empty [`EffectivePolicy`] until one is.
    pub fn new() -> Self {
        Self::with_parser(Arc::new(FilePolicyParser))
    }

    pub fn with_parser(parser: Arc<dyn PolicyParser>) -> Self {
        Self {
            parser,
            current: RwLock::new(None),
        }
    }

    /// Engine serving an in-memory policy that is not backed by a file.
    pub fn with_policy(policy: Policy) -> Self {
        let engine = Self::new();
        engine.set_policy(policy);
        engine
    }

    pub fn set_policy(&self, policy: Policy) {
        *self.current.write() = Some(LoadedPolicy {
            policy: Arc::new(policy),
            path: None,
            modified: None,
        });
    }

    /// Parse `path` unconditionally and make it the active policy.
    pub fn load(&self, path: &Path) -> ConductorResult<Arc<Policy>> {
        let modified = modified_time(path)?;
        let policy = Arc::new(self.parser.parse(path)?);
        *self.current.write() = Some(LoadedPolicy {
            policy: policy.clone(),
            path: Some(path.to_path_buf()),
            modified: Some(modified),
        });
        info!(path = %path.display(), rules = policy.rules.len(), "Policy loaded");
        Ok(policy)
    }

    /// Re-parse `path` only if it changed since the last load; otherwise
    /// return the cached policy.
    pub fn reload(&self, path: &Path) -> ConductorResult<Arc<Policy>> {
        let modified = modified_time(path)?;
        if let Some(loaded) = self.current.read().as_ref() {
            let same_file = loaded.path.as_deref() == Some(path);
            let unchanged = loaded.modified.is_some_and(|m| modified <= m);
            if same_file && unchanged {
                debug!(path = %path.display(), "Policy unchanged");
                return Ok(loaded.policy.clone());
            }
        }
        self.load(path)
    }

    /// Like [`reload`](Self::reload) but never fails: errors are logged and
    /// reported as "no change". Returns `true` when a new policy was swapped in.
    pub fn check_and_reload(&self, path: &Path) -> bool {
        let previous = self.current();
        match self.reload(path) {
            Ok(policy) => previous.map_or(true, |old| !Arc::ptr_eq(&old, &policy)),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Policy reload failed, keeping current policy");
                false
            }
        }
    }

    /// The active policy, if any.
    pub fn current(&self) -> Option<Arc<Policy>> {
        self.current.read().as_ref().map(|l| l.policy.clone())
    }

    /// Path the active policy was loaded from.
    pub fn source_path(&self) -> Option<PathBuf> {
        self.current.read().as_ref().and_then(|l| l.path.clone())
    }

    pub fn evaluate(&self, context: &PolicyContext) -> EffectivePolicy {
        match self.current() {
            Some(policy) => policy.evaluate(context),
            None => EffectivePolicy::default(),
        }
    }
}

impl Default for PolicyEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn modified_time(path: &Path) -> ConductorResult<SystemTime> {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .map_err(|e| {
            ConductorError::Config(format!("Policy file '{}' unavailable: {e}", path.display()))
        })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use conductor_core::DecisionAction;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingParser {
        parses: AtomicUsize,
    }

    impl PolicyParser for CountingParser {
        fn parse(&self, path: &Path) -> ConductorResult<Policy> {
            self.parses.fetch_add(1, Ordering::SeqCst);
            FilePolicyParser.parse(path)
        }
    }

    fn write_policy(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        path
    }

    fn bump_mtime(path: &Path) {
        let file = std::fs::OpenOptions::new().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() + Duration::from_secs(5))
            .unwrap();
    }

    #[test]
    fn test_reload_without_change_returns_cached_policy() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_policy(tmp.path(), "p.yaml", "rules: []\n");
        let parser = Arc::new(CountingParser {
            parses: AtomicUsize::new(0),
        });
        let engine = PolicyEngine::with_parser(parser.clone());

        engine.load(&path).unwrap();
        let first = engine.reload(&path).unwrap();
        let second = engine.reload(&path).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(parser.parses.load(Ordering::SeqCst), 1);
        assert!(!engine.check_and_reload(&path));
    }

    #[test]
    fn test_reload_after_modification_swaps_policy() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_policy(tmp.path(), "p.yaml", "rules: []\n");
        let engine = PolicyEngine::new();
        let before = engine.load(&path).unwrap();

        std::fs::write(&path, "rules: [{name: r, then: {decision: escalate}}]\n").unwrap();
        bump_mtime(&path);

        assert!(engine.check_and_reload(&path));
        let after = engine.current().unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(
            engine
                .evaluate(&PolicyContext::new())
                .decision
                .unwrap()
                .action,
            DecisionAction::Escalate
        );
    }

    #[test]
    fn test_json_policy() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_policy(
            tmp.path(),
            "p.json",
            r#"{"defaults": {"allow": ["x"]}, "rules": []}"#,
        );
        let engine = PolicyEngine::new();
        engine.load(&path).unwrap();
        assert_eq!(engine.evaluate(&PolicyContext::new()).allow, vec!["x"]);
        assert_eq!(engine.source_path().as_deref(), Some(path.as_path()));
    }

    #[test]
    fn test_missing_and_unsupported_files_are_config_errors() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = PolicyEngine::new();
        let missing = engine.load(&tmp.path().join("nope.yaml")).unwrap_err();
        assert!(matches!(missing, ConductorError::Config(_)));

        let toml = write_policy(tmp.path(), "p.toml", "rules = []");
        let unsupported = engine.load(&toml).unwrap_err();
        assert!(matches!(unsupported, ConductorError::Config(_)));
        assert!(unsupported.to_string().contains("Unsupported"));
    }

    #[test]
    fn test_check_and_reload_swallows_errors() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_policy(tmp.path(), "p.yaml", "rules: []\n");
        let engine = PolicyEngine::new();
        let loaded = engine.load(&path).unwrap();

        std::fs::write(&path, "rules: [{name: bad, when: {x: {lt: nope}}}]\n").unwrap();
        bump_mtime(&path);
        assert!(!engine.check_and_reload(&path));
        assert!(Arc::ptr_eq(&loaded, &engine.current().unwrap()));

        std::fs::remove_file(&path).unwrap();
        assert!(!engine.check_and_reload(&path));
    }

    #[test]
    fn test_no_policy_yields_empty_effective_policy() {
        let engine = PolicyEngine::new();
        assert_eq!(
            engine.evaluate(&PolicyContext::new()),
            EffectivePolicy::default()
        );
    }
}
