//! `conductor.toml` loading.
//!
//! Every section is optional, so a partial file (or no file at all) is
//! accepted. Relative paths are resolved against the directory holding the
//! config file.

use conductor_core::{ConductorError, ConductorResult};
use conductor_orchestrator::OrchestratorConfig;
use conductor_policy::DEFAULT_DEBOUNCE_MS;
use conductor_store::{FileStateStore, InMemoryStateStore, StateStore};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// File looked up in the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "conductor.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConductorConfig {
    pub orchestrator: OrchestratorConfig,
    pub policy: PolicySection,
    pub store: StoreSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PolicySection {
    /// Policy document (YAML or JSON). No policy means fallback decisions only.
    pub path: Option<PathBuf>,
    /// Reload the document when it changes on disk.
    pub watch: bool,
    pub debounce_ms: u64,
}

impl Default for PolicySection {
    fn default() -> Self {
        Self {
            path: None,
            watch: false,
            debounce_ms: DEFAULT_DEBOUNCE_MS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    File,
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    pub backend: StoreBackend,
    pub data_dir: PathBuf,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            data_dir: PathBuf::from("./data"),
        }
    }
}

impl StoreSection {
    /// Open the configured backend.
    pub async fn open(&self) -> ConductorResult<Arc<dyn StateStore>> {
        match self.backend {
            StoreBackend::Memory => Ok(Arc::new(InMemoryStateStore::new())),
            StoreBackend::File => Ok(Arc::new(
                FileStateStore::new(self.data_dir.join("sessions")).await?,
            )),
            StoreBackend::Sqlite => self.open_sqlite().await,
        }
    }

    #[cfg(feature = "sqlite")]
    async fn open_sqlite(&self) -> ConductorResult<Arc<dyn StateStore>> {
        tokio::fs::create_dir_all(&self.data_dir).await?;
        let store = conductor_store::SqliteStateStore::open(&self.data_dir.join("conductor.db"))?;
        Ok(Arc::new(store))
    }

    #[cfg(not(feature = "sqlite"))]
    async fn open_sqlite(&self) -> ConductorResult<Arc<dyn StateStore>> {
        Err(ConductorError::Config(
            "store.backend = \"sqlite\" needs a build with the `sqlite` feature".into(),
        ))
    }
}

impl ConductorConfig {
    /// Make relative paths relative to `base`.
    pub fn resolve_paths(&mut self, base: &Path) {
        if let Some(path) = self.policy.path.take() {
            self.policy.path = Some(resolve(base, path));
        }
        let data_dir = std::mem::take(&mut self.store.data_dir);
        self.store.data_dir = resolve(base, data_dir);
    }
}

fn resolve(base: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}

/// Read and parse a TOML config file.
pub fn parse_config(path: &Path) -> ConductorResult<ConductorConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        ConductorError::Config(format!("Failed to read config '{}': {e}", path.display()))
    })?;
    toml::from_str(&content).map_err(|e| {
        ConductorError::Config(format!("Failed to parse config '{}': {e}", path.display()))
    })
}

/// Load the explicit config file, or `conductor.toml` if present, or defaults.
pub fn load(explicit: Option<&Path>) -> ConductorResult<ConductorConfig> {
    let path = match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => Some(PathBuf::from(DEFAULT_CONFIG_FILE)).filter(|p| p.exists()),
    };
    let mut config = match &path {
        Some(path) => {
            let mut config = parse_config(path)?;
            let base = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            config.resolve_paths(base);
            config
        }
        None => ConductorConfig::default(),
    };
    config.orchestrator.validate()?;
    if config.policy.watch && config.policy.path.is_none() {
        tracing::warn!("policy.watch is set but no policy.path is configured");
        config.policy.watch = false;
    }
    Ok(config)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use conductor_core::FanInMode;
    use std::io::Write;

    #[test]
    fn test_parse_all_sections() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            tmp.as_file_mut(),
            r#"
[orchestrator]
max_iterations = 4
observation_timeout_secs = 30
fan_in = {{ mode = "quorum", threshold = 0.5 }}

[policy]
path = "policies/main.yaml"
watch = true

[store]
backend = "memory"
"#
        )
        .unwrap();

        let config = parse_config(tmp.path()).unwrap();
        assert_eq!(config.orchestrator.max_iterations, 4);
        assert_eq!(config.orchestrator.observation_timeout_secs, 30);
        assert_eq!(config.orchestrator.poll_interval_ms, 100);
        assert_eq!(config.orchestrator.fan_in.mode, FanInMode::Quorum);
        assert!(config.policy.watch);
        assert_eq!(config.policy.debounce_ms, DEFAULT_DEBOUNCE_MS);
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.store.data_dir, PathBuf::from("./data"));
    }

    #[test]
    fn test_empty_config_is_all_defaults() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        writeln!(tmp.as_file_mut()).unwrap();

        let config = parse_config(tmp.path()).unwrap();
        assert_eq!(config.orchestrator, OrchestratorConfig::default());
        assert!(config.policy.path.is_none());
        assert_eq!(config.store.backend, StoreBackend::File);
    }

    #[test]
    fn test_invalid_toml_and_missing_file() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        writeln!(tmp.as_file_mut(), "{{{{invalid toml!!!!").unwrap();
        let err = parse_config(tmp.path()).unwrap_err().to_string();
        assert!(err.contains("Failed to parse config"), "unexpected error: {err}");

        let err = parse_config(Path::new("/nonexistent/conductor.toml"))
            .unwrap_err()
            .to_string();
        assert!(err.contains("Failed to read config"), "unexpected error: {err}");
    }

    #[test]
    fn test_load_resolves_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conductor.toml");
        std::fs::write(
            &path,
            "[policy]\npath = \"policy.yaml\"\n[store]\ndata_dir = \"state\"\n",
        )
        .unwrap();

        let config = load(Some(&path)).unwrap();
        assert_eq!(config.policy.path, Some(dir.path().join("policy.yaml")));
        assert_eq!(config.store.data_dir, dir.path().join("state"));
    }

    #[test]
    fn test_load_rejects_invalid_orchestrator_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conductor.toml");
        std::fs::write(&path, "[orchestrator]\nmax_iterations = 0\n").unwrap();
        assert!(load(Some(&path)).is_err());
    }

    #[tokio::test]
    async fn test_open_backends() {
        let dir = tempfile::tempdir().unwrap();
        let file = StoreSection {
            backend: StoreBackend::File,
            data_dir: dir.path().to_path_buf(),
        };
        let store = file.open().await.unwrap();
        assert!(store.list_sessions().await.unwrap().is_empty());
        assert!(dir.path().join("sessions").is_dir());

        let memory = StoreSection {
            backend: StoreBackend::Memory,
            ..StoreSection::default()
        };
        assert!(memory.open().await.is_ok());
    }

    #[cfg(not(feature = "sqlite"))]
    #[tokio::test]
    async fn test_sqlite_needs_feature() {
        let section = StoreSection {
            backend: StoreBackend::Sqlite,
            ..StoreSection::default()
        };
        let err = section.open().await.err().unwrap().to_string();
        assert!(err.contains("sqlite"));
    }
}
