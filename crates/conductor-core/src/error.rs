use thiserror::Error;

/// A convenience `Result` alias using [`ConductorError`].
pub type ConductorResult<T> = Result<T, ConductorError>;

/// Top-level error type for the Conductor workspace.
///
/// Each variant corresponds to a subsystem that can produce errors.
#[derive(Error, Debug)]
pub enum ConductorError {
    /// A policy document or configuration file is missing or invalid.
    #[error("Config error: {0}")]
    Config(String),

    /// A persistence backend failed to read or write a record.
    #[error("Store error: {0}")]
    Store(String),

    /// A record with the same key was already persisted.
    #[error("Duplicate record: {0}")]
    Duplicate(String),

    /// A message bus operation failed (including subscriber failures).
    #[error("Bus error: {0}")]
    Bus(String),

    /// An external collaborator (classifier, planner, dispatcher) failed.
    #[error("Collaborator error: {0}")]
    Collaborator(String),

    /// A policy rule could not be compiled or evaluated.
    #[error("Policy error: {0}")]
    Policy(String),

    /// An error from the orchestration loop itself.
    #[error("Orchestrator error: {0}")]
    Orchestrator(String),

    /// A requested record does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A YAML deserialization error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ConductorError::Duplicate("s1/0/awareness".into());
        assert_eq!(err.to_string(), "Duplicate record: s1/0/awareness");
    }

    #[test]
    fn test_json_error_conversion() {
        let parse: Result<serde_json::Value, _> = serde_json::from_str("{not json");
        let err: ConductorError = parse.unwrap_err().into();
        assert!(matches!(err, ConductorError::Json(_)));
    }
}
