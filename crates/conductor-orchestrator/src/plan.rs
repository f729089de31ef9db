use conductor_core::{ConductorError, ConductorResult, PlanStep};
use std::collections::HashMap;

/// Deterministic task id for a step in a given iteration.
///
/// The iteration is part of the id so a retried step never picks up the
/// result of its previous attempt.
pub fn task_id_for(session_id: &str, iteration: u32, step_id: &str) -> String {
    format!("{session_id}-i{iteration}-{step_id}")
}

/// Reject plans the loop cannot delegate: duplicate step ids, dependencies
/// on unknown steps, or dependency cycles.
pub fn validate_plan(steps: &[PlanStep]) -> ConductorResult<()> {
    let mut index: HashMap<&str, &PlanStep> = HashMap::with_capacity(steps.len());
    for step in steps {
        if index.insert(step.step_id.as_str(), step).is_some() {
            return Err(ConductorError::Collaborator(format!(
                "Duplicate plan step id '{}'",
                step.step_id
            )));
        }
    }
    for step in steps {
        if let Some(missing) = step
            .dependencies
            .iter()
            .find(|dep| !index.contains_key(dep.as_str()))
        {
            return Err(ConductorError::Collaborator(format!(
                "Step '{}' depends on unknown step '{missing}'",
                step.step_id
            )));
        }
    }

    let mut visited: HashMap<&str, u8> = HashMap::new();
    for step in steps {
        if has_cycle(step.step_id.as_str(), &index, &mut visited) {
            return Err(ConductorError::Collaborator(format!(
                "Dependency cycle through step '{}'",
                step.step_id
            )));
        }
    }
    Ok(())
}

fn has_cycle<'a>(
    id: &'a str,
    index: &HashMap<&'a str, &'a PlanStep>,
    visited: &mut HashMap<&'a str, u8>,
) -> bool {
    match visited.get(id) {
        Some(1) => return true,  // back edge
        Some(2) => return false, // finished
        _ => {}
    }
    visited.insert(id, 1);
    if let Some(&step) = index.get(id) {
        for dep in &step.dependencies {
            if has_cycle(dep.as_str(), index, visited) {
                return true;
            }
        }
    }
    visited.insert(id, 2);
    false
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn step(id: &str, deps: &[&str]) -> PlanStep {
        PlanStep::new(id, "x", "executor")
            .with_dependencies(deps.iter().map(|d| (*d).to_string()).collect())
    }

    #[test]
    fn test_task_id_includes_iteration() {
        assert_eq!(task_id_for("s1", 0, "step-1"), "s1-i0-step-1");
        assert_ne!(task_id_for("s1", 0, "a"), task_id_for("s1", 1, "a"));
    }

    #[test]
    fn test_chain_is_valid() {
        validate_plan(&[step("a", &[]), step("b", &["a"]), step("c", &["a", "b"])]).unwrap();
    }

    #[test]
    fn test_cycle_rejected() {
        let err = validate_plan(&[step("a", &["b"]), step("b", &["a"])]).unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_unknown_dependency_and_duplicates_rejected() {
        assert!(validate_plan(&[step("a", &["ghost"])]).is_err());
        assert!(validate_plan(&[step("a", &[]), step("a", &[])]).is_err());
    }
}
