use conductor_core::{ConductorError, ConductorResult};
use serde_json::Value;
use std::collections::HashSet;

const OPERATORS: [&str; 6] = ["lt", "le", "gt", "ge", "in", "any_issue_type_in"];

/// A compiled `when` clause for one context path.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Literal equality (numbers compare by value, so `1` equals `1.0`).
    Eq(Value),
    Lt(f64),
    Le(f64),
    Gt(f64),
    Ge(f64),
    /// The context value equals one of the listed values.
    In(Vec<Value>),
    /// Some element of a list value carries an `issues[].type` in the set.
    AnyIssueTypeIn(HashSet<String>),
}

impl Condition {
    /// Compile the raw `when` value for `path`.
    ///
    /// An object whose single key is an operator name becomes that operator;
    /// anything else is an equality literal. Operators with an operand of the
    /// wrong shape are rejected.
    pub fn compile(path: &str, raw: &Value) -> ConductorResult<Self> {
        let Value::Object(map) = raw else {
            return Ok(Self::Eq(raw.clone()));
        };
        let ops: Vec<&String> = map.keys().filter(|k| OPERATORS.contains(&k.as_str())).collect();
        if ops.is_empty() {
            return Ok(Self::Eq(raw.clone()));
        }
        if map.len() != 1 {
            return Err(ConductorError::Config(format!(
                "Condition on '{path}' must hold exactly one operator, got {} keys",
                map.len()
            )));
        }
        let op = ops[0].as_str();
        let operand = &map[op];
        let bad = |expected: &str| {
            ConductorError::Config(format!(
                "Operator '{op}' on '{path}' expects {expected}, got {operand}"
            ))
        };
        match op {
            "lt" | "le" | "gt" | "ge" => {
                let n = operand.as_f64().ok_or_else(|| bad("a number"))?;
                Ok(match op {
                    "lt" => Self::Lt(n),
                    "le" => Self::Le(n),
                    "gt" => Self::Gt(n),
                    _ => Self::Ge(n),
                })
            }
            "in" => {
                let items = operand.as_array().ok_or_else(|| bad("a list"))?;
                Ok(Self::In(items.clone()))
            }
            _ => {
                let items = operand.as_array().ok_or_else(|| bad("a list of strings"))?;
                let types = items
                    .iter()
                    .map(|v| v.as_str().map(str::to_string))
                    .collect::<Option<HashSet<_>>>()
                    .ok_or_else(|| bad("a list of strings"))?;
                Ok(Self::AnyIssueTypeIn(types))
            }
        }
    }

    /// Test a resolved context value. `None` means the path did not resolve
    /// and fails every condition, equality with `null` included.
    pub fn matches(&self, value: Option<&Value>) -> bool {
        let Some(value) = value else {
            return false;
        };
        match self {
            Self::Eq(expected) => values_equal(value, expected),
            Self::Lt(n) => value.as_f64().is_some_and(|v| v < *n),
            Self::Le(n) => value.as_f64().is_some_and(|v| v <= *n),
            Self::Gt(n) => value.as_f64().is_some_and(|v| v > *n),
            Self::Ge(n) => value.as_f64().is_some_and(|v| v >= *n),
            Self::In(items) => items.iter().any(|item| values_equal(value, item)),
            Self::AnyIssueTypeIn(types) => value.as_array().is_some_and(|entries| {
                entries
                    .iter()
                    .filter_map(|entry| entry.get("issues").and_then(Value::as_array))
                    .flatten()
                    .filter_map(|issue| issue.get("type").and_then(Value::as_str))
                    .any(|kind| types.contains(kind))
            }),
        }
    }
}

/// Walk a dot-separated path through nested objects (and list indexes).
pub fn resolve<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(root, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_literal_and_numeric_equality() {
        let c = Condition::compile("x", &json!(1)).unwrap();
        assert!(c.matches(Some(&json!(1.0))));
        assert!(!c.matches(Some(&json!("1"))));

        let obj = Condition::compile("x", &json!({"kind": "a"})).unwrap();
        assert_eq!(obj, Condition::Eq(json!({"kind": "a"})));
    }

    #[test]
    fn test_unresolved_fails_even_null_equality() {
        let c = Condition::compile("x", &Value::Null).unwrap();
        assert!(!c.matches(None));
        assert!(c.matches(Some(&Value::Null)));
    }

    #[test]
    fn test_comparison_operators() {
        let lt = Condition::compile("rate", &json!({"lt": 0.5})).unwrap();
        assert!(lt.matches(Some(&json!(0.2))));
        assert!(!lt.matches(Some(&json!(0.5))));
        assert!(!lt.matches(Some(&json!("0.2"))));

        let ge = Condition::compile("n", &json!({"ge": 3})).unwrap();
        assert!(ge.matches(Some(&json!(3))));
        assert!(!ge.matches(Some(&json!(2))));
    }

    #[test]
    fn test_in_operator() {
        let c = Condition::compile("risk", &json!({"in": ["high", "critical"]})).unwrap();
        assert!(c.matches(Some(&json!("high"))));
        assert!(!c.matches(Some(&json!("low"))));
    }

    #[test]
    fn test_any_issue_type_in() {
        let c = Condition::compile("obs", &json!({"any_issue_type_in": ["security"]})).unwrap();
        let observations = json!([
            {"task_id": "a", "issues": []},
            {"task_id": "b", "issues": [{"type": "lint"}, {"type": "security"}]}
        ]);
        assert!(c.matches(Some(&observations)));
        assert!(!c.matches(Some(&json!([{"issues": [{"type": "lint"}]}]))));
        assert!(!c.matches(Some(&json!("security"))));
    }

    #[test]
    fn test_ill_typed_operands_rejected() {
        for raw in [
            json!({"lt": "high"}),
            json!({"in": "a"}),
            json!({"any_issue_type_in": [1, 2]}),
            json!({"lt": 1, "gt": 0}),
        ] {
            let err = Condition::compile("p", &raw).unwrap_err();
            assert!(matches!(err, ConductorError::Config(_)), "{raw}");
        }
    }

    #[test]
    fn test_resolve_paths() {
        let root = json!({"a": {"b": [10, {"c": true}]}});
        assert_eq!(resolve(&root, "a.b.0"), Some(&json!(10)));
        assert_eq!(resolve(&root, "a.b.1.c"), Some(&json!(true)));
        assert_eq!(resolve(&root, "a.missing"), None);
        assert_eq!(resolve(&root, "a.b.x"), None);
    }
}
