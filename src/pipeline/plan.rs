//! Parsing of planner output.
//!
//! Planner text is untrusted. Only a JSON array of objects (for steps and
//! rules) or a JSON object (for recovery verdicts) is accepted, possibly
//! wrapped in prose or a code fence. Every element must match the closed step
//! or rule set; a single bad element rejects the whole plan.
//!
//! [`lint_steps`] is advisory: it simulates column changes through a plan and
//! reports references that will fail at execution, without rejecting anything.

use super::rule::Rule;
use super::step::Step;
use crate::error::{DatamuleError, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashSet;

/// Outcome of a recovery request
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryPlan {
    /// Replacement transformation plan
    Corrected(Vec<Step>),
    /// The planner judged the error unrecoverable
    Unrecoverable(String),
}

/// Parse planner text into transformation steps.
pub fn parse_steps(raw: &str) -> Result<Vec<Step>> {
    let steps: Vec<Step> = parse_array(raw, "step")?;
    check_steps(&steps)?;
    Ok(steps)
}

fn check_steps(steps: &[Step]) -> Result<()> {
    for (idx, step) in steps.iter().enumerate() {
        step.check()
            .map_err(|msg| DatamuleError::PlanParse(format!("step {}: {msg}", idx + 1)))?;
    }
    Ok(())
}

/// Parse planner text into validation rules.
pub fn parse_rules(raw: &str) -> Result<Vec<Rule>> {
    let rules: Vec<Rule> = parse_array(raw, "rule")?;
    for (idx, rule) in rules.iter().enumerate() {
        rule.check()
            .map_err(|msg| DatamuleError::PlanParse(format!("rule {}: {msg}", idx + 1)))?;
    }
    Ok(rules)
}

/// Parse a recovery response.
///
/// An object whose `unrecoverable` field is `true` or a truthy string
/// (`"true"`, `"yes"`), or whose `recoverable` field is `false`,
/// is a verdict; an object carrying `steps`/`plan`, or a bare array, is a
/// corrected plan.
pub fn parse_recovery(raw: &str) -> Result<RecoveryPlan> {
    let object_start = raw.find('{');
    let array_start = raw.find('[');

    let prefers_object = match (object_start, array_start) {
        (Some(obj), Some(arr)) => obj < arr,
        (Some(_), None) => true,
        (None, _) => false,
    };

    if !prefers_object {
        return parse_steps(raw).map(RecoveryPlan::Corrected);
    }

    let slice = json_slice(raw, '{', '}')
        .ok_or_else(|| DatamuleError::PlanParse("no JSON object in recovery response".to_owned()))?;
    let object: serde_json::Map<String, Value> = serde_json::from_str(slice)
        .map_err(|e| DatamuleError::PlanParse(format!("invalid recovery JSON: {e}")))?;

    let unrecoverable = object
        .get("unrecoverable")
        .is_some_and(is_truthy)
        || object.get("recoverable").and_then(Value::as_bool) == Some(false);

    if unrecoverable {
        let reason = object
            .get("reason")
            .or_else(|| object.get("error"))
            .and_then(Value::as_str)
            .unwrap_or("planner declared the error unrecoverable")
            .to_owned();
        return Ok(RecoveryPlan::Unrecoverable(reason));
    }

    let steps = object
        .get("steps")
        .or_else(|| object.get("plan"))
        .ok_or_else(|| {
            DatamuleError::PlanParse("recovery object has neither steps nor a verdict".to_owned())
        })?;
    let steps: Vec<Step> = decode_elements(steps.clone(), "step")?;
    check_steps(&steps)?;
    Ok(RecoveryPlan::Corrected(steps))
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(flag) => *flag,
        Value::String(text) => matches!(text.trim().to_lowercase().as_str(), "true" | "yes"),
        _ => false,
    }
}

fn parse_array<T: DeserializeOwned>(raw: &str, what: &str) -> Result<Vec<T>> {
    let slice = json_slice(raw, '[', ']')
        .ok_or_else(|| DatamuleError::PlanParse(format!("no JSON array of {what}s found")))?;
    let value: Value = serde_json::from_str(slice)
        .map_err(|e| DatamuleError::PlanParse(format!("invalid JSON: {e}")))?;
    decode_elements(value, what)
}

fn decode_elements<T: DeserializeOwned>(value: Value, what: &str) -> Result<Vec<T>> {
    let Value::Array(elements) = value else {
        return Err(DatamuleError::PlanParse(format!("expected an array of {what}s")));
    };

    elements
        .into_iter()
        .enumerate()
        .map(|(idx, element)| {
            if !element.is_object() {
                return Err(DatamuleError::PlanParse(format!(
                    "{what} {} is not an object",
                    idx + 1
                )));
            }
            serde_json::from_value(element)
                .map_err(|e| DatamuleError::PlanParse(format!("{what} {}: {e}", idx + 1)))
        })
        .collect()
}

/// Text between the first `open` and the last `close`, inclusive.
fn json_slice(raw: &str, open: char, close: char) -> Option<&str> {
    let start = raw.find(open)?;
    let end = raw.rfind(close)?;
    (end > start).then(|| &raw[start..=end])
}

/// Advisory finding about a plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanWarning {
    pub step_index: usize,
    pub message: String,
}

impl std::fmt::Display for PlanWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Step {}: {}", self.step_index + 1, self.message)
    }
}

/// Track columns through a plan and flag references to columns that will not exist.
pub fn lint_steps(steps: &[Step], columns: &[String]) -> Vec<PlanWarning> {
    let mut current: HashSet<String> = columns.iter().cloned().collect();
    let mut warnings = Vec::new();

    for (idx, step) in steps.iter().enumerate() {
        let mut missing = |column: &str, current: &HashSet<String>| {
            if !current.contains(column) {
                warnings.push(PlanWarning {
                    step_index: idx,
                    message: format!("{} references missing column '{column}'", step.action()),
                });
            }
        };

        match step {
            Step::RenameColumn { column, new_name } => {
                missing(column, &current);
                if current.remove(column) {
                    current.insert(new_name.clone());
                }
            }
            Step::DropColumn { column } => {
                missing(column, &current);
                current.remove(column);
            }
            Step::AddDerivedColumn { new_column, .. } => {
                current.insert(new_column.clone());
            }
            Step::RemoveDuplicates {
                subset: Some(subset),
            } => {
                for column in subset {
                    missing(column, &current);
                }
            }
            Step::RemoveDuplicates { subset: None } | Step::FilterRows { .. } => {}
            other => {
                if let Some(column) = other.column() {
                    missing(column, &current);
                }
            }
        }
    }

    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::step::FillStrategy;

    #[test]
    fn test_parse_steps_from_fenced_prose() {
        let raw = r#"Here is the plan:
```json
[
  {"action": "convert_datetime", "column": "tpep_pickup_datetime"},
  {"action": "fill_null", "column": "passenger_count", "strategy": "median"}
]
```
Let me know if you need anything else."#;

        let steps = parse_steps(raw).unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(
            steps[1],
            Step::FillNull {
                column: "passenger_count".to_owned(),
                strategy: FillStrategy::Median,
                value: None,
            }
        );
    }

    #[test]
    fn test_parse_steps_rejects_unknown_action() {
        let raw = r#"[{"action": "drop_column", "column": "a"}, {"action": "explode", "column": "b"}]"#;
        let err = parse_steps(raw).unwrap_err();
        assert!(matches!(err, DatamuleError::PlanParse(_)));
        assert!(err.to_string().contains("step 2"));
    }

    #[test]
    fn test_parse_steps_rejects_non_json() {
        assert!(parse_steps("I could not come up with a plan").is_err());
        assert!(parse_steps("[not json]").is_err());
        assert!(parse_steps(r#"["drop_column"]"#).is_err());
    }

    #[test]
    fn test_parse_steps_accepts_empty_plan() {
        assert!(parse_steps("[]").unwrap().is_empty());
    }

    #[test]
    fn test_parse_rules() {
        let rules = parse_rules(r#"[{"type": "positive", "column": "fare_amount"}]"#).unwrap();
        assert_eq!(
            rules,
            vec![Rule::Positive {
                column: "fare_amount".to_owned()
            }]
        );
        assert!(parse_rules(r#"[{"type": "in_range", "column": "a", "min": 3, "max": 1}]"#).is_err());
    }

    #[test]
    fn test_parse_recovery_variants() {
        let corrected = parse_recovery(r#"[{"action": "drop_column", "column": "x"}]"#).unwrap();
        assert!(matches!(corrected, RecoveryPlan::Corrected(ref s) if s.len() == 1));

        let wrapped =
            parse_recovery(r#"{"steps": [{"action": "convert_numeric", "column": "x"}]}"#).unwrap();
        assert!(matches!(wrapped, RecoveryPlan::Corrected(ref s) if s.len() == 1));

        let verdict =
            parse_recovery(r#"{"unrecoverable": true, "reason": "source is empty"}"#).unwrap();
        assert_eq!(
            verdict,
            RecoveryPlan::Unrecoverable("source is empty".to_owned())
        );

        assert!(parse_recovery("no idea").is_err());
    }

    #[test]
    fn test_parse_recovery_wrapped_steps_are_checked() {
        let raw = r#"{"steps": [{"action": "drop_column", "column": "x"}, {"action": "fill_null", "column": "y", "strategy": "value"}]}"#;
        let err = parse_recovery(raw).unwrap_err();
        assert!(matches!(err, DatamuleError::PlanParse(_)));
        assert!(err.to_string().contains("step 2"));
    }

    #[test]
    fn test_unrecoverable_flag_must_be_truthy() {
        let raw = r#"{"unrecoverable": "false", "steps": [{"action": "drop_column", "column": "x"}]}"#;
        assert!(matches!(
            parse_recovery(raw).unwrap(),
            RecoveryPlan::Corrected(ref s) if s.len() == 1
        ));

        let raw = r#"{"unrecoverable": 0, "steps": []}"#;
        assert_eq!(parse_recovery(raw).unwrap(), RecoveryPlan::Corrected(vec![]));

        let raw = r#"{"unrecoverable": "true", "reason": "schema is gone"}"#;
        assert_eq!(
            parse_recovery(raw).unwrap(),
            RecoveryPlan::Unrecoverable("schema is gone".to_owned())
        );
    }

    #[test]
    fn test_lint_tracks_renames() {
        let steps = vec![
            Step::RenameColumn {
                column: "fare".to_owned(),
                new_name: "fare_amount".to_owned(),
            },
            Step::RemoveNegative {
                column: "fare".to_owned(),
            },
            Step::RemoveNegative {
                column: "fare_amount".to_owned(),
            },
        ];

        let warnings = lint_steps(&steps, &["fare".to_owned()]);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].step_index, 1);
        assert!(warnings[0].to_string().starts_with("Step 2:"));
    }
}
