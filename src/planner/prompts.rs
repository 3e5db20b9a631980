//! Prompt text for chat-model planners.

use super::{RecoveryRequest, TransformRequest, ValidationRequest};
use crate::pipeline::derive::{DERIVED_COLUMNS, ROW_FILTERS};

pub const SYSTEM_PROMPT: &str = "You are a careful data engineer planning steps of an ETL \
pipeline. You only ever answer with the JSON requested, without commentary.";

fn allowlist(ids: impl Iterator<Item = &'static str>) -> String {
    ids.collect::<Vec<_>>().join(", ")
}

pub fn transform_prompt(request: &TransformRequest<'_>) -> String {
    let issues = serde_json::to_string_pretty(&request.schema.issues)
        .unwrap_or_else(|_| "[]".to_owned());
    let instructions = if request.instructions.trim().is_empty() {
        "Clean and prepare the data for analysis"
    } else {
        request.instructions
    };

    let mut prompt = format!(
        r#"Plan the transformations for this dataset.

SCHEMA ANALYSIS:
{summary}

USER INSTRUCTIONS:
{instructions}

DATA QUALITY ISSUES:
{issues}
"#,
        summary = request.schema_summary,
    );

    if !request.failed_rules.is_empty() {
        prompt.push_str("\nTHE PREVIOUS PLAN FAILED THESE REQUIRED CHECKS:\n");
        for rule in request.failed_rules {
            prompt.push_str(&format!("- {rule}\n"));
        }
    }

    prompt.push_str(&format!(
        r#"
Allowed actions (objects keyed by "action"):
- "convert_datetime": column, format (optional chrono format)
- "fill_null": column, strategy (value/mean/median/mode/forward_fill/drop), value (when strategy is "value")
- "remove_negative": column
- "remove_invalid": column, valid_values (list)
- "convert_numeric": column
- "rename_column": column, new_name
- "drop_column": column
- "add_derived_column": new_column, expression (one of: {derived})
- "standardize_text": column, case (lower/upper/title)
- "remove_duplicates": subset (optional list of columns)
- "filter_rows": condition (one of: {filters})

Steps run in order; a renamed column must be referred to by its new name afterwards.
Answer with a JSON array only, for example:
[
  {{"action": "convert_datetime", "column": "pickup_datetime"}},
  {{"action": "fill_null", "column": "passenger_count", "strategy": "median"}},
  {{"action": "remove_negative", "column": "fare_amount"}}
]"#,
        derived = allowlist(DERIVED_COLUMNS.iter().map(|d| d.id)),
        filters = allowlist(ROW_FILTERS.iter().map(|f| f.id)),
    ));
    prompt
}

pub fn validation_prompt(request: &ValidationRequest<'_>) -> String {
    let steps = serde_json::to_string_pretty(request.applied_steps)
        .unwrap_or_else(|_| "[]".to_owned());

    format!(
        r#"Define validation rules for the transformed dataset.

ORIGINAL SCHEMA:
{summary}

TRANSFORMATIONS APPLIED:
{steps}

Allowed rule types (objects keyed by "type"):
- "not_null": column
- "positive": column (required: failing it rejects the data)
- "in_range": column, min, max
- "unique": column
- "row_count": min (required: failing it rejects the data)

Answer with a JSON array only, for example:
[
  {{"type": "not_null", "column": "trip_distance"}},
  {{"type": "positive", "column": "fare_amount"}},
  {{"type": "row_count", "min": 10}}
]"#,
        summary = request.schema_summary,
    )
}

pub fn recovery_prompt(request: &RecoveryRequest<'_>) -> String {
    let plan =
        serde_json::to_string_pretty(request.prior_plan).unwrap_or_else(|_| "[]".to_owned());

    format!(
        r#"An ETL run hit an error.

ERROR:
{error}

FAILED DURING: {state}
RETRY: {retry}

CURRENT TRANSFORMATION PLAN:
{plan}

If a different transformation plan can avoid the error, answer with the corrected
plan as a JSON array of steps using the same actions. If the error cannot be fixed
by changing the plan, answer with:
{{"unrecoverable": true, "reason": "<short explanation>"}}"#,
        error = request.error,
        state = request.failed_state,
        retry = request.retry_count,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::SchemaStats;
    use crate::pipeline::Rule;

    fn stats() -> SchemaStats {
        SchemaStats {
            row_count: 0,
            column_count: 0,
            columns: Vec::new(),
            issues: Vec::new(),
        }
    }

    #[test]
    fn test_transform_prompt_lists_allowlists_and_feedback() {
        let stats = stats();
        let failed = [Rule::Positive {
            column: "fare_amount".to_owned(),
        }];
        let prompt = transform_prompt(&TransformRequest {
            schema: &stats,
            schema_summary: "Total Rows: 0",
            instructions: "",
            failed_rules: &failed,
        });

        assert!(prompt.contains("trip_duration_minutes"));
        assert!(prompt.contains("valid_passengers"));
        assert!(prompt.contains("Clean and prepare the data for analysis"));
        assert!(prompt.contains("- fare_amount should be positive"));
    }

    #[test]
    fn test_recovery_prompt_mentions_verdict_shape() {
        let prompt = recovery_prompt(&RecoveryRequest {
            error: "column 'x' not found",
            failed_state: "plan",
            retry_count: 1,
            prior_plan: &[],
        });
        assert!(prompt.contains("\"unrecoverable\": true"));
        assert!(prompt.contains("FAILED DURING: plan"));
    }
}
