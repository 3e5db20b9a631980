use super::{Planner, RecoveryRequest, TransformRequest, ValidationRequest};
use crate::error::Result;
use crate::extract::IssueKind;
use crate::pipeline::{FillStrategy, Rule, Step};
use crate::table::ColumnKind;
use async_trait::async_trait;

/// Column-name fragments for quantities that cannot be negative.
const NON_NEGATIVE_HINTS: &[&str] = &[
    "amount", "count", "distance", "fare", "fee", "price", "qty", "quantity", "tip", "toll",
    "total",
];

/// Offline planner driven by the schema profile.
///
/// Converts likely date-time and mixed-type text columns, fills nulls by
/// column kind, removes negatives from quantity-like columns and drops
/// duplicate rows. It never renames or derives columns.
#[derive(Debug, Clone, Default)]
pub struct HeuristicPlanner;

impl HeuristicPlanner {
    fn is_quantity(column: &str) -> bool {
        let lower = column.to_lowercase();
        NON_NEGATIVE_HINTS.iter().any(|hint| lower.contains(hint))
    }

    fn steps(request: &TransformRequest<'_>) -> Vec<Step> {
        let schema = request.schema;
        let mut steps = Vec::new();
        let mut numeric_after: Vec<&str> = Vec::new();

        for column in &schema.columns {
            if column.potential_datetime {
                steps.push(Step::ConvertDatetime {
                    column: column.name.clone(),
                    format: None,
                });
            }
        }
        for issue in schema.issues_for(IssueKind::MixedTypes) {
            steps.push(Step::ConvertNumeric {
                column: issue.column.clone(),
            });
            numeric_after.push(&issue.column);
        }

        for issue in schema.issues_for(IssueKind::NullValues) {
            let Some(column) = schema.column(&issue.column) else {
                continue;
            };
            let strategy = if column.potential_datetime || column.kind == ColumnKind::Timestamp {
                FillStrategy::ForwardFill
            } else if column.kind.is_numeric() || numeric_after.contains(&column.name.as_str()) {
                FillStrategy::Median
            } else {
                FillStrategy::Mode
            };
            steps.push(Step::FillNull {
                column: column.name.clone(),
                strategy,
                value: None,
            });
        }

        let mut negatives: Vec<String> = schema
            .issues_for(IssueKind::NegativeValues)
            .filter(|issue| Self::is_quantity(&issue.column))
            .map(|issue| issue.column.clone())
            .collect();
        for rule in request.failed_rules {
            if let Rule::Positive { column } = rule
                && !negatives.contains(column)
            {
                negatives.push(column.clone());
            }
        }
        steps.extend(
            negatives
                .into_iter()
                .map(|column| Step::RemoveNegative { column }),
        );

        steps.push(Step::RemoveDuplicates { subset: None });
        steps
    }

    fn rules(applied_steps: &[Step]) -> Vec<Rule> {
        let mut rules = Vec::new();
        for step in applied_steps {
            let rule = match step {
                Step::FillNull { column, .. } => Rule::NotNull {
                    column: column.clone(),
                },
                Step::RemoveNegative { column } => Rule::Positive {
                    column: column.clone(),
                },
                _ => continue,
            };
            if !rules.contains(&rule) {
                rules.push(rule);
            }
        }
        rules.push(Rule::RowCountAtLeast { min: 1 });
        rules
    }
}

fn to_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

#[async_trait]
impl Planner for HeuristicPlanner {
    async fn plan_transform(&self, request: &TransformRequest<'_>) -> Result<String> {
        to_json(&Self::steps(request))
    }

    async fn plan_validation(&self, request: &ValidationRequest<'_>) -> Result<String> {
        to_json(&Self::rules(request.applied_steps))
    }

    /// Retries the prior plan without column-changing steps; sink and source
    /// failures are not fixable by replanning.
    async fn recover(&self, request: &RecoveryRequest<'_>) -> Result<String> {
        if matches!(request.failed_state, "extract" | "load") {
            return to_json(&serde_json::json!({
                "unrecoverable": true,
                "reason": format!("{} errors cannot be fixed by replanning", request.failed_state),
            }));
        }

        let safer: Vec<&Step> = request
            .prior_plan
            .iter()
            .filter(|step| {
                !matches!(
                    step,
                    Step::RenameColumn { .. } | Step::AddDerivedColumn { .. } | Step::FilterRows { .. }
                )
            })
            .collect();
        if safer.is_empty() {
            return to_json(&serde_json::json!({
                "unrecoverable": true,
                "reason": "no steps left to retry",
            }));
        }
        to_json(&safer)
    }

    fn name(&self) -> &str {
        "heuristic"
    }
}
