//! Validation engine.
//!
//! Evaluates rules against a table and produces one check per rule, in order.
//! The table is valid iff no hard rule failed.

use super::rule::Rule;
use crate::error::Result;
use crate::table::{Table, find_column, float_values, negative_count, text_values};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Outcome of one rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationCheck {
    /// What the rule expects, e.g. `fare_amount should be positive`
    pub rule: String,
    pub passed: bool,
    pub details: String,
    pub hard: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub checks: Vec<ValidationCheck>,
    /// Soft failures
    pub warnings: Vec<String>,
    /// Hard failures
    pub errors: Vec<String>,
}

impl ValidationReport {
    pub fn summary(&self) -> String {
        let passed = self.checks.iter().filter(|c| c.passed).count();
        format!(
            "{}: {passed}/{} checks passed, {} errors, {} warnings",
            if self.valid { "Valid" } else { "Invalid" },
            self.checks.len(),
            self.errors.len(),
            self.warnings.len()
        )
    }
}

/// Evaluate `rules` against `table`. Never fails as a whole.
pub fn evaluate(table: &Table, rules: &[Rule]) -> ValidationReport {
    let mut report = ValidationReport {
        valid: true,
        ..Default::default()
    };

    for rule in rules {
        let (passed, details, message) = match check_rule(table, rule) {
            Ok(outcome) => outcome,
            Err(err) => (false, err.to_string(), format!("{rule}: {err}")),
        };

        if !passed {
            if rule.is_hard() {
                report.valid = false;
                report.errors.push(message);
            } else {
                report.warnings.push(message);
            }
        }

        report.checks.push(ValidationCheck {
            rule: rule.description(),
            passed,
            details,
            hard: rule.is_hard(),
        });
    }

    tracing::debug!("{}", report.summary());
    report
}

/// `(passed, details, failure message)`
fn check_rule(table: &Table, rule: &Rule) -> Result<(bool, String, String)> {
    if let Rule::RowCountAtLeast { min } = rule {
        let rows = table.height();
        return Ok((
            rows >= *min,
            format!("Current row count: {rows}"),
            format!("Row count {rows} is below minimum {min}"),
        ));
    }

    let Some(column) = rule.column() else {
        return Ok((true, String::new(), String::new()));
    };
    let Some(series) = find_column(table, column) else {
        return Ok((
            false,
            format!("Column '{column}' not found"),
            format!("Column {column} not found"),
        ));
    };

    let outcome = match rule {
        Rule::NotNull { .. } => {
            let nulls = series.null_count();
            (
                nulls == 0,
                format!("Found {nulls} null values"),
                format!("Column {column} still has {nulls} null values"),
            )
        }
        Rule::Positive { .. } => {
            let negatives = negative_count(series)?;
            (
                negatives == 0,
                format!("Found {negatives} negative values"),
                format!("Column {column} has {negatives} negative values"),
            )
        }
        Rule::InRange { min, max, .. } => {
            let out_of_range = float_values(series)?
                .into_iter()
                .flatten()
                .filter(|v| v < min || v > max)
                .count();
            (
                out_of_range == 0,
                format!("Found {out_of_range} out of range values"),
                format!("Column {column} has {out_of_range} values out of range"),
            )
        }
        Rule::Unique { .. } => {
            // Nulls are not values, so a column with nulls is never unique.
            let distinct = text_values(series)?
                .into_iter()
                .flatten()
                .collect::<HashSet<_>>()
                .len();
            let duplicates = table.height().saturating_sub(distinct);
            (
                duplicates == 0,
                format!("Found {duplicates} duplicate values"),
                format!("Column {column} has {duplicates} duplicate values"),
            )
        }
        Rule::RowCountAtLeast { .. } => (true, String::new(), String::new()),
    };
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::prelude::*;

    fn fares() -> Table {
        let fare = Series::new("fare_amount".into(), vec![Some(10.0), Some(-2.0), None, Some(30.0)]);
        let zone = Series::new("zone".into(), vec![Some("a"), Some("b"), Some("a"), None]);
        DataFrame::new(vec![Column::from(fare), Column::from(zone)]).unwrap()
    }

    fn col(name: &str) -> String {
        name.to_owned()
    }

    #[test]
    fn test_empty_rules_are_valid() {
        let report = evaluate(&fares(), &[]);
        assert!(report.valid);
        assert!(report.checks.is_empty());
    }

    #[test]
    fn test_soft_failures_keep_table_valid() {
        let rules = vec![
            Rule::NotNull {
                column: col("fare_amount"),
            },
            Rule::InRange {
                column: col("fare_amount"),
                min: 0.0,
                max: 20.0,
            },
            Rule::Unique { column: col("zone") },
        ];
        let report = evaluate(&fares(), &rules);

        assert!(report.valid);
        assert_eq!(report.warnings.len(), 3);
        assert!(report.errors.is_empty());
        assert_eq!(report.checks[0].details, "Found 1 null values");
        assert_eq!(report.checks[1].details, "Found 2 out of range values");
        assert_eq!(report.checks[2].details, "Found 2 duplicate values");
    }

    #[test]
    fn test_positive_is_hard() {
        let report = evaluate(
            &fares(),
            &[Rule::Positive {
                column: col("fare_amount"),
            }],
        );

        assert!(!report.valid);
        assert_eq!(report.checks[0].rule, "fare_amount should be positive");
        assert_eq!(report.checks[0].details, "Found 1 negative values");
        assert_eq!(report.errors, vec!["Column fare_amount has 1 negative values"]);
    }

    #[test]
    fn test_row_count() {
        let report = evaluate(&fares(), &[Rule::RowCountAtLeast { min: 5 }]);
        assert!(!report.valid);
        assert_eq!(report.checks[0].details, "Current row count: 4");

        let report = evaluate(&fares(), &[Rule::RowCountAtLeast { min: 4 }]);
        assert!(report.valid);
    }

    #[test]
    fn test_short_table_fails_row_count_even_when_positive() {
        let fare = Series::new("fare_amount".into(), vec![1.0; 500]);
        let df = DataFrame::new(vec![Column::from(fare)]).unwrap();
        let rules = vec![
            Rule::Positive {
                column: col("fare_amount"),
            },
            Rule::RowCountAtLeast { min: 1000 },
        ];
        let report = evaluate(&df, &rules);

        assert!(!report.valid);
        assert!(report.checks[0].passed);
        assert_eq!(report.errors, vec!["Row count 500 is below minimum 1000"]);
    }

    #[test]
    fn test_missing_column_fails_check_and_keeps_hardness() {
        let rules = vec![
            Rule::NotNull { column: col("nope") },
            Rule::Positive { column: col("nope") },
        ];
        let report = evaluate(&fares(), &rules);

        assert!(report.checks.iter().all(|c| !c.passed));
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.errors.len(), 1);
        assert!(!report.valid);
    }

    #[test]
    fn test_evaluation_is_pure() {
        let df = fares();
        let rules = vec![Rule::Positive {
            column: col("fare_amount"),
        }];
        assert_eq!(evaluate(&df, &rules), evaluate(&df, &rules));
    }
}
