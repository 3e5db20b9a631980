//! Schema and data-quality profiling.
//!
//! Produces [`SchemaStats`]: per-column statistics, detected quality issues and
//! a human-readable summary that planners reason over.

use crate::error::Result;
use crate::table::{
    ColumnKind, Table, float_values, negative_count, parse_timestamp_millis, text_values,
};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Number of leading values sampled when looking for date-time text.
const DATETIME_SAMPLE: usize = 5;
const SAMPLE_VALUES: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnProfile {
    pub name: String,
    pub kind: ColumnKind,
    /// Physical dtype as reported by polars
    pub dtype: String,
    pub non_null_count: usize,
    pub null_count: usize,
    pub null_percentage: f64,
    pub unique_count: usize,
    pub sample_values: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mean: Option<f64>,
    /// Text column whose leading values all parse as date-times
    #[serde(default)]
    pub potential_datetime: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    NegativeValues,
    MixedTypes,
    NullValues,
    LikelyDatetime,
}

impl IssueKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NegativeValues => "negative_values",
            Self::MixedTypes => "mixed_types",
            Self::NullValues => "null_values",
            Self::LikelyDatetime => "likely_datetime",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityIssue {
    pub column: String,
    pub issue: IssueKind,
    pub description: String,
    pub affected_rows: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sample_invalid: Vec<String>,
}

/// Schema summary and statistics for one table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaStats {
    pub row_count: usize,
    pub column_count: usize,
    pub columns: Vec<ColumnProfile>,
    pub issues: Vec<QualityIssue>,
}

impl SchemaStats {
    pub fn column(&self, name: &str) -> Option<&ColumnProfile> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn issues_for(&self, kind: IssueKind) -> impl Iterator<Item = &QualityIssue> {
        self.issues.iter().filter(move |issue| issue.issue == kind)
    }

    /// Human-readable summary fed to planners.
    pub fn summary(&self) -> String {
        let mut lines = vec![
            "DATA SCHEMA ANALYSIS".to_owned(),
            "=".repeat(50),
            format!("Total Rows: {}", self.row_count),
            format!("Total Columns: {}", self.column_count),
            String::new(),
            "COLUMN DETAILS:".to_owned(),
            "-".repeat(50),
        ];

        for column in &self.columns {
            lines.push(format!("\n  [{}]", column.name));
            lines.push(format!("    Type: {} ({})", column.kind, column.dtype));
            lines.push(format!(
                "    Non-null: {} | Null: {} ({:.2}%)",
                column.non_null_count, column.null_count, column.null_percentage
            ));
            lines.push(format!("    Unique values: {}", column.unique_count));
            let sample: Vec<&str> = column.sample_values.iter().take(2).map(String::as_str).collect();
            lines.push(format!("    Sample: {sample:?}"));
            if column.potential_datetime {
                lines.push("    Potential datetime column (currently text)".to_owned());
            }
            if let (Some(min), Some(max)) = (column.min, column.max) {
                let mean = column.mean.map_or_else(|| "n/a".to_owned(), |m| format!("{m:.2}"));
                lines.push(format!("    Range: [{min} - {max}], Mean: {mean}"));
            }
        }

        if !self.issues.is_empty() {
            lines.push(String::new());
            lines.push("DATA QUALITY ISSUES DETECTED:".to_owned());
            lines.push("-".repeat(50));
            for issue in &self.issues {
                lines.push(format!("  - {}: {}", issue.column, issue.issue.as_str()));
                lines.push(format!("    {}", issue.description));
                lines.push(format!("    Affected rows: {}", issue.affected_rows));
            }
        }

        lines.join("\n")
    }
}

/// Profile every column of `table`.
pub fn describe(table: &Table) -> Result<SchemaStats> {
    let rows = table.height();
    let mut columns = Vec::with_capacity(table.width());
    let mut issues = Vec::new();

    for column in table.get_columns() {
        let series = column.as_materialized_series();
        let name = series.name().to_string();
        let kind = ColumnKind::from_dtype(series.dtype());
        let null_count = series.null_count();
        let texts = text_values(series)?;
        let present: Vec<&str> = texts.iter().flatten().map(String::as_str).collect();

        let null_percentage = if rows == 0 {
            0.0
        } else {
            (null_count as f64 / rows as f64 * 10_000.0).round() / 100.0
        };

        let mut profile = ColumnProfile {
            name: name.clone(),
            kind,
            dtype: series.dtype().to_string(),
            non_null_count: rows - null_count,
            null_count,
            null_percentage,
            unique_count: present.iter().collect::<HashSet<_>>().len(),
            sample_values: present.iter().take(SAMPLE_VALUES).map(|v| (*v).to_owned()).collect(),
            min: None,
            max: None,
            mean: None,
            potential_datetime: false,
        };

        if kind.is_numeric() {
            let values: Vec<f64> = float_values(series)?.into_iter().flatten().collect();
            if !values.is_empty() {
                profile.min = values.iter().copied().reduce(f64::min);
                profile.max = values.iter().copied().reduce(f64::max);
                let mean = values.iter().sum::<f64>() / values.len() as f64;
                profile.mean = Some((mean * 100.0).round() / 100.0);
            }

            let negatives = negative_count(series)?;
            if negatives > 0 {
                issues.push(QualityIssue {
                    column: name.clone(),
                    issue: IssueKind::NegativeValues,
                    description: format!(
                        "Column '{name}' contains negative values which may be invalid"
                    ),
                    affected_rows: negatives,
                    sample_invalid: Vec::new(),
                });
            }
        }

        if kind == ColumnKind::Text {
            let (numeric, non_numeric): (Vec<&str>, Vec<&str>) = present
                .iter()
                .copied()
                .partition(|v| v.trim().parse::<f64>().is_ok());
            if !numeric.is_empty() && !non_numeric.is_empty() {
                issues.push(QualityIssue {
                    column: name.clone(),
                    issue: IssueKind::MixedTypes,
                    description: format!(
                        "Column '{name}' contains non-numeric values in a potentially numeric field"
                    ),
                    affected_rows: non_numeric.len(),
                    sample_invalid: non_numeric
                        .iter()
                        .take(SAMPLE_VALUES)
                        .map(|v| (*v).to_owned())
                        .collect(),
                });
            }

            let sample: Vec<&str> = present.iter().copied().take(DATETIME_SAMPLE).collect();
            profile.potential_datetime = !sample.is_empty()
                && sample.iter().all(|v| {
                    v.trim().parse::<f64>().is_err() && parse_timestamp_millis(v, None).is_some()
                });
            if profile.potential_datetime {
                issues.push(QualityIssue {
                    column: name.clone(),
                    issue: IssueKind::LikelyDatetime,
                    description: format!("Column '{name}' holds date-time text"),
                    affected_rows: present.len(),
                    sample_invalid: Vec::new(),
                });
            }
        }

        if null_count > 0 {
            issues.push(QualityIssue {
                column: name.clone(),
                issue: IssueKind::NullValues,
                description: format!("Column '{name}' has {null_percentage}% null values"),
                affected_rows: null_count,
                sample_invalid: Vec::new(),
            });
        }

        columns.push(profile);
    }

    Ok(SchemaStats {
        row_count: rows,
        column_count: table.width(),
        columns,
        issues,
    })
}
