//! Transformation engine.
//!
//! Applies a plan to a table step by step. A step that fails leaves the table
//! untouched, is logged, and execution moves on to the next step.

use super::derive::{derived_column, row_filter};
use super::step::{FillStrategy, Step, TextCase};
use crate::error::{DatamuleError, Result};
use crate::table::{
    ColumnKind, Table, column_names, float_values, has_column, parse_timestamp_millis, require_column,
    text_values, timestamp_dtype,
};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

/// Result of one step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepOutcome {
    Success { details: String },
    Failed { error: String },
}

impl StepOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// One entry per step, in plan order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    /// 1-based position in the plan
    pub step: usize,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    #[serde(flatten)]
    pub outcome: StepOutcome,
}

/// Table and log produced by [`apply`]
#[derive(Debug, Clone)]
pub struct TransformOutcome {
    pub table: Table,
    pub log: Vec<ExecutionLogEntry>,
    pub rows_before: usize,
    pub rows_after: usize,
}

impl TransformOutcome {
    pub fn succeeded(&self) -> usize {
        self.log.iter().filter(|e| e.outcome.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.log.len() - self.succeeded()
    }

    /// Multi-line summary of the run, one line per step.
    pub fn summary(&self) -> String {
        let mut lines = vec![
            format!("Original rows: {}", self.rows_before),
            format!("Final rows: {}", self.rows_after),
            format!(
                "Rows affected: {}",
                self.rows_before.abs_diff(self.rows_after)
            ),
        ];
        for entry in &self.log {
            let column = entry.column.as_deref().unwrap_or("N/A");
            match &entry.outcome {
                StepOutcome::Success { details } => {
                    lines.push(format!("  [ok] Step {}: {} on '{column}'", entry.step, entry.action));
                    lines.push(format!("      {details}"));
                }
                StepOutcome::Failed { error } => {
                    lines.push(format!(
                        "  [failed] Step {}: {} on '{column}'",
                        entry.step, entry.action
                    ));
                    lines.push(format!("      Error: {error}"));
                }
            }
        }
        lines.join("\n")
    }
}

/// Apply `steps` in order. Never fails as a whole.
pub fn apply(table: Table, steps: &[Step]) -> TransformOutcome {
    let rows_before = table.height();
    let mut table = table;
    let mut log = Vec::with_capacity(steps.len());

    for (idx, step) in steps.iter().enumerate() {
        let mut next = table.clone();
        let outcome = match apply_step(step, &mut next) {
            Ok(details) => {
                tracing::debug!(step = idx + 1, action = step.action(), "{details}");
                table = next;
                StepOutcome::Success { details }
            }
            Err(err) => {
                let error = match err {
                    DatamuleError::StepExecution(msg) => msg,
                    other => other.to_string(),
                };
                tracing::warn!(step = idx + 1, action = step.action(), "Step failed: {error}");
                StepOutcome::Failed { error }
            }
        };

        log.push(ExecutionLogEntry {
            step: idx + 1,
            action: step.action().to_owned(),
            column: step.column().map(ToOwned::to_owned),
            outcome,
        });
    }

    TransformOutcome {
        rows_after: table.height(),
        table,
        log,
        rows_before,
    }
}

/// Apply one step in place; on error `table` may be partially modified and must be discarded.
fn apply_step(step: &Step, table: &mut Table) -> Result<String> {
    step.check().map_err(DatamuleError::StepExecution)?;

    match step {
        Step::ConvertDatetime { column, format } => {
            convert_datetime(table, column, format.as_deref())
        }
        Step::FillNull {
            column,
            strategy,
            value,
        } => fill_null(table, column, *strategy, value.as_ref()),
        Step::RemoveNegative { column } => remove_negative(table, column),
        Step::RemoveInvalid {
            column,
            valid_values,
        } => remove_invalid(table, column, valid_values),
        Step::ConvertNumeric { column } => convert_numeric(table, column),
        Step::RenameColumn { column, new_name } => {
            require_column(table, column)?;
            if new_name != column && has_column(table, new_name) {
                return Err(step_error(format!(
                    "cannot rename '{column}' to '{new_name}': target already exists"
                )));
            }
            table.rename(column, new_name.as_str().into())?;
            Ok(format!("Renamed '{column}' to '{new_name}'"))
        }
        Step::DropColumn { column } => {
            require_column(table, column)?;
            *table = table.drop(column)?;
            Ok(format!("Dropped column '{column}'"))
        }
        Step::AddDerivedColumn {
            new_column,
            expression,
        } => {
            let id = expression.as_deref().unwrap_or(new_column);
            let derived = derived_column(id)
                .ok_or_else(|| step_error(format!("Unknown derived column: {id}")))?;
            let series = derived.derivation.compute(table, new_column)?;
            table.with_column(series)?;
            Ok(format!("Added derived column '{new_column}'"))
        }
        Step::StandardizeText { column, case } => standardize_text(table, column, *case),
        Step::RemoveDuplicates { subset } => remove_duplicates(table, subset.as_deref()),
        Step::FilterRows { condition } => {
            let filter = row_filter(condition)
                .ok_or_else(|| step_error(format!("Unknown filter condition: {condition}")))?;
            let mask = filter.mask(table)?;
            let removed = retain_rows(table, &mask)?;
            Ok(format!(
                "Filtered out {removed} rows using condition: {condition}"
            ))
        }
    }
}

fn step_error(msg: impl Into<String>) -> DatamuleError {
    DatamuleError::StepExecution(msg.into())
}

/// Keep rows where `mask` is true; returns how many were removed.
fn retain_rows(table: &mut Table, mask: &BooleanChunked) -> Result<usize> {
    let before = table.height();
    *table = table.filter(mask)?;
    Ok(before - table.height())
}

fn convert_datetime(table: &mut Table, column: &str, format: Option<&str>) -> Result<String> {
    let series = require_column(table, column)?;
    let nulls_before = series.null_count();

    let converted = match ColumnKind::from_dtype(series.dtype()) {
        ColumnKind::Timestamp => series.cast(&timestamp_dtype())?,
        ColumnKind::Text | ColumnKind::Dynamic => {
            let millis: Vec<Option<i64>> = text_values(series)?
                .into_iter()
                .map(|value| value.and_then(|raw| parse_timestamp_millis(&raw, format)))
                .collect();
            Series::new(series.name().clone(), millis).cast(&timestamp_dtype())?
        }
        kind => {
            return Err(step_error(format!(
                "cannot convert {kind} column '{column}' to datetime"
            )));
        }
    };

    let new_nulls = converted.null_count().saturating_sub(nulls_before);
    table.replace(column, converted)?;
    Ok(format!(
        "Converted to datetime. New nulls from conversion: {new_nulls}"
    ))
}

fn fill_null(
    table: &mut Table,
    column: &str,
    strategy: FillStrategy,
    value: Option<&Value>,
) -> Result<String> {
    let series = require_column(table, column)?;
    let null_count = series.null_count();
    let kind = ColumnKind::from_dtype(series.dtype());

    let filled = match strategy {
        FillStrategy::Drop => {
            let mask = series.is_not_null();
            retain_rows(table, &mask)?;
            return Ok(format!("Dropped {null_count} rows with null values"));
        }
        FillStrategy::Value => {
            let value = value
                .filter(|v| !v.is_null())
                .ok_or_else(|| step_error("strategy 'value' requires a fill value"))?;
            fill_literal(series, kind, value)?
        }
        FillStrategy::Mean | FillStrategy::Median => {
            if !kind.is_numeric() {
                return Err(step_error(format!(
                    "{} fill requires a numeric column, '{column}' is {kind}",
                    strategy.as_str()
                )));
            }
            let mut values: Vec<f64> = float_values(series)?.into_iter().flatten().collect();
            let stat = if strategy == FillStrategy::Mean {
                mean(&values)
            } else {
                median(&mut values)
            };
            let stat = stat.ok_or_else(|| {
                step_error(format!("column '{column}' has no values to compute a fill from"))
            })?;
            fill_number(series, kind, stat)?
        }
        FillStrategy::Mode => fill_mode(series, kind)?,
        FillStrategy::ForwardFill => series.fill_null(FillNullStrategy::Forward(None))?,
    };

    table.replace(column, filled)?;
    Ok(format!(
        "Filled {null_count} null values using {}",
        strategy.as_str()
    ))
}

fn mean(values: &[f64]) -> Option<f64> {
    (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
}

fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    Some(if values.len().is_multiple_of(2) {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    })
}

/// Most frequent element of a sorted slice; the smallest wins ties.
fn most_common<T: PartialEq + Clone>(sorted: &[T]) -> Option<T> {
    let mut best: Option<(&T, usize)> = None;
    let mut run_start = 0;
    for idx in 1..=sorted.len() {
        if idx == sorted.len() || sorted[idx] != sorted[run_start] {
            let len = idx - run_start;
            if best.is_none_or(|(_, best_len)| len > best_len) {
                best = Some((&sorted[run_start], len));
            }
            run_start = idx;
        }
    }
    best.map(|(value, _)| value.clone())
}

fn fill_mode(series: &Series, kind: ColumnKind) -> Result<Series> {
    let no_mode = || step_error(format!("column '{}' has no values to take a mode from", series.name()));

    match kind {
        ColumnKind::Integer | ColumnKind::Float => {
            let mut values: Vec<f64> = float_values(series)?.into_iter().flatten().collect();
            values.sort_by(f64::total_cmp);
            let mode = most_common(&values).ok_or_else(no_mode)?;
            fill_number(series, kind, mode)
        }
        ColumnKind::Timestamp => {
            let mut values: Vec<i64> = epoch_millis(series)?.into_iter().flatten().collect();
            values.sort_unstable();
            let mode = most_common(&values).ok_or_else(no_mode)?;
            fill_timestamp(series, mode)
        }
        ColumnKind::Boolean => {
            let mut values: Vec<bool> = series.bool()?.into_iter().flatten().collect();
            values.sort_unstable();
            let mode = most_common(&values).ok_or_else(no_mode)?;
            fill_bool(series, mode)
        }
        ColumnKind::Text => {
            let mut values: Vec<String> = text_values(series)?.into_iter().flatten().collect();
            values.sort_unstable();
            let mode = most_common(&values).ok_or_else(no_mode)?;
            fill_text(series, &mode)
        }
        ColumnKind::Dynamic => Err(step_error(format!(
            "cannot take a mode of column '{}' with unresolved type",
            series.name()
        ))),
    }
}

fn fill_literal(series: &Series, kind: ColumnKind, value: &Value) -> Result<Series> {
    match kind {
        ColumnKind::Integer | ColumnKind::Float => {
            let number = value
                .as_f64()
                .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
                .ok_or_else(|| step_error(format!("fill value {value} is not a number")))?;
            fill_number(series, kind, number)
        }
        ColumnKind::Boolean => {
            let flag = value
                .as_bool()
                .ok_or_else(|| step_error(format!("fill value {value} is not a boolean")))?;
            fill_bool(series, flag)
        }
        ColumnKind::Timestamp => {
            let millis = value
                .as_str()
                .and_then(|raw| parse_timestamp_millis(raw, None))
                .ok_or_else(|| step_error(format!("fill value {value} is not a date-time")))?;
            fill_timestamp(series, millis)
        }
        ColumnKind::Text => fill_text(series, &json_text(value)),
        ColumnKind::Dynamic => {
            let text = json_text(value);
            let as_text = series.cast(&DataType::String)?;
            fill_text(&as_text, &text)
        }
    }
}

/// Integer columns stay integer when the fill is integral.
fn fill_number(series: &Series, kind: ColumnKind, value: f64) -> Result<Series> {
    if kind == ColumnKind::Integer && value.fract() == 0.0 {
        let ints = series.cast(&DataType::Int64)?;
        let filled: Int64Chunked = ints
            .i64()?
            .into_iter()
            .map(|v| Some(v.unwrap_or(value as i64)))
            .collect();
        return Ok(filled.with_name(series.name().clone()).into_series());
    }

    let filled: Float64Chunked = float_values(series)?
        .into_iter()
        .map(|v| Some(v.unwrap_or(value)))
        .collect();
    Ok(filled.with_name(series.name().clone()).into_series())
}

fn fill_bool(series: &Series, value: bool) -> Result<Series> {
    let filled: BooleanChunked = series
        .bool()?
        .into_iter()
        .map(|v| Some(v.unwrap_or(value)))
        .collect();
    Ok(filled.with_name(series.name().clone()).into_series())
}

fn fill_text(series: &Series, value: &str) -> Result<Series> {
    let filled: StringChunked = series
        .str()?
        .into_iter()
        .map(|v| Some(v.unwrap_or(value)))
        .collect();
    Ok(filled.with_name(series.name().clone()).into_series())
}

fn fill_timestamp(series: &Series, millis: i64) -> Result<Series> {
    let filled: Int64Chunked = epoch_millis(series)?
        .into_iter()
        .map(|v| Some(v.unwrap_or(millis)))
        .collect();
    Ok(filled
        .with_name(series.name().clone())
        .into_series()
        .cast(&timestamp_dtype())?)
}

fn epoch_millis(series: &Series) -> Result<Vec<Option<i64>>> {
    let ints = series.cast(&timestamp_dtype())?.cast(&DataType::Int64)?;
    Ok(ints.i64()?.into_iter().collect())
}

fn json_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn remove_negative(table: &mut Table, column: &str) -> Result<String> {
    let series = require_column(table, column)?;
    let kind = ColumnKind::from_dtype(series.dtype());
    if !kind.is_numeric() {
        return Err(step_error(format!(
            "remove_negative requires a numeric column, '{column}' is {kind}"
        )));
    }

    let mask: BooleanChunked = float_values(series)?
        .into_iter()
        .map(|v| v.is_none_or(|v| v >= 0.0))
        .collect();
    let removed = retain_rows(table, &mask)?;
    Ok(format!("Removed {removed} rows with negative values"))
}

fn remove_invalid(table: &mut Table, column: &str, valid_values: &[Value]) -> Result<String> {
    let series = require_column(table, column)?;
    let kind = ColumnKind::from_dtype(series.dtype());

    let mask: BooleanChunked = match kind {
        ColumnKind::Integer | ColumnKind::Float => {
            let allowed: Vec<f64> = valid_values.iter().filter_map(Value::as_f64).collect();
            float_values(series)?
                .into_iter()
                .map(|v| v.is_some_and(|v| allowed.contains(&v)))
                .collect()
        }
        ColumnKind::Boolean => {
            let allowed: Vec<bool> = valid_values.iter().filter_map(Value::as_bool).collect();
            series
                .bool()?
                .into_iter()
                .map(|v| v.is_some_and(|v| allowed.contains(&v)))
                .collect()
        }
        _ => {
            let allowed: HashSet<String> = valid_values.iter().map(json_text).collect();
            text_values(series)?
                .into_iter()
                .map(|v| v.is_some_and(|v| allowed.contains(&v)))
                .collect()
        }
    };

    let removed = retain_rows(table, &mask)?;
    Ok(format!("Removed {removed} rows with invalid values"))
}

fn convert_numeric(table: &mut Table, column: &str) -> Result<String> {
    let series = require_column(table, column)?;
    let before = ColumnKind::from_dtype(series.dtype());
    let nulls_before = series.null_count();

    let floats = match before {
        ColumnKind::Integer | ColumnKind::Float => {
            return Ok(format!("Converted from {before} to {before}"));
        }
        ColumnKind::Timestamp => {
            return Err(step_error(format!(
                "cannot convert timestamp column '{column}' to numeric"
            )));
        }
        ColumnKind::Text => {
            let parsed: Vec<Option<f64>> = text_values(series)?
                .into_iter()
                .map(|v| v.and_then(|raw| raw.trim().parse::<f64>().ok()))
                .collect();
            Series::new(series.name().clone(), parsed)
        }
        ColumnKind::Boolean | ColumnKind::Dynamic => series.cast(&DataType::Float64)?,
    };

    let integral = floats.null_count() == nulls_before
        && floats.f64()?.into_iter().flatten().all(fits_i64);
    let converted = if integral {
        floats.cast(&DataType::Int64)?
    } else {
        floats
    };

    let after = ColumnKind::from_dtype(converted.dtype());
    table.replace(column, converted)?;
    Ok(format!("Converted from {before} to {after}"))
}

/// Whole number inside the `i64` range. `i64::MAX` rounds up to 2^63 as a float,
/// so the upper bound is exclusive.
fn fits_i64(v: f64) -> bool {
    v.fract() == 0.0 && v >= i64::MIN as f64 && v < i64::MAX as f64
}

fn standardize_text(table: &mut Table, column: &str, case: TextCase) -> Result<String> {
    let series = require_column(table, column)?;
    let kind = ColumnKind::from_dtype(series.dtype());
    if kind != ColumnKind::Text {
        return Err(step_error(format!(
            "standardize_text requires a text column, '{column}' is {kind}"
        )));
    }

    let standardized: StringChunked = series
        .str()?
        .into_iter()
        .map(|v| v.map(|text| case.apply(text)))
        .collect();
    let standardized = standardized.with_name(series.name().clone()).into_series();
    table.replace(column, standardized)?;
    Ok(format!("Standardized '{column}' to {}case", case.as_str()))
}

fn remove_duplicates(table: &mut Table, subset: Option<&[String]>) -> Result<String> {
    let names: Vec<String> = match subset {
        Some(subset) => subset.to_vec(),
        None => column_names(table),
    };

    let keys = names
        .iter()
        .map(|name| text_values(require_column(table, name)?))
        .collect::<Result<Vec<_>>>()?;

    let mut seen = HashSet::with_capacity(table.height());
    let mask: BooleanChunked = (0..table.height())
        .map(|row| {
            let key: Vec<Option<&str>> = keys.iter().map(|col| col[row].as_deref()).collect();
            seen.insert(key)
        })
        .collect();

    let removed = retain_rows(table, &mask)?;
    Ok(format!("Removed {removed} duplicate rows"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::find_column;
    use serde_json::json;

    fn trips() -> Table {
        let passengers = Series::new(
            "passenger_count".into(),
            vec![Some(1i64), None, Some(2), Some(-1), Some(2)],
        );
        let fare = Series::new(
            "fare_amount".into(),
            vec![Some(10.0), Some(12.5), None, Some(8.0), Some(-3.0)],
        );
        let payment = Series::new(
            "payment_type".into(),
            vec![Some("Card"), Some("cash"), Some("CARD"), None, Some("voucher")],
        );
        DataFrame::new(vec![
            Column::from(passengers),
            Column::from(fare),
            Column::from(payment),
        ])
        .unwrap()
    }

    fn col(column: &str) -> String {
        column.to_owned()
    }

    #[test]
    fn test_empty_plan_is_identity() {
        let df = trips();
        let outcome = apply(df.clone(), &[]);
        assert!(outcome.log.is_empty());
        assert!(outcome.table.equals_missing(&df));
        assert_eq!(outcome.rows_before, outcome.rows_after);
    }

    #[test]
    fn test_failed_step_leaves_table_untouched_and_continues() {
        let steps = vec![
            Step::RemoveNegative {
                column: col("missing"),
            },
            Step::RemoveNegative {
                column: col("fare_amount"),
            },
        ];
        let outcome = apply(trips(), &steps);

        assert_eq!(outcome.log.len(), 2);
        assert_eq!(
            outcome.log[0].outcome,
            StepOutcome::Failed {
                error: "column 'missing' not found".to_owned()
            }
        );
        assert!(outcome.log[1].outcome.is_success());
        assert_eq!(outcome.rows_after, 4);
        assert_eq!(outcome.succeeded(), 1);
        assert_eq!(outcome.failed(), 1);
    }

    #[test]
    fn test_remove_negative_keeps_nulls() {
        let outcome = apply(
            trips(),
            &[Step::RemoveNegative {
                column: col("passenger_count"),
            }],
        );
        assert_eq!(outcome.rows_after, 4);
        assert_eq!(
            outcome.log[0].outcome,
            StepOutcome::Success {
                details: "Removed 1 rows with negative values".to_owned()
            }
        );
    }

    #[test]
    fn test_fill_median_and_mode() {
        // median of [1, 2, -1, 2] is 1.5, so the column widens to float
        let outcome = apply(
            trips(),
            &[Step::FillNull {
                column: col("passenger_count"),
                strategy: FillStrategy::Median,
                value: None,
            }],
        );
        let series = find_column(&outcome.table, "passenger_count").unwrap();
        assert_eq!(series.null_count(), 0);
        assert_eq!(series.dtype(), &DataType::Float64);
        assert_eq!(series.f64().unwrap().get(1), Some(1.5));

        let outcome = apply(
            trips(),
            &[Step::FillNull {
                column: col("passenger_count"),
                strategy: FillStrategy::Mode,
                value: None,
            }],
        );
        let series = find_column(&outcome.table, "passenger_count").unwrap();
        assert_eq!(series.dtype(), &DataType::Int64);
        assert_eq!(series.i64().unwrap().get(1), Some(2));
    }

    #[test]
    fn test_fill_drop_and_value() {
        let steps = vec![
            Step::FillNull {
                column: col("fare_amount"),
                strategy: FillStrategy::Drop,
                value: None,
            },
            Step::FillNull {
                column: col("payment_type"),
                strategy: FillStrategy::Value,
                value: Some(json!("unknown")),
            },
        ];
        let outcome = apply(trips(), &steps);

        assert_eq!(outcome.rows_after, 4);
        assert_eq!(
            outcome.log[0].outcome,
            StepOutcome::Success {
                details: "Dropped 1 rows with null values".to_owned()
            }
        );
        let payment = find_column(&outcome.table, "payment_type").unwrap();
        assert_eq!(payment.null_count(), 0);
        assert_eq!(payment.str().unwrap().get(2), Some("unknown"));

        let passengers: Vec<Option<i64>> = find_column(&outcome.table, "passenger_count")
            .unwrap()
            .i64()
            .unwrap()
            .into_iter()
            .collect();
        assert_eq!(passengers, vec![Some(1), None, Some(-1), Some(2)]);
        let fares: Vec<Option<f64>> = find_column(&outcome.table, "fare_amount")
            .unwrap()
            .f64()
            .unwrap()
            .into_iter()
            .collect();
        assert_eq!(fares, vec![Some(10.0), Some(12.5), Some(8.0), Some(-3.0)]);
    }

    #[test]
    fn test_mean_fill_rejects_text() {
        let outcome = apply(
            trips(),
            &[Step::FillNull {
                column: col("payment_type"),
                strategy: FillStrategy::Mean,
                value: None,
            }],
        );
        assert!(!outcome.log[0].outcome.is_success());
    }

    #[test]
    fn test_remove_invalid_drops_nulls_and_unlisted() {
        let outcome = apply(
            trips(),
            &[Step::RemoveInvalid {
                column: col("payment_type"),
                valid_values: vec![json!("Card"), json!("cash")],
            }],
        );
        assert_eq!(outcome.rows_after, 2);
    }

    #[test]
    fn test_convert_numeric_from_text() {
        let s = Series::new("amount".into(), vec![Some("1"), Some(" 2 "), Some("x"), None]);
        let df = DataFrame::new(vec![Column::from(s)]).unwrap();
        let outcome = apply(
            df,
            &[Step::ConvertNumeric {
                column: col("amount"),
            }],
        );

        let amount = find_column(&outcome.table, "amount").unwrap();
        assert_eq!(amount.dtype(), &DataType::Float64);
        assert_eq!(amount.null_count(), 2);

        let s = Series::new("amount".into(), vec![Some("1"), Some("2"), None]);
        let df = DataFrame::new(vec![Column::from(s)]).unwrap();
        let outcome = apply(
            df,
            &[Step::ConvertNumeric {
                column: col("amount"),
            }],
        );
        assert_eq!(
            find_column(&outcome.table, "amount").unwrap().dtype(),
            &DataType::Int64
        );
    }

    #[test]
    fn test_convert_numeric_keeps_values_beyond_integer_range() {
        let s = Series::new("amount".into(), vec![Some("1e20"), Some("2"), Some("-1e19")]);
        let df = DataFrame::new(vec![Column::from(s)]).unwrap();
        let outcome = apply(
            df,
            &[Step::ConvertNumeric {
                column: col("amount"),
            }],
        );

        assert!(outcome.log[0].outcome.is_success());
        let amount = find_column(&outcome.table, "amount").unwrap();
        assert_eq!(amount.dtype(), &DataType::Float64);
        assert_eq!(amount.null_count(), 0);
        assert_eq!(amount.f64().unwrap().get(0), Some(1e20));
        assert!(!fits_i64(i64::MAX as f64));
        assert!(fits_i64(i64::MIN as f64));
    }

    #[test]
    fn test_convert_datetime_counts_new_nulls() {
        let s = Series::new(
            "pickup".into(),
            vec![Some("2024-01-15 08:30:00"), Some("garbage"), None],
        );
        let df = DataFrame::new(vec![Column::from(s)]).unwrap();
        let outcome = apply(
            df,
            &[Step::ConvertDatetime {
                column: col("pickup"),
                format: None,
            }],
        );

        assert_eq!(
            outcome.log[0].outcome,
            StepOutcome::Success {
                details: "Converted to datetime. New nulls from conversion: 1".to_owned()
            }
        );
        assert_eq!(
            ColumnKind::from_dtype(find_column(&outcome.table, "pickup").unwrap().dtype()),
            ColumnKind::Timestamp
        );
    }

    #[test]
    fn test_rename_then_old_name_fails() {
        let steps = vec![
            Step::RenameColumn {
                column: col("fare_amount"),
                new_name: col("fare"),
            },
            Step::RemoveNegative {
                column: col("fare_amount"),
            },
        ];
        let outcome = apply(trips(), &steps);

        assert!(outcome.log[0].outcome.is_success());
        assert!(!outcome.log[1].outcome.is_success());
        assert!(has_column(&outcome.table, "fare"));
        assert_eq!(outcome.rows_after, 5);
    }

    #[test]
    fn test_rename_onto_existing_column_fails() {
        let outcome = apply(
            trips(),
            &[Step::RenameColumn {
                column: col("fare_amount"),
                new_name: col("payment_type"),
            }],
        );
        assert!(!outcome.log[0].outcome.is_success());
        assert_eq!(outcome.table.width(), 3);
    }

    #[test]
    fn test_drop_and_standardize() {
        let steps = vec![
            Step::DropColumn {
                column: col("passenger_count"),
            },
            Step::StandardizeText {
                column: col("payment_type"),
                case: TextCase::Lower,
            },
            Step::RemoveDuplicates {
                subset: Some(vec![col("payment_type")]),
            },
        ];
        let outcome = apply(trips(), &steps);

        assert!(!has_column(&outcome.table, "passenger_count"));
        // "card" twice collapses to one row
        assert_eq!(outcome.rows_after, 4);
        assert_eq!(
            outcome.log[2].outcome,
            StepOutcome::Success {
                details: "Removed 1 duplicate rows".to_owned()
            }
        );
    }

    #[test]
    fn test_fill_then_remove_negative_cleans_fares() {
        let steps = vec![
            Step::FillNull {
                column: col("fare_amount"),
                strategy: FillStrategy::Median,
                value: None,
            },
            Step::RemoveNegative {
                column: col("fare_amount"),
            },
        ];
        let outcome = apply(trips(), &steps);

        assert_eq!(outcome.succeeded(), 2);
        let fare = find_column(&outcome.table, "fare_amount").unwrap();
        assert_eq!(fare.null_count(), 0);
        assert_eq!(crate::table::negative_count(fare).unwrap(), 0);
        assert_eq!(outcome.rows_after, 4);
    }

    #[test]
    fn test_remove_duplicates_whole_row() {
        let a = Series::new("a".into(), vec![1i64, 1, 2]);
        let b = Series::new("b".into(), vec!["x", "x", "x"]);
        let df = DataFrame::new(vec![Column::from(a), Column::from(b)]).unwrap();
        let once = apply(df, &[Step::RemoveDuplicates { subset: None }]);
        assert_eq!(once.rows_after, 2);

        let twice = apply(once.table.clone(), &[Step::RemoveDuplicates { subset: None }]);
        assert!(twice.table.equals_missing(&once.table));
    }

    #[test]
    fn test_unknown_derived_and_filter_fail() {
        let steps = vec![
            Step::AddDerivedColumn {
                new_column: col("x"),
                expression: Some(col("fare_amount * 2")),
            },
            Step::FilterRows {
                condition: col("fare_amount > 0"),
            },
            Step::FilterRows {
                condition: col("valid_fare"),
            },
        ];
        let outcome = apply(trips(), &steps);

        assert_eq!(
            outcome.log[0].outcome,
            StepOutcome::Failed {
                error: "Unknown derived column: fare_amount * 2".to_owned()
            }
        );
        assert!(!outcome.log[1].outcome.is_success());
        // valid_fare keeps 10.0, 12.5, 8.0
        assert_eq!(outcome.rows_after, 3);
    }

    #[test]
    fn test_log_entry_json_shape() {
        let entry = ExecutionLogEntry {
            step: 1,
            action: "drop_column".to_owned(),
            column: Some("a".to_owned()),
            outcome: StepOutcome::Success {
                details: "Dropped column 'a'".to_owned(),
            },
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["status"], "success");
        assert_eq!(json["details"], "Dropped column 'a'");
    }

    #[test]
    fn test_most_common_prefers_smallest_on_tie() {
        assert_eq!(most_common(&[1, 1, 2, 2, 3]), Some(1));
        assert_eq!(most_common(&[1, 2, 2]), Some(2));
        assert_eq!(most_common::<i64>(&[]), None);
    }
}
