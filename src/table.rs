//! In-memory table model shared by the engines.
//!
//! A [`Table`] is a polars [`DataFrame`]: an ordered set of equally long, named
//! columns with per-cell null tracking. Row order is insertion order and only
//! changes when a step removes rows. The engines reason about columns through the
//! coarser [`ColumnKind`] rather than raw polars dtypes.

use crate::error::{DatamuleError, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use polars::prelude::*;
use serde::{Deserialize, Serialize};

/// Date-time layouts tried, in order, when no explicit format is given.
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %I:%M:%S %p",
    "%m/%d/%Y %H:%M",
    "%d.%m.%Y %H:%M:%S",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%d.%m.%Y", "%Y%m%d"];

/// Dtype used for every parsed date-time column.
pub fn timestamp_dtype() -> DataType {
    DataType::Datetime(TimeUnit::Milliseconds, None)
}

/// The tabular dataset threaded through a run.
pub type Table = DataFrame;

/// Element kind of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    Integer,
    Float,
    Text,
    Boolean,
    Timestamp,
    /// Unresolved or mixed content (nulls-only, nested, object columns)
    Dynamic,
}

impl ColumnKind {
    pub fn from_dtype(dtype: &DataType) -> Self {
        if dtype.is_integer() {
            Self::Integer
        } else if dtype.is_float() {
            Self::Float
        } else if dtype.is_bool() {
            Self::Boolean
        } else if matches!(dtype, DataType::String) {
            Self::Text
        } else if matches!(dtype, DataType::Date | DataType::Datetime(_, _)) {
            Self::Timestamp
        } else {
            Self::Dynamic
        }
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Integer | Self::Float)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Text => "text",
            Self::Boolean => "boolean",
            Self::Timestamp => "timestamp",
            Self::Dynamic => "dynamic",
        }
    }
}

impl std::fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Look up a column by name.
pub fn find_column<'a>(table: &'a Table, name: &str) -> Option<&'a Series> {
    table
        .column(name)
        .ok()
        .map(|column| column.as_materialized_series())
}

/// Look up a column a step depends on; a missing column fails the step.
pub fn require_column<'a>(table: &'a Table, name: &str) -> Result<&'a Series> {
    find_column(table, name)
        .ok_or_else(|| DatamuleError::StepExecution(format!("column '{name}' not found")))
}

pub fn column_names(table: &Table) -> Vec<String> {
    table
        .get_column_names()
        .iter()
        .map(|name| name.to_string())
        .collect()
}

pub fn has_column(table: &Table, name: &str) -> bool {
    find_column(table, name).is_some()
}

/// Numeric view of a column as `f64` (non-numeric cells become null).
pub fn float_values(series: &Series) -> Result<Float64Chunked> {
    let cast = series.cast(&DataType::Float64)?;
    Ok(cast.f64()?.clone())
}

/// Text rendering of every cell, used for membership and duplicate checks.
pub fn text_values(series: &Series) -> Result<Vec<Option<String>>> {
    let cast = series.cast(&DataType::String)?;
    Ok(cast
        .str()?
        .into_iter()
        .map(|value| value.map(ToOwned::to_owned))
        .collect())
}

/// Count of non-null values below zero.
pub fn negative_count(series: &Series) -> Result<usize> {
    Ok(float_values(series)?
        .into_iter()
        .flatten()
        .filter(|&v| v < 0.0)
        .count())
}

/// Parse one cell into epoch milliseconds (UTC, naive values taken as UTC).
///
/// With `format` only that layout is tried (as a date-time, then as a date).
/// Without it RFC 3339 and the common layouts above are attempted in turn.
pub fn parse_timestamp_millis(raw: &str, format: Option<&str>) -> Option<i64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Some(format) = format {
        return parse_with(raw, format);
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.timestamp_millis());
    }
    DATETIME_FORMATS
        .iter()
        .chain(DATE_FORMATS)
        .find_map(|format| parse_with(raw, format))
}

fn parse_with(raw: &str, format: &str) -> Option<i64> {
    NaiveDateTime::parse_from_str(raw, format)
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(raw, format)
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
        .map(|datetime| datetime.and_utc().timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(ColumnKind::from_dtype(&DataType::Int64), ColumnKind::Integer);
        assert_eq!(ColumnKind::from_dtype(&DataType::UInt8), ColumnKind::Integer);
        assert_eq!(ColumnKind::from_dtype(&DataType::Float32), ColumnKind::Float);
        assert_eq!(ColumnKind::from_dtype(&DataType::String), ColumnKind::Text);
        assert_eq!(ColumnKind::from_dtype(&DataType::Boolean), ColumnKind::Boolean);
        assert_eq!(
            ColumnKind::from_dtype(&DataType::Datetime(TimeUnit::Milliseconds, None)),
            ColumnKind::Timestamp
        );
        assert_eq!(ColumnKind::from_dtype(&DataType::Null), ColumnKind::Dynamic);
    }

    #[test]
    fn test_require_column_names_missing_column() {
        let s = Series::new("a".into(), vec![1i64, 2]);
        let df = DataFrame::new(vec![Column::from(s)]).unwrap();

        assert!(require_column(&df, "a").is_ok());
        let err = require_column(&df, "b").unwrap_err();
        assert!(err.to_string().contains("'b'"));
    }

    #[test]
    fn test_parse_timestamp_layouts() {
        let expected = parse_timestamp_millis("2024-01-15 08:30:00", None).unwrap();
        assert_eq!(parse_timestamp_millis("2024-01-15T08:30:00", None), Some(expected));
        assert_eq!(parse_timestamp_millis("01/15/2024 08:30:00", None), Some(expected));
        assert_eq!(
            parse_timestamp_millis("15/01/2024 08:30", Some("%d/%m/%Y %H:%M")),
            Some(expected)
        );
        assert!(parse_timestamp_millis("2024-01-15", None).is_some());
        assert_eq!(parse_timestamp_millis("not a date", None), None);
        assert_eq!(parse_timestamp_millis("  ", None), None);
    }

    #[test]
    fn test_negative_count_ignores_nulls() {
        let s = Series::new("fare".into(), vec![Some(-1.0), None, Some(2.0), Some(-3.5)]);
        assert_eq!(negative_count(&s).unwrap(), 2);
    }
}
