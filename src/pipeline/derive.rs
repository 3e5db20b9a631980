//! Allowlisted derived columns and row filters.
//!
//! Planners may only name these by id; nothing is evaluated from free text.

use crate::error::{DatamuleError, Result};
use crate::table::{ColumnKind, Table, float_values, require_column, timestamp_dtype};
use polars::prelude::*;

/// How a derived column is computed from existing columns
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Derivation {
    /// `(end - start)` in minutes; both columns must be timestamps
    MinutesBetween {
        start: &'static str,
        end: &'static str,
    },
    /// `numerator / denominator * scale`; null when the denominator is zero
    Ratio {
        numerator: &'static str,
        denominator: &'static str,
        scale: f64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DerivedColumn {
    pub id: &'static str,
    pub derivation: Derivation,
}

pub const DERIVED_COLUMNS: &[DerivedColumn] = &[
    DerivedColumn {
        id: "trip_duration_minutes",
        derivation: Derivation::MinutesBetween {
            start: "tpep_pickup_datetime",
            end: "tpep_dropoff_datetime",
        },
    },
    DerivedColumn {
        id: "fare_per_mile",
        derivation: Derivation::Ratio {
            numerator: "fare_amount",
            denominator: "trip_distance",
            scale: 1.0,
        },
    },
    DerivedColumn {
        id: "tip_percentage",
        derivation: Derivation::Ratio {
            numerator: "tip_amount",
            denominator: "fare_amount",
            scale: 100.0,
        },
    },
];

pub fn derived_column(id: &str) -> Option<&'static DerivedColumn> {
    DERIVED_COLUMNS.iter().find(|derived| derived.id == id)
}

impl Derivation {
    /// Compute the derived values as a new series called `name`.
    pub fn compute(&self, table: &Table, name: &str) -> Result<Series> {
        let values: Vec<Option<f64>> = match *self {
            Self::MinutesBetween { start, end } => {
                let start = epoch_millis(table, start)?;
                let end = epoch_millis(table, end)?;
                start
                    .into_iter()
                    .zip(end)
                    .map(|(start, end)| match (start, end) {
                        (Some(start), Some(end)) => Some((end - start) as f64 / 60_000.0),
                        _ => None,
                    })
                    .collect()
            }
            Self::Ratio {
                numerator,
                denominator,
                scale,
            } => {
                let numerator = numeric_values(table, numerator)?;
                let denominator = numeric_values(table, denominator)?;
                numerator
                    .into_iter()
                    .zip(denominator.into_iter())
                    .map(|(n, d)| match (n, d) {
                        (Some(n), Some(d)) if d != 0.0 => Some(n / d * scale),
                        _ => None,
                    })
                    .collect()
            }
        };
        Ok(Series::new(name.into(), values))
    }
}

fn epoch_millis(table: &Table, column: &str) -> Result<Vec<Option<i64>>> {
    let series = require_column(table, column)?;
    let kind = ColumnKind::from_dtype(series.dtype());
    if kind != ColumnKind::Timestamp {
        return Err(DatamuleError::StepExecution(format!(
            "column '{column}' must be a timestamp, found {kind}"
        )));
    }
    let millis = series.cast(&timestamp_dtype())?.cast(&DataType::Int64)?;
    Ok(millis.i64()?.into_iter().collect())
}

fn numeric_values(table: &Table, column: &str) -> Result<Float64Chunked> {
    let series = require_column(table, column)?;
    let kind = ColumnKind::from_dtype(series.dtype());
    if !kind.is_numeric() {
        return Err(DatamuleError::StepExecution(format!(
            "column '{column}' must be numeric, found {kind}"
        )));
    }
    float_values(series)
}

/// Allowlisted row predicate: keep rows where `column > 0`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowFilter {
    pub id: &'static str,
    pub column: &'static str,
}

pub const ROW_FILTERS: &[RowFilter] = &[
    RowFilter {
        id: "valid_trip_distance",
        column: "trip_distance",
    },
    RowFilter {
        id: "valid_fare",
        column: "fare_amount",
    },
    RowFilter {
        id: "valid_passengers",
        column: "passenger_count",
    },
];

pub fn row_filter(id: &str) -> Option<&'static RowFilter> {
    ROW_FILTERS.iter().find(|filter| filter.id == id)
}

impl RowFilter {
    /// Rows to keep; a null value does not satisfy the predicate.
    pub fn mask(&self, table: &Table) -> Result<BooleanChunked> {
        let values = numeric_values(table, self.column)?;
        Ok(values
            .into_iter()
            .map(|v| v.is_some_and(|v| v > 0.0))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fares() -> Table {
        let fare = Series::new("fare_amount".into(), vec![Some(10.0), Some(20.0), None]);
        let tip = Series::new("tip_amount".into(), vec![Some(2.0), Some(0.0), Some(1.0)]);
        let distance = Series::new("trip_distance".into(), vec![Some(2.0), Some(0.0), Some(1.0)]);
        DataFrame::new(vec![
            Column::from(fare),
            Column::from(tip),
            Column::from(distance),
        ])
        .unwrap()
    }

    #[test]
    fn test_lookup() {
        assert!(derived_column("fare_per_mile").is_some());
        assert!(derived_column("fare_amount * 2").is_none());
        assert!(row_filter("valid_fare").is_some());
        assert!(row_filter("fare_amount > 0").is_none());
    }

    #[test]
    fn test_ratio_nulls_on_zero_denominator() {
        let df = fares();
        let derived = derived_column("fare_per_mile").unwrap();
        let series = derived.derivation.compute(&df, "fare_per_mile").unwrap();
        let values: Vec<Option<f64>> = series.f64().unwrap().into_iter().collect();
        assert_eq!(values, vec![Some(5.0), None, None]);
    }

    #[test]
    fn test_tip_percentage_scales() {
        let df = fares();
        let derived = derived_column("tip_percentage").unwrap();
        let series = derived.derivation.compute(&df, "tip_percentage").unwrap();
        assert_eq!(series.f64().unwrap().get(0), Some(20.0));
    }

    #[test]
    fn test_minutes_between_requires_timestamps() {
        let df = fares();
        let derived = derived_column("trip_duration_minutes").unwrap();
        assert!(derived.derivation.compute(&df, "trip_duration_minutes").is_err());
    }

    #[test]
    fn test_filter_mask_drops_nulls_and_zero() {
        let df = fares();
        let mask = row_filter("valid_trip_distance").unwrap().mask(&df).unwrap();
        let kept: Vec<Option<bool>> = mask.into_iter().collect();
        assert_eq!(kept, vec![Some(true), Some(false), Some(true)]);
    }
}
