use super::{
    ColumnSchema, LoadMode, LoadResult, Row, SAMPLE_ROWS, Sink, Verification, ensure_read_only,
    index_name,
};
use crate::error::{DatamuleError, Result};
use crate::table::{ColumnKind, Table, column_names, has_column, text_values};
use async_trait::async_trait;
use chrono::Utc;
use polars::prelude::*;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, PoisonError};

#[derive(Debug, Clone)]
struct StoredTable {
    table: Table,
    indexes: Vec<String>,
}

/// Keeps loaded tables in process memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    tables: Mutex<HashMap<String, StoredTable>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with `table` already stored under `name`.
    pub fn with_table(self, name: &str, table: Table) -> Self {
        self.lock().insert(
            name.to_owned(),
            StoredTable {
                table,
                indexes: Vec::new(),
            },
        );
        self
    }

    /// Snapshot of a stored table.
    pub fn table(&self, name: &str) -> Option<Table> {
        self.lock().get(name).map(|stored| stored.table.clone())
    }

    pub fn indexes(&self, name: &str) -> Vec<String> {
        self.lock()
            .get(name)
            .map(|stored| stored.indexes.clone())
            .unwrap_or_default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, StoredTable>> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Sink for MemorySink {
    async fn load(
        &self,
        table: &Table,
        target: &str,
        mode: LoadMode,
        index_columns: &[String],
    ) -> Result<LoadResult> {
        let mut tables = self.lock();
        let existing = tables.get(target).cloned();

        let (stored, prior_row_count) = match (mode, existing) {
            (LoadMode::Fail, Some(_)) => {
                return Err(DatamuleError::Load(format!(
                    "Table '{target}' already exists"
                )));
            }
            (LoadMode::Append, Some(mut existing)) => {
                let prior = existing.table.height();
                existing.table.vstack_mut(table).map_err(|e| {
                    DatamuleError::Load(format!("Cannot append to '{target}': {e}"))
                })?;
                (existing, prior)
            }
            _ => (
                StoredTable {
                    table: table.clone(),
                    indexes: Vec::new(),
                },
                0,
            ),
        };

        let mut stored = stored;
        let mut indexes_created = Vec::new();
        for column in index_columns {
            if has_column(&stored.table, column) {
                let name = index_name(target, column);
                if !stored.indexes.contains(&name) {
                    stored.indexes.push(name.clone());
                }
                indexes_created.push(name);
            }
        }

        let columns = stored
            .table
            .get_columns()
            .iter()
            .map(|column| ColumnSchema {
                name: column.name().to_string(),
                sql_type: ColumnKind::from_dtype(column.dtype()).as_str().to_owned(),
                nullable: true,
            })
            .collect();

        let current_row_count = stored.table.height();
        tables.insert(target.to_owned(), stored);

        Ok(LoadResult {
            table: target.to_owned(),
            mode,
            rows_loaded: table.height(),
            prior_row_count,
            current_row_count,
            indexes_created,
            columns,
            loaded_at: Utc::now(),
        })
    }

    async fn verify(&self, target: &str, expected_row_count: usize) -> Result<Verification> {
        let table = self
            .table(target)
            .ok_or_else(|| DatamuleError::Database(format!("Table '{target}' does not exist")))?;

        let mut distinct_counts = BTreeMap::new();
        for column in table.get_columns() {
            let values = text_values(column.as_materialized_series())?;
            let distinct = values.iter().flatten().collect::<HashSet<_>>().len();
            distinct_counts.insert(column.name().to_string(), distinct);
        }

        let actual_row_count = table.height();
        Ok(Verification {
            table: target.to_owned(),
            expected_row_count,
            actual_row_count,
            count_matches: actual_row_count == expected_row_count,
            columns: column_names(&table),
            sample_rows: head_rows(&table, SAMPLE_ROWS)?,
            distinct_counts,
        })
    }

    async fn query(&self, sql: &str) -> Result<Vec<Row>> {
        ensure_read_only(sql)?;
        Err(DatamuleError::Database(
            "SQL queries are not supported by the in-memory sink".to_owned(),
        ))
    }
}

/// First `limit` rows as JSON objects.
fn head_rows(table: &Table, limit: usize) -> Result<Vec<Row>> {
    let head = table.head(Some(limit));
    let mut rows = vec![Row::new(); head.height()];

    for column in head.get_columns() {
        let series = column.as_materialized_series();
        let name = series.name().to_string();
        let cells: Vec<Value> = match ColumnKind::from_dtype(series.dtype()) {
            ColumnKind::Integer => series
                .cast(&DataType::Int64)?
                .i64()?
                .into_iter()
                .map(|v| v.map_or(Value::Null, Value::from))
                .collect(),
            ColumnKind::Float => series
                .cast(&DataType::Float64)?
                .f64()?
                .into_iter()
                .map(|v| {
                    v.and_then(serde_json::Number::from_f64)
                        .map_or(Value::Null, Value::Number)
                })
                .collect(),
            ColumnKind::Boolean => series
                .bool()?
                .into_iter()
                .map(|v| v.map_or(Value::Null, Value::Bool))
                .collect(),
            _ => text_values(series)?
                .into_iter()
                .map(|v| v.map_or(Value::Null, Value::String))
                .collect(),
        };

        for (row, cell) in rows.iter_mut().zip(cells) {
            row.insert(name.clone(), cell);
        }
    }

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trips(fares: &[f64]) -> Table {
        let fare = Series::new("fare_amount".into(), fares.to_vec());
        DataFrame::new(vec![Column::from(fare)]).unwrap()
    }

    #[tokio::test]
    async fn test_load_modes() {
        let sink = MemorySink::new();
        let result = sink
            .load(&trips(&[1.0, 2.0]), "trips", LoadMode::Replace, &[])
            .await
            .unwrap();
        assert_eq!(result.rows_loaded, 2);

        let err = sink
            .load(&trips(&[3.0]), "trips", LoadMode::Fail, &[])
            .await
            .unwrap_err();
        assert!(matches!(err, DatamuleError::Load(_)));

        let result = sink
            .load(&trips(&[3.0]), "trips", LoadMode::Append, &[])
            .await
            .unwrap();
        assert_eq!(result.prior_row_count, 2);
        assert_eq!(result.current_row_count, 3);
        assert_eq!(result.expected_row_count(), 3);
    }

    #[tokio::test]
    async fn test_indexes_only_for_existing_columns() {
        let sink = MemorySink::new();
        let result = sink
            .load(
                &trips(&[1.0]),
                "trips",
                LoadMode::Replace,
                &["fare_amount".to_owned(), "missing".to_owned()],
            )
            .await
            .unwrap();
        assert_eq!(result.indexes_created, vec!["idx_trips_fare_amount"]);
        assert_eq!(sink.indexes("trips"), vec!["idx_trips_fare_amount"]);
    }

    #[tokio::test]
    async fn test_verify() {
        let sink = MemorySink::new().with_table("trips", trips(&[1.0, 1.0, 2.5]));

        let verification = sink.verify("trips", 3).await.unwrap();
        assert!(verification.count_matches);
        assert_eq!(verification.sample_rows.len(), 3);
        assert_eq!(verification.sample_rows[2]["fare_amount"], 2.5);
        assert_eq!(verification.distinct_counts["fare_amount"], 2);

        let verification = sink.verify("trips", 4).await.unwrap();
        assert!(!verification.count_matches);

        assert!(sink.verify("nope", 0).await.is_err());
    }

    #[tokio::test]
    async fn test_query_guard() {
        let sink = MemorySink::new();
        let err = sink.query("DROP TABLE trips").await.unwrap_err();
        assert!(err.to_string().contains("Only SELECT"));
    }
}
