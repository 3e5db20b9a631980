use super::{
    ColumnSchema, LoadMode, LoadResult, Row, SAMPLE_ROWS, Sink, Verification, ensure_read_only,
    index_name,
};
use crate::error::{DatamuleError, Result};
use crate::table::{ColumnKind, Table, has_column, text_values};
use async_trait::async_trait;
use chrono::Utc;
use polars::prelude::*;
use serde_json::Value;
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{
    Column as _, Row as _, Sqlite, SqliteConnection, SqlitePool, TypeInfo as _, ValueRef as _,
};
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr as _;
use std::time::Duration;

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// A cell converted for binding.
#[derive(Debug, Clone, PartialEq)]
enum SqlCell {
    Null,
    Integer(i64),
    Real(f64),
    Bool(bool),
    Text(String),
}

/// Writes tables into a SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteSink {
    pool: SqlitePool,
}

impl SqliteSink {
    /// Open (creating if needed) the database file at `path`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(|e| {
                DatamuleError::Database(format!("Failed to open {}: {e}", path.display()))
            })?;

        tracing::info!(database = %path.display(), "Opened SQLite sink");
        Ok(Self { pool })
    }

    /// Private in-memory database that lives as long as the sink.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None::<Duration>)
            .max_lifetime(None::<Duration>)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    async fn load_inner(
        &self,
        table: &Table,
        target: &str,
        mode: LoadMode,
        index_columns: &[String],
    ) -> Result<LoadResult> {
        if table.width() == 0 {
            return Err(DatamuleError::Load(
                "cannot load a table without columns".to_owned(),
            ));
        }

        let quoted = quote(target);
        let mut tx = self.pool.begin().await?;

        let existed = table_exists(&mut tx, target).await?;
        let prior_row_count = match mode {
            LoadMode::Fail if existed => {
                return Err(DatamuleError::Load(format!(
                    "Table '{target}' already exists"
                )));
            }
            LoadMode::Append if existed => count_rows(&mut tx, &quoted).await?,
            LoadMode::Replace if existed => {
                sqlx::query(&format!("DROP TABLE {quoted}"))
                    .execute(&mut *tx)
                    .await?;
                0
            }
            _ => 0,
        };

        let definitions: Vec<String> = table
            .get_columns()
            .iter()
            .map(|column| {
                let kind = ColumnKind::from_dtype(column.dtype());
                format!("{} {}", quote(column.name()), sql_type(kind))
            })
            .collect();
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {quoted} ({})",
            definitions.join(", ")
        ))
        .execute(&mut *tx)
        .await?;

        let cells = table
            .get_columns()
            .iter()
            .map(|column| column_cells(column.as_materialized_series()))
            .collect::<Result<Vec<_>>>()?;
        let names: Vec<String> = table
            .get_columns()
            .iter()
            .map(|column| quote(column.name()))
            .collect();
        let placeholders = vec!["?"; names.len()].join(", ");
        let insert = format!(
            "INSERT INTO {quoted} ({}) VALUES ({placeholders})",
            names.join(", ")
        );

        for row in 0..table.height() {
            let mut query = sqlx::query(&insert);
            for column in &cells {
                query = bind_cell(query, &column[row]);
            }
            query.execute(&mut *tx).await?;
        }

        let mut indexes_created = Vec::new();
        for column in index_columns {
            if !has_column(table, column) {
                continue;
            }
            let name = index_name(target, column);
            let statement = format!(
                "CREATE INDEX IF NOT EXISTS {} ON {quoted} ({})",
                quote(&name),
                quote(column)
            );
            match sqlx::query(&statement).execute(&mut *tx).await {
                Ok(_) => indexes_created.push(name),
                Err(e) => tracing::warn!("Could not create index {name}: {e}"),
            }
        }

        tx.commit().await?;

        let mut conn = self.pool.acquire().await?;
        let current_row_count = count_rows(&mut conn, &quoted).await?;
        let columns = table_schema(&mut conn, &quoted).await?;

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
}

#[async_trait]
impl Sink for SqliteSink {
    async fn load(
        &self,
        table: &Table,
        target: &str,
        mode: LoadMode,
        index_columns: &[String],
    ) -> Result<LoadResult> {
        let result = self
            .load_inner(table, target, mode, index_columns)
            .await
            .map_err(|e| match e {
                DatamuleError::Load(_) => e,
                other => DatamuleError::Load(other.to_string()),
            })?;

        tracing::info!(
            table = target,
            mode = mode.as_str(),
            rows = result.rows_loaded,
            "Loaded table into SQLite"
        );
        Ok(result)
    }

    async fn verify(&self, target: &str, expected_row_count: usize) -> Result<Verification> {
        let mut conn = self.pool.acquire().await?;
        if !table_exists(&mut conn, target).await? {
            return Err(DatamuleError::Database(format!(
                "Table '{target}' does not exist"
            )));
        }

        let quoted = quote(target);
        let actual_row_count = count_rows(&mut conn, &quoted).await?;

        let sample = sqlx::query(&format!("SELECT * FROM {quoted} LIMIT {SAMPLE_ROWS}"))
            .fetch_all(&mut *conn)
            .await?;
        let sample_rows = sample.iter().map(row_json).collect::<Result<Vec<_>>>()?;

        let columns: Vec<String> = table_schema(&mut conn, &quoted)
            .await?
            .into_iter()
            .map(|column| column.name)
            .collect();

        let mut distinct_counts = BTreeMap::new();
        for column in &columns {
            let (distinct,): (i64,) = sqlx::query_as(&format!(
                "SELECT COUNT(DISTINCT {}) FROM {quoted}",
                quote(column)
            ))
            .fetch_one(&mut *conn)
            .await?;
            distinct_counts.insert(column.clone(), usize::try_from(distinct).unwrap_or(0));
        }

        Ok(Verification {
            table: target.to_owned(),
            expected_row_count,
            actual_row_count,
            count_matches: actual_row_count == expected_row_count,
            columns,
            sample_rows,
            distinct_counts,
        })
    }

    async fn query(&self, sql: &str) -> Result<Vec<Row>> {
        ensure_read_only(sql)?;
        let rows = sqlx::query(sql).fetch_all(&self.pool).await?;
        rows.iter().map(row_json).collect()
    }
}

fn sql_type(kind: ColumnKind) -> &'static str {
    match kind {
        ColumnKind::Integer | ColumnKind::Boolean => "INTEGER",
        ColumnKind::Float => "REAL",
        ColumnKind::Timestamp => "TIMESTAMP",
        ColumnKind::Text | ColumnKind::Dynamic => "TEXT",
    }
}

fn column_cells(series: &Series) -> Result<Vec<SqlCell>> {
    let cells = match ColumnKind::from_dtype(series.dtype()) {
        ColumnKind::Integer => series
            .cast(&DataType::Int64)?
            .i64()?
            .into_iter()
            .map(|v| v.map_or(SqlCell::Null, SqlCell::Integer))
            .collect(),
        ColumnKind::Float => series
            .cast(&DataType::Float64)?
            .f64()?
            .into_iter()
            .map(|v| v.filter(|v| v.is_finite()).map_or(SqlCell::Null, SqlCell::Real))
            .collect(),
        ColumnKind::Boolean => series
            .bool()?
            .into_iter()
            .map(|v| v.map_or(SqlCell::Null, SqlCell::Bool))
            .collect(),
        ColumnKind::Timestamp | ColumnKind::Text | ColumnKind::Dynamic => text_values(series)?
            .into_iter()
            .map(|v| v.map_or(SqlCell::Null, SqlCell::Text))
            .collect(),
    };
    Ok(cells)
}

fn bind_cell<'q>(query: SqliteQuery<'q>, cell: &SqlCell) -> SqliteQuery<'q> {
    match cell {
        SqlCell::Null => query.bind(None::<String>),
        SqlCell::Integer(v) => query.bind(*v),
        SqlCell::Real(v) => query.bind(*v),
        SqlCell::Bool(v) => query.bind(*v),
        SqlCell::Text(v) => query.bind(v.clone()),
    }
}

async fn table_exists(conn: &mut SqliteConnection, name: &str) -> Result<bool> {
    let found: Option<(String,)> =
        sqlx::query_as("SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?")
            .bind(name)
            .fetch_optional(&mut *conn)
            .await?;
    Ok(found.is_some())
}

async fn count_rows(conn: &mut SqliteConnection, quoted: &str) -> Result<usize> {
    let (count,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {quoted}"))
        .fetch_one(&mut *conn)
        .await?;
    Ok(usize::try_from(count).unwrap_or(0))
}

async fn table_schema(conn: &mut SqliteConnection, quoted: &str) -> Result<Vec<ColumnSchema>> {
    let rows = sqlx::query(&format!("PRAGMA table_info({quoted})"))
        .fetch_all(&mut *conn)
        .await?;

    rows.iter()
        .map(|row| -> Result<ColumnSchema> {
            let not_null: i64 = row.try_get("notnull")?;
            Ok(ColumnSchema {
                name: row.try_get("name")?,
                sql_type: row.try_get("type")?,
                nullable: not_null == 0,
            })
        })
        .collect()
}

fn row_json(row: &SqliteRow) -> Result<Row> {
    let mut map = Row::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let raw = row.try_get_raw(idx)?;
        let value = if raw.is_null() {
            Value::Null
        } else {
            let type_name = raw.type_info().name().to_owned();
            match type_name.as_str() {
                "INTEGER" | "BOOLEAN" => Value::from(row.try_get_unchecked::<i64, _>(idx)?),
                "REAL" | "NUMERIC" => {
                    let real = row.try_get_unchecked::<f64, _>(idx)?;
                    serde_json::Number::from_f64(real).map_or(Value::Null, Value::Number)
                }
                "BLOB" => Value::String(format!(
                    "<{} bytes>",
                    row.try_get_unchecked::<Vec<u8>, _>(idx)?.len()
                )),
                _ => Value::String(row.try_get_unchecked::<String, _>(idx)?),
            }
        };
        map.insert(column.name().to_owned(), value);
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trips() -> Table {
        let fare = Series::new("fare_amount".into(), vec![Some(12.5), None, Some(7.0)]);
        let passengers = Series::new("passenger_count".into(), vec![Some(1i64), Some(2), None]);
        let zone = Series::new("zone".into(), vec![Some("JFK"), Some("LGA"), Some("JFK")]);
        DataFrame::new(vec![
            Column::from(fare),
            Column::from(passengers),
            Column::from(zone),
        ])
        .unwrap()
    }

    #[tokio::test]
    async fn test_load_verify_and_query() {
        let sink = SqliteSink::in_memory().await.unwrap();
        let result = sink
            .load(&trips(), "trips", LoadMode::Replace, &["zone".to_owned()])
            .await
            .unwrap();

        assert_eq!(result.rows_loaded, 3);
        assert_eq!(result.current_row_count, 3);
        assert_eq!(result.indexes_created, vec!["idx_trips_zone"]);
        assert_eq!(result.columns.len(), 3);
        assert_eq!(result.columns[0].sql_type, "REAL");

        let verification = sink.verify("trips", 3).await.unwrap();
        assert!(verification.count_matches);
        assert_eq!(verification.sample_rows.len(), 3);
        assert_eq!(verification.distinct_counts["zone"], 2);
        assert_eq!(verification.sample_rows[1]["fare_amount"], Value::Null);

        let rows = sink
            .query("SELECT zone, COUNT(*) AS n FROM trips GROUP BY zone ORDER BY zone")
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["zone"], "JFK");
        assert_eq!(rows[0]["n"], 2);
    }

    #[tokio::test]
    async fn test_modes() {
        let sink = SqliteSink::in_memory().await.unwrap();
        sink.load(&trips(), "trips", LoadMode::Replace, &[])
            .await
            .unwrap();

        let err = sink
            .load(&trips(), "trips", LoadMode::Fail, &[])
            .await
            .unwrap_err();
        assert!(matches!(err, DatamuleError::Load(_)));

        let result = sink
            .load(&trips(), "trips", LoadMode::Append, &[])
            .await
            .unwrap();
        assert_eq!(result.prior_row_count, 3);
        assert_eq!(result.current_row_count, 6);

        let result = sink
            .load(&trips(), "trips", LoadMode::Replace, &[])
            .await
            .unwrap();
        assert_eq!(result.current_row_count, 3);
    }

    #[tokio::test]
    async fn test_query_is_read_only() {
        let sink = SqliteSink::in_memory().await.unwrap();
        assert!(sink.query("DELETE FROM trips").await.is_err());
        assert!(sink.verify("missing", 0).await.is_err());
    }

    #[tokio::test]
    async fn test_open_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("etl.db");
        let sink = SqliteSink::open(&path).await.unwrap();
        sink.load(&trips(), "trips", LoadMode::Replace, &[])
            .await
            .unwrap();
        assert!(path.exists());
    }
}
