//! Sinks: where validated tables are written and verified.
//!
//! - [`SqliteSink`] writes to a SQLite database through sqlx
//! - [`MemorySink`] keeps tables in memory (tests, embedding)

mod memory;
mod sqlite;

pub use memory::MemorySink;
pub use sqlite::SqliteSink;

use crate::error::{DatamuleError, Result};
use crate::table::Table;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A result row keyed by column name.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Rows returned by [`Sink::verify`] as a sample.
pub const SAMPLE_ROWS: usize = 5;

/// Behavior when the target table already exists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadMode {
    /// Refuse to load
    Fail,
    /// Drop and recreate
    #[default]
    Replace,
    /// Add rows to the existing table
    Append,
}

impl LoadMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fail => "fail",
            Self::Replace => "replace",
            Self::Append => "append",
        }
    }
}

impl std::str::FromStr for LoadMode {
    type Err = DatamuleError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fail" => Ok(Self::Fail),
            "replace" => Ok(Self::Replace),
            "append" => Ok(Self::Append),
            other => Err(DatamuleError::Config(format!("unknown load mode '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    pub sql_type: String,
    pub nullable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadResult {
    pub table: String,
    pub mode: LoadMode,
    pub rows_loaded: usize,
    /// Rows present before this load (non-zero only when appending)
    pub prior_row_count: usize,
    pub current_row_count: usize,
    pub indexes_created: Vec<String>,
    pub columns: Vec<ColumnSchema>,
    pub loaded_at: DateTime<Utc>,
}

impl LoadResult {
    /// Row count the sink should report after this load.
    pub fn expected_row_count(&self) -> usize {
        match self.mode {
            LoadMode::Append => self.prior_row_count + self.rows_loaded,
            LoadMode::Fail | LoadMode::Replace => self.rows_loaded,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verification {
    pub table: String,
    pub expected_row_count: usize,
    pub actual_row_count: usize,
    pub count_matches: bool,
    pub columns: Vec<String>,
    pub sample_rows: Vec<Row>,
    /// Distinct non-null values per column
    pub distinct_counts: BTreeMap<String, usize>,
}

#[async_trait]
pub trait Sink: Send + Sync {
    /// Write `table` to `target`, then index `index_columns` that exist.
    async fn load(
        &self,
        table: &Table,
        target: &str,
        mode: LoadMode,
        index_columns: &[String],
    ) -> Result<LoadResult>;

    /// Read back `target` and compare its row count with `expected_row_count`.
    async fn verify(&self, target: &str, expected_row_count: usize) -> Result<Verification>;

    /// Run a read-only statement.
    async fn query(&self, sql: &str) -> Result<Vec<Row>>;
}

/// Reject anything but a single `SELECT`.
pub fn ensure_read_only(sql: &str) -> Result<()> {
    let statement = sql.trim().trim_end_matches(';').trim();
    if !statement.to_ascii_uppercase().starts_with("SELECT") {
        return Err(DatamuleError::Database(
            "Only SELECT queries are allowed".to_owned(),
        ));
    }
    if statement.contains(';') {
        return Err(DatamuleError::Database(
            "Only a single statement is allowed".to_owned(),
        ));
    }
    Ok(())
}

/// Index name used for `column` of `table`.
pub fn index_name(table: &str, column: &str) -> String {
    format!("idx_{table}_{column}")
}
