//! Run inputs, the mutable per-run context and the final report.

use super::machine::PipelineState;
use super::rule::Rule;
use super::step::Step;
use super::transform::ExecutionLogEntry;
use super::validation::ValidationReport;
use crate::error::DatamuleError;
use crate::extract::SchemaStats;
use crate::sink::{LoadMode, LoadResult, Verification};
use crate::table::Table;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// What to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub source: PathBuf,
    pub target_table: String,
    /// Free-text guidance for the planner
    pub instructions: String,
    pub load_mode: LoadMode,
    pub index_columns: Vec<String>,
}

impl RunRequest {
    pub fn new(source: impl Into<PathBuf>, target_table: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target_table: target_table.into(),
            instructions: String::new(),
            load_mode: LoadMode::default(),
            index_columns: Vec::new(),
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    pub fn with_load_mode(mut self, mode: LoadMode) -> Self {
        self.load_mode = mode;
        self
    }

    pub fn with_index_columns(mut self, columns: Vec<String>) -> Self {
        self.index_columns = columns;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    #[default]
    Unset,
    Success,
    CompletedWithWarnings,
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unset => "UNSET",
            Self::Success => "SUCCESS",
            Self::CompletedWithWarnings => "COMPLETED_WITH_WARNINGS",
            Self::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a run accumulates on its way through the states.
#[derive(Debug)]
pub struct PipelineRun {
    pub id: Uuid,
    pub request: RunRequest,
    pub raw_table: Option<Table>,
    pub table: Option<Table>,
    pub schema: Option<SchemaStats>,
    pub schema_summary: String,
    /// Analysis failure, surfaced when planning needs the schema
    pub analysis_error: Option<String>,
    pub steps: Vec<Step>,
    /// Plan handed over by error recovery, adopted on the next Plan entry
    pub recovered_plan: Option<Vec<Step>>,
    pub rules: Vec<Rule>,
    /// Hard rules failed by the last validation, fed back to the planner
    pub failed_rules: Vec<Rule>,
    pub transform_log: Vec<ExecutionLogEntry>,
    pub validation: Option<ValidationReport>,
    pub load: Option<LoadResult>,
    pub verification: Option<Verification>,
    pub reasoning: Vec<String>,
    pub states: Vec<PipelineState>,
    pub error: Option<DatamuleError>,
    /// State that raised `error`
    pub failed_state: Option<PipelineState>,
    pub retry_count: u32,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    started: Instant,
}

impl PipelineRun {
    pub fn new(request: RunRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            request,
            raw_table: None,
            table: None,
            schema: None,
            schema_summary: String::new(),
            analysis_error: None,
            steps: Vec::new(),
            recovered_plan: None,
            rules: Vec::new(),
            failed_rules: Vec::new(),
            transform_log: Vec::new(),
            validation: None,
            load: None,
            verification: None,
            reasoning: Vec::new(),
            states: Vec::new(),
            error: None,
            failed_state: None,
            retry_count: 0,
            status: RunStatus::Unset,
            started_at: Utc::now(),
            started: Instant::now(),
        }
    }

    pub fn fail(&mut self, state: PipelineState, error: DatamuleError) {
        self.failed_state = Some(state);
        self.error = Some(error);
    }

    pub fn into_report(self) -> RunReport {
        RunReport {
            run_id: self.id,
            status: self.status,
            reasoning: self.reasoning,
            states: self.states,
            retry_count: self.retry_count,
            plan: self.steps,
            rules: self.rules,
            table: self.table,
            transform_log: self.transform_log,
            validation: self.validation,
            load: self.load,
            verification: self.verification,
            error: self.error.map(|e| e.to_string()),
            started_at: self.started_at,
            duration: self.started.elapsed(),
        }
    }
}

/// Final outcome of a run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    pub status: RunStatus,
    /// One entry per state entered, in order
    pub reasoning: Vec<String>,
    pub states: Vec<PipelineState>,
    pub retry_count: u32,
    /// Last transformation plan
    pub plan: Vec<Step>,
    pub rules: Vec<Rule>,
    /// Transformed table
    pub table: Option<Table>,
    pub transform_log: Vec<ExecutionLogEntry>,
    pub validation: Option<ValidationReport>,
    pub load: Option<LoadResult>,
    pub verification: Option<Verification>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }

    pub fn summary(&self) -> String {
        let mut lines = vec![
            format!("Run {}: {}", self.run_id, self.status),
            format!(
                "States: {}",
                self.states
                    .iter()
                    .map(|s| s.as_str())
                    .collect::<Vec<_>>()
                    .join(" -> ")
            ),
            format!("Retries: {}", self.retry_count),
        ];

        if !self.transform_log.is_empty() {
            let failed = self
                .transform_log
                .iter()
                .filter(|e| !e.outcome.is_success())
                .count();
            lines.push(format!(
                "Transformations: {} steps, {failed} failed",
                self.transform_log.len()
            ));
        }
        if let Some(validation) = &self.validation {
            lines.push(format!("Validation: {}", validation.summary()));
        }
        if let Some(load) = &self.load {
            lines.push(format!(
                "Loaded {} rows into '{}' ({})",
                load.rows_loaded,
                load.table,
                load.mode.as_str()
            ));
        }
        if let Some(verification) = &self.verification {
            lines.push(format!(
                "Verified {} rows (expected {})",
                verification.actual_row_count, verification.expected_row_count
            ));
        }
        if let Some(error) = &self.error {
            lines.push(format!("Error: {error}"));
        }
        lines.push(format!("Duration: {:.2}s", self.duration.as_secs_f64()));

        lines.push("Reasoning:".to_owned());
        lines.extend(
            self.reasoning
                .iter()
                .enumerate()
                .map(|(i, entry)| format!("  {}. {entry}", i + 1)),
        );
        lines.join("\n")
    }
}
