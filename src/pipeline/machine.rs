//! The pipeline state machine.
//!
//! Each non-terminal state is a handler that reads and updates the run
//! context and returns the next state. Every handler appends exactly one
//! reasoning entry. Retries are bounded by [`MAX_RETRIES`], counted across
//! validation failures and error recoveries together.

use super::observer::{RunObserver, TracingObserver};
use super::plan::{RecoveryPlan, lint_steps, parse_recovery, parse_rules, parse_steps};
use super::rule::Rule;
use super::run::{PipelineRun, RunReport, RunRequest, RunStatus};
use super::step::Step;
use super::{transform, validation};
use crate::config::PipelineConfig;
use crate::error::{DatamuleError, Result};
use crate::extract::Extractor;
use crate::planner::{Planner, RecoveryRequest, TransformRequest, ValidationRequest};
use crate::sink::{LoadResult, Sink};
use crate::table::{Table, column_names};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Replans allowed per run.
pub const MAX_RETRIES: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineState {
    Extract,
    Analyze,
    Plan,
    Transform,
    Validate,
    Load,
    Verify,
    ErrorRecovery,
    Terminal(RunStatus),
}

impl PipelineState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Extract => "extract",
            Self::Analyze => "analyze",
            Self::Plan => "plan",
            Self::Transform => "transform",
            Self::Validate => "validate",
            Self::Load => "load",
            Self::Verify => "verify",
            Self::ErrorRecovery => "error_recovery",
            Self::Terminal(_) => "terminal",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Terminal(_))
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Terminal(status) => write!(f, "terminal({status})"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Drives runs through extractor, planner and sink.
pub struct Pipeline {
    extractor: Arc<dyn Extractor>,
    planner: Arc<dyn Planner>,
    sink: Arc<dyn Sink>,
    observer: Arc<dyn RunObserver>,
    cancel: CancellationToken,
    planner_timeout: Duration,
    extract_timeout: Duration,
    fallback_min_rows: usize,
}

impl Pipeline {
    pub fn new(
        extractor: Arc<dyn Extractor>,
        planner: Arc<dyn Planner>,
        sink: Arc<dyn Sink>,
    ) -> Self {
        let defaults = PipelineConfig::default();
        Self {
            extractor,
            planner,
            sink,
            observer: Arc::new(TracingObserver),
            cancel: CancellationToken::new(),
            planner_timeout: defaults.planner_timeout(),
            extract_timeout: defaults.extract_timeout(),
            fallback_min_rows: defaults.fallback_min_rows,
        }
    }

    pub fn with_config(mut self, config: &PipelineConfig) -> Self {
        self.planner_timeout = config.planner_timeout();
        self.extract_timeout = config.extract_timeout();
        self.fallback_min_rows = config.fallback_min_rows;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn RunObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Cancelling `token` stops runs at the next state boundary.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_timeouts(mut self, planner: Duration, extract: Duration) -> Self {
        self.planner_timeout = planner;
        self.extract_timeout = extract;
        self
    }

    /// Run one request to a terminal state.
    pub async fn run(&self, request: RunRequest) -> RunReport {
        let mut run = PipelineRun::new(request);
        tracing::info!(
            run_id = %run.id,
            source = %run.request.source.display(),
            target = %run.request.target_table,
            planner = self.planner.name(),
            "Starting pipeline run"
        );

        let mut state = PipelineState::Extract;
        loop {
            if let PipelineState::Terminal(status) = state {
                run.status = status;
                break;
            }

            if self.cancel.is_cancelled() {
                tracing::warn!(run_id = %run.id, state = state.as_str(), "Run cancelled");
                run.fail(state, DatamuleError::Cancelled);
                state = PipelineState::Terminal(RunStatus::Failed);
                continue;
            }

            run.states.push(state);
            self.observer.on_state(run.id, state);

            let next = match state {
                PipelineState::Extract => self.extract(&mut run).await,
                PipelineState::Analyze => self.analyze(&mut run),
                PipelineState::Plan => self.plan(&mut run).await,
                PipelineState::Transform => self.transform(&mut run).await,
                PipelineState::Validate => self.validate(&mut run),
                PipelineState::Load => self.load(&mut run).await,
                PipelineState::Verify => self.verify(&mut run).await,
                PipelineState::ErrorRecovery => self.recover(&mut run).await,
                PipelineState::Terminal(status) => PipelineState::Terminal(status),
            };

            tracing::debug!(run_id = %run.id, from = %state, to = %next, "Transition");
            state = next;
        }

        self.observer.on_finished(run.id, run.status);
        run.into_report()
    }

    fn reason(&self, run: &mut PipelineRun, state: PipelineState, entry: String) {
        self.observer.on_reasoning(run.id, state, &entry);
        run.reasoning.push(entry);
    }

    /// Await `call` unless the run is cancelled first.
    async fn cancellable<T>(&self, call: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::select! {
            () = self.cancel.cancelled() => Err(DatamuleError::Cancelled),
            outcome = call => outcome,
        }
    }

    /// Await `call` within `limit`, unless the run is cancelled first.
    async fn guarded<T>(
        &self,
        operation: &str,
        limit: Duration,
        call: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        self.cancellable(async {
            tokio::time::timeout(limit, call)
                .await
                .unwrap_or_else(|_| {
                    Err(DatamuleError::Timeout {
                        operation: operation.to_owned(),
                        seconds: limit.as_secs(),
                    })
                })
        })
        .await
    }

    async fn extract(&self, run: &mut PipelineRun) -> PipelineState {
        let source = run.request.source.clone();
        let extracted = self
            .guarded(
                "extractor",
                self.extract_timeout,
                self.extractor.extract(&source),
            )
            .await;

        match extracted {
            Ok(table) => {
                self.reason(
                    run,
                    PipelineState::Extract,
                    format!(
                        "Extracted {} rows, {} columns from {}",
                        table.height(),
                        table.width(),
                        source.display()
                    ),
                );
                run.raw_table = Some(table);
                PipelineState::Analyze
            }
            Err(err) => {
                let err = classify(err, DatamuleError::Extraction);
                self.reason(run, PipelineState::Extract, format!("Extraction failed: {err}"));
                run.fail(PipelineState::Extract, err);
                PipelineState::ErrorRecovery
            }
        }
    }

    fn analyze(&self, run: &mut PipelineRun) -> PipelineState {
        let described = match run.raw_table.as_ref() {
            Some(table) => self.extractor.describe(table),
            None => Err(DatamuleError::Extraction("no table was extracted".to_owned())),
        };

        match described {
            Ok(stats) => {
                run.schema_summary = stats.summary();
                let entry = format!(
                    "Analyzed schema: {} columns, {} issues found",
                    stats.column_count,
                    stats.issues.len()
                );
                run.schema = Some(stats);
                self.reason(run, PipelineState::Analyze, entry);
            }
            Err(err) => {
                run.analysis_error = Some(err.to_string());
                self.reason(
                    run,
                    PipelineState::Analyze,
                    format!("Schema analysis unavailable: {err}"),
                );
            }
        }
        PipelineState::Plan
    }

    /// Advisory column-reference warnings for a plan, formatted for the trace.
    fn lint_note(run: &PipelineRun, steps: &[Step]) -> String {
        let columns = run.raw_table.as_ref().map(column_names).unwrap_or_default();
        let warnings = lint_steps(steps, &columns);
        if warnings.is_empty() {
            return String::new();
        }
        let warnings: Vec<String> = warnings.iter().map(ToString::to_string).collect();
        format!(" (warnings: {})", warnings.join("; "))
    }

    async fn plan(&self, run: &mut PipelineRun) -> PipelineState {
        if let Some(steps) = run.recovered_plan.take() {
            let entry = format!(
                "Adopted recovery plan with {} transformation steps{}",
                steps.len(),
                Self::lint_note(run, &steps)
            );
            self.reason(run, PipelineState::Plan, entry);
            run.steps = steps;
            return PipelineState::Transform;
        }

        let Some(schema) = run.schema.as_ref() else {
            let cause = run
                .analysis_error
                .clone()
                .unwrap_or_else(|| "no schema analysis available".to_owned());
            let err = DatamuleError::Planner(format!("Cannot plan without schema analysis: {cause}"));
            self.reason(run, PipelineState::Plan, format!("Planning failed: {err}"));
            run.fail(PipelineState::Plan, err);
            return PipelineState::ErrorRecovery;
        };

        let request = TransformRequest {
            schema,
            schema_summary: &run.schema_summary,
            instructions: &run.request.instructions,
            failed_rules: &run.failed_rules,
        };
        let planned = self
            .guarded(
                "planner",
                self.planner_timeout,
                self.planner.plan_transform(&request),
            )
            .await
            .and_then(|raw| parse_steps(&raw));

        match planned {
            Ok(steps) => {
                let entry = format!(
                    "Planned {} transformation steps{}",
                    steps.len(),
                    Self::lint_note(run, &steps)
                );
                self.reason(run, PipelineState::Plan, entry);
                run.steps = steps;
                PipelineState::Transform
            }
            Err(err) => {
                let err = classify(err, DatamuleError::Planner);
                self.reason(run, PipelineState::Plan, format!("Planning failed: {err}"));
                run.fail(PipelineState::Plan, err);
                PipelineState::ErrorRecovery
            }
        }
    }

    async fn transform(&self, run: &mut PipelineRun) -> PipelineState {
        let raw = run.raw_table.clone().unwrap_or_default();
        let outcome = transform::apply(raw, &run.steps);

        let applied: Vec<Step> = run
            .steps
            .iter()
            .zip(&outcome.log)
            .filter(|(_, entry)| entry.outcome.is_success())
            .map(|(step, _)| step.clone())
            .collect();

        let planned_rules = match run.schema.as_ref() {
            Some(schema) => {
                let request = ValidationRequest {
                    schema,
                    schema_summary: &run.schema_summary,
                    applied_steps: &applied,
                };
                self.guarded(
                    "planner",
                    self.planner_timeout,
                    self.planner.plan_validation(&request),
                )
                .await
                .and_then(|raw| parse_rules(&raw))
            }
            None => Err(DatamuleError::Planner(
                "no schema analysis to plan rules from".to_owned(),
            )),
        };

        let (rules, rules_note) = match planned_rules {
            Ok(rules) => {
                let note = format!("{} validation rules planned", rules.len());
                (rules, note)
            }
            Err(err) => {
                let min = self.fallback_min_rows;
                (
                    vec![Rule::RowCountAtLeast { min }],
                    format!("validation planning failed ({err}), using fallback rule: at least {min} rows"),
                )
            }
        };

        let entry = format!(
            "Executed {} transformations ({} succeeded, {} failed), {} rows remaining; {rules_note}",
            outcome.log.len(),
            outcome.succeeded(),
            outcome.failed(),
            outcome.rows_after,
        );
        self.reason(run, PipelineState::Transform, entry);
        tracing::debug!(run_id = %run.id, "Transformation log:\n{}", outcome.summary());

        run.rules = rules;
        run.transform_log = outcome.log;
        run.table = Some(outcome.table);
        PipelineState::Validate
    }

    fn validate(&self, run: &mut PipelineRun) -> PipelineState {
        let empty = Table::default();
        let table = run.table.as_ref().unwrap_or(&empty);
        let report = validation::evaluate(table, &run.rules);

        let failure = DatamuleError::Validation(report.errors.join("; "));
        let next = if report.valid {
            run.failed_rules.clear();
            let entry = format!("Validation passed: {}", report.summary());
            self.reason(run, PipelineState::Validate, entry);
            PipelineState::Load
        } else if run.retry_count < MAX_RETRIES {
            run.retry_count += 1;
            run.failed_rules = run
                .rules
                .iter()
                .zip(&report.checks)
                .filter(|(rule, check)| rule.is_hard() && !check.passed)
                .map(|(rule, _)| rule.clone())
                .collect();
            let entry = format!(
                "{failure}; replanning (retry {} of {MAX_RETRIES})",
                run.retry_count
            );
            self.reason(run, PipelineState::Validate, entry);
            PipelineState::Plan
        } else {
            let entry = format!("{failure}; retries exhausted, loading with warnings");
            self.reason(run, PipelineState::Validate, entry);
            PipelineState::Load
        };

        run.validation = Some(report);
        next
    }

    async fn load(&self, run: &mut PipelineRun) -> PipelineState {
        let empty = Table::default();
        let table = run.table.as_ref().unwrap_or(&empty);
        let loaded = self
            .cancellable(self.sink.load(
                table,
                &run.request.target_table,
                run.request.load_mode,
                &run.request.index_columns,
            ))
            .await;

        match loaded {
            Ok(result) => {
                let mut entry = format!(
                    "Loaded {} rows to '{}' ({})",
                    result.rows_loaded,
                    result.table,
                    result.mode.as_str()
                );
                if !result.indexes_created.is_empty() {
                    entry.push_str(&format!(", indexes: {}", result.indexes_created.join(", ")));
                }
                self.reason(run, PipelineState::Load, entry);
                run.load = Some(result);
                PipelineState::Verify
            }
            Err(err) => {
                let err = classify(err, DatamuleError::Load);
                self.reason(run, PipelineState::Load, format!("Load failed: {err}"));
                run.fail(PipelineState::Load, err);
                PipelineState::ErrorRecovery
            }
        }
    }

    async fn verify(&self, run: &mut PipelineRun) -> PipelineState {
        let expected = run
            .load
            .as_ref()
            .map_or(0, LoadResult::expected_row_count);
        let verified = self
            .cancellable(self.sink.verify(&run.request.target_table, expected))
            .await;

        match verified {
            Ok(verification) if verification.count_matches => {
                let entry = format!(
                    "ETL pipeline completed successfully: {} rows in '{}'",
                    verification.actual_row_count, verification.table
                );
                self.reason(run, PipelineState::Verify, entry);
                run.verification = Some(verification);
                PipelineState::Terminal(RunStatus::Success)
            }
            Ok(verification) => {
                let err = DatamuleError::VerificationMismatch {
                    expected,
                    actual: verification.actual_row_count,
                };
                self.reason(
                    run,
                    PipelineState::Verify,
                    format!("Pipeline completed with warnings: {err}"),
                );
                run.fail(PipelineState::Verify, err);
                run.verification = Some(verification);
                PipelineState::Terminal(RunStatus::CompletedWithWarnings)
            }
            Err(DatamuleError::Cancelled) => {
                self.reason(run, PipelineState::Verify, "Verification cancelled".to_owned());
                run.fail(PipelineState::Verify, DatamuleError::Cancelled);
                PipelineState::Terminal(RunStatus::Failed)
            }
            Err(err) => {
                self.reason(
                    run,
                    PipelineState::Verify,
                    format!("Pipeline completed with warnings: verification failed: {err}"),
                );
                run.fail(PipelineState::Verify, err);
                PipelineState::Terminal(RunStatus::CompletedWithWarnings)
            }
        }
    }

    /// Ask the planner for a corrected plan, within the shared retry budget.
    ///
    /// The planner is not consulted when the error is outside the recoverable
    /// taxonomy, or when extraction failed: with no table there is nothing
    /// to re-plan over, so the run ends as Failed.
    async fn recover(&self, run: &mut PipelineRun) -> PipelineState {
        let error_text = run
            .error
            .as_ref()
            .map_or_else(|| "Unknown error".to_owned(), ToString::to_string);
        let failed_state = run.failed_state.unwrap_or(PipelineState::ErrorRecovery);

        if run.error.as_ref().is_some_and(|err| !err.is_recoverable()) {
            self.reason(
                run,
                PipelineState::ErrorRecovery,
                format!("Unrecoverable: {error_text}"),
            );
            return PipelineState::Terminal(RunStatus::Failed);
        }

        if run.retry_count >= MAX_RETRIES {
            self.reason(
                run,
                PipelineState::ErrorRecovery,
                format!("Max retries exceeded ({MAX_RETRIES}); last error: {error_text}"),
            );
            return PipelineState::Terminal(RunStatus::Failed);
        }

        if run.raw_table.is_none() {
            self.reason(
                run,
                PipelineState::ErrorRecovery,
                format!("Unrecoverable: nothing was extracted ({error_text})"),
            );
            return PipelineState::Terminal(RunStatus::Failed);
        }

        let request = RecoveryRequest {
            error: &error_text,
            failed_state: failed_state.as_str(),
            retry_count: run.retry_count,
            prior_plan: &run.steps,
        };
        let verdict = self
            .guarded("planner", self.planner_timeout, self.planner.recover(&request))
            .await
            .and_then(|raw| parse_recovery(&raw));

        match verdict {
            Ok(RecoveryPlan::Corrected(steps)) => {
                run.retry_count += 1;
                let entry = format!(
                    "Retry {}: planner suggested a recovery plan with {} steps after {failed_state} error: {error_text}",
                    run.retry_count,
                    steps.len()
                );
                self.reason(run, PipelineState::ErrorRecovery, entry);
                run.error = None;
                run.failed_state = None;
                run.recovered_plan = Some(steps);
                PipelineState::Plan
            }
            Ok(RecoveryPlan::Unrecoverable(reason)) => {
                self.reason(
                    run,
                    PipelineState::ErrorRecovery,
                    format!("Planner judged the error unrecoverable: {reason} ({error_text})"),
                );
                PipelineState::Terminal(RunStatus::Failed)
            }
            Err(err) => {
                self.reason(
                    run,
                    PipelineState::ErrorRecovery,
                    format!("Recovery planning failed: {err} ({error_text})"),
                );
                PipelineState::Terminal(RunStatus::Failed)
            }
        }
    }
}

/// Keep errors the recovery path understands as they are; wrap anything else
/// in the failing state's own kind.
fn classify(err: DatamuleError, wrap: fn(String) -> DatamuleError) -> DatamuleError {
    if err.is_recoverable() || matches!(err, DatamuleError::Cancelled) {
        err
    } else {
        wrap(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_wraps_foreign_errors() {
        let err = classify(
            DatamuleError::DataProcessing("bad csv".to_owned()),
            DatamuleError::Extraction,
        );
        assert!(matches!(err, DatamuleError::Extraction(ref msg) if msg == "Data processing error: bad csv"));
        assert!(err.is_recoverable());

        let timeout = DatamuleError::Timeout {
            operation: "planner".to_owned(),
            seconds: 5,
        };
        assert!(matches!(
            classify(timeout, DatamuleError::Planner),
            DatamuleError::Timeout { seconds: 5, .. }
        ));
        assert!(matches!(
            classify(DatamuleError::Cancelled, DatamuleError::Load),
            DatamuleError::Cancelled
        ));
    }

    #[test]
    fn test_state_names() {
        assert_eq!(PipelineState::ErrorRecovery.as_str(), "error_recovery");
        assert_eq!(
            PipelineState::Terminal(RunStatus::CompletedWithWarnings).to_string(),
            "terminal(COMPLETED_WITH_WARNINGS)"
        );
        assert!(PipelineState::Terminal(RunStatus::Failed).is_terminal());
        assert!(!PipelineState::Verify.is_terminal());
    }
}
