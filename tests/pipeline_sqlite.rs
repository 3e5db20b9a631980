//! End-to-end runs: CSV file in, SQLite table out, heuristic planning.

use datamule::extract::FileExtractor;
use datamule::pipeline::{Pipeline, PipelineState, RunRequest, RunStatus};
use datamule::planner::HeuristicPlanner;
use datamule::sink::{LoadMode, Sink as _, SqliteSink};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const TRIPS_CSV: &str = "\
tpep_pickup_datetime,fare_amount,passenger_count,payment_type
2024-01-01 08:00:00,12.5,1,card
2024-01-01 08:05:00,-3.0,2,cash
2024-01-01 08:10:00,,1,card
2024-01-01 08:15:00,9.0,,card
2024-01-01 08:15:00,9.0,,card
2024-01-01 08:20:00,15.0,3,card
";

fn write_trips(dir: &Path) -> PathBuf {
    let path = dir.join("trips.csv");
    std::fs::write(&path, TRIPS_CSV).unwrap();
    path
}

fn pipeline(sink: &SqliteSink) -> Pipeline {
    Pipeline::new(
        Arc::new(FileExtractor::default()),
        Arc::new(HeuristicPlanner),
        Arc::new(sink.clone()),
    )
}

#[tokio::test]
async fn test_csv_to_sqlite_with_heuristic_plan() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_trips(dir.path());
    let sink = SqliteSink::open(dir.path().join("out").join("trips.db"))
        .await
        .unwrap();

    let report = pipeline(&sink)
        .run(
            RunRequest::new(&source, "trips")
                .with_index_columns(vec!["tpep_pickup_datetime".to_owned()]),
        )
        .await;

    assert_eq!(report.status, RunStatus::Success, "{}", report.summary());
    assert_eq!(report.states.last(), Some(&PipelineState::Verify));
    assert_eq!(report.retry_count, 0);

    let load = report.load.as_ref().unwrap();
    assert_eq!(load.indexes_created, vec!["idx_trips_tpep_pickup_datetime"]);
    assert!(load.rows_loaded < 6, "negatives and duplicates are removed");

    let negatives = sink
        .query("SELECT COUNT(*) AS n FROM trips WHERE fare_amount < 0")
        .await
        .unwrap();
    assert_eq!(negatives[0]["n"], json!(0));

    let nulls = sink
        .query("SELECT COUNT(*) AS n FROM trips WHERE fare_amount IS NULL OR passenger_count IS NULL")
        .await
        .unwrap();
    assert_eq!(nulls[0]["n"], json!(0));

    let verification = report.verification.unwrap();
    assert_eq!(verification.actual_row_count, load.rows_loaded);
    assert!(verification.sample_rows.len() <= 5);
    assert!(verification.distinct_counts.contains_key("payment_type"));
}

#[tokio::test]
async fn test_append_runs_accumulate_rows() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_trips(dir.path());
    let sink = SqliteSink::in_memory().await.unwrap();
    let pipeline = pipeline(&sink);

    let first = pipeline
        .run(RunRequest::new(&source, "trips").with_load_mode(LoadMode::Append))
        .await;
    let second = pipeline
        .run(RunRequest::new(&source, "trips").with_load_mode(LoadMode::Append))
        .await;

    assert_eq!(first.status, RunStatus::Success);
    assert_eq!(second.status, RunStatus::Success, "{}", second.summary());

    let per_run = first.load.unwrap().rows_loaded;
    let load = second.load.unwrap();
    assert_eq!(load.prior_row_count, per_run);
    assert_eq!(load.current_row_count, per_run * 2);
    assert_eq!(second.verification.unwrap().actual_row_count, per_run * 2);
}

#[tokio::test]
async fn test_fail_mode_on_existing_table_is_unrecoverable_for_heuristics() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_trips(dir.path());
    let sink = SqliteSink::in_memory().await.unwrap();
    let pipeline = pipeline(&sink);

    let first = pipeline.run(RunRequest::new(&source, "trips")).await;
    assert!(first.is_success());

    let second = pipeline
        .run(RunRequest::new(&source, "trips").with_load_mode(LoadMode::Fail))
        .await;

    assert_eq!(second.status, RunStatus::Failed);
    assert_eq!(second.states.last(), Some(&PipelineState::ErrorRecovery));
    assert!(second.error.as_deref().unwrap().starts_with("Load error"));
    assert!(second.reasoning.last().unwrap().contains("unrecoverable"));
}

#[tokio::test]
async fn test_query_rejects_writes() {
    let sink = SqliteSink::in_memory().await.unwrap();
    assert!(sink.query("DELETE FROM trips").await.is_err());
    assert!(sink.query("SELECT 1; DROP TABLE trips").await.is_err());

    let rows = sink.query("SELECT 1 AS one").await.unwrap();
    assert_eq!(rows[0]["one"], json!(1));
}
