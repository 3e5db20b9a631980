//! # Datamule
//!
//! A supervised ETL pipeline. A run moves a tabular source through
//! extraction, analysis, planning, transformation, validation, loading and
//! verification, with bounded retries when validation or a stage fails.
//!
//! Planning is delegated to a [`planner::Planner`]: a language model, a
//! deterministic heuristic, or a scripted sequence of responses. Whatever a
//! planner returns is parsed into typed [`pipeline::Step`]s and
//! [`pipeline::Rule`]s before anything touches the data, so an unparseable
//! plan is an ordinary, recoverable failure.
//!
//! ## Modules
//!
//! - [`pipeline`]: state machine, transformation engine, validation engine
//! - [`extract`]: readers for CSV, Parquet and JSON plus schema profiling
//! - [`planner`]: planner trait and its implementations
//! - [`sink`]: load targets (SQLite and in-memory)
//! - [`config`]: persisted settings
//! - [`error`]: the crate error type
//!
//! ## Example
//!
//! ```no_run
//! use datamule::extract::TableExtractor;
//! use datamule::pipeline::{Pipeline, RunRequest, RunStatus};
//! use datamule::planner::ScriptedPlanner;
//! use datamule::sink::MemorySink;
//! use polars::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let table = df!("fare_amount" => &[10.0, -2.0, 7.5])?;
//! let planner = ScriptedPlanner::new()
//!     .transform(r#"[{"action": "remove_negative", "column": "fare_amount"}]"#)
//!     .validation(r#"[{"type": "positive", "column": "fare_amount"}]"#);
//!
//! let pipeline = Pipeline::new(
//!     Arc::new(TableExtractor::new(table)),
//!     Arc::new(planner),
//!     Arc::new(MemorySink::new()),
//! );
//! let report = pipeline.run(RunRequest::new("fares.csv", "fares")).await;
//! assert_eq!(report.status, RunStatus::Success);
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all, rust_2018_idioms)]

pub mod config;
pub mod error;
pub mod extract;
pub mod logging;
pub mod pipeline;
pub mod planner;
pub mod sink;
pub mod table;
