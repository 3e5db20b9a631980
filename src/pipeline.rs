//! Supervised ETL pipeline: planned transformations, validation and bounded retries.
//!
//! A run moves one table through a finite state machine:
//!
//! ```text
//! Extract ─► Analyze ─► Plan ─► Transform ─► Validate ─► Load ─► Verify ─► Terminal
//!    │                   ▲ │                    │  ▲        │
//!    │                   │ ▼                    │  └ (retries exhausted: accept)
//!    └──────────────► ErrorRecovery ◄───────────┼───────────┘
//!                        │   ▲                  │
//!                        └───┴── retry ◄────────┘ (hard rule failed, retries left)
//! ```
//!
//! # Overview
//!
//! - [`step`]: the closed set of transformation steps and their parameters
//! - [`rule`]: the closed set of validation rules (hard and soft)
//! - [`plan`]: strict parsing of untrusted planner text into steps, rules and
//!   recovery verdicts
//! - [`transform`]: the transformation engine; one log entry per step, failures
//!   never abort the plan
//! - [`derive`]: the allowlist of derived columns and row filters
//! - [`validation`]: the validation engine
//! - [`machine`]: the state machine driving extractor, planner and sink
//! - [`run`]: the per-run context and the report handed back to callers
//! - [`observer`]: callbacks receiving the reasoning trace as it grows
//!
//! # Example
//!
//! ```no_run
//! use datamule::extract::FileExtractor;
//! use datamule::pipeline::{Pipeline, RunRequest};
//! use datamule::planner::HeuristicPlanner;
//! use datamule::sink::SqliteSink;
//! use std::sync::Arc;
//!
//! # async fn example() -> datamule::error::Result<()> {
//! let sink = SqliteSink::open("output/taxi.db").await?;
//! let pipeline = Pipeline::new(
//!     Arc::new(FileExtractor::default()),
//!     Arc::new(HeuristicPlanner::default()),
//!     Arc::new(sink),
//! );
//!
//! let report = pipeline
//!     .run(RunRequest::new("data/trips.csv", "taxi_trips"))
//!     .await;
//! println!("{}", report.summary());
//! # Ok(())
//! # }
//! ```

pub mod derive;
pub mod machine;
pub mod observer;
pub mod plan;
pub mod rule;
pub mod run;
pub mod step;
pub mod transform;
pub mod validation;

pub use machine::{MAX_RETRIES, Pipeline, PipelineState};
pub use observer::{RecordingObserver, RunObserver, TracingObserver};
pub use plan::{RecoveryPlan, parse_recovery, parse_rules, parse_steps};
pub use rule::Rule;
pub use run::{PipelineRun, RunReport, RunRequest, RunStatus};
pub use step::{FillStrategy, Step, TextCase};
pub use transform::{ExecutionLogEntry, StepOutcome, TransformOutcome};
pub use validation::{ValidationCheck, ValidationReport};
