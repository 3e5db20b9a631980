//! Planners: the reasoning backend that proposes plans.
//!
//! A [`Planner`] returns raw text; the pipeline parses and checks it with
//! [`crate::pipeline::plan`] before anything runs. Three implementations ship
//! with the crate:
//!
//! - [`LlmPlanner`] asks an OpenAI-compatible chat model
//! - [`HeuristicPlanner`] derives plans from the schema profile, offline
//! - [`ScriptedPlanner`] replays canned responses (tests, fixed plans)

mod heuristic;
mod llm;
pub mod prompts;
mod scripted;

pub use heuristic::HeuristicPlanner;
pub use llm::LlmPlanner;
pub use scripted::{PlannerCall, ScriptedPlanner};

use crate::error::Result;
use crate::extract::SchemaStats;
use crate::pipeline::{Rule, Step};
use async_trait::async_trait;

/// Context for a transformation plan
#[derive(Debug, Clone, Copy)]
pub struct TransformRequest<'a> {
    pub schema: &'a SchemaStats,
    /// Rendered [`SchemaStats::summary`]
    pub schema_summary: &'a str,
    pub instructions: &'a str,
    /// Hard rules the previous attempt failed, empty on the first attempt
    pub failed_rules: &'a [Rule],
}

/// Context for validation rules
#[derive(Debug, Clone, Copy)]
pub struct ValidationRequest<'a> {
    pub schema: &'a SchemaStats,
    pub schema_summary: &'a str,
    /// Steps that ran successfully
    pub applied_steps: &'a [Step],
}

/// Context for error recovery
#[derive(Debug, Clone, Copy)]
pub struct RecoveryRequest<'a> {
    pub error: &'a str,
    /// State in which the error was raised, e.g. `plan`
    pub failed_state: &'a str,
    pub retry_count: u32,
    pub prior_plan: &'a [Step],
}

#[async_trait]
pub trait Planner: Send + Sync {
    /// Propose transformation steps as a JSON array.
    async fn plan_transform(&self, request: &TransformRequest<'_>) -> Result<String>;

    /// Propose validation rules as a JSON array.
    async fn plan_validation(&self, request: &ValidationRequest<'_>) -> Result<String>;

    /// Propose a corrected plan (JSON array) or an `{"unrecoverable": true}` verdict.
    async fn recover(&self, request: &RecoveryRequest<'_>) -> Result<String>;

    /// Short name used in logs.
    fn name(&self) -> &str;
}
