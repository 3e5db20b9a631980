use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand, ValueEnum};
use datamule::config::PipelineConfig;
use datamule::extract::{FileExtractor, describe, read_table};
use datamule::pipeline::{Pipeline, RunRequest, RunStatus};
use datamule::planner::{HeuristicPlanner, LlmPlanner, Planner, ScriptedPlanner};
use datamule::sink::{LoadMode, Sink as _, SqliteSink};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Rules used when a plan file is supplied without its own rules
const PLAN_FILE_RULES: &str = r#"[{"type": "row_count", "min": 1}]"#;

#[derive(Parser)]
#[command(name = "datamule", about = "Supervised ETL pipeline", version)]
pub struct Cli {
    /// Debug logging for this crate
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Config file (defaults to the user config directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Copy, Debug, Default, ValueEnum)]
pub enum PlannerKind {
    /// Rule-based planning from the schema profile
    #[default]
    Heuristic,
    /// OpenAI chat model (needs `OPENAI_API_KEY`)
    Llm,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the pipeline on a source file and load it into SQLite
    Run {
        /// CSV, Parquet or JSON file
        source: PathBuf,

        /// Target table. Defaults to the file stem.
        #[arg(short, long)]
        table: Option<String>,

        /// Free-text guidance passed to the planner
        #[arg(short, long)]
        instructions: Option<String>,

        /// fail, replace or append
        #[arg(long)]
        mode: Option<LoadMode>,

        /// Column to index after loading (repeatable)
        #[arg(long = "index")]
        index: Vec<String>,

        #[arg(long, value_enum, default_value_t)]
        planner: PlannerKind,

        /// JSON file with a fixed list of transformation steps
        #[arg(long, conflicts_with = "planner")]
        plan: Option<PathBuf>,

        /// SQLite database file
        #[arg(long, env = "DATAMULE_DB")]
        db: Option<PathBuf>,
    },
    /// Run a read-only SELECT against the database
    Query {
        sql: String,

        #[arg(long, env = "DATAMULE_DB")]
        db: Option<PathBuf>,
    },
    /// Print the schema profile of a source file
    Profile { source: PathBuf },
}

pub async fn run_command(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => PipelineConfig::load_from(path)?,
        None => PipelineConfig::load(),
    };

    match cli.command {
        Commands::Run {
            source,
            table,
            instructions,
            mode,
            index,
            planner,
            plan,
            db,
        } => {
            let planner = build_planner(planner, plan.as_deref(), &config)?;
            let table = match table {
                Some(t) => t,
                None => default_table_name(&source)?,
            };
            let index = if index.is_empty() {
                config.index_columns.clone()
            } else {
                index
            };

            let mut request = RunRequest::new(source, table)
                .with_load_mode(mode.unwrap_or(config.load_mode))
                .with_index_columns(index);
            if let Some(instructions) = instructions {
                request = request.with_instructions(instructions);
            }

            let db = db.unwrap_or_else(|| config.database_path.clone());
            handle_run(request, planner, &db, &config).await
        }
        Commands::Query { sql, db } => {
            let db = db.unwrap_or_else(|| config.database_path.clone());
            handle_query(&sql, &db).await
        }
        Commands::Profile { source } => handle_profile(&source),
    }
}

fn build_planner(
    kind: PlannerKind,
    plan: Option<&Path>,
    config: &PipelineConfig,
) -> Result<Arc<dyn Planner>> {
    if let Some(path) = plan {
        let steps = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read plan {}", path.display()))?;
        let planner = ScriptedPlanner::new()
            .transform(steps)
            .validation(PLAN_FILE_RULES)
            .recovery(r#"{"unrecoverable": true, "reason": "plan was supplied from a file"}"#);
        return Ok(Arc::new(planner));
    }

    Ok(match kind {
        PlannerKind::Heuristic => Arc::new(HeuristicPlanner),
        PlannerKind::Llm => Arc::new(LlmPlanner::from_env(config.llm.clone())?),
    })
}

fn default_table_name(source: &Path) -> Result<String> {
    let stem = source
        .file_stem()
        .ok_or_else(|| anyhow::anyhow!("Invalid file name: {}", source.display()))?
        .to_string_lossy();
    Ok(stem
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect())
}

#[expect(clippy::print_stdout)]
async fn handle_run(
    request: RunRequest,
    planner: Arc<dyn Planner>,
    db: &Path,
    config: &PipelineConfig,
) -> Result<()> {
    let sink = SqliteSink::open(db).await?;
    let cancel = CancellationToken::new();

    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, stopping at the next stage");
            on_interrupt.cancel();
        }
    });

    let pipeline = Pipeline::new(
        Arc::new(FileExtractor::default()),
        planner,
        Arc::new(sink),
    )
    .with_config(config)
    .with_cancellation(cancel);

    let report = pipeline.run(request).await;
    println!("{}", report.summary());

    if report.status == RunStatus::Failed {
        anyhow::bail!(
            "Pipeline failed: {}",
            report.error.as_deref().unwrap_or("unknown error")
        );
    }
    if !report.is_success() {
        tracing::warn!(status = %report.status, "Run finished with warnings");
    }
    Ok(())
}

#[expect(clippy::print_stdout)]
async fn handle_query(sql: &str, db: &Path) -> Result<()> {
    let sink = SqliteSink::open(db).await?;
    let rows = sink.query(sql).await?;
    println!("{}", serde_json::to_string_pretty(&rows)?);
    Ok(())
}

#[expect(clippy::print_stdout)]
fn handle_profile(source: &Path) -> Result<()> {
    let table = read_table(source, FileExtractor::default().infer_schema_length)?;
    let stats = describe(&table)?;
    println!("{}", stats.summary());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_table_name_is_sql_safe() {
        let name = default_table_name(Path::new("data/Yellow Trips-2024.csv")).unwrap();
        assert_eq!(name, "yellow_trips_2024");
    }

    #[test]
    fn test_parse_run_command() {
        let cli = Cli::parse_from([
            "datamule", "run", "trips.csv", "--mode", "append", "--index", "a", "--index", "b",
        ]);
        let Commands::Run {
            mode,
            index,
            planner,
            ..
        } = cli.command
        else {
            panic!("expected run");
        };
        assert_eq!(mode, Some(LoadMode::Append));
        assert_eq!(index, vec!["a", "b"]);
        assert!(matches!(planner, PlannerKind::Heuristic));
    }
}
