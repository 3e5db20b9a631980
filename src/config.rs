//! Pipeline configuration.
//!
//! Stored as JSON at `<config dir>/datamule/config.json`. Missing fields take
//! their defaults, so a partial file is fine. Timeouts can be overridden per
//! process through `DATAMULE_PLANNER_TIMEOUT_SECS` and
//! `DATAMULE_EXTRACT_TIMEOUT_SECS`.

use crate::sink::LoadMode;
use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const PLANNER_TIMEOUT_ENV: &str = "DATAMULE_PLANNER_TIMEOUT_SECS";
pub const EXTRACT_TIMEOUT_ENV: &str = "DATAMULE_EXTRACT_TIMEOUT_SECS";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct LlmConfig {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o".to_owned(),
            temperature: 0.0,
            max_tokens: 2000,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Budget for each planner call
    pub planner_timeout_secs: u64,
    /// Budget for reading the source
    pub extract_timeout_secs: u64,
    pub load_mode: LoadMode,
    /// Columns indexed in the sink after loading
    pub index_columns: Vec<String>,
    /// Minimum row count enforced when the planner cannot propose rules
    pub fallback_min_rows: usize,
    /// SQLite database used by the CLI
    pub database_path: PathBuf,
    pub llm: LlmConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            planner_timeout_secs: 120,
            extract_timeout_secs: 300,
            load_mode: LoadMode::Replace,
            index_columns: Vec::new(),
            fallback_min_rows: 1,
            database_path: PathBuf::from("output").join("datamule.db"),
            llm: LlmConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn config_path() -> Result<PathBuf> {
        let dir = dirs::config_dir().context("Could not determine config directory")?;
        Ok(dir.join("datamule").join("config.json"))
    }

    /// Load from the default location, falling back to defaults.
    pub fn load() -> Self {
        match Self::config_path() {
            Ok(path) if path.exists() => Self::load_from(&path).unwrap_or_else(|e| {
                tracing::warn!("Ignoring unreadable config {}: {e:#}", path.display());
                Self::default()
            }),
            _ => Self::default(),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn planner_timeout(&self) -> Duration {
        Duration::from_secs(env_secs(PLANNER_TIMEOUT_ENV).unwrap_or(self.planner_timeout_secs))
    }

    pub fn extract_timeout(&self) -> Duration {
        Duration::from_secs(env_secs(EXTRACT_TIMEOUT_ENV).unwrap_or(self.extract_timeout_secs))
    }
}

/// Positive whole seconds from an environment variable.
fn env_secs(key: &str) -> Option<u64> {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|&secs| secs > 0)
}
