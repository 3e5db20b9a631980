//! Logging setup for the CLI.
//!
//! Console output goes to stderr so that reports printed on stdout stay
//! machine-readable. Files rotate daily under the platform data directory:
//!
//! - `datamule.<date>.log`: everything passing the filter
//! - `error.<date>.log`: warnings and errors only
//!
//! ```no_run
//! datamule::logging::init(false)?;
//! tracing::info!("ready");
//! # Ok::<(), anyhow::Error>(())
//! ```

use anyhow::{Context as _, Result};
use std::path::{Path, PathBuf};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter, Layer as _, fmt, layer::SubscriberExt as _, util::SubscriberInitExt as _,
};

const MAX_LOG_FILES: usize = 10;

/// `<data dir>/datamule/logs`, created on first use.
pub fn log_dir() -> Result<PathBuf> {
    let base_dir = dirs::data_dir().context("Failed to determine data directory")?;
    let dir = base_dir.join("datamule").join("logs");
    if !dir.exists() {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;
    }
    Ok(dir)
}

fn appender(dir: &Path, prefix: &str) -> Result<RollingFileAppender> {
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .max_log_files(MAX_LOG_FILES)
        .filename_prefix(prefix)
        .filename_suffix("log")
        .build(dir)
        .with_context(|| format!("Failed to create {prefix} log appender"))
}

/// Default console filter. `RUST_LOG` always wins.
fn default_filter(verbose: bool) -> &'static str {
    if verbose {
        "datamule=debug,info"
    } else {
        "info,sqlx=warn"
    }
}

/// Install the global subscriber. Call once at startup.
pub fn init(verbose: bool) -> Result<()> {
    let dir = log_dir()?;

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter(verbose)))
        .context("Failed to create env filter")?;

    let console_layer = fmt::layer()
        .with_target(verbose)
        .with_line_number(verbose)
        .with_writer(std::io::stderr);

    let all_logs_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(false)
        .with_writer(appender(&dir, "datamule")?);

    let error_logs_layer = fmt::layer()
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(false)
        .with_writer(appender(&dir, "error")?)
        .with_filter(EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(all_logs_layer)
        .with(error_logs_layer)
        .try_init()
        .context("Logging was already initialized")?;

    tracing::debug!(log_dir = %dir.display(), "Logging initialized");
    Ok(())
}

/// Today's main log file.
pub fn current_log_path() -> Result<PathBuf> {
    let today = chrono::Local::now().format("%Y-%m-%d");
    Ok(log_dir()?.join(format!("datamule.{today}.log")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbose_filter_is_scoped_to_crate() {
        assert!(default_filter(true).starts_with("datamule=debug"));
        assert!(default_filter(false).contains("sqlx=warn"));
    }

    #[test]
    fn test_log_dir_layout() {
        let dir = log_dir().unwrap();
        assert!(dir.ends_with(Path::new("datamule").join("logs")));
    }
}
