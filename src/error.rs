//! Centralized error handling for datamule.
//!
//! Every fallible operation in the crate returns [`Result`], whose error type is
//! [`DatamuleError`]. The variants follow the pipeline's error taxonomy, which
//! decides how the state machine reacts:
//!
//! - [`DatamuleError::StepExecution`] never leaves the transformation engine. It
//!   is caught per step and written to the execution log.
//! - [`DatamuleError::Extraction`], [`DatamuleError::PlanParse`],
//!   [`DatamuleError::Planner`], [`DatamuleError::Timeout`] and
//!   [`DatamuleError::Load`] send a run into error recovery.
//! - [`DatamuleError::Validation`] sends a run back to planning, or on to
//!   loading once the retry budget is spent. It never reaches error recovery.
//! - [`DatamuleError::VerificationMismatch`] only downgrades the final status.
//!
//! ## Context Extension Trait
//!
//! [`ResultExt`] adds `.context()` to any result whose error converts into
//! [`DatamuleError`]:
//!
//! ```no_run
//! use datamule::error::ResultExt as _;
//!
//! fn read_plan(path: &str) -> datamule::error::Result<String> {
//!     std::fs::read_to_string(path).context("Failed to read plan file")
//! }
//! ```

use std::fmt;

/// Main error type for datamule operations.
#[derive(Debug)]
pub enum DatamuleError {
    /// Source could not be read (missing file, unsupported format, parse error)
    Extraction(String),

    /// Planner output was not a well-formed step or rule list
    PlanParse(String),

    /// A single transformation step failed
    StepExecution(String),

    /// A hard validation rule was violated
    Validation(String),

    /// The sink rejected a write
    Load(String),

    /// Loaded row count differs from the expected row count
    VerificationMismatch { expected: usize, actual: usize },

    /// The planner backend call itself failed
    Planner(String),

    /// An external call exceeded its time budget
    Timeout { operation: String, seconds: u64 },

    /// The run was cancelled between states
    Cancelled,

    /// I/O errors (file operations, network, etc.)
    Io(std::io::Error),

    /// Data processing errors (Polars)
    DataProcessing(String),

    /// Database operation errors
    Database(String),

    /// Configuration errors
    Config(String),

    /// Generic error with context
    Other(String),
}

impl DatamuleError {
    /// Whether this error is one the state machine escalates to error recovery.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Extraction(_)
                | Self::PlanParse(_)
                | Self::Planner(_)
                | Self::Timeout { .. }
                | Self::Load(_)
        )
    }
}

impl fmt::Display for DatamuleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Extraction(msg) => write!(f, "Extraction error: {msg}"),
            Self::PlanParse(msg) => write!(f, "Plan parse error: {msg}"),
            Self::StepExecution(msg) => write!(f, "Step execution error: {msg}"),
            Self::Validation(msg) => write!(f, "Validation failure: {msg}"),
            Self::Load(msg) => write!(f, "Load error: {msg}"),
            Self::VerificationMismatch { expected, actual } => write!(
                f,
                "Verification mismatch: expected {expected} rows, found {actual}"
            ),
            Self::Planner(msg) => write!(f, "Planner error: {msg}"),
            Self::Timeout { operation, seconds } => {
                write!(f, "{operation} timed out after {seconds}s")
            }
            Self::Cancelled => write!(f, "Run cancelled"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::DataProcessing(msg) => write!(f, "Data processing error: {msg}"),
            Self::Database(msg) => write!(f, "Database error: {msg}"),
            Self::Config(msg) => write!(f, "Configuration error: {msg}"),
            Self::Other(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for DatamuleError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for DatamuleError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<anyhow::Error> for DatamuleError {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(format!("{err:#}"))
    }
}

impl From<serde_json::Error> for DatamuleError {
    fn from(err: serde_json::Error) -> Self {
        Self::Config(format!("JSON error: {err}"))
    }
}

impl From<polars::error::PolarsError> for DatamuleError {
    fn from(err: polars::error::PolarsError) -> Self {
        Self::DataProcessing(err.to_string())
    }
}

impl From<sqlx::Error> for DatamuleError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<DatamuleError> for String {
    fn from(err: DatamuleError) -> Self {
        err.to_string()
    }
}

/// Result type alias for datamule operations.
pub type Result<T> = std::result::Result<T, DatamuleError>;

/// Extension trait to add context to results.
pub trait ResultExt<T> {
    /// Add context to an error.
    fn context(self, msg: impl Into<String>) -> Result<T>;

    /// Add context using a closure (lazy evaluation).
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<DatamuleError>,
{
    fn context(self, msg: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let err: DatamuleError = e.into();
            DatamuleError::Other(format!("{}: {}", msg.into(), err))
        })
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| {
            let err: DatamuleError = e.into();
            DatamuleError::Other(format!("{}: {}", f(), err))
        })
    }
}
