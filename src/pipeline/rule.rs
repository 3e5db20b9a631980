//! Validation rule definitions.
//!
//! Rules arrive as JSON objects tagged by `type`, e.g.
//! `{"type": "in_range", "column": "passenger_count", "min": 1, "max": 6}`.
//! `positive` and `row_count` are hard rules: failing one marks the table
//! invalid. The rest only produce warnings.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Rule {
    NotNull {
        column: String,
    },
    Positive {
        column: String,
    },
    InRange {
        column: String,
        min: f64,
        max: f64,
    },
    Unique {
        column: String,
    },
    #[serde(rename = "row_count")]
    RowCountAtLeast {
        #[serde(default)]
        min: usize,
    },
}

impl Rule {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotNull { .. } => "not_null",
            Self::Positive { .. } => "positive",
            Self::InRange { .. } => "in_range",
            Self::Unique { .. } => "unique",
            Self::RowCountAtLeast { .. } => "row_count",
        }
    }

    /// Hard rules invalidate the table when they fail.
    pub fn is_hard(&self) -> bool {
        matches!(self, Self::Positive { .. } | Self::RowCountAtLeast { .. })
    }

    pub fn column(&self) -> Option<&str> {
        match self {
            Self::NotNull { column }
            | Self::Positive { column }
            | Self::InRange { column, .. }
            | Self::Unique { column } => Some(column),
            Self::RowCountAtLeast { .. } => None,
        }
    }

    /// Human-readable statement of what the rule expects.
    pub fn description(&self) -> String {
        match self {
            Self::NotNull { column } => format!("{column} should not have nulls"),
            Self::Positive { column } => format!("{column} should be positive"),
            Self::InRange { column, min, max } => {
                format!("{column} should be in range [{min}, {max}]")
            }
            Self::Unique { column } => format!("{column} should be unique"),
            Self::RowCountAtLeast { min } => format!("Should have at least {min} rows"),
        }
    }

    /// Parameter checks that do not need the table.
    pub fn check(&self) -> Result<(), String> {
        if let Some(column) = self.column()
            && column.trim().is_empty()
        {
            return Err(format!("{} rule requires a non-empty column name", self.kind()));
        }
        match self {
            Self::InRange { min, max, .. } if !(min.is_finite() && max.is_finite()) => {
                Err("in_range bounds must be finite numbers".to_owned())
            }
            Self::InRange { min, max, .. } if min > max => {
                Err(format!("in_range min ({min}) is greater than max ({max})"))
            }
            _ => Ok(()),
        }
    }
}

impl std::fmt::Display for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.description())
    }
}
