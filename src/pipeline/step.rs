//! Transformation step definitions.
//!
//! Steps arrive as JSON objects tagged by `action`, for example
//! `{"action": "fill_null", "column": "fare_amount", "strategy": "median"}`.
//! Each variant carries only the parameters it needs.

use serde::{Deserialize, Serialize};

/// Transformation step (tagged enum)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    /// Parse a column as date-times; unparsable values become null
    ConvertDatetime {
        column: String,
        /// chrono format string; layouts are inferred when absent
        #[serde(default, skip_serializing_if = "Option::is_none")]
        format: Option<String>,
    },

    /// Fill (or drop) null values
    FillNull {
        column: String,
        strategy: FillStrategy,
        /// Literal used by [`FillStrategy::Value`]
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<serde_json::Value>,
    },

    /// Remove rows whose value is below zero
    RemoveNegative { column: String },

    /// Remove rows whose value is not one of `valid_values`
    RemoveInvalid {
        column: String,
        valid_values: Vec<serde_json::Value>,
    },

    /// Coerce a column to numbers; unparsable values become null
    ConvertNumeric { column: String },

    RenameColumn { column: String, new_name: String },

    DropColumn { column: String },

    /// Add a column from the derived-column allowlist
    AddDerivedColumn {
        new_column: String,
        /// Allowlisted derivation id; defaults to `new_column`
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expression: Option<String>,
    },

    /// Rewrite text case
    StandardizeText {
        column: String,
        #[serde(default)]
        case: TextCase,
    },

    /// Drop repeated rows, keeping the first occurrence
    RemoveDuplicates {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        subset: Option<Vec<String>>,
    },

    /// Keep rows matching an allowlisted predicate
    FilterRows { condition: String },
}

impl Step {
    /// The `action` tag, as it appears in plans and logs.
    pub fn action(&self) -> &'static str {
        match self {
            Self::ConvertDatetime { .. } => "convert_datetime",
            Self::FillNull { .. } => "fill_null",
            Self::RemoveNegative { .. } => "remove_negative",
            Self::RemoveInvalid { .. } => "remove_invalid",
            Self::ConvertNumeric { .. } => "convert_numeric",
            Self::RenameColumn { .. } => "rename_column",
            Self::DropColumn { .. } => "drop_column",
            Self::AddDerivedColumn { .. } => "add_derived_column",
            Self::StandardizeText { .. } => "standardize_text",
            Self::RemoveDuplicates { .. } => "remove_duplicates",
            Self::FilterRows { .. } => "filter_rows",
        }
    }

    /// The column a step targets, if it targets exactly one.
    pub fn column(&self) -> Option<&str> {
        match self {
            Self::ConvertDatetime { column, .. }
            | Self::FillNull { column, .. }
            | Self::RemoveNegative { column }
            | Self::RemoveInvalid { column, .. }
            | Self::ConvertNumeric { column }
            | Self::RenameColumn { column, .. }
            | Self::DropColumn { column }
            | Self::StandardizeText { column, .. } => Some(column),
            Self::AddDerivedColumn { new_column, .. } => Some(new_column),
            Self::RemoveDuplicates { .. } | Self::FilterRows { .. } => None,
        }
    }

    /// Parameter checks that do not need the table.
    pub fn check(&self) -> Result<(), String> {
        if let Some(column) = self.column()
            && column.trim().is_empty()
        {
            return Err(format!("{} requires a non-empty column name", self.action()));
        }

        match self {
            Self::FillNull {
                strategy: FillStrategy::Value,
                value: None | Some(serde_json::Value::Null),
                ..
            } => Err("fill_null with strategy 'value' requires a non-null value".to_owned()),
            Self::RemoveInvalid { valid_values, .. } if valid_values.is_empty() => {
                Err("remove_invalid requires at least one valid value".to_owned())
            }
            Self::RenameColumn { new_name, .. } if new_name.trim().is_empty() => {
                Err("rename_column requires a non-empty new_name".to_owned())
            }
            Self::RemoveDuplicates {
                subset: Some(subset),
            } if subset.is_empty() => {
                Err("remove_duplicates subset must list at least one column".to_owned())
            }
            Self::FilterRows { condition } if condition.trim().is_empty() => {
                Err("filter_rows requires a condition".to_owned())
            }
            Self::AddDerivedColumn {
                expression: Some(expression),
                ..
            } if expression.trim().is_empty() => {
                Err("add_derived_column expression must not be empty".to_owned())
            }
            _ => Ok(()),
        }
    }
}

/// Strategy for [`Step::FillNull`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillStrategy {
    Value,
    Mean,
    Median,
    Mode,
    #[serde(alias = "ffill")]
    ForwardFill,
    #[serde(alias = "drop_rows")]
    Drop,
}

impl FillStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Value => "value",
            Self::Mean => "mean",
            Self::Median => "median",
            Self::Mode => "mode",
            Self::ForwardFill => "forward_fill",
            Self::Drop => "drop",
        }
    }
}

/// Target case for [`Step::StandardizeText`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextCase {
    #[default]
    Lower,
    Upper,
    Title,
}

impl TextCase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lower => "lower",
            Self::Upper => "upper",
            Self::Title => "title",
        }
    }

    pub fn apply(self, text: &str) -> String {
        match self {
            Self::Lower => text.to_lowercase(),
            Self::Upper => text.to_uppercase(),
            Self::Title => title_case(text),
        }
    }
}

/// Uppercase the first letter of every alphabetic run, lowercase the rest.
fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_word = false;
    for ch in text.chars() {
        if ch.is_alphabetic() {
            if in_word {
                out.extend(ch.to_lowercase());
            } else {
                out.extend(ch.to_uppercase());
            }
            in_word = true;
        } else {
            out.push(ch);
            in_word = false;
        }
    }
    out
}
