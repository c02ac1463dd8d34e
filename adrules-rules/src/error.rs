use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// A single violated field in a rule definition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldViolation {
    /// Dotted path to the offending field, e.g. `conditions[1].operator`.
    pub field: String,
    /// Machine readable category: `required`, `invalid`, `out_of_range` or
    /// `configuration` (options that do not fit the execution type).
    pub code: String,
    pub message: String,
}

impl FieldViolation {
    pub fn required(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            code: "required".into(),
            message: "field is required".into(),
        }
    }

    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            code: "invalid".into(),
            message: message.into(),
        }
    }

    pub fn out_of_range(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            code: "out_of_range".into(),
            message: message.into(),
        }
    }

    pub fn configuration(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            code: "configuration".into(),
            message: message.into(),
        }
    }
}

/// Malformed or inconsistent rule definition. Carries every violation found,
/// not just the first one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub violations: Vec<FieldViolation>,
}

impl ValidationError {
    pub fn fields(&self) -> Vec<&str> {
        self.violations
            .iter()
            .map(|violation| violation.field.as_str())
            .collect()
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.violations.iter().any(|violation| violation.field == field)
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rule definition is invalid: ")?;
        for (index, violation) in self.violations.iter().enumerate() {
            if index > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{} ({})", violation.field, violation.message)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

/// Errors returned by the rule store, history logger and template loader.
#[derive(Debug, Error)]
pub enum RuleError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("rule not found: {0}")]
    NotFound(Uuid),
    #[error("rule storage failure: {0}")]
    Storage(String),
    #[error("template not found: {0}")]
    TemplateNotFound(String),
    #[error("templates path does not exist: {0}")]
    MissingPath(String),
    #[error("failed to read templates from {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse templates from {path}: {message}")]
    Parse { path: String, message: String },
    #[error("duplicate template key detected: {key}")]
    DuplicateTemplate { key: String },
}

impl RuleError {
    pub fn from_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        RuleError::Io {
            path: path.into().display().to_string(),
            source,
        }
    }

    pub fn parse_error(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        RuleError::Parse {
            path: path.into().display().to_string(),
            message: message.into(),
        }
    }
}

impl From<sqlx::Error> for RuleError {
    fn from(err: sqlx::Error) -> Self {
        RuleError::Storage(err.to_string())
    }
}

impl From<adrules_core::AdRulesError> for RuleError {
    fn from(err: adrules_core::AdRulesError) -> Self {
        RuleError::Storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_lists_every_violation() {
        let err = ValidationError {
            violations: vec![
                FieldViolation::required("name"),
                FieldViolation::configuration(
                    "execution_options.endpoint_url",
                    "PING_ENDPOINT requires an endpoint_url",
                ),
            ],
        };
        let rendered = err.to_string();
        assert!(rendered.contains("name"));
        assert!(rendered.contains("execution_options.endpoint_url"));
        assert_eq!(err.fields(), vec!["name", "execution_options.endpoint_url"]);
    }
}
