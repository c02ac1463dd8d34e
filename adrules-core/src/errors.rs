use std::io;

use thiserror::Error;

/// Result type used across the core crate.
pub type Result<T> = std::result::Result<T, AdRulesError>;

/// Canonical error representation shared by all services.
#[derive(Debug, Error)]
pub enum AdRulesError {
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    #[error("deserialization error: {0}")]
    DeserializationError(String),

    #[error("database error: {0}")]
    DatabaseError(String),

    #[error("migration error: {0}")]
    MigrationError(String),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("general error: {0}")]
    GeneralError(String),
}

impl From<serde_json::Error> for AdRulesError {
    fn from(err: serde_json::Error) -> Self {
        AdRulesError::DeserializationError(err.to_string())
    }
}

impl From<sqlx::Error> for AdRulesError {
    fn from(err: sqlx::Error) -> Self {
        AdRulesError::DatabaseError(err.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for AdRulesError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        AdRulesError::MigrationError(err.to_string())
    }
}

impl From<anyhow::Error> for AdRulesError {
    fn from(err: anyhow::Error) -> Self {
        AdRulesError::GeneralError(err.to_string())
    }
}

/// Dedicated configuration error used by the configuration module.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for environment variable {key}")]
    InvalidValue { key: String, value: String },
}

impl From<ConfigError> for AdRulesError {
    fn from(value: ConfigError) -> Self {
        AdRulesError::ConfigError(value.to_string())
    }
}
