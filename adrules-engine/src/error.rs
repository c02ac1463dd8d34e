use std::fmt;

use adrules_rules::RuleError;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Errors that may occur when interacting with the runtime engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("rule not found: {0}")]
    RuleNotFound(Uuid),
    #[error("runtime is shutting down")]
    ShuttingDown,
    #[error(transparent)]
    Rules(#[from] RuleError),
    #[error(transparent)]
    Connector(#[from] ConnectorError),
    #[error("invalid engine configuration: {0}")]
    Config(String),
}

/// Failure talking to the ad platform or to an outbound webhook.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectorError {
    #[error("connector call timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("failed to decode connector response: {0}")]
    Decode(String),
    #[error("entity not found: {0}")]
    EntityNotFound(String),
    #[error("invalid url {url}: {message}")]
    InvalidUrl { url: String, message: String },
    #[error("transient connector failure: {0}")]
    Transient(String),
    #[error("connector rejected request: {0}")]
    Rejected(String),
}

impl ConnectorError {
    /// Whether the call may succeed if retried.
    pub fn is_transient(&self) -> bool {
        match self {
            ConnectorError::Timeout | ConnectorError::Connect(_) | ConnectorError::Transient(_) => true,
            ConnectorError::Status { status, .. } => *status == 429 || (500..600).contains(status),
            _ => false,
        }
    }
}

impl From<reqwest::Error> for ConnectorError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ConnectorError::Timeout
        } else if err.is_connect() {
            ConnectorError::Connect(err.to_string())
        } else if err.is_decode() {
            ConnectorError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            ConnectorError::Status {
                status: status.as_u16(),
                body: err.to_string(),
            }
        } else {
            ConnectorError::Transient(err.to_string())
        }
    }
}

/// Category recorded as `exception_code` in execution history.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionErrorCode {
    ConnectorError,
    InvalidValue,
    WebhookStatus,
    NotificationFailed,
    Timeout,
}

impl ExecutionErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionErrorCode::ConnectorError => "CONNECTOR_ERROR",
            ExecutionErrorCode::InvalidValue => "INVALID_VALUE",
            ExecutionErrorCode::WebhookStatus => "WEBHOOK_STATUS",
            ExecutionErrorCode::NotificationFailed => "NOTIFICATION_FAILED",
            ExecutionErrorCode::Timeout => "TIMEOUT",
        }
    }
}

impl fmt::Display for ExecutionErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An action that failed after its retries were exhausted.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct ExecutionError {
    pub code: ExecutionErrorCode,
    pub message: String,
}

impl ExecutionError {
    pub fn new(code: ExecutionErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn invalid_value(message: impl Into<String>) -> Self {
        Self::new(ExecutionErrorCode::InvalidValue, message)
    }

    /// Maps a connector failure on an entity call.
    pub fn from_connector(entity_id: &str, err: &ConnectorError) -> Self {
        let code = match err {
            ConnectorError::Timeout => ExecutionErrorCode::Timeout,
            _ => ExecutionErrorCode::ConnectorError,
        };
        Self::new(code, format!("{entity_id}: {err}"))
    }
}
