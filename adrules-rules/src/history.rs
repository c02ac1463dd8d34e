use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::alert::{AlertSink, OperationalAlert};
use crate::error::RuleError;

/// `exception_code` recorded when a cycle produced no verdict.
pub const EVALUATION_ERROR: &str = "EVALUATION_ERROR";

/// One execution attempt of a rule. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionHistoryEntry {
    pub id: Uuid,
    pub rule_id: Uuid,
    pub time: DateTime<Utc>,
    pub is_manual: bool,
    /// Entity ids the action was applied to.
    pub results: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception_message: Option<String>,
}

impl ExecutionHistoryEntry {
    pub fn success(rule_id: Uuid, is_manual: bool, results: Vec<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            rule_id,
            time: Utc::now(),
            is_manual,
            results,
            exception_code: None,
            exception_message: None,
        }
    }

    pub fn failure(
        rule_id: Uuid,
        is_manual: bool,
        results: Vec<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            exception_code: Some(code.into()),
            exception_message: Some(message.into()),
            ..Self::success(rule_id, is_manual, results)
        }
    }

    pub fn is_failure(&self) -> bool {
        self.exception_code.is_some()
    }
}

#[async_trait]
pub trait HistoryBackend: Send + Sync + 'static {
    async fn append(&self, entry: &ExecutionHistoryEntry) -> Result<(), RuleError>;

    /// Newest first.
    async fn list(&self, rule_id: Uuid, limit: Option<usize>) -> Result<Vec<ExecutionHistoryEntry>, RuleError>;
}

#[derive(Default)]
pub struct InMemoryHistoryBackend {
    entries: RwLock<HashMap<Uuid, Vec<ExecutionHistoryEntry>>>,
}

#[async_trait]
impl HistoryBackend for InMemoryHistoryBackend {
    async fn append(&self, entry: &ExecutionHistoryEntry) -> Result<(), RuleError> {
        self.entries
            .write()
            .entry(entry.rule_id)
            .or_default()
            .push(entry.clone());
        Ok(())
    }

    async fn list(&self, rule_id: Uuid, limit: Option<usize>) -> Result<Vec<ExecutionHistoryEntry>, RuleError> {
        let entries = self.entries.read();
        let Some(entries) = entries.get(&rule_id) else {
            return Ok(Vec::new());
        };
        Ok(entries
            .iter()
            .rev()
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }
}

/// Append-only execution log. Write failures are never silent: they raise an
/// operational alert and are returned to the caller, who must not roll back
/// the action that already happened.
#[derive(Clone)]
pub struct HistoryLogger {
    backend: Arc<dyn HistoryBackend>,
    alerts: Arc<dyn AlertSink>,
}

impl HistoryLogger {
    pub fn new(backend: Arc<dyn HistoryBackend>, alerts: Arc<dyn AlertSink>) -> Self {
        Self { backend, alerts }
    }

    pub fn in_memory(alerts: Arc<dyn AlertSink>) -> Self {
        Self::new(Arc::new(InMemoryHistoryBackend::default()), alerts)
    }

    pub async fn append(&self, entry: ExecutionHistoryEntry) -> Result<(), RuleError> {
        match self.backend.append(&entry).await {
            Ok(()) => {
                debug!(rule_id = %entry.rule_id, failure = entry.is_failure(), "history appended");
                Ok(())
            }
            Err(err) => {
                self.alerts.raise(OperationalAlert::HistoryWriteFailed {
                    rule_id: entry.rule_id,
                    error: err.to_string(),
                });
                Err(err)
            }
        }
    }

    pub async fn list(&self, rule_id: Uuid, limit: Option<usize>) -> Result<Vec<ExecutionHistoryEntry>, RuleError> {
        self.backend.list(rule_id, limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::{AlertLog, TracingAlertSink};

    struct UnavailableBackend;

    #[async_trait]
    impl HistoryBackend for UnavailableBackend {
        async fn append(&self, _entry: &ExecutionHistoryEntry) -> Result<(), RuleError> {
            Err(RuleError::Storage("connection refused".into()))
        }

        async fn list(&self, _rule_id: Uuid, _limit: Option<usize>) -> Result<Vec<ExecutionHistoryEntry>, RuleError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn list_is_newest_first_and_limited() {
        let logger = HistoryLogger::in_memory(Arc::new(TracingAlertSink));
        let rule_id = Uuid::new_v4();
        let mut ids = Vec::new();
        for index in 0..3 {
            let entry = ExecutionHistoryEntry::success(rule_id, index == 2, vec![format!("c-{index}")]);
            ids.push(entry.id);
            logger.append(entry).await.unwrap();
        }

        let entries = logger.list(rule_id, None).await.unwrap();
        assert_eq!(entries.iter().map(|e| e.id).collect::<Vec<_>>(), vec![ids[2], ids[1], ids[0]]);
        assert!(entries[0].is_manual);

        let limited = logger.list(rule_id, Some(1)).await.unwrap();
        assert_eq!(limited.len(), 1);
        assert!(logger.list(Uuid::new_v4(), None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_write_raises_alert() {
        let alerts = AlertLog::new(8, Arc::new(TracingAlertSink));
        let logger = HistoryLogger::new(Arc::new(UnavailableBackend), Arc::new(alerts.clone()));
        let rule_id = Uuid::new_v4();

        let result = logger
            .append(ExecutionHistoryEntry::success(rule_id, false, vec!["c-1".into()]))
            .await;
        assert!(result.is_err());

        let recent = alerts.recent();
        assert_eq!(recent.len(), 1);
        assert!(matches!(
            recent[0].alert,
            OperationalAlert::HistoryWriteFailed { rule_id: id, .. } if id == rule_id
        ));
    }
}
