use std::collections::VecDeque;
use std::sync::Arc;

use adrules_core::logging::ALERT_TARGET;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::error;
use uuid::Uuid;

/// Operational problem that needs a human even though no caller is waiting
/// on it synchronously.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OperationalAlert {
    /// An action ran but its history entry could not be written.
    HistoryWriteFailed { rule_id: Uuid, error: String },
    /// An action failed after exhausting its retries.
    ExecutionFailed {
        rule_id: Uuid,
        code: String,
        message: String,
    },
    /// The rule's counters could not be persisted after an execution.
    CounterUpdateFailed { rule_id: Uuid, error: String },
    /// An evaluation cycle panicked. Its worker keeps running.
    CyclePanicked { rule_id: Uuid, message: String },
}

impl OperationalAlert {
    pub fn rule_id(&self) -> Uuid {
        match self {
            OperationalAlert::HistoryWriteFailed { rule_id, .. }
            | OperationalAlert::ExecutionFailed { rule_id, .. }
            | OperationalAlert::CounterUpdateFailed { rule_id, .. }
            | OperationalAlert::CyclePanicked { rule_id, .. } => *rule_id,
        }
    }
}

/// Destination for operational alerts.
pub trait AlertSink: Send + Sync + 'static {
    fn raise(&self, alert: OperationalAlert);
}

/// Emits alerts as `error` events on the dedicated alert target.
#[derive(Debug, Default, Clone)]
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    fn raise(&self, alert: OperationalAlert) {
        match &alert {
            OperationalAlert::HistoryWriteFailed { rule_id, error } => {
                error!(target: ALERT_TARGET, %rule_id, %error, "execution happened but history was not recorded");
            }
            OperationalAlert::ExecutionFailed {
                rule_id,
                code,
                message,
            } => {
                error!(target: ALERT_TARGET, %rule_id, %code, %message, "rule action failed");
            }
            OperationalAlert::CounterUpdateFailed { rule_id, error } => {
                error!(target: ALERT_TARGET, %rule_id, %error, "failed to persist rule counters");
            }
            OperationalAlert::CyclePanicked { rule_id, message } => {
                error!(target: ALERT_TARGET, %rule_id, %message, "evaluation cycle panicked");
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AlertRecord {
    pub raised_at: DateTime<Utc>,
    pub alert: OperationalAlert,
}

/// Keeps the most recent alerts in memory (newest first) and forwards each
/// one to an inner sink.
#[derive(Clone)]
pub struct AlertLog {
    capacity: usize,
    records: Arc<Mutex<VecDeque<AlertRecord>>>,
    forward: Arc<dyn AlertSink>,
}

impl AlertLog {
    pub fn new(capacity: usize, forward: Arc<dyn AlertSink>) -> Self {
        Self {
            capacity: capacity.max(1),
            records: Arc::new(Mutex::new(VecDeque::new())),
            forward,
        }
    }

    pub fn recent(&self) -> Vec<AlertRecord> {
        self.records.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for AlertLog {
    fn default() -> Self {
        Self::new(256, Arc::new(TracingAlertSink))
    }
}

impl AlertSink for AlertLog {
    fn raise(&self, alert: OperationalAlert) {
        {
            let mut records = self.records.lock();
            records.push_front(AlertRecord {
                raised_at: Utc::now(),
                alert: alert.clone(),
            });
            while records.len() > self.capacity {
                records.pop_back();
            }
        }
        self.forward.raise(alert);
    }
}
