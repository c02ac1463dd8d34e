use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ExecutionError;

/// Why a rule was queued for evaluation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskTrigger {
    /// Periodic sweep of SCHEDULE rules (or the TRIGGER fallback poll).
    Schedule,
    /// A fresh snapshot arrived for a watched entity.
    Snapshot { entity_id: String },
    /// Operator requested run; bypasses the schedule window.
    Manual,
}

/// One queued evaluation of one rule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EvaluationTask {
    pub id: Uuid,
    pub rule_id: Uuid,
    pub trigger: TaskTrigger,
    pub enqueued_at: DateTime<Utc>,
}

impl EvaluationTask {
    pub fn new(rule_id: Uuid, trigger: TaskTrigger) -> Self {
        Self {
            id: Uuid::new_v4(),
            rule_id,
            trigger,
            enqueued_at: Utc::now(),
        }
    }

    pub fn scheduled(rule_id: Uuid) -> Self {
        Self::new(rule_id, TaskTrigger::Schedule)
    }

    pub fn manual(rule_id: Uuid) -> Self {
        Self::new(rule_id, TaskTrigger::Manual)
    }

    pub fn is_manual(&self) -> bool {
        self.trigger == TaskTrigger::Manual
    }
}

/// Why a cycle ended without evaluating.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The rule was deleted after being queued.
    Missing,
    /// Another worker holds the rule's lock.
    Busy,
    Disabled,
    CoolingDown,
    OutsideWindow,
}

/// Result of one evaluation cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Skipped(SkipReason),
    /// The execution cap was already reached; the rule is now disabled.
    AutoDisabled,
    /// No verdict: a field was missing or snapshots could not be fetched.
    EvaluationFailed(String),
    /// Conditions did not hold.
    NotFired,
    /// The action ran, successfully or not.
    Executed {
        affected_ids: Vec<String>,
        error: Option<ExecutionError>,
    },
    /// The cycle panicked; the worker survived it.
    Crashed(String),
}

impl CycleOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            CycleOutcome::Skipped(_) => "skipped",
            CycleOutcome::AutoDisabled => "auto_disabled",
            CycleOutcome::EvaluationFailed(_) => "evaluation_failed",
            CycleOutcome::NotFired => "not_fired",
            CycleOutcome::Executed { error: None, .. } => "executed",
            CycleOutcome::Executed { error: Some(_), .. } => "execution_failed",
            CycleOutcome::Crashed(_) => "crashed",
        }
    }
}

/// Cycle counters exposed on the status endpoint.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct RuntimeStats {
    pub cycles: u64,
    pub skipped: u64,
    pub auto_disabled: u64,
    pub evaluation_failures: u64,
    pub not_fired: u64,
    pub executed: u64,
    pub execution_failures: u64,
    pub crashed: u64,
}

impl RuntimeStats {
    pub fn record(&mut self, outcome: &CycleOutcome) {
        self.cycles += 1;
        match outcome {
            CycleOutcome::Skipped(_) => self.skipped += 1,
            CycleOutcome::AutoDisabled => self.auto_disabled += 1,
            CycleOutcome::EvaluationFailed(_) => self.evaluation_failures += 1,
            CycleOutcome::NotFired => self.not_fired += 1,
            CycleOutcome::Executed { error: None, .. } => self.executed += 1,
            CycleOutcome::Executed { error: Some(_), .. } => self.execution_failures += 1,
            CycleOutcome::Crashed(_) => self.crashed += 1,
        }
    }
}
