//! One evaluation cycle: lock, guard, fetch, evaluate, execute, record.

use std::sync::Arc;

use adrules_protocol::metrics::MetricsSnapshot;
use adrules_rules::alert::{AlertSink, OperationalAlert};
use adrules_rules::history::EVALUATION_ERROR;
use adrules_rules::{evaluate, ExecutionHistoryEntry, HistoryLogger, Rule, RuleStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use tracing::{debug, error, info, warn};

use crate::connector::AdPlatformConnector;
use crate::error::{ConnectorError, EngineError};
use crate::executor::{ActionContext, ActionReport, Executors, PlatformCalls};
use crate::guard::{GuardVerdict, LockTable};
use crate::notifier::Notifier;
use crate::retry::RetryPolicy;
use crate::runtime::TaskHandler;
use crate::task::{CycleOutcome, EvaluationTask, SkipReason};

/// Runs evaluation tasks against the rule store and the ad platform.
pub struct RuleRunner {
    store: RuleStore,
    history: HistoryLogger,
    alerts: Arc<dyn AlertSink>,
    platform: PlatformCalls,
    executors: Executors,
    locks: LockTable,
}

impl RuleRunner {
    pub fn new(
        store: RuleStore,
        history: HistoryLogger,
        alerts: Arc<dyn AlertSink>,
        connector: Arc<dyn AdPlatformConnector>,
        notifier: Arc<dyn Notifier>,
        retry: RetryPolicy,
        locks: LockTable,
    ) -> Result<Self, EngineError> {
        Ok(Self {
            store,
            history,
            alerts,
            platform: PlatformCalls::new(connector.clone(), retry),
            executors: Executors::new(connector, notifier, retry)?,
            locks,
        })
    }

    pub async fn run_cycle(&self, task: &EvaluationTask, now: DateTime<Utc>) -> CycleOutcome {
        let rule_id = task.rule_id;
        let Some(lease) = self.locks.try_acquire(rule_id) else {
            debug!(%rule_id, "rule busy, skipping");
            return CycleOutcome::Skipped(SkipReason::Busy);
        };

        // Read under the lock so counters reflect the previous cycle.
        let rule = match self.store.find(rule_id).await {
            Ok(Some(rule)) => rule,
            Ok(None) => return CycleOutcome::Skipped(SkipReason::Missing),
            Err(err) => {
                error!(%rule_id, error = %err, "failed to load rule");
                return CycleOutcome::EvaluationFailed(err.to_string());
            }
        };

        if !task.is_manual() && !rule.in_window(now) {
            return CycleOutcome::Skipped(SkipReason::OutsideWindow);
        }

        match GuardVerdict::check(&rule, now) {
            GuardVerdict::Proceed => {}
            GuardVerdict::Disabled => return CycleOutcome::Skipped(SkipReason::Disabled),
            GuardVerdict::CoolingDown(remaining) => {
                debug!(%rule_id, ?remaining, "rule cooling down");
                return CycleOutcome::Skipped(SkipReason::CoolingDown);
            }
            GuardVerdict::LimitReached => {
                if let Err(err) = self.store.disable(rule_id).await {
                    error!(%rule_id, error = %err, "failed to auto-disable rule");
                }
                info!(%rule_id, executions = rule.executions_count, "execution cap reached, rule disabled");
                return CycleOutcome::AutoDisabled;
            }
        }

        let snapshots = match self.fetch_snapshots(&rule).await {
            Ok(snapshots) => snapshots,
            Err((entity_id, err)) => {
                let message = format!("snapshot for {entity_id} unavailable: {err}");
                return self.evaluation_failed(&rule, task, now, message).await;
            }
        };

        let mut qualifying = Vec::new();
        for snapshot in snapshots {
            match evaluate(&rule.conditions, &snapshot) {
                Ok(true) => qualifying.push(snapshot),
                Ok(false) => {}
                Err(err) => return self.evaluation_failed(&rule, task, now, err.to_string()).await,
            }
        }
        if qualifying.is_empty() {
            debug!(%rule_id, "conditions not met");
            return CycleOutcome::NotFired;
        }

        lease.executing();
        let report = self
            .executors
            .run(&ActionContext {
                rule: &rule,
                snapshots: &qualifying,
                triggered_at: now,
                is_manual: task.is_manual(),
            })
            .await;

        self.record(&rule, task, now, &report).await;
        drop(lease);

        CycleOutcome::Executed {
            affected_ids: report.affected_ids,
            error: report.error,
        }
    }

    async fn fetch_snapshots(&self, rule: &Rule) -> Result<Vec<MetricsSnapshot>, (String, ConnectorError)> {
        let fetches = rule.entity_ids.iter().map(|entity_id| async move {
            self.platform
                .snapshot(entity_id, rule.entity_type, rule.time_preset)
                .await
                .map_err(|err| (entity_id.clone(), err))
        });
        join_all(fetches).await.into_iter().collect()
    }

    async fn evaluation_failed(
        &self,
        rule: &Rule,
        task: &EvaluationTask,
        now: DateTime<Utc>,
        message: String,
    ) -> CycleOutcome {
        warn!(rule_id = %rule.id, %message, "evaluation skipped");
        let mut entry =
            ExecutionHistoryEntry::failure(rule.id, task.is_manual(), Vec::new(), EVALUATION_ERROR, message.clone());
        entry.time = now;
        if let Err(err) = self.history.append(entry).await {
            warn!(rule_id = %rule.id, error = %err, "evaluation error not recorded");
        }
        CycleOutcome::EvaluationFailed(message)
    }

    async fn record(&self, rule: &Rule, task: &EvaluationTask, now: DateTime<Utc>, report: &ActionReport) {
        let mut entry = match &report.error {
            None => ExecutionHistoryEntry::success(rule.id, task.is_manual(), report.affected_ids.clone()),
            Some(err) => ExecutionHistoryEntry::failure(
                rule.id,
                task.is_manual(),
                report.affected_ids.clone(),
                err.code.as_str(),
                err.message.clone(),
            ),
        };
        entry.time = now;
        if let Err(err) = self.history.append(entry).await {
            warn!(rule_id = %rule.id, error = %err, "execution not recorded in history");
        }

        if let Some(err) = &report.error {
            self.alerts.raise(OperationalAlert::ExecutionFailed {
                rule_id: rule.id,
                code: err.code.to_string(),
                message: err.message.clone(),
            });
        }

        // A partial failure still changed entities, so it counts.
        if report.error.is_none() || !report.affected_ids.is_empty() {
            match self.store.record_execution(rule.id, now).await {
                Ok(updated) => info!(
                    rule_id = %rule.id,
                    action = %rule.execution_type(),
                    affected = report.affected_ids.len(),
                    executions = updated.executions_count,
                    "rule executed"
                ),
                Err(err) => self.alerts.raise(OperationalAlert::CounterUpdateFailed {
                    rule_id: rule.id,
                    error: err.to_string(),
                }),
            }
        }
    }
}

#[async_trait]
impl TaskHandler for RuleRunner {
    async fn handle(&self, task: EvaluationTask) -> CycleOutcome {
        self.run_cycle(&task, Utc::now()).await
    }
}
