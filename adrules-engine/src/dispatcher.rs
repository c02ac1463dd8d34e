//! Decides which rules are due and feeds them to the worker pool.

use std::time::Duration;

use adrules_rules::{EvaluationType, Rule, RuleStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::runtime::EngineHandle;
use crate::task::{EvaluationTask, TaskTrigger};

/// Fresh metrics are available for an entity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SnapshotEvent {
    pub entity_id: String,
}

#[derive(Debug, Clone, Copy)]
pub struct DispatchIntervals {
    pub tick: Duration,
    pub schedule: Duration,
    pub trigger: Duration,
}

impl From<&EngineConfig> for DispatchIntervals {
    fn from(config: &EngineConfig) -> Self {
        Self {
            tick: config.tick_interval,
            schedule: config.schedule_interval,
            trigger: config.trigger_interval,
        }
    }
}

pub struct Dispatcher {
    store: RuleStore,
    handle: EngineHandle,
    intervals: DispatchIntervals,
}

impl Dispatcher {
    pub fn new(store: RuleStore, handle: EngineHandle, intervals: DispatchIntervals) -> Self {
        Self {
            store,
            handle,
            intervals,
        }
    }

    /// Queues every enabled rule of `evaluation_type` that is due at `now`.
    /// SCHEDULE rules outside their window are left alone.
    pub async fn sweep(&self, evaluation_type: EvaluationType, now: DateTime<Utc>) -> Result<usize, EngineError> {
        let rules = self.store.enabled_rules().await?;
        let due = rules
            .iter()
            .filter(|rule| rule.evaluation_type == evaluation_type)
            .filter(|rule| rule.in_window(now));
        let queued = self.submit_all(due, || TaskTrigger::Schedule)?;
        debug!(evaluation_type = %evaluation_type.as_str(), queued, "sweep finished");
        Ok(queued)
    }

    /// Queues every enabled TRIGGER rule watching the entity.
    pub async fn on_snapshot(&self, event: &SnapshotEvent) -> Result<usize, EngineError> {
        let rules = self.store.enabled_rules().await?;
        let watching = rules
            .iter()
            .filter(|rule| rule.evaluation_type == EvaluationType::Trigger)
            .filter(|rule| rule.watches(&event.entity_id));
        self.submit_all(watching, || TaskTrigger::Snapshot {
            entity_id: event.entity_id.clone(),
        })
    }

    fn submit_all<'a>(
        &self,
        rules: impl Iterator<Item = &'a Rule>,
        trigger: impl Fn() -> TaskTrigger,
    ) -> Result<usize, EngineError> {
        let mut queued = 0;
        for rule in rules {
            if self.handle.is_pending_or_running(&rule.id) {
                continue;
            }
            if self.handle.submit(EvaluationTask::new(rule.id, trigger()))? {
                queued += 1;
            }
        }
        Ok(queued)
    }

    /// Runs until `shutdown` fires or its sender is dropped.
    pub async fn run(self, mut events: mpsc::Receiver<SnapshotEvent>, mut shutdown: oneshot::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.intervals.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_schedule: Option<Instant> = None;
        let mut last_trigger: Option<Instant> = None;
        let mut events_open = true;

        info!(
            tick = ?self.intervals.tick,
            schedule = ?self.intervals.schedule,
            trigger = ?self.intervals.trigger,
            "dispatcher started"
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                event = events.recv(), if events_open => match event {
                    Some(event) => {
                        if let Err(err) = self.on_snapshot(&event).await {
                            warn!(entity_id = %event.entity_id, error = %err, "failed to dispatch snapshot event");
                        }
                    }
                    None => events_open = false,
                },
                _ = ticker.tick() => {
                    let now = Instant::now();
                    if is_due(last_schedule, now, self.intervals.schedule) {
                        last_schedule = Some(now);
                        if let Err(err) = self.sweep(EvaluationType::Schedule, Utc::now()).await {
                            warn!(error = %err, "schedule sweep failed");
                        }
                    }
                    if is_due(last_trigger, now, self.intervals.trigger) {
                        last_trigger = Some(now);
                        if let Err(err) = self.sweep(EvaluationType::Trigger, Utc::now()).await {
                            warn!(error = %err, "trigger fallback sweep failed");
                        }
                    }
                }
            }
        }

        info!("dispatcher stopped");
    }
}

fn is_due(last: Option<Instant>, now: Instant, interval: Duration) -> bool {
    last.map_or(true, |last| now.duration_since(last) >= interval)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::LockTable;
    use crate::runtime::ExecutionRuntime;
    use adrules_rules::draft::{ConditionDraft, ExecutionOptionsDraft, RuleDraft, ScheduleDraft};
    use adrules_rules::{AlertLog, RuleStatus};
    use std::sync::Arc;
    use chrono::TimeZone;
    use serde_json::json;

    fn draft(entity: &str, schedule: Option<ScheduleDraft>) -> RuleDraft {
        RuleDraft {
            name: Some(format!("watch {entity}")),
            entity_type: Some("CAMPAIGN".into()),
            entity_ids: vec![entity.into()],
            evaluation_type: Some(if schedule.is_some() { "SCHEDULE" } else { "TRIGGER" }.into()),
            conditions: vec![ConditionDraft {
                field: Some("roas".into()),
                operator: Some("LESS_THAN".into()),
                value: Some(json!(1.5)),
            }],
            execution_type: Some("PAUSE".into()),
            execution_options: ExecutionOptionsDraft::default(),
            schedule,
            ..RuleDraft::default()
        }
    }

    fn business_hours() -> ScheduleDraft {
        ScheduleDraft {
            schedule_type: Some("WEEKLY".into()),
            start_minute: Some(9 * 60),
            end_minute: Some(17 * 60),
            days: Some(vec![1, 2, 3, 4, 5]),
        }
    }

    fn dispatcher(store: &RuleStore) -> (Dispatcher, EngineHandle) {
        // No workers: queued tasks stay visible.
        let runtime = ExecutionRuntime::new(LockTable::new(), Arc::new(AlertLog::default()));
        let handle = runtime.handle();
        let intervals = DispatchIntervals {
            tick: Duration::from_millis(10),
            schedule: Duration::from_secs(600),
            trigger: Duration::from_secs(60),
        };
        (Dispatcher::new(store.clone(), handle.clone(), intervals), handle)
    }

    #[tokio::test]
    async fn schedule_sweep_respects_windows() {
        let store = RuleStore::in_memory();
        store.create("acct", &draft("c-1", Some(business_hours()))).await.unwrap();
        let (dispatcher, handle) = dispatcher(&store);

        let sunday = Utc.with_ymd_and_hms(2024, 1, 7, 10, 0, 0).unwrap();
        assert_eq!(dispatcher.sweep(EvaluationType::Schedule, sunday).await.unwrap(), 0);

        let monday = Utc.with_ymd_and_hms(2024, 1, 8, 10, 0, 0).unwrap();
        assert_eq!(dispatcher.sweep(EvaluationType::Schedule, monday).await.unwrap(), 1);
        // Already queued: the next sweep adds nothing.
        assert_eq!(dispatcher.sweep(EvaluationType::Schedule, monday).await.unwrap(), 0);
        assert_eq!(handle.pending(), 1);
    }

    #[tokio::test]
    async fn snapshot_events_queue_only_watching_trigger_rules() {
        let store = RuleStore::in_memory();
        let watching = store.create("acct", &draft("c-1", None)).await.unwrap();
        store.create("acct", &draft("c-2", None)).await.unwrap();
        let disabled = store.create("acct", &draft("c-1", None)).await.unwrap();
        store.set_status("acct", disabled.id, RuleStatus::Disabled).await.unwrap();
        store.create("acct", &draft("c-1", Some(business_hours()))).await.unwrap();
        let (dispatcher, handle) = dispatcher(&store);

        let queued = dispatcher
            .on_snapshot(&SnapshotEvent {
                entity_id: "c-1".into(),
            })
            .await
            .unwrap();
        assert_eq!(queued, 1);
        assert!(handle.is_pending_or_running(&watching.id));
    }

    #[tokio::test]
    async fn run_loop_sweeps_and_stops_on_shutdown() {
        let store = RuleStore::in_memory();
        store.create("acct", &draft("c-1", None)).await.unwrap();
        let (dispatcher, handle) = dispatcher(&store);
        let (_events_tx, events_rx) = mpsc::channel(8);
        let (stop_tx, stop_rx) = oneshot::channel();

        let join = tokio::spawn(dispatcher.run(events_rx, stop_rx));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(handle.pending(), 1);

        stop_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), join)
            .await
            .unwrap()
            .unwrap();
    }
}
