//! Action strategies run when a rule fires.

use std::sync::Arc;
use std::time::Duration;

use adrules_protocol::entity::{EntityStatus, EntityType, TimePreset};
use adrules_protocol::metrics::{MetricValue, MetricsSnapshot};
use adrules_rules::action::{
    Action, ChangeType, ChangeUnit, NotificationOptions, PingOptions, RebalanceOptions, ValueChange,
};
use adrules_rules::Rule;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::connector::{AdPlatformConnector, EntityMutation, EntityState, PlatformLimits};
use crate::error::{ConnectorError, ExecutionError, ExecutionErrorCode};
use crate::notifier::{Notification, Notifier};
use crate::retry::RetryPolicy;

/// Everything an executor needs to know about the firing.
pub struct ActionContext<'a> {
    pub rule: &'a Rule,
    /// Snapshots of the entities whose conditions held.
    pub snapshots: &'a [MetricsSnapshot],
    pub triggered_at: DateTime<Utc>,
    pub is_manual: bool,
}

impl ActionContext<'_> {
    pub fn entity_ids(&self) -> Vec<String> {
        self.snapshots
            .iter()
            .map(|snapshot| snapshot.entity_id.clone())
            .collect()
    }
}

/// Outcome of one action. An error does not discard `affected_ids`: entities
/// changed before the failure stay listed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionReport {
    pub affected_ids: Vec<String>,
    pub error: Option<ExecutionError>,
}

impl ActionReport {
    pub fn success(affected_ids: Vec<String>) -> Self {
        Self {
            affected_ids,
            error: None,
        }
    }

    pub fn failure(affected_ids: Vec<String>, error: ExecutionError) -> Self {
        Self {
            affected_ids,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

#[async_trait]
pub trait ActionExecutor: Send + Sync {
    type Options: Send + Sync;

    async fn execute(&self, ctx: &ActionContext<'_>, options: &Self::Options) -> ActionReport;
}

/// Connector access with the retry policy applied to every call.
#[derive(Clone)]
pub struct PlatformCalls {
    connector: Arc<dyn AdPlatformConnector>,
    retry: RetryPolicy,
}

impl PlatformCalls {
    pub fn new(connector: Arc<dyn AdPlatformConnector>, retry: RetryPolicy) -> Self {
        Self { connector, retry }
    }

    pub fn limits(&self) -> PlatformLimits {
        self.connector.limits()
    }

    pub async fn snapshot(
        &self,
        entity_id: &str,
        entity_type: EntityType,
        time_preset: TimePreset,
    ) -> Result<MetricsSnapshot, ConnectorError> {
        self.retry
            .run("fetch_snapshot", || {
                self.connector
                    .fetch_snapshot(entity_id, entity_type, time_preset)
            })
            .await
    }

    async fn state(&self, entity_id: &str, entity_type: EntityType) -> Result<EntityState, ExecutionError> {
        self.retry
            .run("entity_state", || self.connector.entity_state(entity_id, entity_type))
            .await
            .map_err(|err| ExecutionError::from_connector(entity_id, &err))
    }

    async fn mutate(
        &self,
        entity_id: &str,
        entity_type: EntityType,
        mutation: EntityMutation,
    ) -> Result<(), ExecutionError> {
        self.retry
            .run("mutate_entity", || {
                self.connector
                    .mutate_entity(entity_id, entity_type, mutation)
            })
            .await
            .map_err(|err| ExecutionError::from_connector(entity_id, &err))
    }
}

/// PAUSE and UNPAUSE. Entities already in the target status still count as
/// affected.
pub struct StatusExecutor {
    platform: PlatformCalls,
}

impl StatusExecutor {
    pub fn new(platform: PlatformCalls) -> Self {
        Self { platform }
    }
}

#[async_trait]
impl ActionExecutor for StatusExecutor {
    type Options = EntityStatus;

    async fn execute(&self, ctx: &ActionContext<'_>, target: &EntityStatus) -> ActionReport {
        let mut affected = Vec::new();
        let mut first_error = None;

        for snapshot in ctx.snapshots {
            let mutation = EntityMutation::SetStatus(*target);
            match self
                .platform
                .mutate(&snapshot.entity_id, ctx.rule.entity_type, mutation)
                .await
            {
                Ok(()) => affected.push(snapshot.entity_id.clone()),
                Err(err) => {
                    warn!(rule_id = %ctx.rule.id, entity_id = %snapshot.entity_id, error = %err, "status change failed");
                    first_error.get_or_insert(err);
                }
            }
        }

        match first_error {
            Some(err) => ActionReport::failure(affected, err),
            None => ActionReport::success(affected),
        }
    }
}

/// Which entity amount a [`ValueChangeExecutor`] adjusts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueTarget {
    Budget,
    Bid,
}

impl ValueTarget {
    fn current(self, state: &EntityState) -> Option<i64> {
        match self {
            ValueTarget::Budget => state.budget,
            ValueTarget::Bid => state.bid,
        }
    }

    fn platform_minimum(self, limits: PlatformLimits) -> i64 {
        match self {
            ValueTarget::Budget => limits.min_budget,
            ValueTarget::Bid => limits.min_bid,
        }
    }

    fn mutation(self, value: i64) -> EntityMutation {
        match self {
            ValueTarget::Budget => EntityMutation::SetBudget(value),
            ValueTarget::Bid => EntityMutation::SetBid(value),
        }
    }

    fn name(self) -> &'static str {
        match self {
            ValueTarget::Budget => "budget",
            ValueTarget::Bid => "bid",
        }
    }
}

/// Rounds `numerator / denominator` half up. `denominator` must be positive.
fn div_round_half_up(numerator: i128, denominator: i128) -> i128 {
    (2 * numerator + denominator).div_euclid(2 * denominator)
}

/// Applies `change` to `current` (minor units) before clamping. A result that
/// is not strictly positive is an error.
pub fn apply_change(current: i64, change: &ValueChange) -> Result<i64, ExecutionError> {
    let current_wide = i128::from(current);
    let raw = i128::from(change.value.raw());
    let scale = i128::from(MetricValue::SCALE);

    let amount = match change.unit {
        ChangeUnit::Absolute => raw / scale,
        ChangeUnit::Percent => div_round_half_up(current_wide * raw, 100 * scale),
    };
    let next = match change.change_type {
        ChangeType::IncreaseBy => current_wide + amount,
        ChangeType::DecreaseBy => current_wide - amount,
        ChangeType::SetTo => amount,
    };

    if next <= 0 {
        return Err(ExecutionError::invalid_value(format!(
            "change from {current} would produce non-positive value {next}"
        )));
    }
    i64::try_from(next)
        .map_err(|_| ExecutionError::invalid_value(format!("change from {current} overflows")))
}

/// Clamps to `max(platform_min, min_value)` and `max_value`.
pub fn clamp_value(value: i64, platform_min: i64, change: &ValueChange) -> i64 {
    let floor = change.min_value.map_or(platform_min, |min| min.max(platform_min));
    let clamped = value.max(floor);
    match change.max_value {
        Some(max) => clamped.min(max.max(floor)),
        None => clamped,
    }
}

/// CHANGE_BUDGET and CHANGE_BID. Entities whose amount would not move are
/// left alone and not reported.
pub struct ValueChangeExecutor {
    platform: PlatformCalls,
    target: ValueTarget,
}

impl ValueChangeExecutor {
    pub fn new(platform: PlatformCalls, target: ValueTarget) -> Self {
        Self { platform, target }
    }

    async fn adjust(&self, ctx: &ActionContext<'_>, entity_id: &str, change: &ValueChange) -> Result<bool, ExecutionError> {
        let state = self.platform.state(entity_id, ctx.rule.entity_type).await?;
        let current = self.target.current(&state).ok_or_else(|| {
            ExecutionError::invalid_value(format!("{entity_id} has no {}", self.target.name()))
        })?;

        let computed = apply_change(current, change)?;
        let platform_min = self.target.platform_minimum(self.platform.limits());
        let next = clamp_value(computed, platform_min, change);
        if next == current {
            debug!(rule_id = %ctx.rule.id, entity_id, current, "value unchanged after clamping");
            return Ok(false);
        }

        self.platform
            .mutate(entity_id, ctx.rule.entity_type, self.target.mutation(next))
            .await?;
        info!(
            rule_id = %ctx.rule.id,
            entity_id,
            target = self.target.name(),
            from = current,
            to = next,
            "entity value changed"
        );
        Ok(true)
    }
}

#[async_trait]
impl ActionExecutor for ValueChangeExecutor {
    type Options = ValueChange;

    async fn execute(&self, ctx: &ActionContext<'_>, change: &ValueChange) -> ActionReport {
        let mut affected = Vec::new();
        let mut first_error = None;

        for snapshot in ctx.snapshots {
            match self.adjust(ctx, &snapshot.entity_id, change).await {
                Ok(true) => affected.push(snapshot.entity_id.clone()),
                Ok(false) => {}
                Err(err) => {
                    warn!(rule_id = %ctx.rule.id, entity_id = %snapshot.entity_id, error = %err, "value change failed");
                    first_error.get_or_insert(err);
                }
            }
        }

        match first_error {
            Some(err) => ActionReport::failure(affected, err),
            None => ActionReport::success(affected),
        }
    }
}

/// NOTIFICATION. Never mutates entities.
pub struct NotificationExecutor {
    notifier: Arc<dyn Notifier>,
    retry: RetryPolicy,
}

impl NotificationExecutor {
    pub fn new(notifier: Arc<dyn Notifier>, retry: RetryPolicy) -> Self {
        Self { notifier, retry }
    }
}

#[async_trait]
impl ActionExecutor for NotificationExecutor {
    type Options = NotificationOptions;

    async fn execute(&self, ctx: &ActionContext<'_>, options: &NotificationOptions) -> ActionReport {
        let entity_ids = ctx.entity_ids();
        let message = options.message.clone().unwrap_or_else(|| {
            format!(
                "Rule \"{}\" triggered for {} {} entities",
                ctx.rule.name,
                entity_ids.len(),
                ctx.rule.entity_type
            )
        });
        let notification = Notification {
            rule_id: ctx.rule.id,
            rule_name: ctx.rule.name.clone(),
            recipients: options.recipients.clone(),
            message,
            entity_ids,
            triggered_at: ctx.triggered_at,
        };

        match self
            .retry
            .run("notify", || self.notifier.notify(&notification))
            .await
        {
            Ok(()) => ActionReport::success(Vec::new()),
            Err(err) => ActionReport::failure(
                Vec::new(),
                ExecutionError::new(ExecutionErrorCode::NotificationFailed, err.to_string()),
            ),
        }
    }
}

/// Splits `total` across `weights`, giving every slot at least `floor` and
/// distributing the rest proportionally. Leftover units from flooring go to
/// the largest remainders (ties to the lower index), so the result always sums
/// to `total`. All-zero weights split evenly.
pub fn allocate(total: i64, weights: &[i64], floor: i64) -> Result<Vec<i64>, ExecutionError> {
    if weights.is_empty() {
        return Ok(Vec::new());
    }
    let slots = weights.len() as i128;
    let reserved = i128::from(floor) * slots;
    let pool = i128::from(total) - reserved;
    if pool < 0 {
        return Err(ExecutionError::invalid_value(format!(
            "total budget {total} cannot give {slots} entities the minimum of {floor}"
        )));
    }

    let mut weights: Vec<i128> = weights.iter().map(|w| i128::from((*w).max(0))).collect();
    let mut weight_sum: i128 = weights.iter().sum();
    if weight_sum == 0 {
        weights.iter_mut().for_each(|w| *w = 1);
        weight_sum = slots;
    }

    let mut shares: Vec<i128> = Vec::with_capacity(weights.len());
    let mut remainders: Vec<(usize, i128)> = Vec::with_capacity(weights.len());
    for (index, weight) in weights.iter().enumerate() {
        let product = pool * weight;
        shares.push(product / weight_sum);
        remainders.push((index, product % weight_sum));
    }

    let leftover = pool - shares.iter().sum::<i128>();
    remainders.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    for (index, _) in remainders.into_iter().take(leftover as usize) {
        shares[index] += 1;
    }

    shares
        .into_iter()
        .map(|share| {
            i64::try_from(share + i128::from(floor))
                .map_err(|_| ExecutionError::invalid_value("rebalanced budget overflows"))
        })
        .collect()
}

/// REBALANCE_BUDGET across the qualifying entities, preserving their total.
pub struct RebalanceExecutor {
    platform: PlatformCalls,
}

impl RebalanceExecutor {
    pub fn new(platform: PlatformCalls) -> Self {
        Self { platform }
    }
}

#[async_trait]
impl ActionExecutor for RebalanceExecutor {
    type Options = RebalanceOptions;

    async fn execute(&self, ctx: &ActionContext<'_>, options: &RebalanceOptions) -> ActionReport {
        if ctx.snapshots.len() < 2 {
            debug!(rule_id = %ctx.rule.id, "fewer than two entities qualify, nothing to rebalance");
            return ActionReport::success(Vec::new());
        }

        let mut current = Vec::with_capacity(ctx.snapshots.len());
        for snapshot in ctx.snapshots {
            let state = match self.platform.state(&snapshot.entity_id, ctx.rule.entity_type).await {
                Ok(state) => state,
                Err(err) => return ActionReport::failure(Vec::new(), err),
            };
            match state.budget {
                Some(budget) => current.push(budget),
                None => {
                    return ActionReport::failure(
                        Vec::new(),
                        ExecutionError::invalid_value(format!("{} has no budget", snapshot.entity_id)),
                    )
                }
            }
        }

        let total = match i64::try_from(current.iter().map(|&budget| i128::from(budget)).sum::<i128>()) {
            Ok(total) => total,
            Err(_) => {
                return ActionReport::failure(Vec::new(), ExecutionError::invalid_value("combined budget overflows"))
            }
        };
        let weights: Vec<i64> = ctx
            .snapshots
            .iter()
            .map(|snapshot| snapshot.get(options.metric).map_or(0, MetricValue::raw))
            .collect();
        let targets = match allocate(total, &weights, self.platform.limits().min_budget) {
            Ok(targets) => targets,
            Err(err) => return ActionReport::failure(Vec::new(), err),
        };

        // Decreases go first so the combined budget never exceeds the total mid-way.
        let mut plan: Vec<(&str, i64, i64)> = ctx
            .snapshots
            .iter()
            .zip(current.iter().zip(&targets))
            .filter(|(_, (before, after))| before != after)
            .map(|(snapshot, (&before, &after))| (snapshot.entity_id.as_str(), before, after))
            .collect();
        plan.sort_by_key(|&(_, before, after)| after > before);

        let mut applied = Vec::with_capacity(plan.len());
        for &(entity_id, before, after) in &plan {
            match self
                .platform
                .mutate(entity_id, ctx.rule.entity_type, EntityMutation::SetBudget(after))
                .await
            {
                Ok(()) => applied.push((entity_id, before)),
                Err(err) => {
                    warn!(rule_id = %ctx.rule.id, entity_id, error = %err, "rebalance failed, restoring budgets");
                    let unrestored = self.restore(ctx, &applied).await;
                    return ActionReport::failure(unrestored, err);
                }
            }
        }

        let affected: Vec<String> = applied.iter().map(|(entity_id, _)| entity_id.to_string()).collect();
        info!(rule_id = %ctx.rule.id, total, metric = %options.metric, changed = affected.len(), "budgets rebalanced");
        ActionReport::success(affected)
    }
}

impl RebalanceExecutor {
    /// Puts already-changed budgets back, newest first. Returns the entities
    /// left at their rebalanced value.
    async fn restore(&self, ctx: &ActionContext<'_>, applied: &[(&str, i64)]) -> Vec<String> {
        let mut unrestored = Vec::new();
        for &(entity_id, before) in applied.iter().rev() {
            if let Err(err) = self
                .platform
                .mutate(entity_id, ctx.rule.entity_type, EntityMutation::SetBudget(before))
                .await
            {
                error!(rule_id = %ctx.rule.id, entity_id, error = %err, "failed to restore budget after rebalance failure");
                unrestored.push(entity_id.to_string());
            }
        }
        unrestored
    }
}

#[derive(Serialize)]
struct PingPayload<'a> {
    rule_id: Uuid,
    rule_name: &'a str,
    entity_type: EntityType,
    entity_ids: Vec<String>,
    snapshots: &'a [MetricsSnapshot],
    triggered_at: DateTime<Utc>,
}

/// PING_ENDPOINT: posts the firing to an external webhook.
pub struct PingExecutor {
    http: reqwest::Client,
    retry: RetryPolicy,
}

impl PingExecutor {
    pub fn new(timeout: Duration, retry: RetryPolicy) -> Result<Self, ConnectorError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| ConnectorError::Connect(err.to_string()))?;
        Ok(Self { http, retry })
    }

    async fn post(&self, url: &str, payload: &PingPayload<'_>) -> Result<(), ConnectorError> {
        let response = self.http.post(url).json(payload).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        Err(ConnectorError::Status {
            status: status.as_u16(),
            body: response.text().await.unwrap_or_default(),
        })
    }
}

#[async_trait]
impl ActionExecutor for PingExecutor {
    type Options = PingOptions;

    async fn execute(&self, ctx: &ActionContext<'_>, options: &PingOptions) -> ActionReport {
        let payload = PingPayload {
            rule_id: ctx.rule.id,
            rule_name: &ctx.rule.name,
            entity_type: ctx.rule.entity_type,
            entity_ids: ctx.entity_ids(),
            snapshots: ctx.snapshots,
            triggered_at: ctx.triggered_at,
        };

        match self
            .retry
            .run("ping_endpoint", || self.post(&options.endpoint_url, &payload))
            .await
        {
            Ok(()) => ActionReport::success(Vec::new()),
            Err(err) => {
                let code = match err {
                    ConnectorError::Status { .. } => ExecutionErrorCode::WebhookStatus,
                    ConnectorError::Timeout => ExecutionErrorCode::Timeout,
                    _ => ExecutionErrorCode::ConnectorError,
                };
                ActionReport::failure(
                    Vec::new(),
                    ExecutionError::new(code, format!("{}: {err}", options.endpoint_url)),
                )
            }
        }
    }
}

/// One executor per execution type, dispatched on the rule's [`Action`].
pub struct Executors {
    status: StatusExecutor,
    budget: ValueChangeExecutor,
    bid: ValueChangeExecutor,
    notification: NotificationExecutor,
    rebalance: RebalanceExecutor,
    ping: PingExecutor,
}

impl Executors {
    pub fn new(
        connector: Arc<dyn AdPlatformConnector>,
        notifier: Arc<dyn Notifier>,
        retry: RetryPolicy,
    ) -> Result<Self, ConnectorError> {
        let platform = PlatformCalls::new(connector, retry);
        Ok(Self {
            status: StatusExecutor::new(platform.clone()),
            budget: ValueChangeExecutor::new(platform.clone(), ValueTarget::Budget),
            bid: ValueChangeExecutor::new(platform.clone(), ValueTarget::Bid),
            notification: NotificationExecutor::new(notifier, retry),
            rebalance: RebalanceExecutor::new(platform),
            ping: PingExecutor::new(retry.attempt_timeout, retry)?,
        })
    }

    pub async fn run(&self, ctx: &ActionContext<'_>) -> ActionReport {
        match &ctx.rule.action {
            Action::Pause => self.status.execute(ctx, &EntityStatus::Paused).await,
            Action::Unpause => self.status.execute(ctx, &EntityStatus::Active).await,
            Action::ChangeBudget(change) => self.budget.execute(ctx, change).await,
            Action::ChangeBid(change) => self.bid.execute(ctx, change).await,
            Action::Notification(options) => self.notification.execute(ctx, options).await,
            Action::RebalanceBudget(options) => self.rebalance.execute(ctx, options).await,
            Action::PingEndpoint(options) => self.ping.execute(ctx, options).await,
        }
    }
}
