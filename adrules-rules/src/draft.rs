//! Loose, user-facing rule input and its validation into typed definitions.
//!
//! Drafts keep every enum as a string and every field optional so that
//! validation can report all problems at once instead of failing on the first
//! serde error.

use std::collections::HashSet;
use std::str::FromStr;

use adrules_protocol::entity::{EntityType, TimePreset};
use adrules_protocol::metrics::{MetricField, MetricValue};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::action::{
    Action, ChangeType, ChangeUnit, ExecutionType, NotificationOptions, PingOptions,
    RebalanceOptions, ValueChange,
};
use crate::condition::{Condition, ConditionValue, Operator};
use crate::error::{FieldViolation, ValidationError};
use crate::rule::{EvaluationType, Rule, RuleStatus, Schedule, ScheduleType, MINUTES_PER_DAY};

/// Longest accepted cooldown: one leap year, in seconds.
pub const MAX_ACTION_FREQUENCY_SECS: i64 = 366 * 24 * 60 * 60;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ConditionDraft {
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default)]
    pub operator: Option<String>,
    #[serde(default)]
    pub value: Option<Value>,
}

/// Options keyed by `execution_type`, plus the limits shared by every kind.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExecutionOptionsDraft {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_value: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_value: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipients: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_count_limit: Option<i64>,
    /// Cooldown in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_frequency: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ScheduleDraft {
    #[serde(default)]
    pub schedule_type: Option<String>,
    #[serde(default)]
    pub start_minute: Option<i64>,
    #[serde(default)]
    pub end_minute: Option<i64>,
    #[serde(default)]
    pub days: Option<Vec<i64>>,
}

/// Rule definition as submitted by a user or produced from a template.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RuleDraft {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub entity_type: Option<String>,
    #[serde(default)]
    pub entity_ids: Vec<String>,
    #[serde(default)]
    pub evaluation_type: Option<String>,
    #[serde(default)]
    pub time_preset: Option<String>,
    #[serde(default)]
    pub conditions: Vec<ConditionDraft>,
    #[serde(default)]
    pub execution_type: Option<String>,
    #[serde(default)]
    pub execution_options: ExecutionOptionsDraft,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<ScheduleDraft>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// Partial update. Present fields replace the stored ones; the merged result
/// is validated as a whole. `execution_options` and `schedule` are replaced
/// wholesale when present.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RulePatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub entity_type: Option<String>,
    #[serde(default)]
    pub entity_ids: Option<Vec<String>>,
    #[serde(default)]
    pub evaluation_type: Option<String>,
    #[serde(default)]
    pub time_preset: Option<String>,
    #[serde(default)]
    pub conditions: Option<Vec<ConditionDraft>>,
    #[serde(default)]
    pub execution_type: Option<String>,
    #[serde(default)]
    pub execution_options: Option<ExecutionOptionsDraft>,
    #[serde(default)]
    pub schedule: Option<ScheduleDraft>,
    #[serde(default)]
    pub status: Option<String>,
    /// Zero `executions_count` and clear `last_execution`.
    #[serde(default)]
    pub reset_counters: bool,
}

impl RulePatch {
    pub fn apply_to(&self, mut draft: RuleDraft) -> RuleDraft {
        if let Some(name) = &self.name {
            draft.name = Some(name.clone());
        }
        if let Some(description) = &self.description {
            draft.description = Some(description.clone());
        }
        if let Some(entity_type) = &self.entity_type {
            draft.entity_type = Some(entity_type.clone());
        }
        if let Some(entity_ids) = &self.entity_ids {
            draft.entity_ids = entity_ids.clone();
        }
        if let Some(evaluation_type) = &self.evaluation_type {
            draft.evaluation_type = Some(evaluation_type.clone());
        }
        if let Some(time_preset) = &self.time_preset {
            draft.time_preset = Some(time_preset.clone());
        }
        if let Some(conditions) = &self.conditions {
            draft.conditions = conditions.clone();
        }
        if let Some(execution_type) = &self.execution_type {
            draft.execution_type = Some(execution_type.clone());
        }
        if let Some(options) = &self.execution_options {
            draft.execution_options = options.clone();
        }
        if let Some(schedule) = &self.schedule {
            draft.schedule = Some(schedule.clone());
        }
        if let Some(status) = &self.status {
            draft.status = Some(status.clone());
        }
        draft
    }
}

/// Validated user-owned part of a rule; runtime counters and timestamps are
/// added by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleDefinition {
    pub name: String,
    pub description: Option<String>,
    pub entity_type: EntityType,
    pub entity_ids: Vec<String>,
    pub evaluation_type: EvaluationType,
    pub time_preset: TimePreset,
    pub conditions: Vec<Condition>,
    pub action: Action,
    pub execution_count_limit: Option<u32>,
    pub action_frequency: Option<u64>,
    pub schedule: Option<Schedule>,
    pub status: RuleStatus,
}

impl RuleDefinition {
    /// Copies the definition onto `rule`, leaving identity and counters alone.
    pub fn apply(self, rule: &mut Rule) {
        rule.name = self.name;
        rule.description = self.description;
        rule.entity_type = self.entity_type;
        rule.entity_ids = self.entity_ids;
        rule.evaluation_type = self.evaluation_type;
        rule.time_preset = self.time_preset;
        rule.conditions = self.conditions;
        rule.action = self.action;
        rule.execution_count_limit = self.execution_count_limit;
        rule.action_frequency = self.action_frequency;
        rule.schedule = self.schedule;
        rule.status = self.status;
    }
}

#[derive(Default)]
struct Violations(Vec<FieldViolation>);

impl Violations {
    fn push(&mut self, violation: FieldViolation) {
        self.0.push(violation);
    }

    fn parse<T>(&mut self, field: &str, raw: Option<&str>) -> Option<T>
    where
        T: FromStr<Err = String>,
    {
        match raw.map(str::trim).filter(|value| !value.is_empty()) {
            None => {
                self.push(FieldViolation::required(field));
                None
            }
            Some(value) => match value.parse() {
                Ok(parsed) => Some(parsed),
                Err(message) => {
                    self.push(FieldViolation::invalid(field, message));
                    None
                }
            },
        }
    }

    fn metric_value(&mut self, field: &str, raw: &Value) -> Option<MetricValue> {
        match serde_json::from_value::<MetricValue>(raw.clone()) {
            Ok(value) => Some(value),
            Err(err) => {
                self.push(FieldViolation::invalid(field, format!("not a number: {err}")));
                None
            }
        }
    }

    /// Options that do not belong to `execution_type`.
    fn reject_foreign<T>(&mut self, present: &Option<T>, name: &str, execution_type: ExecutionType) {
        if present.is_some() {
            self.push(FieldViolation::configuration(
                format!("execution_options.{name}"),
                format!("{name} is not an option of {execution_type}"),
            ));
        }
    }

    fn finish<T>(self, value: Option<T>) -> Result<T, ValidationError> {
        match value {
            Some(value) if self.0.is_empty() => Ok(value),
            _ => Err(ValidationError { violations: self.0 }),
        }
    }
}

impl RuleDraft {
    /// Validates the draft, collecting every violation.
    pub fn validate(&self) -> Result<RuleDefinition, ValidationError> {
        let mut v = Violations::default();

        let name = match self.name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => Some(name.to_string()),
            _ => {
                v.push(FieldViolation::required("name"));
                None
            }
        };
        let description = self
            .description
            .as_deref()
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .map(str::to_string);

        let entity_type = v.parse::<EntityType>("entity_type", self.entity_type.as_deref());
        let entity_ids = validate_entity_ids(&mut v, &self.entity_ids);
        let evaluation_type =
            v.parse::<EvaluationType>("evaluation_type", self.evaluation_type.as_deref());
        let time_preset = match self.time_preset.as_deref() {
            None => Some(TimePreset::default()),
            raw => v.parse::<TimePreset>("time_preset", raw),
        };
        let conditions = validate_conditions(&mut v, &self.conditions);
        let execution_type =
            v.parse::<ExecutionType>("execution_type", self.execution_type.as_deref());
        let action = execution_type
            .and_then(|execution_type| validate_action(&mut v, execution_type, &self.execution_options));
        let (execution_count_limit, action_frequency) =
            validate_limits(&mut v, &self.execution_options);

        let schedule = match (&self.schedule, evaluation_type) {
            (Some(schedule), _) => validate_schedule(&mut v, schedule),
            (None, Some(EvaluationType::Schedule)) => {
                v.push(FieldViolation::configuration(
                    "schedule",
                    "SCHEDULE rules require a schedule",
                ));
                None
            }
            (None, _) => None,
        };
        let status = match self.status.as_deref() {
            None => Some(RuleStatus::Enabled),
            raw => v.parse::<RuleStatus>("status", raw),
        };

        let definition = (|| {
            Some(RuleDefinition {
                name: name?,
                description,
                entity_type: entity_type?,
                entity_ids: entity_ids?,
                evaluation_type: evaluation_type?,
                time_preset: time_preset?,
                conditions: conditions?,
                action: action?,
                execution_count_limit,
                action_frequency,
                schedule,
                status: status?,
            })
        })();
        v.finish(definition)
    }
}

fn validate_entity_ids(v: &mut Violations, ids: &[String]) -> Option<Vec<String>> {
    if ids.is_empty() {
        v.push(FieldViolation::required("entity_ids"));
        return None;
    }
    let mut seen = HashSet::new();
    let mut valid = true;
    for (index, id) in ids.iter().enumerate() {
        let field = format!("entity_ids[{index}]");
        if id.trim().is_empty() {
            v.push(FieldViolation::invalid(field, "entity id must not be blank"));
            valid = false;
        } else if !seen.insert(id.trim()) {
            v.push(FieldViolation::invalid(field, format!("duplicate entity id {id:?}")));
            valid = false;
        }
    }
    valid.then(|| ids.iter().map(|id| id.trim().to_string()).collect())
}

fn validate_conditions(v: &mut Violations, drafts: &[ConditionDraft]) -> Option<Vec<Condition>> {
    if drafts.is_empty() {
        v.push(FieldViolation::required("conditions"));
        return None;
    }
    let mut conditions = Vec::with_capacity(drafts.len());
    for (index, draft) in drafts.iter().enumerate() {
        let prefix = format!("conditions[{index}]");
        let field = v.parse::<MetricField>(&format!("{prefix}.field"), draft.field.as_deref());
        let operator = v.parse::<Operator>(&format!("{prefix}.operator"), draft.operator.as_deref());
        let value_field = format!("{prefix}.value");
        let value = match &draft.value {
            None | Some(Value::Null) => {
                v.push(FieldViolation::required(&value_field));
                None
            }
            Some(Value::Array(items)) if items.len() == 2 => {
                let low = v.metric_value(&value_field, &items[0]);
                let high = v.metric_value(&value_field, &items[1]);
                low.zip(high).map(|(low, high)| ConditionValue::Range(low, high))
            }
            Some(Value::Array(_)) => {
                v.push(FieldViolation::invalid(
                    &value_field,
                    "range value must have exactly two elements",
                ));
                None
            }
            Some(raw) => v.metric_value(&value_field, raw).map(ConditionValue::Single),
        };

        if let (Some(field), Some(operator), Some(value)) = (field, operator, value) {
            match Condition::new(field, operator, value) {
                Ok(condition) => conditions.push(condition),
                Err(message) => v.push(FieldViolation::invalid(&value_field, message)),
            }
        }
    }
    (conditions.len() == drafts.len()).then_some(conditions)
}

fn validate_action(
    v: &mut Violations,
    execution_type: ExecutionType,
    options: &ExecutionOptionsDraft,
) -> Option<Action> {
    let is_change = matches!(
        execution_type,
        ExecutionType::ChangeBudget | ExecutionType::ChangeBid
    );
    if !is_change {
        v.reject_foreign(&options.change_type, "change_type", execution_type);
        v.reject_foreign(&options.value, "value", execution_type);
        v.reject_foreign(&options.unit, "unit", execution_type);
        v.reject_foreign(&options.min_value, "min_value", execution_type);
        v.reject_foreign(&options.max_value, "max_value", execution_type);
    }
    if execution_type != ExecutionType::Notification {
        v.reject_foreign(&options.recipients, "recipients", execution_type);
        v.reject_foreign(&options.message, "message", execution_type);
    }
    if execution_type != ExecutionType::RebalanceBudget {
        v.reject_foreign(&options.metric, "metric", execution_type);
    }
    if execution_type != ExecutionType::PingEndpoint {
        v.reject_foreign(&options.endpoint_url, "endpoint_url", execution_type);
    }

    match execution_type {
        ExecutionType::Pause => Some(Action::Pause),
        ExecutionType::Unpause => Some(Action::Unpause),
        ExecutionType::ChangeBudget => validate_change(v, options).map(Action::ChangeBudget),
        ExecutionType::ChangeBid => validate_change(v, options).map(Action::ChangeBid),
        ExecutionType::Notification => {
            let recipients = match &options.recipients {
                Some(recipients) if !recipients.is_empty() => {
                    let blank = recipients.iter().position(|r| r.trim().is_empty());
                    if let Some(index) = blank {
                        v.push(FieldViolation::invalid(
                            format!("execution_options.recipients[{index}]"),
                            "recipient must not be blank",
                        ));
                        None
                    } else {
                        Some(recipients.iter().map(|r| r.trim().to_string()).collect())
                    }
                }
                _ => {
                    v.push(FieldViolation::configuration(
                        "execution_options.recipients",
                        "NOTIFICATION requires at least one recipient",
                    ));
                    None
                }
            };
            recipients.map(|recipients| {
                Action::Notification(NotificationOptions {
                    recipients,
                    message: options.message.clone(),
                })
            })
        }
        ExecutionType::RebalanceBudget => {
            let metric = match options.metric.as_deref() {
                None => Some(RebalanceOptions::default().metric),
                raw => v.parse::<MetricField>("execution_options.metric", raw),
            };
            metric.map(|metric| Action::RebalanceBudget(RebalanceOptions { metric }))
        }
        ExecutionType::PingEndpoint => {
            let field = "execution_options.endpoint_url";
            match options.endpoint_url.as_deref().map(str::trim) {
                Some(raw) if !raw.is_empty() => match Url::parse(raw) {
                    Ok(url) if matches!(url.scheme(), "http" | "https") => {
                        Some(Action::PingEndpoint(PingOptions {
                            endpoint_url: url.to_string(),
                        }))
                    }
                    Ok(url) => {
                        v.push(FieldViolation::invalid(
                            field,
                            format!("unsupported scheme {:?}", url.scheme()),
                        ));
                        None
                    }
                    Err(err) => {
                        v.push(FieldViolation::invalid(field, format!("not an absolute url: {err}")));
                        None
                    }
                },
                _ => {
                    v.push(FieldViolation::configuration(
                        field,
                        "PING_ENDPOINT requires an endpoint_url",
                    ));
                    None
                }
            }
        }
    }
}

fn validate_change(v: &mut Violations, options: &ExecutionOptionsDraft) -> Option<ValueChange> {
    let change_type =
        v.parse::<ChangeType>("execution_options.change_type", options.change_type.as_deref());
    let unit = v.parse::<ChangeUnit>("execution_options.unit", options.unit.as_deref());
    let value = match &options.value {
        None | Some(Value::Null) => {
            v.push(FieldViolation::required("execution_options.value"));
            None
        }
        Some(raw) => v.metric_value("execution_options.value", raw),
    };

    if let Some(amount) = value {
        if amount <= MetricValue::ZERO {
            v.push(FieldViolation::out_of_range(
                "execution_options.value",
                "value must be greater than zero",
            ));
        } else if unit == Some(ChangeUnit::Absolute) && amount.raw() % MetricValue::SCALE != 0 {
            v.push(FieldViolation::invalid(
                "execution_options.value",
                "absolute amounts are whole minor currency units",
            ));
        }
    }
    for (name, bound) in [("min_value", options.min_value), ("max_value", options.max_value)] {
        if matches!(bound, Some(bound) if bound <= 0) {
            v.push(FieldViolation::out_of_range(
                format!("execution_options.{name}"),
                format!("{name} must be greater than zero"),
            ));
        }
    }
    if let (Some(min), Some(max)) = (options.min_value, options.max_value) {
        if min > max {
            v.push(FieldViolation::invalid(
                "execution_options.min_value",
                format!("min_value {min} exceeds max_value {max}"),
            ));
        }
    }

    Some(ValueChange {
        change_type: change_type?,
        value: value?,
        unit: unit?,
        min_value: options.min_value,
        max_value: options.max_value,
    })
}

fn validate_limits(v: &mut Violations, options: &ExecutionOptionsDraft) -> (Option<u32>, Option<u64>) {
    let limit = options.execution_count_limit.and_then(|limit| {
        let parsed = u32::try_from(limit).ok().filter(|limit| *limit >= 1);
        if parsed.is_none() {
            v.push(FieldViolation::out_of_range(
                "execution_options.execution_count_limit",
                "execution_count_limit must be at least 1",
            ));
        }
        parsed
    });
    let frequency = options.action_frequency.and_then(|seconds| {
        let parsed = u64::try_from(seconds)
            .ok()
            .filter(|_| seconds <= MAX_ACTION_FREQUENCY_SECS);
        if parsed.is_none() {
            v.push(FieldViolation::out_of_range(
                "execution_options.action_frequency",
                format!("action_frequency must be between 0 and {MAX_ACTION_FREQUENCY_SECS} seconds"),
            ));
        }
        parsed
    });
    (limit, frequency)
}

fn validate_schedule(v: &mut Violations, draft: &ScheduleDraft) -> Option<Schedule> {
    let schedule_type =
        v.parse::<ScheduleType>("schedule.schedule_type", draft.schedule_type.as_deref());
    let mut minute = |name: &str, raw: Option<i64>| -> Option<u16> {
        let field = format!("schedule.{name}");
        match raw {
            None => {
                v.push(FieldViolation::required(field));
                None
            }
            Some(value) if (0..i64::from(MINUTES_PER_DAY)).contains(&value) => {
                u16::try_from(value).ok()
            }
            Some(value) => {
                v.push(FieldViolation::out_of_range(
                    field,
                    format!("{value} is outside 0..=1439"),
                ));
                None
            }
        }
    };
    let start_minute = minute("start_minute", draft.start_minute);
    let end_minute = minute("end_minute", draft.end_minute);

    let mut days = Vec::new();
    let mut days_valid = true;
    for (index, day) in draft.days.iter().flatten().enumerate() {
        match u8::try_from(*day).ok().filter(|day| *day <= 6) {
            Some(day) if !days.contains(&day) => days.push(day),
            Some(_) => {}
            None => {
                v.push(FieldViolation::out_of_range(
                    format!("schedule.days[{index}]"),
                    format!("{day} is outside 0..=6"),
                ));
                days_valid = false;
            }
        }
    }
    days.sort_unstable();
    if schedule_type == Some(ScheduleType::Weekly) && days.is_empty() && days_valid {
        v.push(FieldViolation::configuration(
            "schedule.days",
            "WEEKLY schedules require at least one day",
        ));
        days_valid = false;
    }

    if !days_valid {
        return None;
    }
    Some(Schedule {
        schedule_type: schedule_type?,
        start_minute: start_minute?,
        end_minute: end_minute?,
        days,
    })
}

impl From<&Rule> for RuleDraft {
    fn from(rule: &Rule) -> Self {
        let mut options = match &rule.action {
            Action::Pause | Action::Unpause => ExecutionOptionsDraft::default(),
            Action::ChangeBudget(change) | Action::ChangeBid(change) => ExecutionOptionsDraft {
                change_type: serde_json::to_value(change.change_type)
                    .ok()
                    .and_then(|value| value.as_str().map(str::to_string)),
                value: serde_json::to_value(change.value).ok(),
                unit: serde_json::to_value(change.unit)
                    .ok()
                    .and_then(|value| value.as_str().map(str::to_string)),
                min_value: change.min_value,
                max_value: change.max_value,
                ..Default::default()
            },
            Action::Notification(notification) => ExecutionOptionsDraft {
                recipients: Some(notification.recipients.clone()),
                message: notification.message.clone(),
                ..Default::default()
            },
            Action::RebalanceBudget(rebalance) => ExecutionOptionsDraft {
                metric: Some(rebalance.metric.as_str().to_string()),
                ..Default::default()
            },
            Action::PingEndpoint(ping) => ExecutionOptionsDraft {
                endpoint_url: Some(ping.endpoint_url.clone()),
                ..Default::default()
            },
        };
        options.execution_count_limit = rule.execution_count_limit.map(i64::from);
        options.action_frequency = rule
            .action_frequency
            .map(|seconds| i64::try_from(seconds).unwrap_or(i64::MAX));

        RuleDraft {
            name: Some(rule.name.clone()),
            description: rule.description.clone(),
            entity_type: Some(rule.entity_type.as_str().to_string()),
            entity_ids: rule.entity_ids.clone(),
            evaluation_type: Some(rule.evaluation_type.as_str().to_string()),
            time_preset: Some(rule.time_preset.as_str().to_string()),
            conditions: rule
                .conditions
                .iter()
                .map(|condition| ConditionDraft {
                    field: Some(condition.field.as_str().to_string()),
                    operator: Some(condition.operator().as_str().to_string()),
                    value: serde_json::to_value(condition.value()).ok(),
                })
                .collect(),
            execution_type: Some(rule.execution_type().as_str().to_string()),
            execution_options: options,
            schedule: rule.schedule.as_ref().map(|schedule| ScheduleDraft {
                schedule_type: Some(
                    match schedule.schedule_type {
                        ScheduleType::Daily => "DAILY",
                        ScheduleType::Weekly => "WEEKLY",
                    }
                    .to_string(),
                ),
                start_minute: Some(i64::from(schedule.start_minute)),
                end_minute: Some(i64::from(schedule.end_minute)),
                days: Some(schedule.days.iter().map(|day| i64::from(*day)).collect()),
            }),
            status: Some(rule.status.as_str().to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn low_ctr_draft() -> RuleDraft {
        serde_json::from_value(json!({
            "name": "Pause low CTR",
            "entity_type": "CAMPAIGN",
            "entity_ids": ["c-1", "c-2"],
            "evaluation_type": "SCHEDULE",
            "time_preset": "LAST_7D",
            "conditions": [
                {"field": "ctr", "operator": "LESS_THAN", "value": 1.0},
                {"field": "impressions", "operator": "GREATER_THAN", "value": 1000}
            ],
            "execution_type": "PAUSE",
            "execution_options": {"execution_count_limit": 3, "action_frequency": 3600},
            "schedule": {"schedule_type": "DAILY", "start_minute": 0, "end_minute": 1439}
        }))
        .unwrap()
    }

    #[test]
    fn valid_draft_produces_typed_definition() {
        let definition = low_ctr_draft().validate().unwrap();
        assert_eq!(definition.entity_type, EntityType::Campaign);
        assert_eq!(definition.conditions.len(), 2);
        assert_eq!(definition.action, Action::Pause);
        assert_eq!(definition.execution_count_limit, Some(3));
        assert_eq!(definition.action_frequency, Some(3600));
        assert_eq!(definition.status, RuleStatus::Enabled);
    }

    #[test]
    fn action_frequency_is_bounded() {
        let with_frequency = |seconds: i64| {
            let mut draft = low_ctr_draft();
            draft.execution_options.action_frequency = Some(seconds);
            draft.validate()
        };

        assert_eq!(
            with_frequency(MAX_ACTION_FREQUENCY_SECS).unwrap().action_frequency,
            Some(MAX_ACTION_FREQUENCY_SECS as u64)
        );
        for seconds in [MAX_ACTION_FREQUENCY_SECS + 1, i64::MAX, -1] {
            let err = with_frequency(seconds).unwrap_err();
            assert!(err.has_field("execution_options.action_frequency"), "{seconds}: {err}");
        }
    }

    #[test]
    fn every_violation_is_reported() {
        let draft: RuleDraft = serde_json::from_value(json!({
            "name": "  ",
            "entity_type": "KEYWORD",
            "evaluation_type": "TRIGGER",
            "conditions": [
                {"field": "ctr", "operator": "IN_RANGE", "value": 1.0},
                {"field": "likes", "operator": "GREATER_THAN", "value": 1}
            ],
            "execution_type": "PING_ENDPOINT",
            "execution_options": {"execution_count_limit": 0}
        }))
        .unwrap();

        let err = draft.validate().unwrap_err();
        for field in [
            "name",
            "entity_type",
            "entity_ids",
            "conditions[0].value",
            "conditions[1].field",
            "execution_options.endpoint_url",
            "execution_options.execution_count_limit",
        ] {
            assert!(err.has_field(field), "missing violation for {field}: {err}");
        }
        let ping = err
            .violations
            .iter()
            .find(|violation| violation.field == "execution_options.endpoint_url")
            .unwrap();
        assert_eq!(ping.code, "configuration");
    }

    #[test]
    fn empty_conditions_are_rejected() {
        let mut draft = low_ctr_draft();
        draft.conditions.clear();
        let err = draft.validate().unwrap_err();
        assert!(err.has_field("conditions"));
    }

    #[test]
    fn options_of_another_kind_are_a_configuration_error() {
        let mut draft = low_ctr_draft();
        draft.execution_options.endpoint_url = Some("https://hooks.example.com".into());
        let err = draft.validate().unwrap_err();
        assert_eq!(err.violations[0].code, "configuration");
        assert!(err.has_field("execution_options.endpoint_url"));
    }

    #[test]
    fn schedule_rules_need_a_valid_window() {
        let mut draft = low_ctr_draft();
        draft.schedule = None;
        assert!(draft.validate().unwrap_err().has_field("schedule"));

        draft.schedule = Some(ScheduleDraft {
            schedule_type: Some("WEEKLY".into()),
            start_minute: Some(1440),
            end_minute: Some(60),
            days: Some(vec![1, 9]),
        });
        let err = draft.validate().unwrap_err();
        assert!(err.has_field("schedule.start_minute"));
        assert!(err.has_field("schedule.days[1]"));
    }

    #[test]
    fn change_budget_checks_amounts_and_clamps() {
        let mut draft = low_ctr_draft();
        draft.execution_type = Some("CHANGE_BUDGET".into());
        draft.execution_options.change_type = Some("INCREASE_BY".into());
        draft.execution_options.unit = Some("ABSOLUTE".into());
        draft.execution_options.value = Some(json!(12.5));
        draft.execution_options.min_value = Some(500);
        draft.execution_options.max_value = Some(100);

        let err = draft.validate().unwrap_err();
        assert!(err.has_field("execution_options.value"));
        assert!(err.has_field("execution_options.min_value"));

        draft.execution_options.value = Some(json!(250));
        draft.execution_options.max_value = Some(5_000);
        let definition = draft.validate().unwrap();
        match definition.action {
            Action::ChangeBudget(change) => {
                assert_eq!(change.value, MetricValue::from_int(250));
                assert_eq!(change.min_value, Some(500));
            }
            other => panic!("unexpected action {other:?}"),
        }
    }

    #[test]
    fn patch_merges_onto_existing_definition() {
        let draft = low_ctr_draft();
        let patch = RulePatch {
            name: Some("Renamed".into()),
            conditions: Some(vec![ConditionDraft {
                field: Some("cpc".into()),
                operator: Some("NOT_IN_RANGE".into()),
                value: Some(json!([0.5, 2])),
            }]),
            ..Default::default()
        };
        let definition = patch.apply_to(draft).validate().unwrap();
        assert_eq!(definition.name, "Renamed");
        assert_eq!(definition.conditions.len(), 1);
        assert_eq!(definition.entity_ids, vec!["c-1", "c-2"]);
    }
}
