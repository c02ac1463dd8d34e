use std::fmt;
use std::str::FromStr;

use adrules_protocol::entity::{EntityType, TimePreset};
use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::action::{Action, ExecutionType};
use crate::condition::Condition;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleStatus {
    #[default]
    Enabled,
    Disabled,
}

impl RuleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleStatus::Enabled => "ENABLED",
            RuleStatus::Disabled => "DISABLED",
        }
    }
}

impl fmt::Display for RuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuleStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "ENABLED" => Ok(RuleStatus::Enabled),
            "DISABLED" => Ok(RuleStatus::Disabled),
            _ => Err(format!("unknown status {value:?}")),
        }
    }
}

/// How the dispatcher decides a rule is due.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvaluationType {
    /// Polled on a fixed clock inside the rule's schedule window.
    Schedule,
    /// Evaluated as soon as fresh metrics arrive for a watched entity.
    Trigger,
}

impl EvaluationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvaluationType::Schedule => "SCHEDULE",
            EvaluationType::Trigger => "TRIGGER",
        }
    }
}

impl FromStr for EvaluationType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "SCHEDULE" => Ok(EvaluationType::Schedule),
            "TRIGGER" => Ok(EvaluationType::Trigger),
            _ => Err(format!("unknown evaluation type {value:?}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScheduleType {
    /// Every day; `days` is ignored.
    Daily,
    /// Only on the listed weekdays.
    Weekly,
}

impl FromStr for ScheduleType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "DAILY" => Ok(ScheduleType::Daily),
            "WEEKLY" => Ok(ScheduleType::Weekly),
            _ => Err(format!("unknown schedule type {value:?}")),
        }
    }
}

pub const MINUTES_PER_DAY: u16 = 1440;

/// Window during which SCHEDULE evaluation is permitted, in UTC.
///
/// Minutes are 0..=1439 and days 0..=6 with 0 = Sunday. When
/// `start_minute > end_minute` the window wraps past midnight and belongs to
/// the day it starts on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Schedule {
    pub schedule_type: ScheduleType,
    pub start_minute: u16,
    pub end_minute: u16,
    #[serde(default)]
    pub days: Vec<u8>,
}

impl Schedule {
    pub fn always() -> Self {
        Self {
            schedule_type: ScheduleType::Daily,
            start_minute: 0,
            end_minute: MINUTES_PER_DAY - 1,
            days: Vec::new(),
        }
    }

    fn day_allowed(&self, weekday: u8) -> bool {
        match self.schedule_type {
            ScheduleType::Daily => true,
            ScheduleType::Weekly => self.days.contains(&weekday),
        }
    }

    /// Whether `now` falls inside the window.
    pub fn allows(&self, now: DateTime<Utc>) -> bool {
        let minute = (now.hour() * 60 + now.minute()) as u16;
        let weekday = now.weekday().num_days_from_sunday() as u8;

        if self.start_minute <= self.end_minute {
            return self.day_allowed(weekday)
                && (self.start_minute..=self.end_minute).contains(&minute);
        }

        // Overnight window: the late part belongs to today, the early part
        // to the window that started yesterday.
        if minute >= self.start_minute {
            self.day_allowed(weekday)
        } else if minute <= self.end_minute {
            self.day_allowed((weekday + 6) % 7)
        } else {
            false
        }
    }
}

/// Unit of automation: conditions over an entity set paired with an action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Rule {
    pub id: Uuid,
    pub account_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub entity_type: EntityType,
    pub entity_ids: Vec<String>,
    pub evaluation_type: EvaluationType,
    pub time_preset: TimePreset,
    pub conditions: Vec<Condition>,
    pub action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_count_limit: Option<u32>,
    /// Cooldown between executions, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_frequency: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<Schedule>,
    pub status: RuleStatus,
    pub executions_count: u32,
    #[serde(default)]
    pub last_execution: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Rule {
    pub fn is_enabled(&self) -> bool {
        self.status == RuleStatus::Enabled
    }

    pub fn execution_type(&self) -> ExecutionType {
        self.action.execution_type()
    }

    /// Whether the lifetime execution cap has been reached.
    pub fn limit_reached(&self) -> bool {
        self.execution_count_limit
            .map(|limit| self.executions_count >= limit)
            .unwrap_or(false)
    }

    /// Time left before the rule may execute again, if it is cooling down.
    /// A cooldown too long to represent never expires.
    pub fn cooldown_remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        let frequency = self.action_frequency?;
        let last = self.last_execution?;
        let ready_at = i64::try_from(frequency)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|cooldown| last.checked_add_signed(cooldown));
        match ready_at {
            Some(ready_at) => (now < ready_at).then(|| ready_at - now),
            None => Some(Duration::MAX),
        }
    }

    /// Whether the schedule window permits evaluating at `now`. TRIGGER rules
    /// and rules without a schedule are always inside their window.
    pub fn in_window(&self, now: DateTime<Utc>) -> bool {
        match (&self.evaluation_type, &self.schedule) {
            (EvaluationType::Schedule, Some(schedule)) => schedule.allows(now),
            _ => true,
        }
    }

    pub fn watches(&self, entity_id: &str) -> bool {
        self.entity_ids.iter().any(|id| id == entity_id)
    }
}

/// Optional filters for listing rules.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleFilter {
    pub status: Option<RuleStatus>,
    pub entity_type: Option<EntityType>,
    pub evaluation_type: Option<EvaluationType>,
}

impl RuleFilter {
    pub fn matches(&self, rule: &Rule) -> bool {
        self.status.map_or(true, |status| rule.status == status)
            && self
                .entity_type
                .map_or(true, |entity_type| rule.entity_type == entity_type)
            && self
                .evaluation_type
                .map_or(true, |evaluation_type| rule.evaluation_type == evaluation_type)
    }
}
