use std::fmt;
use std::str::FromStr;

use adrules_protocol::metrics::{MetricField, MetricValue};
use serde::{Deserialize, Serialize};

/// Discriminant of [`Action`], used for filtering and reporting.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionType {
    Pause,
    Unpause,
    ChangeBudget,
    ChangeBid,
    Notification,
    RebalanceBudget,
    PingEndpoint,
}

impl ExecutionType {
    pub const ALL: [ExecutionType; 7] = [
        ExecutionType::Pause,
        ExecutionType::Unpause,
        ExecutionType::ChangeBudget,
        ExecutionType::ChangeBid,
        ExecutionType::Notification,
        ExecutionType::RebalanceBudget,
        ExecutionType::PingEndpoint,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionType::Pause => "PAUSE",
            ExecutionType::Unpause => "UNPAUSE",
            ExecutionType::ChangeBudget => "CHANGE_BUDGET",
            ExecutionType::ChangeBid => "CHANGE_BID",
            ExecutionType::Notification => "NOTIFICATION",
            ExecutionType::RebalanceBudget => "REBALANCE_BUDGET",
            ExecutionType::PingEndpoint => "PING_ENDPOINT",
        }
    }
}

impl fmt::Display for ExecutionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        ExecutionType::ALL
            .into_iter()
            .find(|candidate| candidate.as_str().eq_ignore_ascii_case(value.trim()))
            .ok_or_else(|| format!("unknown execution type {value:?}"))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeType {
    IncreaseBy,
    DecreaseBy,
    SetTo,
}

impl FromStr for ChangeType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "INCREASE_BY" => Ok(ChangeType::IncreaseBy),
            "DECREASE_BY" => Ok(ChangeType::DecreaseBy),
            "SET_TO" => Ok(ChangeType::SetTo),
            _ => Err(format!("unknown change type {value:?}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeUnit {
    /// `value` is a percentage of the current amount.
    Percent,
    /// `value` is an amount in minor currency units.
    Absolute,
}

impl FromStr for ChangeUnit {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "PERCENT" => Ok(ChangeUnit::Percent),
            "ABSOLUTE" => Ok(ChangeUnit::Absolute),
            _ => Err(format!("unknown change unit {value:?}")),
        }
    }
}

/// Budget or bid adjustment.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValueChange {
    pub change_type: ChangeType,
    pub value: MetricValue,
    pub unit: ChangeUnit,
    /// Lower clamp in minor units, on top of the platform minimum.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_value: Option<i64>,
    /// Upper clamp in minor units.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_value: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NotificationOptions {
    pub recipients: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RebalanceOptions {
    /// Performance metric used as the allocation weight.
    pub metric: MetricField,
}

impl Default for RebalanceOptions {
    fn default() -> Self {
        Self {
            metric: MetricField::Conversions,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PingOptions {
    pub endpoint_url: String,
}

/// Management action performed when a rule fires, with its typed options.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "execution_type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    Pause,
    Unpause,
    ChangeBudget(ValueChange),
    ChangeBid(ValueChange),
    Notification(NotificationOptions),
    RebalanceBudget(RebalanceOptions),
    PingEndpoint(PingOptions),
}

impl Action {
    pub fn execution_type(&self) -> ExecutionType {
        match self {
            Action::Pause => ExecutionType::Pause,
            Action::Unpause => ExecutionType::Unpause,
            Action::ChangeBudget(_) => ExecutionType::ChangeBudget,
            Action::ChangeBid(_) => ExecutionType::ChangeBid,
            Action::Notification(_) => ExecutionType::Notification,
            Action::RebalanceBudget(_) => ExecutionType::RebalanceBudget,
            Action::PingEndpoint(_) => ExecutionType::PingEndpoint,
        }
    }

    /// Whether the action mutates entities on the ad platform.
    pub fn mutates_entities(&self) -> bool {
        !matches!(self, Action::Notification(_) | Action::PingEndpoint(_))
    }
}
