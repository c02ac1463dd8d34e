use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Class of advertising object a rule applies to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
    Campaign,
    Adset,
    Ad,
}

impl EntityType {
    pub const ALL: [EntityType; 3] = [EntityType::Campaign, EntityType::Adset, EntityType::Ad];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Campaign => "CAMPAIGN",
            EntityType::Adset => "ADSET",
            EntityType::Ad => "AD",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        EntityType::ALL
            .into_iter()
            .find(|candidate| candidate.as_str().eq_ignore_ascii_case(value.trim()))
            .ok_or_else(|| format!("unknown entity type {value:?}"))
    }
}

/// Delivery status of an advertising entity as reported by the platform.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityStatus {
    Active,
    Paused,
}

impl EntityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityStatus::Active => "ACTIVE",
            EntityStatus::Paused => "PAUSED",
        }
    }
}

impl fmt::Display for EntityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregation window used when fetching metric snapshots.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum TimePreset {
    #[default]
    #[serde(rename = "TODAY")]
    Today,
    #[serde(rename = "YESTERDAY")]
    Yesterday,
    #[serde(rename = "LAST_3D")]
    Last3d,
    #[serde(rename = "LAST_7D")]
    Last7d,
    #[serde(rename = "LAST_14D")]
    Last14d,
    #[serde(rename = "LAST_30D")]
    Last30d,
    #[serde(rename = "LIFETIME")]
    Lifetime,
}

impl TimePreset {
    pub const ALL: [TimePreset; 7] = [
        TimePreset::Today,
        TimePreset::Yesterday,
        TimePreset::Last3d,
        TimePreset::Last7d,
        TimePreset::Last14d,
        TimePreset::Last30d,
        TimePreset::Lifetime,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TimePreset::Today => "TODAY",
            TimePreset::Yesterday => "YESTERDAY",
            TimePreset::Last3d => "LAST_3D",
            TimePreset::Last7d => "LAST_7D",
            TimePreset::Last14d => "LAST_14D",
            TimePreset::Last30d => "LAST_30D",
            TimePreset::Lifetime => "LIFETIME",
        }
    }
}

impl fmt::Display for TimePreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimePreset {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        TimePreset::ALL
            .into_iter()
            .find(|candidate| candidate.as_str().eq_ignore_ascii_case(value.trim()))
            .ok_or_else(|| format!("unknown time preset {value:?}"))
    }
}
