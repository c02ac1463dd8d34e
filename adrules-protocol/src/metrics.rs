use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::entity::{EntityType, TimePreset};

/// Unit a metric is expressed in. Only informs presentation and validation;
/// comparisons are always done on the raw fixed-point value.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MetricUnit {
    Percentage,
    Currency,
    Count,
    Ratio,
}

/// Fixed metric vocabulary understood by the condition evaluator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum MetricField {
    Ctr,
    Cpc,
    Cpm,
    Impressions,
    Clicks,
    Conversions,
    CostPerConversion,
    Roas,
    Spent,
    DailySpend,
    Frequency,
    Reach,
}

impl MetricField {
    pub const ALL: [MetricField; 12] = [
        MetricField::Ctr,
        MetricField::Cpc,
        MetricField::Cpm,
        MetricField::Impressions,
        MetricField::Clicks,
        MetricField::Conversions,
        MetricField::CostPerConversion,
        MetricField::Roas,
        MetricField::Spent,
        MetricField::DailySpend,
        MetricField::Frequency,
        MetricField::Reach,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricField::Ctr => "ctr",
            MetricField::Cpc => "cpc",
            MetricField::Cpm => "cpm",
            MetricField::Impressions => "impressions",
            MetricField::Clicks => "clicks",
            MetricField::Conversions => "conversions",
            MetricField::CostPerConversion => "cost_per_conversion",
            MetricField::Roas => "roas",
            MetricField::Spent => "spent",
            MetricField::DailySpend => "daily_spend",
            MetricField::Frequency => "frequency",
            MetricField::Reach => "reach",
        }
    }

    pub fn unit(&self) -> MetricUnit {
        match self {
            MetricField::Ctr => MetricUnit::Percentage,
            MetricField::Cpc
            | MetricField::Cpm
            | MetricField::CostPerConversion
            | MetricField::Spent
            | MetricField::DailySpend => MetricUnit::Currency,
            MetricField::Impressions
            | MetricField::Clicks
            | MetricField::Conversions
            | MetricField::Reach => MetricUnit::Count,
            MetricField::Roas | MetricField::Frequency => MetricUnit::Ratio,
        }
    }
}

impl fmt::Display for MetricField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricField {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        MetricField::ALL
            .into_iter()
            .find(|candidate| candidate.as_str().eq_ignore_ascii_case(value.trim()))
            .ok_or_else(|| format!("unknown metric field {value:?}"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseMetricError {
    #[error("{0:?} is not a decimal number")]
    Invalid(String),
    #[error("{0:?} has more than four decimal places")]
    Precision(String),
    #[error("{0:?} is out of range")]
    Overflow(String),
}

/// Exact decimal metric value with four implied decimal places.
///
/// `MetricValue::from_str("0.8")` is stored as `8000`. Equality and ordering
/// are plain integer comparisons, so thresholds never suffer float drift.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct MetricValue(i64);

impl MetricValue {
    pub const SCALE: i64 = 10_000;
    const DECIMALS: usize = 4;
    pub const ZERO: MetricValue = MetricValue(0);

    pub const fn from_raw(raw: i64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> i64 {
        self.0
    }

    /// Whole-number constructor; saturates on overflow.
    pub fn from_int(value: i64) -> Self {
        Self(value.saturating_mul(Self::SCALE))
    }

    /// Converts a float at the wire boundary, rounding to four decimals.
    pub fn from_f64(value: f64) -> Option<Self> {
        if !value.is_finite() {
            return None;
        }
        let scaled = (value * Self::SCALE as f64).round();
        if scaled >= i64::MAX as f64 || scaled <= i64::MIN as f64 {
            return None;
        }
        Some(Self(scaled as i64))
    }

    pub fn to_f64(self) -> f64 {
        self.0 as f64 / Self::SCALE as f64
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }
}

impl FromStr for MetricValue {
    type Err = ParseMetricError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let text = raw.trim();
        let (negative, digits) = match text.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, text.strip_prefix('+').unwrap_or(text)),
        };
        let (whole, frac) = digits.split_once('.').unwrap_or((digits, ""));

        let is_digits = |part: &str| part.bytes().all(|byte| byte.is_ascii_digit());
        if (whole.is_empty() && frac.is_empty()) || !is_digits(whole) || !is_digits(frac) {
            return Err(ParseMetricError::Invalid(raw.to_string()));
        }
        if frac.len() > Self::DECIMALS {
            return Err(ParseMetricError::Precision(raw.to_string()));
        }

        let overflow = || ParseMetricError::Overflow(raw.to_string());
        let whole: i64 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| overflow())?
        };
        let frac: i64 = if frac.is_empty() {
            0
        } else {
            let padding = 10_i64.pow((Self::DECIMALS - frac.len()) as u32);
            frac.parse::<i64>().map_err(|_| overflow())? * padding
        };

        let magnitude = whole
            .checked_mul(Self::SCALE)
            .and_then(|value| value.checked_add(frac))
            .ok_or_else(overflow)?;
        Ok(Self(if negative { -magnitude } else { magnitude }))
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let magnitude = self.0.unsigned_abs();
        let scale = Self::SCALE as u64;
        let whole = magnitude / scale;
        let frac = magnitude % scale;
        if self.0 < 0 {
            f.write_str("-")?;
        }
        if frac == 0 {
            write!(f, "{whole}")
        } else {
            let digits = format!("{frac:04}");
            write!(f, "{whole}.{}", digits.trim_end_matches('0'))
        }
    }
}

impl Serialize for MetricValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.to_f64())
    }
}

impl<'de> Deserialize<'de> for MetricValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Number(f64),
            Text(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Number(value) => MetricValue::from_f64(value)
                .ok_or_else(|| serde::de::Error::custom(format!("{value} is not representable"))),
            Repr::Text(text) => text.parse().map_err(serde::de::Error::custom),
        }
    }
}

/// Time-windowed aggregate of metrics for one entity.
///
/// Fields the platform could not provide are absent, never zero-filled.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricsSnapshot {
    pub entity_id: String,
    pub entity_type: EntityType,
    pub time_preset: TimePreset,
    pub captured_at: DateTime<Utc>,
    #[serde(default)]
    pub values: BTreeMap<MetricField, MetricValue>,
}

impl MetricsSnapshot {
    pub fn new(
        entity_id: impl Into<String>,
        entity_type: EntityType,
        time_preset: TimePreset,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            entity_type,
            time_preset,
            captured_at: Utc::now(),
            values: BTreeMap::new(),
        }
    }

    /// Builder-style insert.
    pub fn with(mut self, field: MetricField, value: MetricValue) -> Self {
        self.values.insert(field, value);
        self
    }

    pub fn get(&self, field: MetricField) -> Option<MetricValue> {
        self.values.get(&field).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("0.8", 8_000; "fraction")]
    #[test_case("1", 10_000; "whole")]
    #[test_case("-2.5", -25_000; "negative")]
    #[test_case(".0125", 125; "leading dot")]
    #[test_case("1500.0000", 15_000_000; "padded")]
    fn parses_exact_decimals(raw: &str, expected: i64) {
        assert_eq!(raw.parse::<MetricValue>().unwrap().raw(), expected);
    }

    #[test_case("abc"; "letters")]
    #[test_case(""; "empty")]
    #[test_case("1.2.3"; "two dots")]
    #[test_case("-"; "sign only")]
    fn rejects_malformed_decimals(raw: &str) {
        assert!(matches!(
            raw.parse::<MetricValue>(),
            Err(ParseMetricError::Invalid(_))
        ));
    }

    #[test]
    fn rejects_excess_precision() {
        assert!(matches!(
            "0.00001".parse::<MetricValue>(),
            Err(ParseMetricError::Precision(_))
        ));
    }

    #[test]
    fn float_boundary_rounds_to_four_places() {
        // 0.1 + 0.2 drifts in binary; the boundary conversion absorbs it.
        let value = MetricValue::from_f64(0.1 + 0.2).unwrap();
        assert_eq!(value, "0.3".parse().unwrap());
        assert!(MetricValue::from_f64(f64::NAN).is_none());
    }

    #[test]
    fn displays_trimmed_decimals() {
        assert_eq!(MetricValue::from_raw(8_000).to_string(), "0.8");
        assert_eq!(MetricValue::from_raw(-12_345).to_string(), "-1.2345");
        assert_eq!(MetricValue::from_int(3).to_string(), "3");
    }

    #[test]
    fn deserializes_numbers_and_strings() {
        let from_number: MetricValue = serde_json::from_str("1.2").unwrap();
        let from_text: MetricValue = serde_json::from_str("\"1.2\"").unwrap();
        let from_int: MetricValue = serde_json::from_str("1000").unwrap();
        assert_eq!(from_number, from_text);
        assert_eq!(from_int, MetricValue::from_int(1000));
    }

    #[test]
    fn snapshot_omits_unknown_fields() {
        let snapshot = MetricsSnapshot::new("adset-1", EntityType::Adset, TimePreset::Today)
            .with(MetricField::Ctr, "0.8".parse().unwrap());
        assert_eq!(snapshot.get(MetricField::Ctr), Some(MetricValue::from_raw(8_000)));
        assert_eq!(snapshot.get(MetricField::Impressions), None);

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["values"]["ctr"], serde_json::json!(0.8));
    }

    #[test]
    fn every_field_parses_from_its_name() {
        for field in MetricField::ALL {
            assert_eq!(field.as_str().parse::<MetricField>().unwrap(), field);
        }
        assert_eq!(MetricField::Ctr.unit(), MetricUnit::Percentage);
        assert_eq!(MetricField::Spent.unit(), MetricUnit::Currency);
    }
}
