use std::fmt;
use std::str::FromStr;

use adrules_protocol::metrics::{MetricField, MetricValue, MetricsSnapshot};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Comparison operator as it appears on the wire.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operator {
    GreaterThan,
    LessThan,
    Equal,
    NotEqual,
    InRange,
    NotInRange,
}

impl Operator {
    pub const ALL: [Operator; 6] = [
        Operator::GreaterThan,
        Operator::LessThan,
        Operator::Equal,
        Operator::NotEqual,
        Operator::InRange,
        Operator::NotInRange,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::GreaterThan => "GREATER_THAN",
            Operator::LessThan => "LESS_THAN",
            Operator::Equal => "EQUAL",
            Operator::NotEqual => "NOT_EQUAL",
            Operator::InRange => "IN_RANGE",
            Operator::NotInRange => "NOT_IN_RANGE",
        }
    }

    pub fn is_range(&self) -> bool {
        matches!(self, Operator::InRange | Operator::NotInRange)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operator {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Operator::ALL
            .into_iter()
            .find(|candidate| candidate.as_str().eq_ignore_ascii_case(value.trim()))
            .ok_or_else(|| format!("unknown operator {value:?}"))
    }
}

/// Threshold carried by a condition: a scalar, or an inclusive `[low, high]` bound.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum ConditionValue {
    Single(MetricValue),
    Range(MetricValue, MetricValue),
}

/// Operator and threshold fused, so a range operator can never carry a
/// scalar threshold (or the reverse).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    GreaterThan(MetricValue),
    LessThan(MetricValue),
    Equal(MetricValue),
    NotEqual(MetricValue),
    InRange { low: MetricValue, high: MetricValue },
    NotInRange { low: MetricValue, high: MetricValue },
}

impl Comparison {
    pub fn new(operator: Operator, value: ConditionValue) -> Result<Self, String> {
        match (operator, value) {
            (Operator::GreaterThan, ConditionValue::Single(v)) => Ok(Comparison::GreaterThan(v)),
            (Operator::LessThan, ConditionValue::Single(v)) => Ok(Comparison::LessThan(v)),
            (Operator::Equal, ConditionValue::Single(v)) => Ok(Comparison::Equal(v)),
            (Operator::NotEqual, ConditionValue::Single(v)) => Ok(Comparison::NotEqual(v)),
            (Operator::InRange | Operator::NotInRange, ConditionValue::Range(low, high))
                if low > high =>
            {
                Err(format!("range lower bound {low} exceeds upper bound {high}"))
            }
            (Operator::InRange, ConditionValue::Range(low, high)) => {
                Ok(Comparison::InRange { low, high })
            }
            (Operator::NotInRange, ConditionValue::Range(low, high)) => {
                Ok(Comparison::NotInRange { low, high })
            }
            (operator, ConditionValue::Single(_)) => {
                Err(format!("{operator} requires a two-element [low, high] value"))
            }
            (operator, ConditionValue::Range(..)) => {
                Err(format!("{operator} requires a single numeric value"))
            }
        }
    }

    pub fn operator(&self) -> Operator {
        match self {
            Comparison::GreaterThan(_) => Operator::GreaterThan,
            Comparison::LessThan(_) => Operator::LessThan,
            Comparison::Equal(_) => Operator::Equal,
            Comparison::NotEqual(_) => Operator::NotEqual,
            Comparison::InRange { .. } => Operator::InRange,
            Comparison::NotInRange { .. } => Operator::NotInRange,
        }
    }

    pub fn value(&self) -> ConditionValue {
        match *self {
            Comparison::GreaterThan(v)
            | Comparison::LessThan(v)
            | Comparison::Equal(v)
            | Comparison::NotEqual(v) => ConditionValue::Single(v),
            Comparison::InRange { low, high } | Comparison::NotInRange { low, high } => {
                ConditionValue::Range(low, high)
            }
        }
    }

    /// Exact comparison; range bounds are inclusive.
    pub fn holds(&self, actual: MetricValue) -> bool {
        match *self {
            Comparison::GreaterThan(threshold) => actual > threshold,
            Comparison::LessThan(threshold) => actual < threshold,
            Comparison::Equal(threshold) => actual == threshold,
            Comparison::NotEqual(threshold) => actual != threshold,
            Comparison::InRange { low, high } => low <= actual && actual <= high,
            Comparison::NotInRange { low, high } => actual < low || actual > high,
        }
    }
}

/// Single metric comparison: `{field, operator, value}` on the wire.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(try_from = "ConditionRepr", into = "ConditionRepr")]
pub struct Condition {
    pub field: MetricField,
    pub comparison: Comparison,
}

impl Condition {
    pub fn new(field: MetricField, operator: Operator, value: ConditionValue) -> Result<Self, String> {
        Ok(Self {
            field,
            comparison: Comparison::new(operator, value)?,
        })
    }

    pub fn operator(&self) -> Operator {
        self.comparison.operator()
    }

    pub fn value(&self) -> ConditionValue {
        self.comparison.value()
    }
}

#[derive(Serialize, Deserialize)]
struct ConditionRepr {
    field: MetricField,
    operator: Operator,
    value: ConditionValue,
}

impl TryFrom<ConditionRepr> for Condition {
    type Error = String;

    fn try_from(repr: ConditionRepr) -> Result<Self, Self::Error> {
        Condition::new(repr.field, repr.operator, repr.value)
    }
}

impl From<Condition> for ConditionRepr {
    fn from(condition: Condition) -> Self {
        Self {
            field: condition.field,
            operator: condition.operator(),
            value: condition.value(),
        }
    }
}

/// Evaluation produced no verdict. Distinct from "conditions are false": the
/// caller skips the cycle and leaves the rule enabled.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvaluationError {
    #[error("metric {field} missing from snapshot of entity {entity_id}")]
    MissingField {
        field: MetricField,
        entity_id: String,
    },
    #[error("rule has no conditions")]
    NoConditions,
}

/// Evaluates the AND of `conditions` against one snapshot.
///
/// Every referenced field must be present; a missing field anywhere is an
/// error even when an earlier condition is already false.
pub fn evaluate(conditions: &[Condition], snapshot: &MetricsSnapshot) -> Result<bool, EvaluationError> {
    if conditions.is_empty() {
        return Err(EvaluationError::NoConditions);
    }

    let mut resolved = Vec::with_capacity(conditions.len());
    for condition in conditions {
        let actual = snapshot
            .get(condition.field)
            .ok_or_else(|| EvaluationError::MissingField {
                field: condition.field,
                entity_id: snapshot.entity_id.clone(),
            })?;
        resolved.push((condition, actual));
    }

    Ok(resolved
        .into_iter()
        .all(|(condition, actual)| condition.comparison.holds(actual)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use adrules_protocol::entity::{EntityType, TimePreset};
    use serde_json::json;
    use test_case::test_case;

    fn value(raw: &str) -> MetricValue {
        raw.parse().unwrap()
    }

    fn snapshot(values: &[(MetricField, &str)]) -> MetricsSnapshot {
        values.iter().fold(
            MetricsSnapshot::new("adset-1", EntityType::Adset, TimePreset::Today),
            |snapshot, (field, raw)| snapshot.with(*field, value(raw)),
        )
    }

    fn ctr_below_one() -> Condition {
        Condition::new(
            MetricField::Ctr,
            Operator::LessThan,
            ConditionValue::Single(value("1.0")),
        )
        .unwrap()
    }

    #[test_case("0.8", true; "below threshold fires")]
    #[test_case("1.2", false; "above threshold does not fire")]
    #[test_case("1.0", false; "equal is not less")]
    fn ctr_less_than_one(ctr: &str, expected: bool) {
        let verdict = evaluate(&[ctr_below_one()], &snapshot(&[(MetricField::Ctr, ctr)]));
        assert_eq!(verdict, Ok(expected));
    }

    #[test_case("500", false; "impressions too low")]
    #[test_case("1500", true; "both hold")]
    fn conditions_are_anded(impressions: &str, expected: bool) {
        let conditions = [
            ctr_below_one(),
            Condition::new(
                MetricField::Impressions,
                Operator::GreaterThan,
                ConditionValue::Single(value("1000")),
            )
            .unwrap(),
        ];
        let snap = snapshot(&[
            (MetricField::Ctr, "0.5"),
            (MetricField::Impressions, impressions),
        ]);
        assert_eq!(evaluate(&conditions, &snap), Ok(expected));
    }

    #[test_case(Operator::InRange, "10", true; "low bound inclusive")]
    #[test_case(Operator::InRange, "20", true; "high bound inclusive")]
    #[test_case(Operator::InRange, "20.0001", false; "just above")]
    #[test_case(Operator::NotInRange, "10", false; "not in range excludes bound")]
    #[test_case(Operator::NotInRange, "9.9999", true; "just below")]
    fn range_operators(operator: Operator, spent: &str, expected: bool) {
        let condition = Condition::new(
            MetricField::Spent,
            operator,
            ConditionValue::Range(value("10"), value("20")),
        )
        .unwrap();
        let verdict = evaluate(&[condition], &snapshot(&[(MetricField::Spent, spent)]));
        assert_eq!(verdict, Ok(expected));
    }

    #[test_case(Operator::Equal, "2.5", true; "equal exact")]
    #[test_case(Operator::Equal, "2.5001", false; "no epsilon")]
    #[test_case(Operator::NotEqual, "2.5001", true; "not equal")]
    fn equality_is_exact(operator: Operator, roas: &str, expected: bool) {
        let condition =
            Condition::new(MetricField::Roas, operator, ConditionValue::Single(value("2.5"))).unwrap();
        let verdict = evaluate(&[condition], &snapshot(&[(MetricField::Roas, roas)]));
        assert_eq!(verdict, Ok(expected));
    }

    #[test]
    fn missing_field_is_an_error_even_after_a_false_condition() {
        let conditions = [
            ctr_below_one(),
            Condition::new(
                MetricField::Reach,
                Operator::GreaterThan,
                ConditionValue::Single(value("1")),
            )
            .unwrap(),
        ];
        // ctr is false, reach is missing: still no verdict.
        let verdict = evaluate(&conditions, &snapshot(&[(MetricField::Ctr, "5")]));
        assert_eq!(
            verdict,
            Err(EvaluationError::MissingField {
                field: MetricField::Reach,
                entity_id: "adset-1".into(),
            })
        );
    }

    #[test]
    fn empty_condition_list_has_no_verdict() {
        assert_eq!(
            evaluate(&[], &snapshot(&[(MetricField::Ctr, "1")])),
            Err(EvaluationError::NoConditions)
        );
    }

    #[test]
    fn operator_and_value_shape_must_agree() {
        assert!(Condition::new(
            MetricField::Ctr,
            Operator::InRange,
            ConditionValue::Single(value("1"))
        )
        .is_err());
        assert!(Condition::new(
            MetricField::Ctr,
            Operator::Equal,
            ConditionValue::Range(value("1"), value("2"))
        )
        .is_err());
        assert!(Condition::new(
            MetricField::Ctr,
            Operator::InRange,
            ConditionValue::Range(value("3"), value("2"))
        )
        .is_err());
    }

    #[test]
    fn wire_format_is_field_operator_value() {
        let condition: Condition = serde_json::from_value(json!({
            "field": "cpc",
            "operator": "IN_RANGE",
            "value": [0.5, 1.25]
        }))
        .unwrap();
        assert_eq!(condition.operator(), Operator::InRange);
        assert_eq!(
            serde_json::to_value(condition).unwrap(),
            json!({"field": "cpc", "operator": "IN_RANGE", "value": [0.5, 1.25]})
        );

        let bad = serde_json::from_value::<Condition>(json!({
            "field": "cpc",
            "operator": "LESS_THAN",
            "value": [0.5, 1.25]
        }));
        assert!(bad.is_err());
    }
}
