//! Per-rule exclusivity and the pre-execution checks.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use adrules_rules::Rule;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use uuid::Uuid;

/// What a leased rule is doing right now. Rules without a lease are idle.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RulePhase {
    Evaluating,
    Executing,
}

/// Keyed try-lock table. Entries exist only while a rule is busy, so the table
/// starts empty after a restart and needs no recovery.
#[derive(Clone, Default)]
pub struct LockTable {
    entries: Arc<Mutex<HashMap<Uuid, RulePhase>>>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes the rule's lock, or returns `None` if another worker holds it.
    pub fn try_acquire(&self, rule_id: Uuid) -> Option<RuleLease> {
        let mut entries = self.entries.lock();
        if entries.contains_key(&rule_id) {
            return None;
        }
        entries.insert(rule_id, RulePhase::Evaluating);
        Some(RuleLease {
            rule_id,
            table: self.clone(),
        })
    }

    pub fn is_busy(&self, rule_id: &Uuid) -> bool {
        self.entries.lock().contains_key(rule_id)
    }

    pub fn phase(&self, rule_id: &Uuid) -> Option<RulePhase> {
        self.entries.lock().get(rule_id).copied()
    }

    pub fn in_flight(&self) -> usize {
        self.entries.lock().len()
    }
}

/// Held for the whole evaluation cycle. Dropping it releases the rule.
pub struct RuleLease {
    rule_id: Uuid,
    table: LockTable,
}

impl RuleLease {
    pub fn rule_id(&self) -> Uuid {
        self.rule_id
    }

    pub fn executing(&self) {
        if let Some(phase) = self.table.entries.lock().get_mut(&self.rule_id) {
            *phase = RulePhase::Executing;
        }
    }
}

impl Drop for RuleLease {
    fn drop(&mut self) {
        self.table.entries.lock().remove(&self.rule_id);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardVerdict {
    Proceed,
    Disabled,
    /// The cap is reached; the caller disables the rule.
    LimitReached,
    CoolingDown(Duration),
}

impl GuardVerdict {
    /// Status, then execution cap, then cooldown.
    pub fn check(rule: &Rule, now: DateTime<Utc>) -> Self {
        if !rule.is_enabled() {
            return GuardVerdict::Disabled;
        }
        if rule.limit_reached() {
            return GuardVerdict::LimitReached;
        }
        if let Some(remaining) = rule.cooldown_remaining(now) {
            return GuardVerdict::CoolingDown(remaining.to_std().unwrap_or_default());
        }
        GuardVerdict::Proceed
    }
}
