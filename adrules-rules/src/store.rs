use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::draft::{RuleDraft, RulePatch};
use crate::error::RuleError;
use crate::rule::{Rule, RuleFilter, RuleStatus};

/// Persistence seam behind [`RuleStore`].
///
/// `account` is `None` only for engine-side lookups that span every account.
#[async_trait]
pub trait RuleBackend: Send + Sync + 'static {
    async fn insert(&self, rule: &Rule) -> Result<(), RuleError>;

    async fn fetch(&self, account: Option<&str>, id: Uuid) -> Result<Option<Rule>, RuleError>;

    /// Rules ordered by `created_at`, then id.
    async fn list(&self, account: Option<&str>, filter: &RuleFilter) -> Result<Vec<Rule>, RuleError>;

    /// Replaces the user-owned definition of `rule`. Counters are only
    /// touched when `reset_counters` is set.
    async fn update_definition(
        &self,
        rule: &Rule,
        reset_counters: bool,
    ) -> Result<Option<Rule>, RuleError>;

    async fn remove(&self, account: &str, id: Uuid) -> Result<(), RuleError>;

    async fn set_status(
        &self,
        account: Option<&str>,
        id: Uuid,
        status: RuleStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<Rule>, RuleError>;

    /// Atomically bumps the execution counter, stamps `last_execution` and
    /// disables the rule once its limit is reached.
    async fn record_execution(&self, id: Uuid, at: DateTime<Utc>) -> Result<Option<Rule>, RuleError>;
}

/// Durable CRUD for rule definitions plus the engine's counter updates.
#[derive(Clone)]
pub struct RuleStore {
    backend: Arc<dyn RuleBackend>,
}

impl RuleStore {
    pub fn new(backend: Arc<dyn RuleBackend>) -> Self {
        Self { backend }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryRuleBackend::default()))
    }

    /// Validates `draft` and stores it as a new rule with zeroed counters.
    pub async fn create(&self, account: &str, draft: &RuleDraft) -> Result<Rule, RuleError> {
        let definition = draft.validate()?;
        let now = Utc::now();
        let rule = Rule {
            id: Uuid::new_v4(),
            account_id: account.to_string(),
            name: definition.name,
            description: definition.description,
            entity_type: definition.entity_type,
            entity_ids: definition.entity_ids,
            evaluation_type: definition.evaluation_type,
            time_preset: definition.time_preset,
            conditions: definition.conditions,
            action: definition.action,
            execution_count_limit: definition.execution_count_limit,
            action_frequency: definition.action_frequency,
            schedule: definition.schedule,
            status: definition.status,
            executions_count: 0,
            last_execution: None,
            created_at: now,
            updated_at: now,
        };
        self.backend.insert(&rule).await?;
        info!(rule_id = %rule.id, account, execution_type = %rule.execution_type(), "rule created");
        Ok(rule)
    }

    pub async fn get(&self, account: &str, id: Uuid) -> Result<Rule, RuleError> {
        self.backend
            .fetch(Some(account), id)
            .await?
            .ok_or(RuleError::NotFound(id))
    }

    pub async fn list(&self, account: &str, filter: &RuleFilter) -> Result<Vec<Rule>, RuleError> {
        self.backend.list(Some(account), filter).await
    }

    /// Merges `patch` onto the stored definition and re-validates the result.
    pub async fn update(&self, account: &str, id: Uuid, patch: &RulePatch) -> Result<Rule, RuleError> {
        let mut rule = self.get(account, id).await?;
        let definition = patch.apply_to(RuleDraft::from(&rule)).validate()?;
        definition.apply(&mut rule);
        rule.updated_at = Utc::now();

        let updated = self
            .backend
            .update_definition(&rule, patch.reset_counters)
            .await?
            .ok_or(RuleError::NotFound(id))?;
        info!(rule_id = %id, reset_counters = patch.reset_counters, "rule updated");
        Ok(updated)
    }

    /// Idempotent: deleting an unknown id succeeds.
    pub async fn delete(&self, account: &str, id: Uuid) -> Result<(), RuleError> {
        self.backend.remove(account, id).await?;
        info!(rule_id = %id, account, "rule deleted");
        Ok(())
    }

    pub async fn set_status(&self, account: &str, id: Uuid, status: RuleStatus) -> Result<Rule, RuleError> {
        let rule = self
            .backend
            .set_status(Some(account), id, status, Utc::now())
            .await?
            .ok_or(RuleError::NotFound(id))?;
        info!(rule_id = %id, status = %status, "rule status set");
        Ok(rule)
    }

    /// Looks a rule up across every account.
    pub async fn find(&self, id: Uuid) -> Result<Option<Rule>, RuleError> {
        self.backend.fetch(None, id).await
    }

    /// Every enabled rule across every account.
    pub async fn enabled_rules(&self) -> Result<Vec<Rule>, RuleError> {
        let filter = RuleFilter {
            status: Some(RuleStatus::Enabled),
            ..Default::default()
        };
        self.backend.list(None, &filter).await
    }

    pub async fn record_execution(&self, id: Uuid, at: DateTime<Utc>) -> Result<Rule, RuleError> {
        let rule = self
            .backend
            .record_execution(id, at)
            .await?
            .ok_or(RuleError::NotFound(id))?;
        debug!(rule_id = %id, executions = rule.executions_count, "execution recorded");
        if !rule.is_enabled() {
            info!(rule_id = %id, limit = ?rule.execution_count_limit, "execution limit reached, rule disabled");
        }
        Ok(rule)
    }

    /// Engine-side auto-disable. Returns `None` if the rule no longer exists.
    pub async fn disable(&self, id: Uuid) -> Result<Option<Rule>, RuleError> {
        self.backend
            .set_status(None, id, RuleStatus::Disabled, Utc::now())
            .await
    }
}

/// Process-local backend used by tests and when no database is configured.
#[derive(Default)]
pub struct InMemoryRuleBackend {
    rules: RwLock<HashMap<Uuid, Rule>>,
}

fn in_account(rule: &Rule, account: Option<&str>) -> bool {
    account.map_or(true, |account| rule.account_id == account)
}

#[async_trait]
impl RuleBackend for InMemoryRuleBackend {
    async fn insert(&self, rule: &Rule) -> Result<(), RuleError> {
        self.rules.write().insert(rule.id, rule.clone());
        Ok(())
    }

    async fn fetch(&self, account: Option<&str>, id: Uuid) -> Result<Option<Rule>, RuleError> {
        Ok(self
            .rules
            .read()
            .get(&id)
            .filter(|rule| in_account(rule, account))
            .cloned())
    }

    async fn list(&self, account: Option<&str>, filter: &RuleFilter) -> Result<Vec<Rule>, RuleError> {
        let mut rules: Vec<Rule> = self
            .rules
            .read()
            .values()
            .filter(|rule| in_account(rule, account) && filter.matches(rule))
            .cloned()
            .collect();
        rules.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(rules)
    }

    async fn update_definition(
        &self,
        rule: &Rule,
        reset_counters: bool,
    ) -> Result<Option<Rule>, RuleError> {
        let mut rules = self.rules.write();
        let Some(stored) = rules
            .get_mut(&rule.id)
            .filter(|stored| stored.account_id == rule.account_id)
        else {
            return Ok(None);
        };

        let executions_count = stored.executions_count;
        let last_execution = stored.last_execution;
        *stored = rule.clone();
        if reset_counters {
            stored.executions_count = 0;
            stored.last_execution = None;
        } else {
            stored.executions_count = executions_count;
            stored.last_execution = last_execution;
        }
        Ok(Some(stored.clone()))
    }

    async fn remove(&self, account: &str, id: Uuid) -> Result<(), RuleError> {
        let mut rules = self.rules.write();
        if rules.get(&id).is_some_and(|rule| rule.account_id == account) {
            rules.remove(&id);
        }
        Ok(())
    }

    async fn set_status(
        &self,
        account: Option<&str>,
        id: Uuid,
        status: RuleStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<Rule>, RuleError> {
        let mut rules = self.rules.write();
        let Some(rule) = rules.get_mut(&id).filter(|rule| in_account(rule, account)) else {
            return Ok(None);
        };
        if rule.status != status {
            rule.status = status;
            rule.updated_at = at;
        }
        Ok(Some(rule.clone()))
    }

    async fn record_execution(&self, id: Uuid, at: DateTime<Utc>) -> Result<Option<Rule>, RuleError> {
        let mut rules = self.rules.write();
        let Some(rule) = rules.get_mut(&id) else {
            return Ok(None);
        };
        rule.executions_count = rule.executions_count.saturating_add(1);
        rule.last_execution = Some(at);
        if rule.limit_reached() {
            rule.status = RuleStatus::Disabled;
        }
        rule.updated_at = at;
        Ok(Some(rule.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::draft::RuleDraft;
    use adrules_protocol::entity::EntityType;
    use serde_json::json;

    fn draft(name: &str, limit: Option<i64>) -> RuleDraft {
        serde_json::from_value(json!({
            "name": name,
            "entity_type": "ADSET",
            "entity_ids": ["as-1"],
            "evaluation_type": "TRIGGER",
            "conditions": [{"field": "cpc", "operator": "GREATER_THAN", "value": 2.5}],
            "execution_type": "PAUSE",
            "execution_options": {"execution_count_limit": limit}
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn create_assigns_identity_and_defaults() {
        let store = RuleStore::in_memory();
        let rule = store.create("acct-1", &draft("High CPC", None)).await.unwrap();
        assert_eq!(rule.status, RuleStatus::Enabled);
        assert_eq!(rule.executions_count, 0);
        assert!(rule.last_execution.is_none());
        assert_eq!(rule.entity_type, EntityType::Adset);

        let fetched = store.get("acct-1", rule.id).await.unwrap();
        assert_eq!(fetched, rule);
        assert!(matches!(
            store.get("acct-2", rule.id).await,
            Err(RuleError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn create_rejects_invalid_draft() {
        let store = RuleStore::in_memory();
        let mut bad = draft("x", None);
        bad.conditions.clear();
        let err = store.create("acct-1", &bad).await.unwrap_err();
        assert!(matches!(err, RuleError::Validation(ref v) if v.has_field("conditions")));
        assert!(store.list("acct-1", &RuleFilter::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_is_ordered_and_filtered() {
        let store = RuleStore::in_memory();
        let first = store.create("acct-1", &draft("first", None)).await.unwrap();
        let second = store.create("acct-1", &draft("second", None)).await.unwrap();
        store.create("acct-2", &draft("other", None)).await.unwrap();
        store
            .set_status("acct-1", second.id, RuleStatus::Disabled)
            .await
            .unwrap();

        let all = store.list("acct-1", &RuleFilter::default()).await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.iter().any(|r| r.id == first.id));
        assert!(all
            .windows(2)
            .all(|pair| (pair[0].created_at, pair[0].id) <= (pair[1].created_at, pair[1].id)));

        let enabled = store
            .list(
                "acct-1",
                &RuleFilter {
                    status: Some(RuleStatus::Enabled),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(enabled.len(), 1);
        assert_eq!(store.enabled_rules().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = RuleStore::in_memory();
        let rule = store.create("acct-1", &draft("gone", None)).await.unwrap();
        store.delete("acct-1", rule.id).await.unwrap();
        store.delete("acct-1", rule.id).await.unwrap();
        store.delete("acct-1", Uuid::new_v4()).await.unwrap();
        assert!(store.find(rule.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn limit_disables_and_only_reset_clears_counters() {
        let store = RuleStore::in_memory();
        let rule = store.create("acct-1", &draft("capped", Some(3))).await.unwrap();

        for expected in 1..=3u32 {
            let updated = store.record_execution(rule.id, Utc::now()).await.unwrap();
            assert_eq!(updated.executions_count, expected);
        }
        let capped = store.get("acct-1", rule.id).await.unwrap();
        assert_eq!(capped.status, RuleStatus::Disabled);

        let reenabled = store
            .set_status("acct-1", rule.id, RuleStatus::Enabled)
            .await
            .unwrap();
        assert!(reenabled.limit_reached());

        let renamed = store
            .update(
                "acct-1",
                rule.id,
                &RulePatch {
                    name: Some("renamed".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(renamed.executions_count, 3);

        let reset = store
            .update(
                "acct-1",
                rule.id,
                &RulePatch {
                    reset_counters: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(reset.executions_count, 0);
        assert!(reset.last_execution.is_none());
        assert!(!reset.limit_reached());
    }

    #[tokio::test]
    async fn update_revalidates_merged_rule() {
        let store = RuleStore::in_memory();
        let rule = store.create("acct-1", &draft("ping", None)).await.unwrap();
        let err = store
            .update(
                "acct-1",
                rule.id,
                &RulePatch {
                    execution_type: Some("PING_ENDPOINT".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(
            matches!(err, RuleError::Validation(ref v) if v.has_field("execution_options.endpoint_url"))
        );
    }
}
