use adrules_core::db::{DatabaseMigrator, DatabasePool};
use adrules_core::errors::Result as CoreResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use sqlx::{FromRow, QueryBuilder};
use uuid::Uuid;

use crate::error::RuleError;
use crate::history::{ExecutionHistoryEntry, HistoryBackend};
use crate::rule::{Rule, RuleFilter, RuleStatus};
use crate::store::RuleBackend;

const RULE_COLUMNS: &str = "id, account_id, name, description, entity_type, entity_ids, \
     evaluation_type, time_preset, conditions, action, execution_count_limit, \
     action_frequency, schedule, status, executions_count, last_execution, \
     created_at, updated_at";

/// Runs the rule and history migrations embedded in the binary.
pub struct RulesMigrator;

#[async_trait]
impl DatabaseMigrator for RulesMigrator {
    async fn run_migrations(&self, pool: &DatabasePool) -> CoreResult<()> {
        sqlx::migrate!("../migrations").run(pool.inner()).await?;
        Ok(())
    }
}

/// Postgres-backed rule storage.
#[derive(Clone)]
pub struct PgRuleBackend {
    pool: DatabasePool,
}

impl PgRuleBackend {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<Value, RuleError> {
    serde_json::to_value(value).map_err(|err| RuleError::Storage(err.to_string()))
}

#[async_trait]
impl RuleBackend for PgRuleBackend {
    async fn insert(&self, rule: &Rule) -> Result<(), RuleError> {
        sqlx::query(
            r#"
            INSERT INTO rules (
                id, account_id, name, description, entity_type, entity_ids,
                evaluation_type, time_preset, conditions, action, execution_count_limit,
                action_frequency, schedule, status, executions_count, last_execution,
                created_at, updated_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6,
                $7, $8, $9, $10, $11,
                $12, $13, $14, $15, $16,
                $17, $18
            )
            "#,
        )
        .bind(rule.id)
        .bind(&rule.account_id)
        .bind(&rule.name)
        .bind(&rule.description)
        .bind(rule.entity_type.as_str())
        .bind(to_json(&rule.entity_ids)?)
        .bind(rule.evaluation_type.as_str())
        .bind(rule.time_preset.as_str())
        .bind(to_json(&rule.conditions)?)
        .bind(to_json(&rule.action)?)
        .bind(rule.execution_count_limit.map(|limit| limit as i64))
        .bind(rule.action_frequency.map(|seconds| seconds as i64))
        .bind(rule.schedule.as_ref().map(to_json).transpose()?)
        .bind(rule.status.as_str())
        .bind(i64::from(rule.executions_count))
        .bind(rule.last_execution)
        .bind(rule.created_at)
        .bind(rule.updated_at)
        .execute(self.pool.inner())
        .await?;
        Ok(())
    }

    async fn fetch(&self, account: Option<&str>, id: Uuid) -> Result<Option<Rule>, RuleError> {
        let mut builder = QueryBuilder::new(format!("SELECT {RULE_COLUMNS} FROM rules WHERE id = "));
        builder.push_bind(id);
        if let Some(account) = account {
            builder.push(" AND account_id = ");
            builder.push_bind(account);
        }

        let row = builder
            .build_query_as::<RuleRow>()
            .fetch_optional(self.pool.inner())
            .await?;
        row.map(Rule::try_from).transpose()
    }

    async fn list(&self, account: Option<&str>, filter: &RuleFilter) -> Result<Vec<Rule>, RuleError> {
        let mut builder = QueryBuilder::new(format!("SELECT {RULE_COLUMNS} FROM rules WHERE 1=1"));

        if let Some(account) = account {
            builder.push(" AND account_id = ");
            builder.push_bind(account);
        }

        if let Some(status) = filter.status {
            builder.push(" AND status = ");
            builder.push_bind(status.as_str());
        }

        if let Some(entity_type) = filter.entity_type {
            builder.push(" AND entity_type = ");
            builder.push_bind(entity_type.as_str());
        }

        if let Some(evaluation_type) = filter.evaluation_type {
            builder.push(" AND evaluation_type = ");
            builder.push_bind(evaluation_type.as_str());
        }

        builder.push(" ORDER BY created_at ASC, id ASC");

        let rows = builder
            .build_query_as::<RuleRow>()
            .fetch_all(self.pool.inner())
            .await?;
        rows.into_iter().map(Rule::try_from).collect()
    }

    async fn update_definition(
        &self,
        rule: &Rule,
        reset_counters: bool,
    ) -> Result<Option<Rule>, RuleError> {
        let row = sqlx::query_as::<_, RuleRow>(&format!(
            r#"
            UPDATE rules SET
                name = $3, description = $4, entity_type = $5, entity_ids = $6,
                evaluation_type = $7, time_preset = $8, conditions = $9, action = $10,
                execution_count_limit = $11, action_frequency = $12, schedule = $13,
                status = $14, updated_at = $15,
                executions_count = CASE WHEN $16 THEN 0 ELSE executions_count END,
                last_execution = CASE WHEN $16 THEN NULL ELSE last_execution END
            WHERE id = $1 AND account_id = $2
            RETURNING {RULE_COLUMNS}
            "#
        ))
        .bind(rule.id)
        .bind(&rule.account_id)
        .bind(&rule.name)
        .bind(&rule.description)
        .bind(rule.entity_type.as_str())
        .bind(to_json(&rule.entity_ids)?)
        .bind(rule.evaluation_type.as_str())
        .bind(rule.time_preset.as_str())
        .bind(to_json(&rule.conditions)?)
        .bind(to_json(&rule.action)?)
        .bind(rule.execution_count_limit.map(|limit| limit as i64))
        .bind(rule.action_frequency.map(|seconds| seconds as i64))
        .bind(rule.schedule.as_ref().map(to_json).transpose()?)
        .bind(rule.status.as_str())
        .bind(rule.updated_at)
        .bind(reset_counters)
        .fetch_optional(self.pool.inner())
        .await?;
        row.map(Rule::try_from).transpose()
    }

    async fn remove(&self, account: &str, id: Uuid) -> Result<(), RuleError> {
        sqlx::query("DELETE FROM rules WHERE id = $1 AND account_id = $2")
            .bind(id)
            .bind(account)
            .execute(self.pool.inner())
            .await?;
        Ok(())
    }

    async fn set_status(
        &self,
        account: Option<&str>,
        id: Uuid,
        status: RuleStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<Rule>, RuleError> {
        let mut builder = QueryBuilder::new("UPDATE rules SET status = ");
        builder.push_bind(status.as_str());
        builder.push(", updated_at = CASE WHEN status = ");
        builder.push_bind(status.as_str());
        builder.push(" THEN updated_at ELSE ");
        builder.push_bind(at);
        builder.push(" END WHERE id = ");
        builder.push_bind(id);
        if let Some(account) = account {
            builder.push(" AND account_id = ");
            builder.push_bind(account);
        }
        builder.push(format!(" RETURNING {RULE_COLUMNS}"));

        let row = builder
            .build_query_as::<RuleRow>()
            .fetch_optional(self.pool.inner())
            .await?;
        row.map(Rule::try_from).transpose()
    }

    async fn record_execution(&self, id: Uuid, at: DateTime<Utc>) -> Result<Option<Rule>, RuleError> {
        let row = sqlx::query_as::<_, RuleRow>(&format!(
            r#"
            UPDATE rules SET
                executions_count = executions_count + 1,
                last_execution = $2,
                updated_at = $2,
                status = CASE
                    WHEN execution_count_limit IS NOT NULL
                         AND executions_count + 1 >= execution_count_limit THEN 'DISABLED'
                    ELSE status
                END
            WHERE id = $1
            RETURNING {RULE_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(at)
        .fetch_optional(self.pool.inner())
        .await?;
        row.map(Rule::try_from).transpose()
    }
}

#[derive(FromRow)]
struct RuleRow {
    id: Uuid,
    account_id: String,
    name: String,
    description: Option<String>,
    entity_type: String,
    entity_ids: Value,
    evaluation_type: String,
    time_preset: String,
    conditions: Value,
    action: Value,
    execution_count_limit: Option<i64>,
    action_frequency: Option<i64>,
    schedule: Option<Value>,
    status: String,
    executions_count: i64,
    last_execution: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

fn corrupt(id: Uuid, column: &str, err: impl std::fmt::Display) -> RuleError {
    RuleError::Storage(format!("rule {id} has corrupt {column}: {err}"))
}

fn decode<T: DeserializeOwned>(id: Uuid, column: &str, value: Value) -> Result<T, RuleError> {
    serde_json::from_value(value).map_err(|err| corrupt(id, column, err))
}

impl TryFrom<RuleRow> for Rule {
    type Error = RuleError;

    fn try_from(row: RuleRow) -> Result<Self, Self::Error> {
        let id = row.id;
        Ok(Rule {
            id,
            account_id: row.account_id,
            name: row.name,
            description: row.description,
            entity_type: row
                .entity_type
                .parse()
                .map_err(|err: String| corrupt(id, "entity_type", err))?,
            entity_ids: decode(id, "entity_ids", row.entity_ids)?,
            evaluation_type: row
                .evaluation_type
                .parse()
                .map_err(|err: String| corrupt(id, "evaluation_type", err))?,
            time_preset: row
                .time_preset
                .parse()
                .map_err(|err: String| corrupt(id, "time_preset", err))?,
            conditions: decode(id, "conditions", row.conditions)?,
            action: decode(id, "action", row.action)?,
            execution_count_limit: row
                .execution_count_limit
                .map(|limit| u32::try_from(limit).map_err(|err| corrupt(id, "execution_count_limit", err)))
                .transpose()?,
            action_frequency: row
                .action_frequency
                .map(|seconds| u64::try_from(seconds).map_err(|err| corrupt(id, "action_frequency", err)))
                .transpose()?,
            schedule: row
                .schedule
                .map(|value| decode(id, "schedule", value))
                .transpose()?,
            status: row
                .status
                .parse()
                .map_err(|err: String| corrupt(id, "status", err))?,
            executions_count: u32::try_from(row.executions_count)
                .map_err(|err| corrupt(id, "executions_count", err))?,
            last_execution: row.last_execution,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Postgres-backed execution history. Rows outlive their rule.
#[derive(Clone)]
pub struct PgHistoryBackend {
    pool: DatabasePool,
}

impl PgHistoryBackend {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl HistoryBackend for PgHistoryBackend {
    async fn append(&self, entry: &ExecutionHistoryEntry) -> Result<(), RuleError> {
        sqlx::query(
            r#"
            INSERT INTO rule_history (
                id, rule_id, time, is_manual, results, exception_code, exception_message
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(entry.id)
        .bind(entry.rule_id)
        .bind(entry.time)
        .bind(entry.is_manual)
        .bind(to_json(&entry.results)?)
        .bind(&entry.exception_code)
        .bind(&entry.exception_message)
        .execute(self.pool.inner())
        .await?;
        Ok(())
    }

    async fn list(&self, rule_id: Uuid, limit: Option<usize>) -> Result<Vec<ExecutionHistoryEntry>, RuleError> {
        let mut builder = QueryBuilder::new(
            "SELECT id, rule_id, time, is_manual, results, exception_code, exception_message \
             FROM rule_history WHERE rule_id = ",
        );
        builder.push_bind(rule_id);
        builder.push(" ORDER BY time DESC, id DESC");

        if let Some(limit) = limit {
            builder.push(" LIMIT ");
            builder.push_bind(i64::try_from(limit).unwrap_or(i64::MAX));
        }

        let rows = builder
            .build_query_as::<HistoryRow>()
            .fetch_all(self.pool.inner())
            .await?;
        rows.into_iter().map(ExecutionHistoryEntry::try_from).collect()
    }
}

#[derive(FromRow)]
struct HistoryRow {
    id: Uuid,
    rule_id: Uuid,
    time: DateTime<Utc>,
    is_manual: bool,
    results: Value,
    exception_code: Option<String>,
    exception_message: Option<String>,
}

impl TryFrom<HistoryRow> for ExecutionHistoryEntry {
    type Error = RuleError;

    fn try_from(row: HistoryRow) -> Result<Self, Self::Error> {
        let results = serde_json::from_value(row.results).map_err(|err| {
            RuleError::Storage(format!("history entry {} has corrupt results: {err}", row.id))
        })?;
        Ok(ExecutionHistoryEntry {
            id: row.id,
            rule_id: row.rule_id,
            time: row.time,
            is_manual: row.is_manual,
            results,
            exception_code: row.exception_code,
            exception_message: row.exception_message,
        })
    }
}
