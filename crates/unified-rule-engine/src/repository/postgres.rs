//! PostgreSQL 存储后端
//!
//! 条件与动作以 JSONB 保存；账本追加与计数器更新在同一事务内完成，
//! 同一去重键的并发写入通过事务级 advisory lock 串行化

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;
use sqlx::{FromRow, PgPool, Row};
use uuid::Uuid;

use super::traits::{AppendOutcome, LedgerRepository, RuleRepository, WindowSummary};
use crate::error::{Result, RuleError};
use crate::models::{
    ExecutionOutcome, ExecutionRecord, Rule, RuleCounters, RuleFilter, RuleStatus, TenantId,
    TriggerType,
};

const RULE_COLUMNS: &str = r#"
    id, tenant_id, name, description, category, rule_type, trigger_type, entity_types,
    conditions, actions, priority, status, schedule, active_from, active_to, cooldown_secs,
    max_executions_per_hour, execution_count, success_count, error_count, avg_execution_time_ms,
    last_executed_at, version, sequence, created_at, updated_at, status_changed_at
"#;

const RECORD_COLUMNS: &str = r#"
    id, tenant_id, rule_id, rule_name, rule_type, rule_version, mode, context, outcome,
    action_results, error, dedup_key, duration_ms, occurred_at
"#;

/// 枚举以 SCREAMING_SNAKE_CASE 字符串存储，复用 serde 解析
fn parse_enum<T: DeserializeOwned>(raw: String) -> Result<T> {
    Ok(serde_json::from_value(Value::String(raw))?)
}

#[derive(FromRow)]
struct RuleRow {
    id: Uuid,
    tenant_id: String,
    name: String,
    description: Option<String>,
    category: Option<String>,
    rule_type: String,
    trigger_type: String,
    entity_types: Value,
    conditions: Option<Value>,
    actions: Value,
    priority: i32,
    status: String,
    schedule: Option<String>,
    active_from: Option<DateTime<Utc>>,
    active_to: Option<DateTime<Utc>>,
    cooldown_secs: Option<i64>,
    max_executions_per_hour: Option<i64>,
    execution_count: i64,
    success_count: i64,
    error_count: i64,
    avg_execution_time_ms: f64,
    last_executed_at: Option<DateTime<Utc>>,
    version: i64,
    sequence: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    status_changed_at: DateTime<Utc>,
}

impl TryFrom<RuleRow> for Rule {
    type Error = RuleError;

    fn try_from(row: RuleRow) -> Result<Self> {
        Ok(Rule {
            id: row.id,
            tenant_id: TenantId::new(row.tenant_id),
            name: row.name,
            description: row.description,
            category: row.category,
            rule_type: parse_enum(row.rule_type)?,
            trigger_type: parse_enum(row.trigger_type)?,
            entity_types: serde_json::from_value(row.entity_types)?,
            conditions: crate::models::parse_conditions(row.conditions)?,
            actions: serde_json::from_value(row.actions)?,
            priority: row.priority,
            status: parse_enum(row.status)?,
            schedule: row.schedule,
            active_from: row.active_from,
            active_to: row.active_to,
            cooldown_secs: row.cooldown_secs,
            max_executions_per_hour: row.max_executions_per_hour,
            counters: RuleCounters {
                execution_count: row.execution_count,
                success_count: row.success_count,
                error_count: row.error_count,
                avg_execution_time_ms: row.avg_execution_time_ms,
                last_executed_at: row.last_executed_at,
            },
            version: row.version,
            sequence: row.sequence,
            created_at: row.created_at,
            updated_at: row.updated_at,
            status_changed_at: row.status_changed_at,
        })
    }
}

#[derive(FromRow)]
struct RecordRow {
    id: Uuid,
    tenant_id: String,
    rule_id: Uuid,
    rule_name: String,
    rule_type: String,
    rule_version: i64,
    mode: String,
    context: Value,
    outcome: String,
    action_results: Value,
    error: Option<String>,
    dedup_key: String,
    duration_ms: i64,
    occurred_at: DateTime<Utc>,
}

impl TryFrom<RecordRow> for ExecutionRecord {
    type Error = RuleError;

    fn try_from(row: RecordRow) -> Result<Self> {
        Ok(ExecutionRecord {
            id: row.id,
            tenant_id: TenantId::new(row.tenant_id),
            rule_id: row.rule_id,
            rule_name: row.rule_name,
            rule_type: parse_enum(row.rule_type)?,
            rule_version: row.rule_version,
            mode: parse_enum(row.mode)?,
            context: serde_json::from_value(row.context)?,
            outcome: parse_enum(row.outcome)?,
            action_results: serde_json::from_value(row.action_results)?,
            error: row.error,
            dedup_key: row.dedup_key,
            duration_ms: row.duration_ms,
            recorded_at: row.occurred_at,
        })
    }
}

fn into_rules(rows: Vec<RuleRow>) -> Result<Vec<Rule>> {
    rows.into_iter().map(Rule::try_from).collect()
}

/// 规则定义仓储
#[derive(Clone)]
pub struct PgRuleRepository {
    pool: PgPool,
}

impl PgRuleRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RuleRepository for PgRuleRepository {
    async fn insert(&self, rule: Rule) -> Result<Rule> {
        let sql = format!(
            r#"
            INSERT INTO automation_rules (
                id, tenant_id, name, description, category, rule_type, trigger_type,
                entity_types, conditions, actions, priority, status, schedule,
                active_from, active_to, cooldown_secs, max_executions_per_hour,
                version, created_at, updated_at, status_changed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, $21)
            RETURNING {RULE_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, RuleRow>(&sql)
            .bind(rule.id)
            .bind(rule.tenant_id.as_str())
            .bind(&rule.name)
            .bind(&rule.description)
            .bind(&rule.category)
            .bind(rule.rule_type.as_str())
            .bind(rule.trigger_type.as_str())
            .bind(serde_json::to_value(&rule.entity_types)?)
            .bind(rule.conditions.as_ref().map(serde_json::to_value).transpose()?)
            .bind(serde_json::to_value(&rule.actions)?)
            .bind(rule.priority)
            .bind(rule.status.as_str())
            .bind(&rule.schedule)
            .bind(rule.active_from)
            .bind(rule.active_to)
            .bind(rule.cooldown_secs)
            .bind(rule.max_executions_per_hour)
            .bind(rule.version)
            .bind(rule.created_at)
            .bind(rule.updated_at)
            .bind(rule.status_changed_at)
            .fetch_one(&self.pool)
            .await?;

        row.try_into()
    }

    async fn update_definition(&self, rule: &Rule, expected_version: i64) -> Result<Option<Rule>> {
        let sql = format!(
            r#"
            UPDATE automation_rules
            SET name = $4, description = $5, category = $6, rule_type = $7, trigger_type = $8,
                entity_types = $9, conditions = $10, actions = $11, priority = $12,
                schedule = $13, active_from = $14, active_to = $15, cooldown_secs = $16,
                max_executions_per_hour = $17, version = $18, updated_at = $19
            WHERE id = $1 AND tenant_id = $2 AND version = $3
            RETURNING {RULE_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, RuleRow>(&sql)
            .bind(rule.id)
            .bind(rule.tenant_id.as_str())
            .bind(expected_version)
            .bind(&rule.name)
            .bind(&rule.description)
            .bind(&rule.category)
            .bind(rule.rule_type.as_str())
            .bind(rule.trigger_type.as_str())
            .bind(serde_json::to_value(&rule.entity_types)?)
            .bind(rule.conditions.as_ref().map(serde_json::to_value).transpose()?)
            .bind(serde_json::to_value(&rule.actions)?)
            .bind(rule.priority)
            .bind(&rule.schedule)
            .bind(rule.active_from)
            .bind(rule.active_to)
            .bind(rule.cooldown_secs)
            .bind(rule.max_executions_per_hour)
            .bind(rule.version)
            .bind(rule.updated_at)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Rule::try_from).transpose()
    }

    async fn compare_and_set_status(
        &self,
        tenant: &TenantId,
        id: Uuid,
        expected: RuleStatus,
        status: RuleStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<Option<Rule>> {
        let sql = format!(
            r#"
            UPDATE automation_rules
            SET status = $4, updated_at = $5, status_changed_at = $5
            WHERE id = $1 AND tenant_id = $2 AND status = $3
            RETURNING {RULE_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, RuleRow>(&sql)
            .bind(id)
            .bind(tenant.as_str())
            .bind(expected.as_str())
            .bind(status.as_str())
            .bind(updated_at)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Rule::try_from).transpose()
    }

    async fn get(&self, tenant: &TenantId, id: Uuid) -> Result<Option<Rule>> {
        let sql = format!("SELECT {RULE_COLUMNS} FROM automation_rules WHERE id = $1 AND tenant_id = $2");
        let row = sqlx::query_as::<_, RuleRow>(&sql)
            .bind(id)
            .bind(tenant.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Rule::try_from).transpose()
    }

    async fn list(&self, tenant: &TenantId, filter: &RuleFilter) -> Result<Vec<Rule>> {
        let search = filter
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());
        let sql = format!(
            r#"
            SELECT {RULE_COLUMNS}
            FROM automation_rules
            WHERE tenant_id = $1
              AND ($2::VARCHAR IS NULL OR rule_type = $2)
              AND ($3::VARCHAR IS NULL OR status = $3)
              AND ($4::VARCHAR IS NULL OR name ILIKE '%' || $4 || '%' OR description ILIKE '%' || $4 || '%')
            ORDER BY priority DESC, sequence ASC
            "#
        );
        let rows = sqlx::query_as::<_, RuleRow>(&sql)
            .bind(tenant.as_str())
            .bind(filter.rule_type.map(|t| t.as_str()))
            .bind(filter.status.map(|s| s.as_str()))
            .bind(search)
            .fetch_all(&self.pool)
            .await?;

        into_rules(rows)
    }

    async fn list_scheduled(&self) -> Result<Vec<Rule>> {
        let sql = format!(
            r#"
            SELECT {RULE_COLUMNS}
            FROM automation_rules
            WHERE trigger_type = $1 AND status = $2
            ORDER BY priority DESC, sequence ASC
            "#
        );
        let rows = sqlx::query_as::<_, RuleRow>(&sql)
            .bind(TriggerType::Schedule.as_str())
            .bind(RuleStatus::Active.as_str())
            .fetch_all(&self.pool)
            .await?;

        into_rules(rows)
    }

    async fn delete(&self, tenant: &TenantId, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM automation_rules WHERE id = $1 AND tenant_id = $2")
            .bind(id)
            .bind(tenant.as_str())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

/// 执行账本仓储
#[derive(Clone)]
pub struct PgLedgerRepository {
    pool: PgPool,
}

impl PgLedgerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LedgerRepository for PgLedgerRepository {
    async fn append(
        &self,
        record: &ExecutionRecord,
        dedup_since: DateTime<Utc>,
    ) -> Result<AppendOutcome> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(format!("{}:{}", record.tenant_id, record.dedup_key))
            .execute(&mut *tx)
            .await?;

        let sql = format!(
            r#"
            SELECT {RECORD_COLUMNS}
            FROM rule_executions
            WHERE tenant_id = $1 AND dedup_key = $2 AND occurred_at >= $3
            ORDER BY occurred_at DESC
            LIMIT 1
            "#
        );
        let existing = sqlx::query_as::<_, RecordRow>(&sql)
            .bind(record.tenant_id.as_str())
            .bind(&record.dedup_key)
            .bind(dedup_since)
            .fetch_optional(&mut *tx)
            .await?;
        if let Some(row) = existing {
            tx.rollback().await?;
            return Ok(AppendOutcome::Duplicate(Box::new(row.try_into()?)));
        }

        sqlx::query(
            r#"
            INSERT INTO rule_executions (
                id, tenant_id, rule_id, rule_name, rule_type, rule_version, mode,
                entity_type, entity_id, trigger_type, context, outcome, action_results,
                error, dedup_key, duration_ms, occurred_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            "#,
        )
        .bind(record.id)
        .bind(record.tenant_id.as_str())
        .bind(record.rule_id)
        .bind(&record.rule_name)
        .bind(record.rule_type.as_str())
        .bind(record.rule_version)
        .bind(record.mode.as_str())
        .bind(&record.context.entity_type)
        .bind(&record.context.entity_id)
        .bind(record.context.trigger_type.as_str())
        .bind(serde_json::to_value(&record.context)?)
        .bind(record.outcome.as_str())
        .bind(serde_json::to_value(&record.action_results)?)
        .bind(&record.error)
        .bind(&record.dedup_key)
        .bind(record.duration_ms)
        .bind(record.recorded_at)
        .execute(&mut *tx)
        .await?;

        let counters = if record.outcome.is_matched() {
            let success = i64::from(record.outcome == ExecutionOutcome::MatchedSuccess);
            // UPDATE 右侧引用的均为旧值
            let row = sqlx::query(
                r#"
                UPDATE automation_rules
                SET execution_count = execution_count + 1,
                    success_count = success_count + $2,
                    error_count = error_count + $3,
                    avg_execution_time_ms =
                        (avg_execution_time_ms * execution_count + $4) / (execution_count + 1),
                    last_executed_at = $5
                WHERE id = $1
                RETURNING execution_count, success_count, error_count,
                          avg_execution_time_ms, last_executed_at
                "#,
            )
            .bind(record.rule_id)
            .bind(success)
            .bind(1 - success)
            .bind(record.duration_ms as f64)
            .bind(record.recorded_at)
            .fetch_optional(&mut *tx)
            .await?;

            row.map(|row| RuleCounters {
                execution_count: row.get("execution_count"),
                success_count: row.get("success_count"),
                error_count: row.get("error_count"),
                avg_execution_time_ms: row.get("avg_execution_time_ms"),
                last_executed_at: row.get("last_executed_at"),
            })
        } else {
            None
        };

        tx.commit().await?;
        Ok(AppendOutcome::Recorded(counters))
    }

    async fn find_by_dedup_key(
        &self,
        tenant: &TenantId,
        dedup_key: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<ExecutionRecord>> {
        let sql = format!(
            r#"
            SELECT {RECORD_COLUMNS}
            FROM rule_executions
            WHERE tenant_id = $1 AND dedup_key = $2 AND occurred_at >= $3
            ORDER BY occurred_at DESC
            LIMIT 1
            "#
        );
        let row = sqlx::query_as::<_, RecordRow>(&sql)
            .bind(tenant.as_str())
            .bind(dedup_key)
            .bind(since)
            .fetch_optional(&self.pool)
            .await?;

        row.map(ExecutionRecord::try_from).transpose()
    }

    async fn recent_outcomes(
        &self,
        tenant: &TenantId,
        rule_id: Uuid,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ExecutionOutcome>> {
        let rows = sqlx::query(
            r#"
            SELECT outcome
            FROM rule_executions
            WHERE tenant_id = $1 AND rule_id = $2 AND outcome <> 'NOT_MATCHED' AND occurred_at >= $3
            ORDER BY occurred_at DESC, id DESC
            LIMIT $4
            "#,
        )
        .bind(tenant.as_str())
        .bind(rule_id)
        .bind(since)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| parse_enum(row.get::<String, _>("outcome")))
            .collect()
    }

    async fn count_matched_since(
        &self,
        tenant: &TenantId,
        rule_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<i64> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS total
            FROM rule_executions
            WHERE tenant_id = $1 AND rule_id = $2 AND outcome <> 'NOT_MATCHED' AND occurred_at >= $3
            "#,
        )
        .bind(tenant.as_str())
        .bind(rule_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get("total"))
    }

    async fn history(
        &self,
        tenant: &TenantId,
        rule_id: Uuid,
        page: i64,
        page_size: i64,
    ) -> Result<(Vec<ExecutionRecord>, i64)> {
        let total: i64 = sqlx::query(
            "SELECT COUNT(*) AS total FROM rule_executions WHERE tenant_id = $1 AND rule_id = $2",
        )
        .bind(tenant.as_str())
        .bind(rule_id)
        .fetch_one(&self.pool)
        .await?
        .get("total");

        let sql = format!(
            r#"
            SELECT {RECORD_COLUMNS}
            FROM rule_executions
            WHERE tenant_id = $1 AND rule_id = $2
            ORDER BY occurred_at DESC, id DESC
            LIMIT $3 OFFSET $4
            "#
        );
        let rows = sqlx::query_as::<_, RecordRow>(&sql)
            .bind(tenant.as_str())
            .bind(rule_id)
            .bind(page_size.max(0))
            .bind((page.max(1) - 1) * page_size.max(0))
            .fetch_all(&self.pool)
            .await?;

        let records = rows
            .into_iter()
            .map(ExecutionRecord::try_from)
            .collect::<Result<Vec<_>>>()?;
        Ok((records, total))
    }

    async fn window_summary(&self, tenant: &TenantId, since: DateTime<Utc>) -> Result<WindowSummary> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE outcome = 'MATCHED_SUCCESS') AS succeeded,
                COUNT(*) FILTER (WHERE outcome = 'MATCHED_FAILURE') AS failed,
                COUNT(*) FILTER (WHERE outcome = 'NOT_MATCHED') AS not_matched,
                COALESCE(SUM(duration_ms) FILTER (WHERE outcome <> 'NOT_MATCHED'), 0)::BIGINT
                    AS total_duration_ms
            FROM rule_executions
            WHERE tenant_id = $1 AND occurred_at >= $2
            "#,
        )
        .bind(tenant.as_str())
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        let succeeded: i64 = row.get("succeeded");
        let failed: i64 = row.get("failed");
        Ok(WindowSummary {
            executions: succeeded + failed,
            succeeded,
            failed,
            not_matched: row.get("not_matched"),
            total_duration_ms: row.get("total_duration_ms"),
        })
    }
}
