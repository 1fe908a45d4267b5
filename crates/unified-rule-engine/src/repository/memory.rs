//! 内存存储后端
//!
//! 规则保存在 DashMap 中，执行账本由一把写锁保护，
//! 追加记录与计数器更新在同一临界区内完成

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use uuid::Uuid;

use super::traits::{AppendOutcome, LedgerRepository, RuleRepository, WindowSummary};
use crate::error::Result;
use crate::models::{
    ExecutionOutcome, ExecutionRecord, Rule, RuleFilter, RuleStatus, TenantId, TriggerType,
};

#[derive(Default)]
struct LedgerState {
    records: Vec<ExecutionRecord>,
    /// (tenant, dedup_key) -> 最近一条记录的下标
    by_dedup_key: HashMap<(TenantId, String), usize>,
}

/// 同时实现规则仓储与账本仓储的内存后端
#[derive(Clone, Default)]
pub struct MemoryStore {
    rules: Arc<DashMap<Uuid, Rule>>,
    sequence: Arc<AtomicI64>,
    ledger: Arc<RwLock<LedgerState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 账本中的记录总数
    pub fn record_count(&self) -> usize {
        self.ledger.read().records.len()
    }
}

#[async_trait]
impl RuleRepository for MemoryStore {
    async fn insert(&self, mut rule: Rule) -> Result<Rule> {
        rule.sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        self.rules.insert(rule.id, rule.clone());
        Ok(rule)
    }

    async fn update_definition(&self, rule: &Rule, expected_version: i64) -> Result<Option<Rule>> {
        let Some(mut entry) = self.rules.get_mut(&rule.id) else {
            return Ok(None);
        };
        if entry.tenant_id != rule.tenant_id || entry.version != expected_version {
            return Ok(None);
        }

        // 状态与计数器以存储中的为准
        let mut updated = rule.clone();
        updated.status = entry.status;
        updated.counters = entry.counters.clone();
        updated.sequence = entry.sequence;
        updated.created_at = entry.created_at;
        updated.status_changed_at = entry.status_changed_at;
        *entry = updated.clone();
        Ok(Some(updated))
    }

    async fn compare_and_set_status(
        &self,
        tenant: &TenantId,
        id: Uuid,
        expected: RuleStatus,
        status: RuleStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<Option<Rule>> {
        let Some(mut entry) = self.rules.get_mut(&id) else {
            return Ok(None);
        };
        if &entry.tenant_id != tenant || entry.status != expected {
            return Ok(None);
        }
        entry.status = status;
        entry.updated_at = updated_at;
        entry.status_changed_at = updated_at;
        Ok(Some(entry.clone()))
    }

    async fn get(&self, tenant: &TenantId, id: Uuid) -> Result<Option<Rule>> {
        Ok(self
            .rules
            .get(&id)
            .filter(|r| &r.tenant_id == tenant)
            .map(|r| r.clone()))
    }

    async fn list(&self, tenant: &TenantId, filter: &RuleFilter) -> Result<Vec<Rule>> {
        let mut rules: Vec<Rule> = self
            .rules
            .iter()
            .filter(|r| &r.tenant_id == tenant && filter.matches(r))
            .map(|r| r.clone())
            .collect();
        rules.sort_by(Rule::dispatch_order);
        Ok(rules)
    }

    async fn list_scheduled(&self) -> Result<Vec<Rule>> {
        let mut rules: Vec<Rule> = self
            .rules
            .iter()
            .filter(|r| r.status == RuleStatus::Active && r.trigger_type == TriggerType::Schedule)
            .map(|r| r.clone())
            .collect();
        rules.sort_by(Rule::dispatch_order);
        Ok(rules)
    }

    async fn delete(&self, tenant: &TenantId, id: Uuid) -> Result<bool> {
        Ok(self
            .rules
            .remove_if(&id, |_, r| &r.tenant_id == tenant)
            .is_some())
    }
}

#[async_trait]
impl LedgerRepository for MemoryStore {
    async fn append(
        &self,
        record: &ExecutionRecord,
        dedup_since: DateTime<Utc>,
    ) -> Result<AppendOutcome> {
        let mut ledger = self.ledger.write();

        let key = (record.tenant_id.clone(), record.dedup_key.clone());
        if let Some(&index) = ledger.by_dedup_key.get(&key) {
            let existing = &ledger.records[index];
            if existing.recorded_at >= dedup_since {
                return Ok(AppendOutcome::Duplicate(Box::new(existing.clone())));
            }
        }

        // 锁顺序固定为 账本 -> 规则条目
        let counters = if record.outcome.is_matched() {
            self.rules.get_mut(&record.rule_id).map(|mut rule| {
                rule.counters.apply(
                    record.outcome == ExecutionOutcome::MatchedSuccess,
                    record.duration_ms,
                    record.recorded_at,
                );
                rule.counters.clone()
            })
        } else {
            None
        };

        let index = ledger.records.len();
        ledger.records.push(record.clone());
        ledger.by_dedup_key.insert(key, index);

        Ok(AppendOutcome::Recorded(counters))
    }

    async fn find_by_dedup_key(
        &self,
        tenant: &TenantId,
        dedup_key: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<ExecutionRecord>> {
        let ledger = self.ledger.read();
        let key = (tenant.clone(), dedup_key.to_string());
        Ok(ledger
            .by_dedup_key
            .get(&key)
            .map(|&index| &ledger.records[index])
            .filter(|r| r.recorded_at >= since)
            .cloned())
    }

    async fn recent_outcomes(
        &self,
        tenant: &TenantId,
        rule_id: Uuid,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ExecutionOutcome>> {
        let ledger = self.ledger.read();
        Ok(ledger
            .records
            .iter()
            .rev()
            .filter(|r| {
                &r.tenant_id == tenant
                    && r.rule_id == rule_id
                    && r.outcome.is_matched()
                    && r.recorded_at >= since
            })
            .take(limit)
            .map(|r| r.outcome)
            .collect())
    }

    async fn count_matched_since(
        &self,
        tenant: &TenantId,
        rule_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<i64> {
        let ledger = self.ledger.read();
        let count = ledger
            .records
            .iter()
            .filter(|r| {
                &r.tenant_id == tenant
                    && r.rule_id == rule_id
                    && r.outcome.is_matched()
                    && r.recorded_at >= since
            })
            .count();
        Ok(count as i64)
    }

    async fn history(
        &self,
        tenant: &TenantId,
        rule_id: Uuid,
        page: i64,
        page_size: i64,
    ) -> Result<(Vec<ExecutionRecord>, i64)> {
        let ledger = self.ledger.read();
        let matching: Vec<&ExecutionRecord> = ledger
            .records
            .iter()
            .rev()
            .filter(|r| &r.tenant_id == tenant && r.rule_id == rule_id)
            .collect();

        let total = matching.len() as i64;
        let offset = ((page.max(1) - 1) * page_size.max(0)) as usize;
        let items = matching
            .into_iter()
            .skip(offset)
            .take(page_size.max(0) as usize)
            .cloned()
            .collect();
        Ok((items, total))
    }

    async fn window_summary(&self, tenant: &TenantId, since: DateTime<Utc>) -> Result<WindowSummary> {
        let ledger = self.ledger.read();
        let mut summary = WindowSummary::default();
        for record in ledger
            .records
            .iter()
            .filter(|r| &r.tenant_id == tenant && r.recorded_at >= since)
        {
            match record.outcome {
                ExecutionOutcome::MatchedSuccess => summary.succeeded += 1,
                ExecutionOutcome::MatchedFailure => summary.failed += 1,
                ExecutionOutcome::NotMatched => {
                    summary.not_matched += 1;
                    continue;
                }
            }
            summary.executions += 1;
            summary.total_duration_ms += record.duration_ms;
        }
        Ok(summary)
    }
}
