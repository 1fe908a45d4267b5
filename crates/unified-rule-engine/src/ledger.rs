//! 执行账本
//!
//! 账本是执行记录的唯一创建者，也是规则计数器的唯一写入方。
//! 每次写入后按失败策略判定规则是否应切换到 ERROR。

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    ActionResult, ExecutionMode, ExecutionOutcome, ExecutionRecord, Rule, RuleCounters, TenantId,
    TriggerContext,
};
use crate::policy::FailurePolicy;
use crate::repository::{AppendOutcome, LedgerRepository, WindowSummary};

/// 单条规则执行的结果报告，由分发器交给账本落库
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub outcome: ExecutionOutcome,
    pub action_results: Vec<ActionResult>,
    pub error: Option<String>,
    pub duration_ms: i64,
}

impl ExecutionReport {
    pub fn not_matched(duration_ms: i64) -> Self {
        Self {
            outcome: ExecutionOutcome::NotMatched,
            action_results: Vec::new(),
            error: None,
            duration_ms,
        }
    }
}

/// 账本写入结果
#[derive(Debug, Clone)]
pub enum LedgerEntry {
    Recorded {
        record: ExecutionRecord,
        /// 已匹配结果更新后的计数器
        counters: Option<RuleCounters>,
        /// 失败策略是否判定应切换到 ERROR
        policy_tripped: bool,
    },
    /// 去重窗口内的重复提交，返回已有记录
    Duplicate(ExecutionRecord),
}

impl LedgerEntry {
    pub fn record(&self) -> &ExecutionRecord {
        match self {
            Self::Recorded { record, .. } => record,
            Self::Duplicate(record) => record,
        }
    }

    pub fn into_record(self) -> ExecutionRecord {
        match self {
            Self::Recorded { record, .. } => record,
            Self::Duplicate(record) => record,
        }
    }
}

pub struct ExecutionLedger {
    repo: Arc<dyn LedgerRepository>,
    policy: FailurePolicy,
    dedup_window: Duration,
}

impl ExecutionLedger {
    pub fn new(repo: Arc<dyn LedgerRepository>, policy: FailurePolicy, dedup_window: Duration) -> Self {
        Self {
            repo,
            policy,
            dedup_window,
        }
    }

    pub fn dedup_window(&self) -> Duration {
        self.dedup_window
    }

    /// 计算重复提交检测键：sha256(ruleId, entityId, triggerType, 规范化 triggerData)
    pub fn dedup_key(rule_id: Uuid, context: &TriggerContext) -> String {
        let mut hasher = Sha256::new();
        hasher.update(rule_id.as_bytes());
        hasher.update([0]);
        hasher.update(context.entity_id.as_bytes());
        hasher.update([0]);
        hasher.update(context.trigger_type.as_str().as_bytes());
        hasher.update([0]);
        hash_canonical(&mut hasher, &context.trigger_data);
        hex(&hasher.finalize())
    }

    /// 追加执行记录，并在同一原子操作内更新规则计数器
    #[instrument(
        skip(self, rule, context, report, dedup_key),
        fields(rule_id = %rule.id, tenant_id = %rule.tenant_id, outcome = %report.outcome)
    )]
    pub async fn record(
        &self,
        rule: &Rule,
        mode: ExecutionMode,
        context: &TriggerContext,
        report: ExecutionReport,
        dedup_key: String,
    ) -> Result<LedgerEntry> {
        let now = Utc::now();
        let record = ExecutionRecord {
            id: Uuid::now_v7(),
            tenant_id: rule.tenant_id.clone(),
            rule_id: rule.id,
            rule_name: rule.name.clone(),
            rule_type: rule.rule_type,
            rule_version: rule.version,
            mode,
            context: context.clone(),
            outcome: report.outcome,
            action_results: report.action_results,
            error: report.error,
            dedup_key,
            duration_ms: report.duration_ms,
            recorded_at: now,
        };

        match self.repo.append(&record, now - self.dedup_window).await? {
            AppendOutcome::Duplicate(existing) => {
                debug!(existing_id = %existing.id, "重复提交，忽略本次执行记录");
                Ok(LedgerEntry::Duplicate(*existing))
            }
            AppendOutcome::Recorded(counters) => {
                let policy_tripped = if record.outcome.is_matched() {
                    self.check_policy(rule).await?
                } else {
                    false
                };
                Ok(LedgerEntry::Recorded {
                    record,
                    counters,
                    policy_tripped,
                })
            }
        }
    }

    /// 只统计最近一次状态迁移之后的结果，人工从 ERROR 恢复后重新计数
    async fn check_policy(&self, rule: &Rule) -> Result<bool> {
        let lookback = self.policy.lookback();
        if lookback == 0 {
            return Ok(false);
        }
        let recent = self
            .repo
            .recent_outcomes(&rule.tenant_id, rule.id, rule.status_changed_at, lookback)
            .await?;
        let tripped = self.policy.should_trip(&recent);
        if tripped {
            warn!(rule_id = %rule.id, policy = ?self.policy, "规则触发失败策略");
        }
        Ok(tripped)
    }

    /// 去重窗口内的已有记录
    pub async fn find_duplicate(
        &self,
        tenant: &TenantId,
        dedup_key: &str,
    ) -> Result<Option<ExecutionRecord>> {
        self.repo
            .find_by_dedup_key(tenant, dedup_key, Utc::now() - self.dedup_window)
            .await
    }

    /// 最近一小时内的已匹配执行次数（用于频率限制）
    pub async fn executions_last_hour(
        &self,
        tenant: &TenantId,
        rule_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<i64> {
        self.repo
            .count_matched_since(tenant, rule_id, now - Duration::hours(1))
            .await
    }

    /// 执行历史（新到旧）
    #[instrument(skip(self))]
    pub async fn history(
        &self,
        tenant: &TenantId,
        rule_id: Uuid,
        page: i64,
        page_size: i64,
    ) -> Result<(Vec<ExecutionRecord>, i64)> {
        self.repo.history(tenant, rule_id, page, page_size).await
    }

    pub async fn window_summary(&self, tenant: &TenantId, since: DateTime<Utc>) -> Result<WindowSummary> {
        self.repo.window_summary(tenant, since).await
    }
}

/// 对象键排序后写入哈希，保证相同内容得到相同的键
fn hash_canonical(hasher: &mut Sha256, value: &Value) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            hasher.update(b"{");
            for key in keys {
                hasher.update(key.as_bytes());
                hasher.update(b":");
                hash_canonical(hasher, &map[key.as_str()]);
                hasher.update(b",");
            }
            hasher.update(b"}");
        }
        Value::Array(items) => {
            hasher.update(b"[");
            for item in items {
                hash_canonical(hasher, item);
                hasher.update(b",");
            }
            hasher.update(b"]");
        }
        other => hasher.update(other.to_string().as_bytes()),
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RuleDraft, RuleStatus, RuleType, TriggerType};
    use crate::repository::{MemoryStore, MockLedgerRepository, RuleRepository};
    use ExecutionOutcome::{MatchedFailure, MatchedSuccess};
    use serde_json::json;

    fn context(data: Value) -> TriggerContext {
        TriggerContext::new("email", "e-1", TriggerType::EntityCreated, data)
    }

    fn report(outcome: ExecutionOutcome) -> ExecutionReport {
        ExecutionReport {
            outcome,
            action_results: vec![],
            error: None,
            duration_ms: 5,
        }
    }

    async fn setup(policy: FailurePolicy) -> (MemoryStore, ExecutionLedger, Rule) {
        let store = MemoryStore::new();
        let rule = store
            .insert(Rule::from_draft(
                TenantId::new("org-1"),
                RuleDraft::new("r", RuleType::Processing, TriggerType::EntityCreated),
            ))
            .await
            .unwrap();
        let ledger = ExecutionLedger::new(Arc::new(store.clone()), policy, Duration::minutes(5));
        (store, ledger, rule)
    }

    #[test]
    fn test_dedup_key_ignores_object_key_order() {
        let id = Uuid::now_v7();
        let a = ExecutionLedger::dedup_key(id, &context(json!({"a": 1, "b": {"x": true, "y": [1, 2]}})));
        let b = ExecutionLedger::dedup_key(id, &context(json!({"b": {"y": [1, 2], "x": true}, "a": 1})));
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_dedup_key_distinguishes_inputs() {
        let id = Uuid::now_v7();
        let base = ExecutionLedger::dedup_key(id, &context(json!({"a": 1})));
        assert_ne!(base, ExecutionLedger::dedup_key(id, &context(json!({"a": 2}))));
        assert_ne!(base, ExecutionLedger::dedup_key(Uuid::now_v7(), &context(json!({"a": 1}))));

        let mut other_entity = context(json!({"a": 1}));
        other_entity.entity_id = "e-2".into();
        assert_ne!(base, ExecutionLedger::dedup_key(id, &other_entity));
    }

    #[tokio::test]
    async fn test_record_updates_counters_atomically() {
        let (store, ledger, rule) = setup(FailurePolicy::Disabled).await;
        let ctx = context(json!({}));

        let entry = ledger
            .record(&rule, ExecutionMode::Automatic, &ctx, report(MatchedSuccess), "k1".into())
            .await
            .unwrap();
        match entry {
            LedgerEntry::Recorded { counters, policy_tripped, record } => {
                let counters = counters.unwrap();
                assert_eq!(counters.execution_count, 1);
                assert_eq!(counters.success_count, 1);
                assert!(!policy_tripped);
                assert_eq!(record.rule_name, "r");
                assert_eq!(record.rule_version, 1);
            }
            other => panic!("unexpected entry: {other:?}"),
        }

        let stored = store.get(&rule.tenant_id, rule.id).await.unwrap().unwrap();
        assert_eq!(
            stored.counters.execution_count,
            stored.counters.success_count + stored.counters.error_count
        );
    }

    #[tokio::test]
    async fn test_duplicate_returns_existing_record() {
        let (_store, ledger, rule) = setup(FailurePolicy::Disabled).await;
        let ctx = context(json!({"subject": "x"}));
        let key = ExecutionLedger::dedup_key(rule.id, &ctx);

        let first = ledger
            .record(&rule, ExecutionMode::Automatic, &ctx, report(MatchedSuccess), key.clone())
            .await
            .unwrap();
        let second = ledger
            .record(&rule, ExecutionMode::Automatic, &ctx, report(MatchedSuccess), key.clone())
            .await
            .unwrap();

        assert!(matches!(second, LedgerEntry::Duplicate(_)));
        assert_eq!(second.record().id, first.record().id);
        assert!(ledger.find_duplicate(&rule.tenant_id, &key).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_policy_trips_after_consecutive_failures() {
        let (_store, ledger, rule) = setup(FailurePolicy::ConsecutiveFailures { threshold: 2 }).await;
        let ctx = context(json!({}));

        let first = ledger
            .record(&rule, ExecutionMode::Automatic, &ctx, report(MatchedFailure), "k1".into())
            .await
            .unwrap();
        assert!(matches!(first, LedgerEntry::Recorded { policy_tripped: false, .. }));

        let second = ledger
            .record(&rule, ExecutionMode::Automatic, &ctx, report(MatchedFailure), "k2".into())
            .await
            .unwrap();
        assert!(matches!(second, LedgerEntry::Recorded { policy_tripped: true, .. }));
    }

    #[tokio::test]
    async fn test_policy_ignores_outcomes_before_status_change() {
        let (store, ledger, rule) = setup(FailurePolicy::ConsecutiveFailures { threshold: 2 }).await;
        let ctx = context(json!({}));

        for key in ["k1", "k2"] {
            ledger
                .record(&rule, ExecutionMode::Automatic, &ctx, report(MatchedFailure), key.into())
                .await
                .unwrap();
        }

        // 人工恢复后状态迁移时间前移，旧失败不再计入
        let reset = store
            .compare_and_set_status(&rule.tenant_id, rule.id, rule.status, RuleStatus::Active, Utc::now())
            .await
            .unwrap()
            .unwrap();
        assert!(reset.status_changed_at > rule.status_changed_at);

        let entry = ledger
            .record(&reset, ExecutionMode::Automatic, &ctx, report(MatchedFailure), "k3".into())
            .await
            .unwrap();
        assert!(matches!(entry, LedgerEntry::Recorded { policy_tripped: false, .. }));

        let entry = ledger
            .record(&reset, ExecutionMode::Automatic, &ctx, report(MatchedFailure), "k4".into())
            .await
            .unwrap();
        assert!(matches!(entry, LedgerEntry::Recorded { policy_tripped: true, .. }));
    }

    #[tokio::test]
    async fn test_not_matched_skips_policy_check() {
        let mut repo = MockLedgerRepository::new();
        repo.expect_append()
            .returning(|_, _| Ok(AppendOutcome::Recorded(None)));
        repo.expect_recent_outcomes().never();

        let ledger = ExecutionLedger::new(
            Arc::new(repo),
            FailurePolicy::ConsecutiveFailures { threshold: 1 },
            Duration::minutes(5),
        );
        let rule = Rule::from_draft(
            TenantId::new("org-1"),
            RuleDraft::new("r", RuleType::Processing, TriggerType::EntityCreated),
        );

        let entry = ledger
            .record(
                &rule,
                ExecutionMode::Automatic,
                &context(json!({})),
                ExecutionReport::not_matched(1),
                "k".into(),
            )
            .await
            .unwrap();
        assert!(matches!(entry, LedgerEntry::Recorded { counters: None, policy_tripped: false, .. }));
    }

    #[tokio::test]
    async fn test_storage_error_propagates() {
        let mut repo = MockLedgerRepository::new();
        repo.expect_append()
            .returning(|_, _| Err(crate::error::RuleError::Storage("连接断开".into())));

        let ledger = ExecutionLedger::new(Arc::new(repo), FailurePolicy::Disabled, Duration::minutes(5));
        let rule = Rule::from_draft(
            TenantId::new("org-1"),
            RuleDraft::new("r", RuleType::Processing, TriggerType::EntityCreated),
        );

        let err = ledger
            .record(&rule, ExecutionMode::Manual, &context(json!({})), report(MatchedSuccess), "k".into())
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }
}
