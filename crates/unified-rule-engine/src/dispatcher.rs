//! 触发分发器
//!
//! 所有触发（事件、手动执行、定时）的统一入口：
//! 选出候选规则并按 (priority desc, 创建顺序) 排序，逐条执行 评估 -> 动作 -> 记账。
//! 单条规则的任何错误（包括 panic）都被隔离并记录，账本不可用等系统错误中止整次分发。

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use automation_shared::observability::metrics;
use chrono::Utc;
use dashmap::DashSet;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::capability::ActionContext;
use crate::error::{Result, RuleError};
use crate::evaluator::ConditionEvaluator;
use crate::executor::ActionExecutor;
use crate::ledger::{ExecutionLedger, ExecutionReport, LedgerEntry};
use crate::lifecycle;
use crate::models::{
    EvaluationContext, ExecutionMode, ExecutionOutcome, ExecutionRecord, Rule, RuleFilter,
    RuleStatus, TenantId, TriggerContext, TriggerType,
};
use crate::store::RuleStore;

/// 分发模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// 事件触发：仅 ACTIVE 规则，按触发类型、实体类型、生效窗口与频率限制筛选
    Automatic,
    /// 手动执行 / 预览：指定单条非 DEPRECATED 规则，不按触发类型筛选
    Manual { rule_id: Uuid },
    /// 定时触发：指定单条规则，其余筛选同自动模式
    Scheduled { rule_id: Uuid },
}

impl DispatchMode {
    pub fn execution_mode(&self) -> ExecutionMode {
        match self {
            Self::Automatic => ExecutionMode::Automatic,
            Self::Manual { .. } => ExecutionMode::Manual,
            Self::Scheduled { .. } => ExecutionMode::Scheduled,
        }
    }

    fn is_manual(&self) -> bool {
        matches!(self, Self::Manual { .. })
    }
}

/// 一次分发的汇总
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchSummary {
    /// 通过筛选的候选规则数
    pub candidates: usize,
    /// 条件匹配（含评估失败）的规则数
    pub matched: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub not_matched: usize,
    /// 截止时间到达时尚未评估的规则数
    pub skipped_timeout: usize,
    /// 因冷却期或每小时上限跳过的规则数
    pub throttled: usize,
    /// 因重复提交跳过的规则数
    pub deduplicated: usize,
    pub duration_ms: i64,
    /// 本次写入的执行记录；手动模式下重复提交返回已有记录
    pub records: Vec<ExecutionRecord>,
}

/// 进程内的去重键占用，析构时释放
struct InFlight<'a> {
    keys: &'a DashSet<String>,
    key: String,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.keys.remove(&self.key);
    }
}

pub struct TriggerDispatcher {
    store: RuleStore,
    ledger: Arc<ExecutionLedger>,
    executor: ActionExecutor,
    evaluator: ConditionEvaluator,
    dispatch_timeout: Duration,
    in_flight: DashSet<String>,
}

impl TriggerDispatcher {
    pub fn new(
        store: RuleStore,
        ledger: Arc<ExecutionLedger>,
        executor: ActionExecutor,
        dispatch_timeout: Duration,
    ) -> Self {
        Self {
            store,
            ledger,
            executor,
            evaluator: ConditionEvaluator::new(),
            dispatch_timeout,
            in_flight: DashSet::new(),
        }
    }

    pub fn store(&self) -> &RuleStore {
        &self.store
    }

    pub fn ledger(&self) -> &Arc<ExecutionLedger> {
        &self.ledger
    }

    /// 分发一次触发
    #[instrument(
        skip(self, context),
        fields(
            tenant_id = %tenant,
            entity_type = %context.entity_type,
            entity_id = %context.entity_id,
            trigger_type = %context.trigger_type
        )
    )]
    pub async fn dispatch(
        &self,
        tenant: &TenantId,
        context: TriggerContext,
        mode: DispatchMode,
    ) -> Result<DispatchSummary> {
        let started = Instant::now();
        let deadline = started + self.dispatch_timeout;
        let execution_mode = mode.execution_mode();
        metrics::record_dispatch(execution_mode.as_str());

        let candidates = self.select_candidates(tenant, &context, mode).await?;
        let mut summary = DispatchSummary {
            candidates: candidates.len(),
            ..Default::default()
        };

        for (index, rule) in candidates.iter().enumerate() {
            if Instant::now() >= deadline {
                summary.skipped_timeout = candidates.len() - index;
                metrics::record_dispatch_skipped("timeout", summary.skipped_timeout as u64);
                warn!(skipped = summary.skipped_timeout, "分发超过截止时间，跳过剩余规则");
                break;
            }

            if !mode.is_manual() && self.is_throttled(rule).await? {
                debug!(rule_id = %rule.id, "规则处于频率限制中，跳过");
                summary.throttled += 1;
                metrics::record_dispatch_skipped("throttled", 1);
                continue;
            }

            let dedup_key = ExecutionLedger::dedup_key(rule.id, &context);
            let Some(_guard) = self.reserve(&dedup_key) else {
                summary.deduplicated += 1;
                metrics::record_dispatch_skipped("duplicate", 1);
                continue;
            };
            if let Some(existing) = self.ledger.find_duplicate(tenant, &dedup_key).await? {
                self.on_duplicate(&mut summary, existing, mode);
                continue;
            }

            let report = self.run_rule(rule, &context).await;
            let entry = self
                .ledger
                .record(rule, execution_mode, &context, report, dedup_key)
                .await?;

            match entry {
                LedgerEntry::Duplicate(existing) => self.on_duplicate(&mut summary, existing, mode),
                LedgerEntry::Recorded {
                    record,
                    policy_tripped,
                    ..
                } => {
                    match record.outcome {
                        ExecutionOutcome::MatchedSuccess => {
                            summary.matched += 1;
                            summary.succeeded += 1;
                        }
                        ExecutionOutcome::MatchedFailure => {
                            summary.matched += 1;
                            summary.failed += 1;
                        }
                        ExecutionOutcome::NotMatched => summary.not_matched += 1,
                    }
                    if policy_tripped {
                        self.trip(tenant, rule.id).await;
                    }
                    summary.records.push(record);
                }
            }
        }

        summary.duration_ms = started.elapsed().as_millis() as i64;
        info!(
            mode = execution_mode.as_str(),
            candidates = summary.candidates,
            matched = summary.matched,
            succeeded = summary.succeeded,
            failed = summary.failed,
            duration_ms = summary.duration_ms,
            "分发完成"
        );
        Ok(summary)
    }

    /// 手动执行单条规则，返回其执行记录
    pub async fn execute_rule(
        &self,
        tenant: &TenantId,
        rule_id: Uuid,
        context: TriggerContext,
    ) -> Result<ExecutionRecord> {
        let summary = self
            .dispatch(tenant, context, DispatchMode::Manual { rule_id })
            .await?;

        summary.records.into_iter().next().ok_or_else(|| {
            RuleError::Timeout(format!("规则 {rule_id} 在截止时间内未能执行"))
        })
    }

    async fn select_candidates(
        &self,
        tenant: &TenantId,
        context: &TriggerContext,
        mode: DispatchMode,
    ) -> Result<Vec<Rule>> {
        let now = Utc::now();
        match mode {
            DispatchMode::Automatic => {
                let filter = RuleFilter {
                    status: Some(RuleStatus::Active),
                    ..Default::default()
                };
                let rules = self.store.list(tenant, &filter).await?;
                Ok(rules
                    .into_iter()
                    .filter(|r| {
                        lifecycle::is_auto_eligible(r.status)
                            && r.trigger_type == context.trigger_type
                            && r.applies_to_entity(&context.entity_type)
                            && r.within_window(now)
                    })
                    .collect())
            }
            DispatchMode::Manual { rule_id } => {
                let rule = self.store.get(tenant, rule_id).await?;
                if !lifecycle::is_manual_eligible(rule.status) {
                    return Err(RuleError::Validation(format!(
                        "状态为 {} 的规则不能执行",
                        rule.status
                    )));
                }
                if !rule.applies_to_entity(&context.entity_type) {
                    return Err(RuleError::Validation(format!(
                        "规则不适用于实体类型 {}",
                        context.entity_type
                    )));
                }
                Ok(vec![rule])
            }
            DispatchMode::Scheduled { rule_id } => {
                let eligible = match self.store.get(tenant, rule_id).await {
                    Ok(rule) => {
                        (lifecycle::is_auto_eligible(rule.status)
                            && rule.trigger_type == TriggerType::Schedule
                            && rule.within_window(now))
                        .then_some(rule)
                    }
                    // 定时轮询期间规则可能已被删除
                    Err(RuleError::NotFound(_)) => None,
                    Err(err) => return Err(err),
                };
                Ok(eligible.into_iter().collect())
            }
        }
    }

    async fn is_throttled(&self, rule: &Rule) -> Result<bool> {
        let now = Utc::now();
        if rule.in_cooldown(now) {
            return Ok(true);
        }
        match rule.max_executions_per_hour {
            Some(max) if max > 0 => {
                let recent = self
                    .ledger
                    .executions_last_hour(&rule.tenant_id, rule.id, now)
                    .await?;
                Ok(recent >= max)
            }
            _ => Ok(false),
        }
    }

    fn reserve(&self, key: &str) -> Option<InFlight<'_>> {
        self.in_flight.insert(key.to_string()).then(|| InFlight {
            keys: &self.in_flight,
            key: key.to_string(),
        })
    }

    fn on_duplicate(&self, summary: &mut DispatchSummary, existing: ExecutionRecord, mode: DispatchMode) {
        debug!(record_id = %existing.id, rule_id = %existing.rule_id, "重复触发，沿用已有执行记录");
        summary.deduplicated += 1;
        metrics::record_dispatch_skipped("duplicate", 1);
        if mode.is_manual() {
            summary.records.push(existing);
        }
    }

    async fn trip(&self, tenant: &TenantId, rule_id: Uuid) {
        if let Err(err) = self.store.mark_error(tenant, rule_id).await {
            warn!(%rule_id, error = %err, "切换规则到 ERROR 失败");
        }
    }

    /// 对规则快照执行 评估 -> 动作
    async fn run_rule(&self, rule: &Rule, context: &TriggerContext) -> ExecutionReport {
        let started = Instant::now();
        let eval_ctx = EvaluationContext::new(context);
        let evaluation = std::panic::catch_unwind(AssertUnwindSafe(|| {
            self.evaluator.evaluate(rule.conditions.as_ref(), &eval_ctx)
        }));

        let report = match evaluation {
            Ok(Ok(result)) if !result.matched => {
                ExecutionReport::not_matched(started.elapsed().as_millis() as i64)
            }
            Ok(Ok(_)) => {
                let action_ctx = ActionContext {
                    tenant_id: rule.tenant_id.clone(),
                    rule_id: rule.id,
                    rule_name: rule.name.clone(),
                    trigger: context.clone(),
                };
                let result = self.executor.execute(&rule.actions, &action_ctx).await;
                let error = result.first_error();
                ExecutionReport {
                    outcome: if result.success {
                        ExecutionOutcome::MatchedSuccess
                    } else {
                        ExecutionOutcome::MatchedFailure
                    },
                    action_results: result.results,
                    error,
                    duration_ms: started.elapsed().as_millis() as i64,
                }
            }
            Ok(Err(err)) => {
                warn!(rule_id = %rule.id, error = %err, "条件评估失败");
                Self::failed_report(format!("[{}] {}", err.error_code(), err), started)
            }
            Err(_) => {
                warn!(rule_id = %rule.id, "条件评估发生 panic");
                Self::failed_report("[INTERNAL_ERROR] 条件评估异常终止".to_string(), started)
            }
        };

        metrics::record_rule_execution(
            report.outcome.as_str(),
            report.duration_ms as f64 / 1000.0,
        );
        report
    }

    fn failed_report(error: String, started: Instant) -> ExecutionReport {
        ExecutionReport {
            outcome: ExecutionOutcome::MatchedFailure,
            action_results: Vec::new(),
            error: Some(error),
            duration_ms: started.elapsed().as_millis() as i64,
        }
    }
}
