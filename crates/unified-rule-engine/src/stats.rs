//! 统计聚合
//!
//! 规则数量来自规则仓储，执行数据来自账本的时间窗口汇总。
//! 系统成功率是窗口内全部已匹配执行的比例，而不是各规则成功率的平均值。

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::Serialize;
use tracing::instrument;

use crate::error::Result;
use crate::models::{RuleFilter, RuleStatus, RuleType, TenantId};
use crate::repository::{LedgerRepository, RuleRepository};

/// 单个规则类型的数量
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleTypeCount {
    pub rule_type: RuleType,
    pub count: i64,
}

/// 统计概览
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleStats {
    pub total_rules: i64,
    pub active_rules: i64,
    /// 非 ACTIVE 状态的规则数
    pub inactive_rules: i64,
    /// 仅包含数量大于 0 的类型
    pub rules_by_type: Vec<RuleTypeCount>,
    /// 窗口内已匹配的执行次数
    pub executions: i64,
    pub succeeded: i64,
    pub failed: i64,
    /// 窗口内无执行时为 None
    pub success_rate: Option<f64>,
    pub avg_execution_time_ms: Option<f64>,
    pub window_hours: i64,
}

#[derive(Clone)]
pub struct StatsAggregator {
    rules: Arc<dyn RuleRepository>,
    ledger: Arc<dyn LedgerRepository>,
}

impl StatsAggregator {
    pub fn new(rules: Arc<dyn RuleRepository>, ledger: Arc<dyn LedgerRepository>) -> Self {
        Self { rules, ledger }
    }

    #[instrument(skip(self), fields(tenant_id = %tenant))]
    pub async fn stats_since(&self, tenant: &TenantId, window: Duration) -> Result<RuleStats> {
        let rules = self.rules.list(tenant, &RuleFilter::default()).await?;
        let summary = self.ledger.window_summary(tenant, Utc::now() - window).await?;

        let total_rules = rules.len() as i64;
        let active_rules = rules
            .iter()
            .filter(|r| r.status == RuleStatus::Active)
            .count() as i64;

        let rules_by_type = RuleType::ALL
            .iter()
            .map(|t| RuleTypeCount {
                rule_type: *t,
                count: rules.iter().filter(|r| r.rule_type == *t).count() as i64,
            })
            .filter(|c| c.count > 0)
            .collect();

        let (success_rate, avg_execution_time_ms) = if summary.executions > 0 {
            let executions = summary.executions as f64;
            (
                Some(summary.succeeded as f64 / executions),
                Some(summary.total_duration_ms as f64 / executions),
            )
        } else {
            (None, None)
        };

        Ok(RuleStats {
            total_rules,
            active_rules,
            inactive_rules: total_rules - active_rules,
            rules_by_type,
            executions: summary.executions,
            succeeded: summary.succeeded,
            failed: summary.failed,
            success_rate,
            avg_execution_time_ms,
            window_hours: window.num_hours(),
        })
    }

    /// 窗口内已匹配的执行次数
    pub async fn executions_since(&self, tenant: &TenantId, window: Duration) -> Result<i64> {
        let summary = self.ledger.window_summary(tenant, Utc::now() - window).await?;
        Ok(summary.executions)
    }
}
