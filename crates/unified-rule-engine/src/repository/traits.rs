//! 仓储 Trait 定义
//!
//! 引擎只依赖这些接口，内存与 PostgreSQL 两种后端可互换，也便于 mock 测试

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    ExecutionOutcome, ExecutionRecord, Rule, RuleCounters, RuleFilter, RuleStatus, TenantId,
};

/// 规则定义仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RuleRepository: Send + Sync {
    /// 插入新规则，分配单调递增的 sequence 后返回
    async fn insert(&self, rule: Rule) -> Result<Rule>;

    /// 覆盖定义字段（不含状态与计数器），仅当当前版本为 `expected_version` 时生效
    ///
    /// 规则不存在或版本已变化时返回 None
    async fn update_definition(&self, rule: &Rule, expected_version: i64) -> Result<Option<Rule>>;

    /// 仅当当前状态为 `expected` 时切换到 `status`，同时记录状态迁移时间
    ///
    /// 规则不存在或状态已变化时返回 None
    async fn compare_and_set_status(
        &self,
        tenant: &TenantId,
        id: Uuid,
        expected: RuleStatus,
        status: RuleStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<Option<Rule>>;

    async fn get(&self, tenant: &TenantId, id: Uuid) -> Result<Option<Rule>>;

    /// 按 (priority desc, sequence asc) 排序返回
    async fn list(&self, tenant: &TenantId, filter: &RuleFilter) -> Result<Vec<Rule>>;

    /// 所有租户中处于 ACTIVE 的 SCHEDULE 规则
    async fn list_scheduled(&self) -> Result<Vec<Rule>>;

    /// 硬删除，返回是否存在
    async fn delete(&self, tenant: &TenantId, id: Uuid) -> Result<bool>;
}

/// 追加执行记录的结果
#[derive(Debug, Clone, PartialEq)]
pub enum AppendOutcome {
    /// 已写入；已匹配的结果附带更新后的计数器（规则已删除时为 None）
    Recorded(Option<RuleCounters>),
    /// 去重窗口内已有相同去重键的记录，未写入
    Duplicate(Box<ExecutionRecord>),
}

/// 时间窗口内的执行汇总
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WindowSummary {
    /// 已匹配（成功 + 失败）的执行次数
    pub executions: i64,
    pub succeeded: i64,
    pub failed: i64,
    pub not_matched: i64,
    /// 已匹配执行的总耗时
    pub total_duration_ms: i64,
}

/// 执行账本仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LedgerRepository: Send + Sync {
    /// 追加执行记录
    ///
    /// 同一原子操作内完成：去重检查（`dedup_since` 之后的相同去重键）、记录写入、
    /// 已匹配结果的计数器更新（executionCount、success/errorCount、平均耗时、lastExecutedAt）
    async fn append(
        &self,
        record: &ExecutionRecord,
        dedup_since: DateTime<Utc>,
    ) -> Result<AppendOutcome>;

    /// 查找 `since` 之后具有相同去重键的记录
    async fn find_by_dedup_key(
        &self,
        tenant: &TenantId,
        dedup_key: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<ExecutionRecord>>;

    /// 规则在 `since` 之后最近的已匹配结果（新到旧）
    async fn recent_outcomes(
        &self,
        tenant: &TenantId,
        rule_id: Uuid,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ExecutionOutcome>>;

    /// `since` 之后规则的已匹配执行次数
    async fn count_matched_since(
        &self,
        tenant: &TenantId,
        rule_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<i64>;

    /// 执行历史（新到旧，page 从 1 开始），返回当前页和总数
    async fn history(
        &self,
        tenant: &TenantId,
        rule_id: Uuid,
        page: i64,
        page_size: i64,
    ) -> Result<(Vec<ExecutionRecord>, i64)>;

    /// `since` 之后租户全部执行的汇总
    async fn window_summary(&self, tenant: &TenantId, since: DateTime<Utc>) -> Result<WindowSummary>;
}
