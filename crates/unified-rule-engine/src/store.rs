//! 规则存储
//!
//! 规则身份与变更的唯一入口：写入前经过编译器校验，状态变更经过生命周期状态机，
//! 并发修改通过版本号 / 状态的比较交换重试解决。

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use automation_shared::observability::metrics;
use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::compiler::RuleCompiler;
use crate::error::{Result, RuleError};
use crate::lifecycle;
use crate::models::{Rule, RuleDraft, RuleFilter, RulePatch, RuleStatus, TenantId};
use crate::repository::RuleRepository;

/// 比较交换失败后的最大重试次数
const MAX_CAS_ATTEMPTS: usize = 5;

/// 复制草稿名称的默认保留时长，超时未保存即释放
const COPY_NAME_TTL: Duration = Duration::from_secs(60 * 60);

/// 规则存储
#[derive(Clone)]
pub struct RuleStore {
    repo: Arc<dyn RuleRepository>,
    compiler: RuleCompiler,
    /// 复制操作已分配、尚未保存的名称及其分配时间
    reserved_names: Arc<DashMap<(TenantId, String), Instant>>,
    copy_name_ttl: Duration,
}

impl RuleStore {
    pub fn new(repo: Arc<dyn RuleRepository>, compiler: RuleCompiler) -> Self {
        Self {
            repo,
            compiler,
            reserved_names: Arc::new(DashMap::new()),
            copy_name_ttl: COPY_NAME_TTL,
        }
    }

    /// 设置复制草稿名称的保留时长
    pub fn with_copy_name_ttl(mut self, ttl: Duration) -> Self {
        self.copy_name_ttl = ttl;
        self
    }

    pub fn repository(&self) -> &Arc<dyn RuleRepository> {
        &self.repo
    }

    /// 创建规则
    #[instrument(skip(self, draft), fields(tenant_id = %tenant, rule_name = %draft.name))]
    pub async fn create(&self, tenant: &TenantId, draft: RuleDraft) -> Result<Rule> {
        let rule = Rule::from_draft(tenant.clone(), draft);
        self.compiler.validate(&rule)?;

        let rule = self.repo.insert(rule).await?;
        self.reserved_names
            .remove(&(tenant.clone(), rule.name.clone()));

        info!(rule_id = %rule.id, status = %rule.status, "规则已创建");
        Ok(rule)
    }

    /// 部分更新规则
    ///
    /// 定义字段的修改递增版本号；进行中的执行持有旧快照，不受影响。
    /// 补丁中的状态按生命周期规则迁移，非法迁移在写入定义之前被拒绝，规则保持原样。
    #[instrument(skip(self, patch), fields(tenant_id = %tenant))]
    pub async fn update(&self, tenant: &TenantId, id: Uuid, mut patch: RulePatch) -> Result<Rule> {
        let target_status = patch.status.take();
        let mut rule = self.get(tenant, id).await?;

        if patch.touches_definition() {
            rule = self.update_definition(tenant, id, patch, target_status).await?;
        }

        match target_status {
            Some(status) if status != rule.status => self.set_status(tenant, id, status).await,
            _ => Ok(rule),
        }
    }

    async fn update_definition(
        &self,
        tenant: &TenantId,
        id: Uuid,
        patch: RulePatch,
        target_status: Option<RuleStatus>,
    ) -> Result<Rule> {
        for attempt in 0..MAX_CAS_ATTEMPTS {
            let current = self.get(tenant, id).await?;
            if let Some(to) = target_status.filter(|to| *to != current.status) {
                lifecycle::validate_transition(current.status, to)?;
            }

            let mut next = current.clone();
            patch.clone().apply_definition(&mut next);
            next.version = current.version + 1;
            next.updated_at = Utc::now();
            // 按迁移后的状态校验，DRAFT 可以在同一次更新中补齐动作并启用
            if let Some(status) = target_status {
                next.status = status;
            }
            self.compiler.validate(&next)?;

            if let Some(updated) = self.repo.update_definition(&next, current.version).await? {
                info!(rule_id = %id, version = updated.version, "规则定义已更新");
                return Ok(updated);
            }
            debug!(rule_id = %id, attempt, "规则版本已变化，重试更新");
        }

        Err(RuleError::Conflict(format!("规则 {id} 更新冲突")))
    }

    pub async fn get(&self, tenant: &TenantId, id: Uuid) -> Result<Rule> {
        self.repo
            .get(tenant, id)
            .await?
            .ok_or_else(|| RuleError::NotFound(id.to_string()))
    }

    /// 按 (priority desc, 创建顺序) 排序
    pub async fn list(&self, tenant: &TenantId, filter: &RuleFilter) -> Result<Vec<Rule>> {
        self.repo.list(tenant, filter).await
    }

    /// 所有租户中需要定时触发的规则
    pub async fn list_scheduled(&self) -> Result<Vec<Rule>> {
        self.repo.list_scheduled().await
    }

    /// 显式状态迁移
    #[instrument(skip(self), fields(tenant_id = %tenant))]
    pub async fn set_status(&self, tenant: &TenantId, id: Uuid, status: RuleStatus) -> Result<Rule> {
        self.transition(tenant, id, |_| Ok(status)).await
    }

    /// ACTIVE 与 INACTIVE 互切，计数器保持不变
    #[instrument(skip(self), fields(tenant_id = %tenant))]
    pub async fn toggle(&self, tenant: &TenantId, id: Uuid) -> Result<Rule> {
        self.transition(tenant, id, lifecycle::toggle_target).await
    }

    /// 失败策略触发时将 ACTIVE 规则置为 ERROR
    ///
    /// 规则已不是 ACTIVE（被人工停用或已删除）时不做任何事
    #[instrument(skip(self), fields(tenant_id = %tenant))]
    pub async fn mark_error(&self, tenant: &TenantId, id: Uuid) -> Result<Option<Rule>> {
        let updated = self
            .repo
            .compare_and_set_status(tenant, id, RuleStatus::Active, RuleStatus::Error, Utc::now())
            .await?;

        if updated.is_some() {
            metrics::record_status_transition(RuleStatus::Error.as_str());
            warn!(rule_id = %id, "规则失败次数超过阈值，已切换为 ERROR");
        }
        Ok(updated)
    }

    async fn transition<F>(&self, tenant: &TenantId, id: Uuid, target: F) -> Result<Rule>
    where
        F: Fn(RuleStatus) -> Result<RuleStatus>,
    {
        for attempt in 0..MAX_CAS_ATTEMPTS {
            let current = self.get(tenant, id).await?;
            let to = target(current.status)?;
            lifecycle::validate_transition(current.status, to)?;

            if lifecycle::requires_actions(to) && current.actions.is_empty() {
                return Err(RuleError::Validation(format!(
                    "切换到 {to} 前规则至少需要一个动作"
                )));
            }

            if let Some(updated) = self
                .repo
                .compare_and_set_status(tenant, id, current.status, to, Utc::now())
                .await?
            {
                metrics::record_status_transition(to.as_str());
                info!(rule_id = %id, from = %current.status, to = %to, "规则状态已变更");
                return Ok(updated);
            }
            debug!(rule_id = %id, attempt, "规则状态已变化，重试迁移");
        }

        Err(RuleError::Conflict(format!("规则 {id} 状态迁移冲突")))
    }

    /// 硬删除规则，执行记录保留
    #[instrument(skip(self), fields(tenant_id = %tenant))]
    pub async fn delete(&self, tenant: &TenantId, id: Uuid) -> Result<()> {
        if self.repo.delete(tenant, id).await? {
            info!(rule_id = %id, "规则已删除");
            Ok(())
        } else {
            warn!(rule_id = %id, "删除不存在的规则");
            Err(RuleError::NotFound(id.to_string()))
        }
    }

    /// 复制规则为未保存的草稿
    ///
    /// 草稿状态固定为 DRAFT、计数器归零，名称在已有规则和尚未保存的复制草稿中唯一
    #[instrument(skip(self), fields(tenant_id = %tenant))]
    pub async fn duplicate(&self, tenant: &TenantId, id: Uuid) -> Result<RuleDraft> {
        let source = self.get(tenant, id).await?;
        let existing: HashSet<String> = self
            .repo
            .list(tenant, &RuleFilter::default())
            .await?
            .into_iter()
            .map(|r| r.name)
            .collect();

        let name = self.reserve_copy_name(tenant, &source.name, &existing);
        debug!(rule_id = %id, copy_name = %name, "已生成规则副本");

        Ok(RuleDraft {
            name,
            description: source.description,
            category: source.category,
            rule_type: source.rule_type,
            trigger_type: source.trigger_type,
            entity_types: source.entity_types,
            conditions: source.conditions,
            actions: source.actions,
            priority: source.priority,
            status: RuleStatus::Draft,
            schedule: source.schedule,
            active_from: source.active_from,
            active_to: source.active_to,
            cooldown_secs: source.cooldown_secs,
            max_executions_per_hour: source.max_executions_per_hour,
        })
    }

    fn reserve_copy_name(&self, tenant: &TenantId, base: &str, existing: &HashSet<String>) -> String {
        let ttl = self.copy_name_ttl;
        self.reserved_names
            .retain(|_, reserved_at| reserved_at.elapsed() < ttl);

        let mut n = 1usize;
        loop {
            let candidate = if n == 1 {
                format!("{base} (copy)")
            } else {
                format!("{base} (copy {n})")
            };
            if !existing.contains(&candidate) {
                let key = (tenant.clone(), candidate.clone());
                if let Entry::Vacant(slot) = self.reserved_names.entry(key) {
                    slot.insert(Instant::now());
                    return candidate;
                }
            }
            n += 1;
        }
    }
}
