//! 请求 DTO 定义
//!
//! 浅层字段约束由 validator 校验，条件树与动作参数的深层校验由规则编译器在存储边界完成。

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use validator::Validate;

use crate::api::error::ApiError;
use crate::models::{
    ActionSpec, RuleDraft, RuleFilter, RuleNode, RulePatch, RuleStatus, RuleType,
    TriggerContext, TriggerType, deserialize_present, parse_conditions,
};

fn conditions_from(raw: Option<Value>) -> Result<Option<RuleNode>, ApiError> {
    parse_conditions(raw).map_err(|e| ApiError::Validation(format!("条件格式错误: {e}")))
}

/// 创建规则请求
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateRuleRequest {
    #[validate(length(min = 1, max = 200, message = "规则名称不能为空且不超过200字符"))]
    pub name: String,
    #[validate(length(max = 2000, message = "描述不超过2000字符"))]
    pub description: Option<String>,
    #[validate(length(max = 100, message = "分类不超过100字符"))]
    pub category: Option<String>,
    pub rule_type: RuleType,
    pub trigger_type: TriggerType,
    #[serde(default)]
    pub entity_types: Vec<String>,
    #[serde(default)]
    pub conditions: Option<Value>,
    #[serde(default)]
    pub actions: Vec<ActionSpec>,
    #[serde(default)]
    #[validate(range(min = 0, max = 1000, message = "优先级必须在0-1000之间"))]
    pub priority: i32,
    #[serde(default)]
    pub status: RuleStatus,
    pub schedule: Option<String>,
    pub active_from: Option<DateTime<Utc>>,
    pub active_to: Option<DateTime<Utc>>,
    #[validate(range(min = 0, message = "冷却时间不能为负数"))]
    pub cooldown_secs: Option<i64>,
    #[validate(range(min = 1, message = "每小时执行上限至少为1"))]
    pub max_executions_per_hour: Option<i64>,
}

impl CreateRuleRequest {
    pub fn into_draft(self) -> Result<RuleDraft, ApiError> {
        Ok(RuleDraft {
            conditions: conditions_from(self.conditions)?,
            name: self.name,
            description: self.description,
            category: self.category,
            rule_type: self.rule_type,
            trigger_type: self.trigger_type,
            entity_types: self.entity_types,
            actions: self.actions,
            priority: self.priority,
            status: self.status,
            schedule: self.schedule,
            active_from: self.active_from,
            active_to: self.active_to,
            cooldown_secs: self.cooldown_secs,
            max_executions_per_hour: self.max_executions_per_hour,
        })
    }
}

/// 更新规则请求（部分更新）
///
/// 可选字段显式传 null 表示清空（如 `conditions: null`、`schedule: null`），字段缺失表示不修改
#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRuleRequest {
    #[validate(length(min = 1, max = 200, message = "规则名称不能为空且不超过200字符"))]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "deserialize_present")]
    #[validate(length(max = 2000, message = "描述不超过2000字符"))]
    pub description: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_present")]
    #[validate(length(max = 100, message = "分类不超过100字符"))]
    pub category: Option<Option<String>>,
    pub rule_type: Option<RuleType>,
    pub trigger_type: Option<TriggerType>,
    pub entity_types: Option<Vec<String>>,
    #[serde(default, deserialize_with = "deserialize_present")]
    pub conditions: Option<Value>,
    pub actions: Option<Vec<ActionSpec>>,
    #[validate(range(min = 0, max = 1000, message = "优先级必须在0-1000之间"))]
    pub priority: Option<i32>,
    pub status: Option<RuleStatus>,
    #[serde(default, deserialize_with = "deserialize_present")]
    pub schedule: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_present")]
    pub active_from: Option<Option<DateTime<Utc>>>,
    #[serde(default, deserialize_with = "deserialize_present")]
    pub active_to: Option<Option<DateTime<Utc>>>,
    #[serde(default, deserialize_with = "deserialize_present")]
    #[validate(range(min = 0, message = "冷却时间不能为负数"))]
    pub cooldown_secs: Option<Option<i64>>,
    #[serde(default, deserialize_with = "deserialize_present")]
    #[validate(range(min = 1, message = "每小时执行上限至少为1"))]
    pub max_executions_per_hour: Option<Option<i64>>,
}

impl UpdateRuleRequest {
    pub fn into_patch(self) -> Result<RulePatch, ApiError> {
        let conditions = match self.conditions {
            Some(raw) => Some(conditions_from(Some(raw))?),
            None => None,
        };

        Ok(RulePatch {
            name: self.name,
            description: self.description,
            category: self.category,
            rule_type: self.rule_type,
            trigger_type: self.trigger_type,
            entity_types: self.entity_types,
            conditions,
            actions: self.actions,
            priority: self.priority,
            status: self.status,
            schedule: self.schedule,
            active_from: self.active_from,
            active_to: self.active_to,
            cooldown_secs: self.cooldown_secs,
            max_executions_per_hour: self.max_executions_per_hour,
        })
    }
}

/// 状态变更请求
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeStatusRequest {
    pub status: RuleStatus,
}

/// 手动执行规则请求
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteRuleRequest {
    #[validate(length(min = 1, max = 100, message = "实体类型不能为空且不超过100字符"))]
    pub entity_type: String,
    #[validate(length(min = 1, max = 200, message = "实体ID不能为空且不超过200字符"))]
    pub entity_id: String,
    #[serde(default)]
    pub trigger_data: Value,
}

impl ExecuteRuleRequest {
    pub fn into_context(self) -> TriggerContext {
        TriggerContext::new(
            self.entity_type,
            self.entity_id,
            TriggerType::Manual,
            self.trigger_data,
        )
    }
}

/// 事件触发请求（自动分发）
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct TriggerRequest {
    #[validate(length(min = 1, max = 100, message = "实体类型不能为空且不超过100字符"))]
    pub entity_type: String,
    #[validate(length(min = 1, max = 200, message = "实体ID不能为空且不超过200字符"))]
    pub entity_id: String,
    pub trigger_type: TriggerType,
    #[serde(default)]
    pub trigger_data: Value,
    /// 事件发生时间，缺省为接收时间
    pub occurred_at: Option<DateTime<Utc>>,
}

impl TriggerRequest {
    pub fn into_context(self) -> TriggerContext {
        let mut context = TriggerContext::new(
            self.entity_type,
            self.entity_id,
            self.trigger_type,
            self.trigger_data,
        );
        if let Some(occurred_at) = self.occurred_at {
            context.occurred_at = occurred_at;
        }
        context
    }
}

/// 规则列表查询
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleQuery {
    #[serde(rename = "type")]
    pub rule_type: Option<RuleType>,
    pub status: Option<RuleStatus>,
    pub search: Option<String>,
}

impl From<RuleQuery> for RuleFilter {
    fn from(query: RuleQuery) -> Self {
        Self {
            rule_type: query.rule_type,
            status: query.status,
            search: query.search,
        }
    }
}

/// 统计查询
#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct StatsQuery {
    /// 统计窗口（小时），缺省使用配置值
    #[validate(range(min = 1, max = 720, message = "统计窗口必须在1-720小时之间"))]
    pub window_hours: Option<i64>,
}

/// 分页参数
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationParams {
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_page_size")]
    pub page_size: i64,
}

fn default_page() -> i64 {
    1
}

fn default_page_size() -> i64 {
    20
}

impl Default for PaginationParams {
    fn default() -> Self {
        Self {
            page: default_page(),
            page_size: default_page_size(),
        }
    }
}

impl PaginationParams {
    /// 页码（最小为1）
    pub fn page(&self) -> i64 {
        self.page.max(1)
    }

    /// 获取限制条数（最大100）
    pub fn limit(&self) -> i64 {
        self.page_size.clamp(1, 100)
    }
}
