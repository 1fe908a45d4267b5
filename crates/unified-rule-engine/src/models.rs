//! 规则引擎领域模型

pub use crate::operators::{LogicalOperator, Operator};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::borrow::Cow;
use std::cmp::Ordering;
use std::fmt;
use uuid::Uuid;

/// 租户（组织）标识
///
/// 所有存储与分发调用都显式携带租户，不依赖任何全局状态
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 规则类型（封闭集合）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleType {
    Processing,
    EmailFilter,
    AutoReply,
    AiRule,
    SmartMailbox,
    Workflow,
    Notification,
    Integration,
}

impl RuleType {
    pub const ALL: [RuleType; 8] = [
        Self::Processing,
        Self::EmailFilter,
        Self::AutoReply,
        Self::AiRule,
        Self::SmartMailbox,
        Self::Workflow,
        Self::Notification,
        Self::Integration,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processing => "PROCESSING",
            Self::EmailFilter => "EMAIL_FILTER",
            Self::AutoReply => "AUTO_REPLY",
            Self::AiRule => "AI_RULE",
            Self::SmartMailbox => "SMART_MAILBOX",
            Self::Workflow => "WORKFLOW",
            Self::Notification => "NOTIFICATION",
            Self::Integration => "INTEGRATION",
        }
    }
}

impl fmt::Display for RuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 触发类型（封闭集合）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerType {
    EntityCreated,
    EntityUpdated,
    MessageReceived,
    Schedule,
    Webhook,
    Manual,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EntityCreated => "ENTITY_CREATED",
            Self::EntityUpdated => "ENTITY_UPDATED",
            Self::MessageReceived => "MESSAGE_RECEIVED",
            Self::Schedule => "SCHEDULE",
            Self::Webhook => "WEBHOOK",
            Self::Manual => "MANUAL",
        }
    }
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 规则生命周期状态
///
/// 迁移规则见 [`crate::lifecycle`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleStatus {
    #[default]
    Draft,
    Active,
    Inactive,
    Testing,
    Error,
    Deprecated,
}

impl RuleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "DRAFT",
            Self::Active => "ACTIVE",
            Self::Inactive => "INACTIVE",
            Self::Testing => "TESTING",
            Self::Error => "ERROR",
            Self::Deprecated => "DEPRECATED",
        }
    }
}

impl fmt::Display for RuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ==================== 条件树 ====================

/// 规则节点（条件、逻辑组或取反）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleNode {
    Condition(Condition),
    Group(LogicalGroup),
    Not { child: Box<RuleNode> },
}

impl RuleNode {
    pub fn condition(field: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        Self::Condition(Condition::new(field, operator, value))
    }

    pub fn and(children: Vec<RuleNode>) -> Self {
        Self::Group(LogicalGroup::and(children))
    }

    pub fn or(children: Vec<RuleNode>) -> Self {
        Self::Group(LogicalGroup::or(children))
    }

    pub fn negate(child: RuleNode) -> Self {
        Self::Not {
            child: Box::new(child),
        }
    }
}

/// 条件节点
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub field: String,
    pub operator: Operator,
    #[serde(default)]
    pub value: Value,
    /// 字段缺失时使用的默认值；未声明时缺失字段视为评估错误
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// 字符串比较是否忽略大小写
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub ignore_case: bool,
}

impl Condition {
    pub fn new(field: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            operator,
            value: value.into(),
            default: None,
            ignore_case: false,
        }
    }

    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn ignore_case(mut self) -> Self {
        self.ignore_case = true;
        self
    }
}

/// 逻辑组节点
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogicalGroup {
    pub operator: LogicalOperator,
    pub children: Vec<RuleNode>,
}

impl LogicalGroup {
    pub fn new(operator: LogicalOperator, children: Vec<RuleNode>) -> Self {
        Self { operator, children }
    }

    pub fn and(children: Vec<RuleNode>) -> Self {
        Self::new(LogicalOperator::And, children)
    }

    pub fn or(children: Vec<RuleNode>) -> Self {
        Self::new(LogicalOperator::Or, children)
    }
}

/// 解析条件载荷：`null` 与 `{}` 表示无条件
pub fn parse_conditions(raw: Option<Value>) -> serde_json::Result<Option<RuleNode>> {
    match raw {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(map)) if map.is_empty() => Ok(None),
        Some(value) => serde_json::from_value(value).map(Some),
    }
}

fn deserialize_conditions<'de, D>(deserializer: D) -> Result<Option<RuleNode>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    parse_conditions(raw).map_err(serde::de::Error::custom)
}

/// PATCH 语义：区分“字段缺失”与“显式 null”，字段出现（包括 null）即视为要修改
pub(crate) fn deserialize_present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

fn deserialize_patch_conditions<'de, D>(
    deserializer: D,
) -> Result<Option<Option<RuleNode>>, D::Error>
where
    D: Deserializer<'de>,
{
    deserialize_conditions(deserializer).map(Some)
}

// ==================== 动作 ====================

/// 动作定义：指定能力名称及其参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionSpec {
    pub capability: String,
    #[serde(default)]
    pub params: Value,
    /// 失败即终止本次规则执行的剩余动作
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub fatal: bool,
    /// 可恢复失败不影响规则执行结果
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub best_effort: bool,
    /// 覆盖默认的单动作超时
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl ActionSpec {
    pub fn new(capability: impl Into<String>, params: Value) -> Self {
        Self {
            capability: capability.into(),
            params,
            fatal: false,
            best_effort: false,
            timeout_ms: None,
        }
    }

    pub fn fatal(mut self) -> Self {
        self.fatal = true;
        self
    }

    pub fn best_effort(mut self) -> Self {
        self.best_effort = true;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }
}

// ==================== 规则 ====================

/// 规则执行计数器，仅由执行账本写入
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleCounters {
    pub execution_count: i64,
    pub success_count: i64,
    pub error_count: i64,
    pub avg_execution_time_ms: f64,
    pub last_executed_at: Option<DateTime<Utc>>,
}

impl RuleCounters {
    /// 记录一次已匹配的执行
    pub fn apply(&mut self, success: bool, duration_ms: i64, executed_at: DateTime<Utc>) {
        let previous = self.execution_count as f64;
        self.avg_execution_time_ms =
            (self.avg_execution_time_ms * previous + duration_ms as f64) / (previous + 1.0);
        self.execution_count += 1;
        if success {
            self.success_count += 1;
        } else {
            self.error_count += 1;
        }
        self.last_executed_at = Some(executed_at);
    }

    pub fn success_rate(&self) -> Option<f64> {
        (self.execution_count > 0).then(|| self.success_count as f64 / self.execution_count as f64)
    }
}

/// 规则定义
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub name: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub rule_type: RuleType,
    pub trigger_type: TriggerType,
    /// 适用的实体类型，为空表示任意实体
    #[serde(default)]
    pub entity_types: Vec<String>,
    #[serde(default, deserialize_with = "deserialize_conditions")]
    pub conditions: Option<RuleNode>,
    pub actions: Vec<ActionSpec>,
    pub priority: i32,
    pub status: RuleStatus,
    /// cron 表达式，SCHEDULE 规则必填
    pub schedule: Option<String>,
    pub active_from: Option<DateTime<Utc>>,
    pub active_to: Option<DateTime<Utc>>,
    pub cooldown_secs: Option<i64>,
    pub max_executions_per_hour: Option<i64>,
    #[serde(flatten)]
    pub counters: RuleCounters,
    /// 定义版本号，每次编辑递增
    pub version: i64,
    /// 单调递增的创建序号，用于同优先级排序
    pub sequence: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// 最近一次状态迁移时间，失败策略只统计此后的执行结果
    pub status_changed_at: DateTime<Utc>,
}

impl Rule {
    /// 由草稿构建新规则（sequence 由存储层分配）
    pub fn from_draft(tenant_id: TenantId, draft: RuleDraft) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            tenant_id,
            name: draft.name,
            description: draft.description,
            category: draft.category,
            rule_type: draft.rule_type,
            trigger_type: draft.trigger_type,
            entity_types: draft.entity_types,
            conditions: draft.conditions,
            actions: draft.actions,
            priority: draft.priority,
            status: draft.status,
            schedule: draft.schedule,
            active_from: draft.active_from,
            active_to: draft.active_to,
            cooldown_secs: draft.cooldown_secs,
            max_executions_per_hour: draft.max_executions_per_hour,
            counters: RuleCounters::default(),
            version: 1,
            sequence: 0,
            created_at: now,
            updated_at: now,
            status_changed_at: now,
        }
    }

    /// UI 使用的便捷标志，始终由状态派生
    pub fn is_active(&self) -> bool {
        self.status == RuleStatus::Active
    }

    /// 实体类型是否适用
    pub fn applies_to_entity(&self, entity_type: &str) -> bool {
        self.entity_types.is_empty()
            || self
                .entity_types
                .iter()
                .any(|t| t.eq_ignore_ascii_case(entity_type))
    }

    /// 是否处于生效时间窗口内
    pub fn within_window(&self, now: DateTime<Utc>) -> bool {
        self.active_from.is_none_or(|from| now >= from) && self.active_to.is_none_or(|to| now <= to)
    }

    /// 冷却期是否仍未结束
    pub fn in_cooldown(&self, now: DateTime<Utc>) -> bool {
        match (self.cooldown_secs, self.counters.last_executed_at) {
            (Some(secs), Some(last)) if secs > 0 => now < last + Duration::seconds(secs),
            _ => false,
        }
    }

    /// 执行顺序：优先级降序，同优先级按创建顺序
    pub fn dispatch_order(a: &Rule, b: &Rule) -> Ordering {
        b.priority
            .cmp(&a.priority)
            .then_with(|| a.sequence.cmp(&b.sequence))
    }
}

/// 规则草稿（创建请求，以及复制操作的返回值）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleDraft {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    pub rule_type: RuleType,
    pub trigger_type: TriggerType,
    #[serde(default)]
    pub entity_types: Vec<String>,
    #[serde(default, deserialize_with = "deserialize_conditions")]
    pub conditions: Option<RuleNode>,
    #[serde(default)]
    pub actions: Vec<ActionSpec>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub status: RuleStatus,
    #[serde(default)]
    pub schedule: Option<String>,
    #[serde(default)]
    pub active_from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub active_to: Option<DateTime<Utc>>,
    #[serde(default)]
    pub cooldown_secs: Option<i64>,
    #[serde(default)]
    pub max_executions_per_hour: Option<i64>,
}

impl RuleDraft {
    pub fn new(name: impl Into<String>, rule_type: RuleType, trigger_type: TriggerType) -> Self {
        Self {
            name: name.into(),
            description: None,
            category: None,
            rule_type,
            trigger_type,
            entity_types: Vec::new(),
            conditions: None,
            actions: Vec::new(),
            priority: 0,
            status: RuleStatus::Draft,
            schedule: None,
            active_from: None,
            active_to: None,
            cooldown_secs: None,
            max_executions_per_hour: None,
        }
    }

    pub fn with_conditions(mut self, conditions: RuleNode) -> Self {
        self.conditions = Some(conditions);
        self
    }

    pub fn with_action(mut self, action: ActionSpec) -> Self {
        self.actions.push(action);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_status(mut self, status: RuleStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_entity_types(mut self, entity_types: &[&str]) -> Self {
        self.entity_types = entity_types.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_schedule(mut self, schedule: impl Into<String>) -> Self {
        self.schedule = Some(schedule.into());
        self
    }
}

/// 规则部分更新
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RulePatch {
    pub name: Option<String>,
    /// 可选字段：外层 None 表示不修改，`Some(None)` 表示清空
    #[serde(default, deserialize_with = "deserialize_present")]
    pub description: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_present")]
    pub category: Option<Option<String>>,
    pub rule_type: Option<RuleType>,
    pub trigger_type: Option<TriggerType>,
    pub entity_types: Option<Vec<String>>,
    #[serde(default, deserialize_with = "deserialize_patch_conditions")]
    pub conditions: Option<Option<RuleNode>>,
    pub actions: Option<Vec<ActionSpec>>,
    pub priority: Option<i32>,
    /// 状态变更按生命周期规则校验
    pub status: Option<RuleStatus>,
    #[serde(default, deserialize_with = "deserialize_present")]
    pub schedule: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_present")]
    pub active_from: Option<Option<DateTime<Utc>>>,
    #[serde(default, deserialize_with = "deserialize_present")]
    pub active_to: Option<Option<DateTime<Utc>>>,
    #[serde(default, deserialize_with = "deserialize_present")]
    pub cooldown_secs: Option<Option<i64>>,
    #[serde(default, deserialize_with = "deserialize_present")]
    pub max_executions_per_hour: Option<Option<i64>>,
}

impl RulePatch {
    /// 是否修改了规则定义（除状态以外的字段）
    pub fn touches_definition(&self) -> bool {
        self.name.is_some()
            || self.description.is_some()
            || self.category.is_some()
            || self.rule_type.is_some()
            || self.trigger_type.is_some()
            || self.entity_types.is_some()
            || self.conditions.is_some()
            || self.actions.is_some()
            || self.priority.is_some()
            || self.schedule.is_some()
            || self.active_from.is_some()
            || self.active_to.is_some()
            || self.cooldown_secs.is_some()
            || self.max_executions_per_hour.is_some()
    }

    /// 将定义字段应用到规则副本上（不含状态与计数器）
    pub fn apply_definition(self, rule: &mut Rule) {
        if let Some(name) = self.name {
            rule.name = name;
        }
        if let Some(description) = self.description {
            rule.description = description;
        }
        if let Some(category) = self.category {
            rule.category = category;
        }
        if let Some(rule_type) = self.rule_type {
            rule.rule_type = rule_type;
        }
        if let Some(trigger_type) = self.trigger_type {
            rule.trigger_type = trigger_type;
        }
        if let Some(entity_types) = self.entity_types {
            rule.entity_types = entity_types;
        }
        if let Some(conditions) = self.conditions {
            rule.conditions = conditions;
        }
        if let Some(actions) = self.actions {
            rule.actions = actions;
        }
        if let Some(priority) = self.priority {
            rule.priority = priority;
        }
        if let Some(schedule) = self.schedule {
            rule.schedule = schedule;
        }
        if let Some(active_from) = self.active_from {
            rule.active_from = active_from;
        }
        if let Some(active_to) = self.active_to {
            rule.active_to = active_to;
        }
        if let Some(cooldown_secs) = self.cooldown_secs {
            rule.cooldown_secs = cooldown_secs;
        }
        if let Some(max) = self.max_executions_per_hour {
            rule.max_executions_per_hour = max;
        }
    }
}

/// 规则列表过滤条件
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuleFilter {
    pub rule_type: Option<RuleType>,
    pub status: Option<RuleStatus>,
    /// 名称或描述模糊搜索（忽略大小写）
    pub search: Option<String>,
}

impl RuleFilter {
    pub fn matches(&self, rule: &Rule) -> bool {
        if self.rule_type.is_some_and(|t| t != rule.rule_type) {
            return false;
        }
        if self.status.is_some_and(|s| s != rule.status) {
            return false;
        }
        match self.search.as_deref().map(str::trim) {
            Some(term) if !term.is_empty() => {
                let term = term.to_lowercase();
                rule.name.to_lowercase().contains(&term)
                    || rule
                        .description
                        .as_deref()
                        .is_some_and(|d| d.to_lowercase().contains(&term))
            }
            _ => true,
        }
    }
}

// ==================== 触发上下文 ====================

/// 触发上下文
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerContext {
    pub entity_type: String,
    pub entity_id: String,
    pub trigger_type: TriggerType,
    #[serde(default)]
    pub trigger_data: Value,
    #[serde(default = "Utc::now")]
    pub occurred_at: DateTime<Utc>,
}

impl TriggerContext {
    pub fn new(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        trigger_type: TriggerType,
        trigger_data: Value,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            trigger_type,
            trigger_data,
            occurred_at: Utc::now(),
        }
    }
}

/// 评估上下文：条件字段在 triggerData 中解析，`$.` 前缀访问上下文元数据
#[derive(Debug, Clone, Copy)]
pub struct EvaluationContext<'a> {
    trigger: &'a TriggerContext,
}

impl<'a> EvaluationContext<'a> {
    pub fn new(trigger: &'a TriggerContext) -> Self {
        Self { trigger }
    }

    /// 获取字段值（支持点号分隔的路径，如 "sender.domain" 或 "items.0.sku"）
    pub fn get_field(&self, path: &str) -> Option<Cow<'a, Value>> {
        if let Some(meta) = path.strip_prefix("$.") {
            return self.metadata(meta).map(Cow::Owned);
        }

        let mut current = &self.trigger.trigger_data;
        for part in path.split('.') {
            match current {
                Value::Object(map) => {
                    current = map.get(part)?;
                }
                Value::Array(arr) => {
                    let index: usize = part.parse().ok()?;
                    current = arr.get(index)?;
                }
                _ => return None,
            }
        }

        Some(Cow::Borrowed(current))
    }

    fn metadata(&self, key: &str) -> Option<Value> {
        match key {
            "entityType" => Some(Value::String(self.trigger.entity_type.clone())),
            "entityId" => Some(Value::String(self.trigger.entity_id.clone())),
            "triggerType" => Some(Value::String(self.trigger.trigger_type.as_str().to_string())),
            "occurredAt" => Some(Value::String(self.trigger.occurred_at.to_rfc3339())),
            _ => None,
        }
    }
}

// ==================== 执行记录 ====================

/// 单条规则针对一次触发的执行结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionOutcome {
    MatchedSuccess,
    MatchedFailure,
    NotMatched,
}

impl ExecutionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MatchedSuccess => "MATCHED_SUCCESS",
            Self::MatchedFailure => "MATCHED_FAILURE",
            Self::NotMatched => "NOT_MATCHED",
        }
    }

    /// 计入执行计数器的结果
    pub fn is_matched(&self) -> bool {
        !matches!(self, Self::NotMatched)
    }
}

impl fmt::Display for ExecutionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 执行来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionMode {
    Automatic,
    Manual,
    Scheduled,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Automatic => "AUTOMATIC",
            Self::Manual => "MANUAL",
            Self::Scheduled => "SCHEDULED",
        }
    }
}

/// 单个动作的执行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionStatus {
    Succeeded,
    Failed,
    TimedOut,
    Fatal,
    /// 前序动作致命失败，未执行
    Skipped,
}

impl ActionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
            Self::Fatal => "fatal",
            Self::Skipped => "skipped",
        }
    }
}

/// 单个动作的执行结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResult {
    pub index: usize,
    pub capability: String,
    pub status: ActionStatus,
    #[serde(default)]
    pub best_effort: bool,
    #[serde(default)]
    pub detail: Value,
    #[serde(default)]
    pub error: Option<String>,
    pub duration_ms: i64,
}

/// 执行记录（只追加，创建后不再修改）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub rule_id: Uuid,
    /// 规则名称与类型的快照，规则删除后仍可展示
    pub rule_name: String,
    pub rule_type: RuleType,
    pub rule_version: i64,
    pub mode: ExecutionMode,
    pub context: TriggerContext,
    pub outcome: ExecutionOutcome,
    pub action_results: Vec<ActionResult>,
    pub error: Option<String>,
    pub dedup_key: String,
    pub duration_ms: i64,
    pub recorded_at: DateTime<Utc>,
}
