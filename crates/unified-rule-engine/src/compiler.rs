//! 规则编译器
//!
//! 在存储写入边界校验规则：名称、优先级、条件树结构、动作能力与参数、
//! 调度表达式与生效窗口。畸形规则在被分发之前就被拒绝。

use std::str::FromStr;
use std::sync::Arc;

use cron::Schedule;
use serde_json::Value;

use crate::capability::CapabilityRegistry;
use crate::error::{Result, RuleError};
use crate::lifecycle;
use crate::models::{Condition, Rule, RuleNode, TriggerType};
use crate::operators::Operator;

pub const MAX_NAME_LEN: usize = 200;
pub const MIN_PRIORITY: i32 = 0;
pub const MAX_PRIORITY: i32 = 1000;
/// 条件树最大嵌套深度
pub const MAX_CONDITION_DEPTH: usize = 16;

/// 规则编译器
#[derive(Clone, Default)]
pub struct RuleCompiler {
    /// 挂载注册表后额外校验能力名称与参数
    registry: Option<Arc<CapabilityRegistry>>,
}

impl RuleCompiler {
    pub fn new() -> Self {
        Self { registry: None }
    }

    pub fn with_registry(registry: Arc<CapabilityRegistry>) -> Self {
        Self {
            registry: Some(registry),
        }
    }

    /// 校验完整规则
    pub fn validate(&self, rule: &Rule) -> Result<()> {
        let name_len = rule.name.trim().chars().count();
        if name_len == 0 {
            return Err(RuleError::Validation("规则名称不能为空".to_string()));
        }
        if rule.name.chars().count() > MAX_NAME_LEN {
            return Err(RuleError::Validation(format!(
                "规则名称不能超过 {} 个字符",
                MAX_NAME_LEN
            )));
        }

        if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&rule.priority) {
            return Err(RuleError::Validation(format!(
                "优先级必须在 {} 到 {} 之间，当前为 {}",
                MIN_PRIORITY, MAX_PRIORITY, rule.priority
            )));
        }

        if lifecycle::requires_actions(rule.status) && rule.actions.is_empty() {
            return Err(RuleError::Validation(format!(
                "状态为 {} 的规则至少需要一个动作",
                rule.status
            )));
        }

        if let Some(conditions) = &rule.conditions {
            self.validate_node(conditions, "root", 1)?;
        }

        self.validate_actions(rule)?;
        self.validate_schedule(rule)?;
        self.validate_throttle(rule)?;

        if let (Some(from), Some(to)) = (rule.active_from, rule.active_to)
            && from > to
        {
            return Err(RuleError::Validation(
                "生效开始时间不能晚于结束时间".to_string(),
            ));
        }

        if rule.entity_types.iter().any(|t| t.trim().is_empty()) {
            return Err(RuleError::Validation("实体类型不能为空字符串".to_string()));
        }

        Ok(())
    }

    /// 验证规则节点
    fn validate_node(&self, node: &RuleNode, path: &str, depth: usize) -> Result<()> {
        if depth > MAX_CONDITION_DEPTH {
            return Err(RuleError::Validation(format!(
                "条件树嵌套超过 {} 层: {}",
                MAX_CONDITION_DEPTH, path
            )));
        }

        match node {
            RuleNode::Condition(cond) => self.validate_condition(cond, path),
            RuleNode::Group(group) => {
                if group.children.is_empty() {
                    return Err(RuleError::Validation(format!(
                        "逻辑组 '{}' 不能为空",
                        path
                    )));
                }

                for (i, child) in group.children.iter().enumerate() {
                    let child_path = format!("{}.children[{}]", path, i);
                    self.validate_node(child, &child_path, depth + 1)?;
                }
                Ok(())
            }
            RuleNode::Not { child } => {
                self.validate_node(child, &format!("{}.child", path), depth + 1)
            }
        }
    }

    /// 验证条件
    fn validate_condition(&self, cond: &Condition, path: &str) -> Result<()> {
        let field = cond.field.trim();
        if field.is_empty() || field.split('.').any(str::is_empty) {
            return Err(RuleError::Validation(format!(
                "条件 '{}' 的字段路径无效: '{}'",
                path, cond.field
            )));
        }

        self.validate_operator_value(cond, path)
    }

    /// 验证操作符和值的兼容性
    fn validate_operator_value(&self, cond: &Condition, path: &str) -> Result<()> {
        let invalid = |msg: String| Err(RuleError::Validation(format!("条件 '{}' {}", path, msg)));

        match cond.operator {
            Operator::Between => match cond.value.as_array() {
                Some(arr) if arr.len() == 2 && arr.iter().all(|v| v.as_f64().is_some()) => Ok(()),
                _ => invalid("的 BETWEEN 操作符需要 [min, max] 数值数组".to_string()),
            },
            op if op.expects_array() => {
                if cond.value.is_array() {
                    Ok(())
                } else {
                    invalid(format!("的 {} 操作符需要数组值", op))
                }
            }
            Operator::Regex => match cond.value.as_str() {
                Some(pattern) => regex::RegexBuilder::new(pattern)
                    .case_insensitive(cond.ignore_case)
                    .build()
                    .map(|_| ())
                    .map_err(|e| {
                        RuleError::Validation(format!("条件 '{}' 的正则表达式无效: {}", path, e))
                    }),
                None => invalid("的 REGEX 操作符需要字符串值".to_string()),
            },
            Operator::StartsWith | Operator::EndsWith => {
                if cond.value.is_string() {
                    Ok(())
                } else {
                    invalid(format!("的 {} 操作符需要字符串值", cond.operator))
                }
            }
            Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte => {
                if cond.value.as_f64().is_some()
                    || cond.value.as_str().is_some_and(|s| s.parse::<f64>().is_ok())
                {
                    Ok(())
                } else {
                    invalid(format!("的 {} 操作符需要数值", cond.operator))
                }
            }
            Operator::Before | Operator::After => {
                if cond.value.is_string() {
                    Ok(())
                } else {
                    invalid(format!("的 {} 操作符需要日期时间字符串", cond.operator))
                }
            }
            Operator::Contains | Operator::NotContains => {
                if matches!(cond.value, Value::Null) {
                    invalid(format!("的 {} 操作符需要比较值", cond.operator))
                } else {
                    Ok(())
                }
            }
            _ => Ok(()),
        }
    }

    fn validate_actions(&self, rule: &Rule) -> Result<()> {
        for (i, action) in rule.actions.iter().enumerate() {
            if action.capability.trim().is_empty() {
                return Err(RuleError::Validation(format!("动作 #{} 缺少能力名称", i)));
            }
            if action.timeout_ms == Some(0) {
                return Err(RuleError::Validation(format!("动作 #{} 的超时必须大于 0", i)));
            }
            if let Some(registry) = &self.registry {
                registry
                    .validate_action(&action.capability, &action.params)
                    .map_err(|e| match e {
                        RuleError::Validation(msg) => {
                            RuleError::Validation(format!("动作 #{}: {}", i, msg))
                        }
                        other => other,
                    })?;
            }
        }
        Ok(())
    }

    fn validate_schedule(&self, rule: &Rule) -> Result<()> {
        match (&rule.schedule, rule.trigger_type) {
            (Some(expr), _) => parse_schedule(expr).map(|_| ()),
            (None, TriggerType::Schedule) => Err(RuleError::Validation(
                "SCHEDULE 规则必须配置 cron 表达式".to_string(),
            )),
            (None, _) => Ok(()),
        }
    }

    fn validate_throttle(&self, rule: &Rule) -> Result<()> {
        if rule.cooldown_secs.is_some_and(|s| s < 0) {
            return Err(RuleError::Validation("冷却时间不能为负数".to_string()));
        }
        if rule.max_executions_per_hour.is_some_and(|m| m <= 0) {
            return Err(RuleError::Validation("每小时最大执行次数必须大于 0".to_string()));
        }
        Ok(())
    }
}

/// 解析 cron 表达式，兼容不含秒字段的 5 段写法
pub fn parse_schedule(expr: &str) -> Result<Schedule> {
    let expr = expr.trim();
    let normalized = if expr.split_whitespace().count() == 5 {
        format!("0 {}", expr)
    } else {
        expr.to_string()
    };

    Schedule::from_str(&normalized)
        .map_err(|e| RuleError::Validation(format!("cron 表达式无效 '{}': {}", expr, e)))
}
