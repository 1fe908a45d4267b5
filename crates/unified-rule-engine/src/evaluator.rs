//! 条件评估器
//!
//! 对规则的条件树做短路求值。评估是纯函数：不修改状态、不调用外部服务、不阻塞，
//! 要么返回布尔结果，要么返回条件评估错误。

use crate::error::{Result, RuleError};
use crate::models::{Condition, EvaluationContext, LogicalGroup, RuleNode};
use crate::operators::{LogicalOperator, Operator};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use regex::RegexBuilder;
use serde_json::Value;
use std::borrow::Cow;

/// 评估结果
#[derive(Debug, Clone, Default)]
pub struct EvaluationResult {
    pub matched: bool,
    pub matched_conditions: Vec<String>,
    pub evaluation_trace: Vec<String>,
}

/// 条件评估器
#[derive(Debug, Clone, Copy, Default)]
pub struct ConditionEvaluator {
    /// 是否记录详细评估追踪
    trace_enabled: bool,
}

impl ConditionEvaluator {
    pub fn new() -> Self {
        Self {
            trace_enabled: false,
        }
    }

    /// 启用评估追踪
    pub fn with_trace(mut self) -> Self {
        self.trace_enabled = true;
        self
    }

    /// 评估条件树，无条件时恒为真
    pub fn evaluate(
        &self,
        conditions: Option<&RuleNode>,
        context: &EvaluationContext<'_>,
    ) -> Result<EvaluationResult> {
        let mut result = EvaluationResult::default();

        result.matched = match conditions {
            None => {
                if self.trace_enabled {
                    result.evaluation_trace.push("root: 无条件，直接匹配".to_string());
                }
                true
            }
            Some(node) => self.evaluate_node(node, context, &mut result, "root")?,
        };

        Ok(result)
    }

    /// 仅返回匹配结果
    pub fn matches(conditions: Option<&RuleNode>, context: &EvaluationContext<'_>) -> Result<bool> {
        Self::new().evaluate(conditions, context).map(|r| r.matched)
    }

    fn evaluate_node(
        &self,
        node: &RuleNode,
        context: &EvaluationContext<'_>,
        result: &mut EvaluationResult,
        path: &str,
    ) -> Result<bool> {
        match node {
            RuleNode::Condition(cond) => self.evaluate_condition(cond, context, result, path),
            RuleNode::Group(group) => self.evaluate_group(group, context, result, path),
            RuleNode::Not { child } => {
                let child_path = format!("{}.child", path);
                let matched = !self.evaluate_node(child, context, result, &child_path)?;
                if self.trace_enabled {
                    result
                        .evaluation_trace
                        .push(format!("{}: NOT => {}", path, matched));
                }
                Ok(matched)
            }
        }
    }

    fn evaluate_condition(
        &self,
        cond: &Condition,
        context: &EvaluationContext<'_>,
        result: &mut EvaluationResult,
        path: &str,
    ) -> Result<bool> {
        let field_value = context
            .get_field(&cond.field)
            .or_else(|| cond.default.as_ref().map(Cow::Borrowed));

        if field_value.is_none() && cond.operator.requires_field() {
            return Err(RuleError::ConditionEvaluation(format!(
                "条件 '{}' 引用的字段 '{}' 不存在且未声明默认值",
                path, cond.field
            )));
        }

        let matched = Self::apply_operator(
            field_value.as_deref(),
            cond.operator,
            &cond.value,
            cond.ignore_case,
        )
        .map_err(|e| match e {
            RuleError::TypeMismatch { expected, actual } => RuleError::ConditionEvaluation(
                format!(
                    "条件 '{}' ({} {}) 类型不匹配: 期望 {}, 实际 {}",
                    path, cond.field, cond.operator, expected, actual
                ),
            ),
            other => other,
        })?;

        if self.trace_enabled {
            result.evaluation_trace.push(format!(
                "{}: {} {} {} => {}",
                path,
                cond.field,
                cond.operator,
                cond.value,
                if matched { "MATCHED" } else { "NOT_MATCHED" }
            ));
        }

        if matched {
            result.matched_conditions.push(format!(
                "{}.{} {} {}",
                path, cond.field, cond.operator, cond.value
            ));
        }

        Ok(matched)
    }

    /// 评估逻辑组节点（短路求值）
    fn evaluate_group(
        &self,
        group: &LogicalGroup,
        context: &EvaluationContext<'_>,
        result: &mut EvaluationResult,
        path: &str,
    ) -> Result<bool> {
        if self.trace_enabled {
            result.evaluation_trace.push(format!(
                "{}: 开始评估 {} 组 (共 {} 个子节点)",
                path,
                group.operator,
                group.children.len()
            ));
        }

        // AND 遇到 false、OR 遇到 true 立即返回
        let short_circuit_on = group.operator == LogicalOperator::Or;

        for (i, child) in group.children.iter().enumerate() {
            let child_path = format!("{}.children[{}]", path, i);
            if self.evaluate_node(child, context, result, &child_path)? == short_circuit_on {
                if self.trace_enabled {
                    result
                        .evaluation_trace
                        .push(format!("{}: {} 短路于子节点 {}", path, group.operator, i));
                }
                return Ok(short_circuit_on);
            }
        }

        Ok(!short_circuit_on)
    }

    /// 对单个字段值应用操作符
    ///
    /// `field_value` 为 None 仅对空值检查操作符有意义，其余操作符返回 false
    pub fn apply_operator(
        field_value: Option<&Value>,
        operator: Operator,
        expected_value: &Value,
        ignore_case: bool,
    ) -> Result<bool> {
        match operator {
            Operator::IsEmpty => return Ok(Self::is_empty(field_value)),
            Operator::IsNotEmpty => return Ok(!Self::is_empty(field_value)),
            _ => {}
        }

        let Some(field_value) = field_value else {
            return Ok(false);
        };

        if operator == Operator::Regex {
            return Self::regex_match(field_value, expected_value, ignore_case);
        }

        let (field, expected) = if ignore_case {
            (
                Cow::Owned(Self::fold_case(field_value)),
                Cow::Owned(Self::fold_case(expected_value)),
            )
        } else {
            (Cow::Borrowed(field_value), Cow::Borrowed(expected_value))
        };
        let (field, expected) = (field.as_ref(), expected.as_ref());

        match operator {
            Operator::Eq => Ok(Self::eq(field, expected)),
            Operator::Neq => Ok(!Self::eq(field, expected)),
            Operator::Gt => Self::compare(field, expected, |a, b| a > b),
            Operator::Gte => Self::compare(field, expected, |a, b| a >= b),
            Operator::Lt => Self::compare(field, expected, |a, b| a < b),
            Operator::Lte => Self::compare(field, expected, |a, b| a <= b),
            Operator::Between => Self::between(field, expected),
            Operator::In => Self::in_list(field, expected),
            Operator::NotIn => Self::in_list(field, expected).map(|r| !r),
            Operator::Contains => Self::contains(field, expected),
            Operator::NotContains => Self::contains(field, expected).map(|r| !r),
            Operator::ContainsAny => Self::contains_any(field, expected),
            Operator::ContainsAll => Self::contains_all(field, expected),
            Operator::StartsWith => {
                Self::string_pair(field, expected).map(|(s, p)| s.starts_with(p))
            }
            Operator::EndsWith => Self::string_pair(field, expected).map(|(s, p)| s.ends_with(p)),
            Operator::Before => Self::time_compare(field, expected, |a, b| a < b),
            Operator::After => Self::time_compare(field, expected, |a, b| a > b),
            Operator::IsEmpty | Operator::IsNotEmpty | Operator::Regex => unreachable!(),
        }
    }

    /// 判断值是否为空
    fn is_empty(value: Option<&Value>) -> bool {
        match value {
            None | Some(Value::Null) => true,
            Some(Value::String(s)) => s.is_empty(),
            Some(Value::Array(arr)) => arr.is_empty(),
            Some(Value::Object(obj)) => obj.is_empty(),
            _ => false,
        }
    }

    /// 字符串统一转小写（递归处理数组）
    fn fold_case(value: &Value) -> Value {
        match value {
            Value::String(s) => Value::String(s.to_lowercase()),
            Value::Array(arr) => Value::Array(arr.iter().map(Self::fold_case).collect()),
            other => other.clone(),
        }
    }

    /// 相等比较，数值统一转为浮点数（100 == 100.0）
    fn eq(field: &Value, expected: &Value) -> bool {
        if let (Some(f1), Some(f2)) = (Self::as_f64(field), Self::as_f64(expected)) {
            return (f1 - f2).abs() < f64::EPSILON;
        }
        field == expected
    }

    fn number(value: &Value) -> Result<f64> {
        Self::as_f64(value).ok_or_else(|| Self::mismatch("number", value))
    }

    fn array(value: &Value) -> Result<&Vec<Value>> {
        value.as_array().ok_or_else(|| Self::mismatch("array", value))
    }

    fn compare<F>(field: &Value, expected: &Value, cmp: F) -> Result<bool>
    where
        F: Fn(f64, f64) -> bool,
    {
        Ok(cmp(Self::number(field)?, Self::number(expected)?))
    }

    /// 范围比较，expected 为 [min, max]
    fn between(field: &Value, expected: &Value) -> Result<bool> {
        let bounds = Self::array(expected)?;
        let [min, max] = bounds.as_slice() else {
            return Err(RuleError::ConditionEvaluation(
                "BETWEEN 操作符需要 [min, max] 数组".to_string(),
            ));
        };
        let value = Self::number(field)?;
        Ok(value >= Self::number(min)? && value <= Self::number(max)?)
    }

    fn in_list(field: &Value, expected: &Value) -> Result<bool> {
        Ok(Self::array(expected)?
            .iter()
            .any(|item| Self::eq(field, item)))
    }

    /// 字符串子串或数组元素包含
    fn contains(field: &Value, expected: &Value) -> Result<bool> {
        match field {
            Value::String(s) => {
                let substr = expected
                    .as_str()
                    .ok_or_else(|| Self::mismatch("string", expected))?;
                Ok(s.contains(substr))
            }
            Value::Array(arr) => Ok(arr.iter().any(|item| Self::eq(item, expected))),
            _ => Err(Self::mismatch("string or array", field)),
        }
    }

    fn contains_any(field: &Value, expected: &Value) -> Result<bool> {
        let field_arr = Self::array(field)?;
        Ok(Self::array(expected)?
            .iter()
            .any(|e| field_arr.iter().any(|f| Self::eq(f, e))))
    }

    fn contains_all(field: &Value, expected: &Value) -> Result<bool> {
        let field_arr = Self::array(field)?;
        Ok(Self::array(expected)?
            .iter()
            .all(|e| field_arr.iter().any(|f| Self::eq(f, e))))
    }

    fn string_pair<'v>(field: &'v Value, expected: &'v Value) -> Result<(&'v str, &'v str)> {
        let s = field.as_str().ok_or_else(|| Self::mismatch("string", field))?;
        let p = expected
            .as_str()
            .ok_or_else(|| Self::mismatch("string", expected))?;
        Ok((s, p))
    }

    fn regex_match(field: &Value, expected: &Value, ignore_case: bool) -> Result<bool> {
        let s = field.as_str().ok_or_else(|| Self::mismatch("string", field))?;
        let pattern = expected
            .as_str()
            .ok_or_else(|| Self::mismatch("string (regex pattern)", expected))?;

        let regex = RegexBuilder::new(pattern)
            .case_insensitive(ignore_case)
            .build()
            .map_err(|e| {
                RuleError::ConditionEvaluation(format!("无效的正则表达式 '{}': {}", pattern, e))
            })?;

        Ok(regex.is_match(s))
    }

    fn time_compare<F>(field: &Value, expected: &Value, cmp: F) -> Result<bool>
    where
        F: Fn(DateTime<Utc>, DateTime<Utc>) -> bool,
    {
        Ok(cmp(
            Self::parse_datetime(field)?,
            Self::parse_datetime(expected)?,
        ))
    }

    /// 解析 RFC 3339 时间或 YYYY-MM-DD 日期
    fn parse_datetime(value: &Value) -> Result<DateTime<Utc>> {
        let s = value
            .as_str()
            .ok_or_else(|| Self::mismatch("datetime string", value))?;

        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Ok(dt.with_timezone(&Utc));
        }

        if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
            return Ok(date.and_time(NaiveTime::MIN).and_utc());
        }

        Err(RuleError::ConditionEvaluation(format!(
            "无法解析日期时间: '{}'",
            s
        )))
    }

    fn as_f64(value: &Value) -> Option<f64> {
        match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    fn mismatch(expected: &str, actual: &Value) -> RuleError {
        RuleError::TypeMismatch {
            expected: expected.to_string(),
            actual: Self::type_name(actual).to_string(),
        }
    }

    fn type_name(value: &Value) -> &'static str {
        match value {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{TriggerContext, TriggerType};
    use serde_json::json;

    fn apply(field: Value, op: Operator, expected: Value) -> bool {
        ConditionEvaluator::apply_operator(Some(&field), op, &expected, false).unwrap()
    }

    fn trigger(data: Value) -> TriggerContext {
        TriggerContext::new("email", "msg-1", TriggerType::EntityCreated, data)
    }

    // ==================== 操作符 ====================

    #[test]
    fn test_eq_numbers_and_strings() {
        assert!(apply(json!(100), Operator::Eq, json!(100)));
        assert!(apply(json!(100.0), Operator::Eq, json!(100)));
        assert!(apply(json!("hello"), Operator::Eq, json!("hello")));
        assert!(apply(json!("hello"), Operator::Neq, json!("world")));
    }

    #[test]
    fn test_numeric_comparisons() {
        assert!(apply(json!(100), Operator::Gt, json!(50)));
        assert!(apply(json!(100), Operator::Gte, json!(100)));
        assert!(apply(json!(50), Operator::Lt, json!(100)));
        assert!(apply(json!(100), Operator::Lte, json!(100)));
        assert!(apply(json!(50), Operator::Between, json!([0, 100])));
        assert!(!apply(json!(150), Operator::Between, json!([0, 100])));
    }

    #[test]
    fn test_membership() {
        assert!(apply(json!("a"), Operator::In, json!(["a", "b"])));
        assert!(apply(json!("d"), Operator::NotIn, json!(["a", "b"])));
        assert!(apply(json!(["a", "b", "c"]), Operator::ContainsAny, json!(["b", "x"])));
        assert!(!apply(json!(["a", "b", "c"]), Operator::ContainsAll, json!(["a", "x"])));
        assert!(apply(json!(["a", "b", "c"]), Operator::Contains, json!("b")));
    }

    #[test]
    fn test_string_operators() {
        assert!(apply(json!("Your March invoice"), Operator::Contains, json!("invoice")));
        assert!(apply(json!("Meeting notes"), Operator::NotContains, json!("invoice")));
        assert!(apply(json!("hello world"), Operator::StartsWith, json!("hello")));
        assert!(apply(json!("hello world"), Operator::EndsWith, json!("world")));
        assert!(apply(
            json!("user@example.com"),
            Operator::Regex,
            json!(r"^[\w.-]+@[\w.-]+\.\w+$")
        ));
    }

    #[test]
    fn test_ignore_case() {
        let eval = |field: Value, op, expected: Value| {
            ConditionEvaluator::apply_operator(Some(&field), op, &expected, true).unwrap()
        };
        assert!(eval(json!("URGENT: reply"), Operator::Contains, json!("urgent")));
        assert!(eval(json!("Boss@Corp.com"), Operator::EndsWith, json!("@corp.com")));
        assert!(eval(json!("VIP"), Operator::In, json!(["vip", "gold"])));
        assert!(eval(json!("Invoice 42"), Operator::Regex, json!("^invoice")));
        assert!(!apply(json!("URGENT"), Operator::Eq, json!("urgent")));
    }

    #[test]
    fn test_time_comparison() {
        assert!(apply(
            json!("2024-01-15T10:00:00Z"),
            Operator::Before,
            json!("2024-02-01")
        ));
        assert!(apply(
            json!("2024-01-15T10:00:00+08:00"),
            Operator::After,
            json!("2024-01-15T01:00:00Z")
        ));
    }

    #[test]
    fn test_is_empty() {
        assert!(ConditionEvaluator::apply_operator(None, Operator::IsEmpty, &json!(null), false).unwrap());
        assert!(apply(json!(""), Operator::IsEmpty, json!(null)));
        assert!(apply(json!([]), Operator::IsEmpty, json!(null)));
        assert!(apply(json!("x"), Operator::IsNotEmpty, json!(null)));
    }

    #[test]
    fn test_type_mismatch() {
        let err =
            ConditionEvaluator::apply_operator(Some(&json!("abc")), Operator::Gt, &json!(5), false)
                .unwrap_err();
        assert!(matches!(err, RuleError::TypeMismatch { .. }));
    }

    // ==================== 条件树 ====================

    #[test]
    fn test_absent_conditions_always_match() {
        let t = trigger(json!({}));
        let ctx = EvaluationContext::new(&t);
        assert!(ConditionEvaluator::matches(None, &ctx).unwrap());
    }

    #[test]
    fn test_and_or_not_tree() {
        let t = trigger(json!({
            "subject": "Your March invoice",
            "amount": 1200,
            "sender": {"domain": "vendor.com"}
        }));
        let ctx = EvaluationContext::new(&t);

        let tree = RuleNode::and(vec![
            RuleNode::condition("subject", Operator::Contains, "invoice"),
            RuleNode::or(vec![
                RuleNode::condition("amount", Operator::Gt, 5000),
                RuleNode::condition("sender.domain", Operator::Eq, "vendor.com"),
            ]),
            RuleNode::negate(RuleNode::condition("subject", Operator::StartsWith, "RE:")),
        ]);

        assert!(ConditionEvaluator::matches(Some(&tree), &ctx).unwrap());
    }

    #[test]
    fn test_missing_field_without_default_is_error() {
        let t = trigger(json!({"subject": "hi"}));
        let ctx = EvaluationContext::new(&t);
        let tree = RuleNode::condition("priority", Operator::Gt, 3);

        let err = ConditionEvaluator::matches(Some(&tree), &ctx).unwrap_err();
        assert!(err.is_evaluation_error());
    }

    #[test]
    fn test_missing_field_uses_default() {
        let t = trigger(json!({"subject": "hi"}));
        let ctx = EvaluationContext::new(&t);
        let tree = RuleNode::Condition(Condition::new("priority", Operator::Gt, 3).with_default(5));

        assert!(ConditionEvaluator::matches(Some(&tree), &ctx).unwrap());
    }

    #[test]
    fn test_missing_field_is_empty_is_not_error() {
        let t = trigger(json!({}));
        let ctx = EvaluationContext::new(&t);
        let tree = RuleNode::condition("attachments", Operator::IsEmpty, Value::Null);
        assert!(ConditionEvaluator::matches(Some(&tree), &ctx).unwrap());
    }

    #[test]
    fn test_short_circuit_skips_broken_branch() {
        let t = trigger(json!({"subject": "hello"}));
        let ctx = EvaluationContext::new(&t);
        // 第二个子节点引用缺失字段，但 AND 已在第一个子节点短路
        let tree = RuleNode::and(vec![
            RuleNode::condition("subject", Operator::Eq, "bye"),
            RuleNode::condition("missing", Operator::Eq, 1),
        ]);
        assert!(!ConditionEvaluator::matches(Some(&tree), &ctx).unwrap());
    }

    #[test]
    fn test_metadata_fields() {
        let t = trigger(json!({}));
        let ctx = EvaluationContext::new(&t);
        let tree = RuleNode::condition("$.entityType", Operator::Eq, "email");
        assert!(ConditionEvaluator::matches(Some(&tree), &ctx).unwrap());
    }

    #[test]
    fn test_trace() {
        let t = trigger(json!({"a": 1, "b": 2}));
        let ctx = EvaluationContext::new(&t);
        let tree = RuleNode::or(vec![
            RuleNode::condition("a", Operator::Eq, 1),
            RuleNode::condition("b", Operator::Eq, 2),
        ]);

        let result = ConditionEvaluator::new()
            .with_trace()
            .evaluate(Some(&tree), &ctx)
            .unwrap();
        assert!(result.matched);
        assert_eq!(result.matched_conditions.len(), 1);
        assert!(result.evaluation_trace.iter().any(|l| l.contains("短路")));
    }
}
