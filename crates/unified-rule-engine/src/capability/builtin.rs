//! 内置动作能力
//!
//! 副作用类能力（打标签、通知、建任务等）不直接触达外部系统，而是生成 [`Effect`]
//! 交给可替换的 [`EffectSink`]；AI 分类委托给可替换的 [`Classifier`]。

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::info;
use uuid::Uuid;

use super::{ActionContext, Capability, CapabilityOutcome, required_str};
use crate::error::{Result, RuleError};
use crate::models::{EvaluationContext, TenantId};

// ==================== 副作用输出 ====================

/// 动作产生的副作用
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Effect {
    /// 产生该副作用的能力名称
    pub kind: String,
    pub tenant_id: TenantId,
    pub rule_id: Uuid,
    pub entity_type: String,
    pub entity_id: String,
    pub params: Value,
    pub emitted_at: DateTime<Utc>,
}

/// 副作用接收端
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EffectSink: Send + Sync {
    async fn emit(&self, effect: Effect) -> Result<()>;
}

/// 只输出日志的接收端（服务默认）
#[derive(Debug, Default)]
pub struct LoggingEffectSink;

#[async_trait]
impl EffectSink for LoggingEffectSink {
    async fn emit(&self, effect: Effect) -> Result<()> {
        info!(
            kind = %effect.kind,
            tenant_id = %effect.tenant_id,
            rule_id = %effect.rule_id,
            entity_type = %effect.entity_type,
            entity_id = %effect.entity_id,
            params = %effect.params,
            "动作副作用已产生"
        );
        Ok(())
    }
}

/// 内存接收端，按产生顺序保存副作用
#[derive(Debug, Default)]
pub struct InMemoryEffectSink {
    effects: Mutex<Vec<Effect>>,
}

impl InMemoryEffectSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// 已产生副作用的快照
    pub fn effects(&self) -> Vec<Effect> {
        self.effects.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.effects.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.effects.lock().is_empty()
    }

    pub fn clear(&self) {
        self.effects.lock().clear();
    }
}

#[async_trait]
impl EffectSink for InMemoryEffectSink {
    async fn emit(&self, effect: Effect) -> Result<()> {
        self.effects.lock().push(effect);
        Ok(())
    }
}

/// 副作用类能力：校验必填参数后把动作参数封装为 [`Effect`]
pub struct EffectCapability {
    name: &'static str,
    description: &'static str,
    required: &'static [&'static str],
    sink: Arc<dyn EffectSink>,
}

impl EffectCapability {
    pub fn new(
        name: &'static str,
        description: &'static str,
        required: &'static [&'static str],
        sink: Arc<dyn EffectSink>,
    ) -> Self {
        Self {
            name,
            description,
            required,
            sink,
        }
    }
}

#[async_trait]
impl Capability for EffectCapability {
    fn name(&self) -> &str {
        self.name
    }

    async fn execute(&self, params: &Value, ctx: &ActionContext) -> Result<CapabilityOutcome> {
        self.validate_params(params)?;

        let effect = Effect {
            kind: self.name.to_string(),
            tenant_id: ctx.tenant_id.clone(),
            rule_id: ctx.rule_id,
            entity_type: ctx.trigger.entity_type.clone(),
            entity_id: ctx.trigger.entity_id.clone(),
            params: params.clone(),
            emitted_at: Utc::now(),
        };
        self.sink.emit(effect).await?;

        Ok(CapabilityOutcome::success(json!({ "effect": self.name })))
    }

    fn validate_params(&self, params: &Value) -> Result<()> {
        if !params.is_object() {
            return Err(RuleError::Validation(format!(
                "能力 '{}' 的参数必须是对象",
                self.name
            )));
        }
        for key in self.required {
            required_str(params, self.name, key)?;
        }
        Ok(())
    }

    fn description(&self) -> &'static str {
        self.description
    }
}

/// 内置副作用类能力
pub fn builtin_effect_capabilities(sink: Arc<dyn EffectSink>) -> Vec<Arc<dyn Capability>> {
    const SPECS: [(&str, &str, &[&str]); 7] = [
        ("tag-entity", "为实体打标签", &["tag"]),
        ("send-notification", "发送站内通知", &["message"]),
        ("create-followup-task", "创建跟进任务", &["title"]),
        ("send-auto-reply", "发送自动回复", &["body"]),
        ("categorize", "设置分类", &["category"]),
        ("add-to-mailbox", "加入智能邮箱", &["mailbox"]),
        ("forward", "转发实体", &["to"]),
    ];

    SPECS
        .into_iter()
        .map(|(name, description, required)| {
            Arc::new(EffectCapability::new(name, description, required, sink.clone()))
                as Arc<dyn Capability>
        })
        .collect()
}

// ==================== AI 分类 ====================

/// 分类结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    pub label: String,
    pub confidence: f64,
}

/// 文本分类器，推理细节对引擎不透明
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, text: &str, labels: &[String]) -> Result<Classification>;
}

/// 未配置分类器时的占位实现，总是返回可恢复失败
#[derive(Debug, Default)]
pub struct NoopClassifier;

#[async_trait]
impl Classifier for NoopClassifier {
    async fn classify(&self, _text: &str, _labels: &[String]) -> Result<Classification> {
        Err(RuleError::Action("未配置 AI 分类器".to_string()))
    }
}

/// `invoke-ai-classifier` 能力
///
/// 参数：`field`（待分类文本在 triggerData 中的路径，默认 `body`）、
/// `labels`（候选标签）、`minConfidence`（低于该置信度视为失败）
pub struct InvokeAiClassifier {
    classifier: Arc<dyn Classifier>,
}

impl InvokeAiClassifier {
    pub fn new(classifier: Arc<dyn Classifier>) -> Self {
        Self { classifier }
    }
}

#[async_trait]
impl Capability for InvokeAiClassifier {
    fn name(&self) -> &str {
        "invoke-ai-classifier"
    }

    async fn execute(&self, params: &Value, ctx: &ActionContext) -> Result<CapabilityOutcome> {
        let field = params.get("field").and_then(Value::as_str).unwrap_or("body");
        let labels: Vec<String> = params
            .get("labels")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let min_confidence = params
            .get("minConfidence")
            .and_then(Value::as_f64)
            .unwrap_or(0.0);

        let eval_ctx = EvaluationContext::new(&ctx.trigger);
        let text = match eval_ctx.get_field(field) {
            Some(value) => match value.as_str() {
                Some(s) => s.to_string(),
                None => value.to_string(),
            },
            None => {
                return Ok(CapabilityOutcome::failure(
                    json!({ "reason": format!("待分类字段 '{}' 不存在", field) }),
                ));
            }
        };

        let classification = self.classifier.classify(&text, &labels).await?;
        let detail = json!({
            "label": classification.label,
            "confidence": classification.confidence,
        });

        if classification.confidence < min_confidence {
            Ok(CapabilityOutcome::failure(detail))
        } else {
            Ok(CapabilityOutcome::success(detail))
        }
    }

    fn validate_params(&self, params: &Value) -> Result<()> {
        if let Some(labels) = params.get("labels")
            && !labels.as_array().is_some_and(|arr| arr.iter().all(Value::is_string))
        {
            return Err(RuleError::Validation(
                "能力 'invoke-ai-classifier' 的 labels 必须是字符串数组".to_string(),
            ));
        }
        if let Some(min) = params.get("minConfidence")
            && !min.as_f64().is_some_and(|v| (0.0..=1.0).contains(&v))
        {
            return Err(RuleError::Validation(
                "能力 'invoke-ai-classifier' 的 minConfidence 必须在 0 到 1 之间".to_string(),
            ));
        }
        Ok(())
    }

    fn description(&self) -> &'static str {
        "AI 文本分类"
    }
}
