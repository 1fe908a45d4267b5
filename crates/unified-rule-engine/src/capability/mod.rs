//! 动作能力
//!
//! 规则的每个动作按名称解析到一个 [`Capability`] 实现。引擎只依赖该 trait，
//! 新增动作类型只需注册新的能力，无需修改引擎。

pub mod builtin;
pub mod registry;
pub mod webhook;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::error::{Result, RuleError};
use crate::models::{TenantId, TriggerContext};

pub use builtin::{
    Classification, Classifier, Effect, EffectSink, InMemoryEffectSink, LoggingEffectSink,
    NoopClassifier,
};
pub use registry::CapabilityRegistry;
pub use webhook::WebhookCapability;

/// 能力执行时可见的上下文
#[derive(Debug, Clone)]
pub struct ActionContext {
    pub tenant_id: TenantId,
    pub rule_id: Uuid,
    pub rule_name: String,
    pub trigger: TriggerContext,
}

/// 能力执行结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapabilityOutcome {
    pub ok: bool,
    /// 能力自身声明的致命失败
    pub fatal: bool,
    pub detail: Value,
}

impl CapabilityOutcome {
    pub fn success(detail: Value) -> Self {
        Self {
            ok: true,
            fatal: false,
            detail,
        }
    }

    pub fn failure(detail: Value) -> Self {
        Self {
            ok: false,
            fatal: false,
            detail,
        }
    }

    pub fn fatal(detail: Value) -> Self {
        Self {
            ok: false,
            fatal: true,
            detail,
        }
    }
}

/// 动作能力 Trait
///
/// - `execute`: 执行动作，`Err` 视为可恢复失败
/// - `validate_params`: 规则保存时校验参数，拒绝畸形规则
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Capability: Send + Sync {
    /// 能力名称，即动作定义中的 `capability` 字段
    fn name(&self) -> &str;

    /// 执行动作
    async fn execute(&self, params: &Value, ctx: &ActionContext) -> Result<CapabilityOutcome>;

    /// 校验动作参数
    fn validate_params(&self, params: &Value) -> Result<()> {
        let _ = params;
        Ok(())
    }

    /// 描述信息（用于日志）
    fn description(&self) -> &'static str {
        "Generic Capability"
    }
}

/// 读取必填字符串参数
pub(crate) fn required_str<'a>(params: &'a Value, capability: &str, key: &str) -> Result<&'a str> {
    params
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| {
            RuleError::Validation(format!("能力 '{}' 缺少字符串参数 '{}'", capability, key))
        })
}
