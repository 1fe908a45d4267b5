//! 能力注册表
//!
//! 以名称为 key 管理所有 [`Capability`] 实例，分发时按名称解析。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info};

use super::builtin::{Classifier, EffectSink, builtin_effect_capabilities, InvokeAiClassifier};
use super::webhook::WebhookCapability;
use super::Capability;
use crate::error::{Result, RuleError};

/// 能力注册表
#[derive(Default)]
pub struct CapabilityRegistry {
    capabilities: HashMap<String, Arc<dyn Capability>>,
}

impl CapabilityRegistry {
    /// 创建空的注册表
    pub fn new() -> Self {
        Self {
            capabilities: HashMap::new(),
        }
    }

    /// 注册一个能力，同名能力会被替换
    pub fn register(&mut self, capability: Arc<dyn Capability>) -> &mut Self {
        let name = capability.name().to_string();
        debug!(
            capability = %name,
            description = capability.description(),
            "注册动作能力"
        );
        self.capabilities.insert(name, capability);
        self
    }

    /// 按名称获取能力
    pub fn get(&self, name: &str) -> Option<Arc<dyn Capability>> {
        self.capabilities.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.capabilities.contains_key(name)
    }

    /// 已注册的能力名称（排序后）
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.capabilities.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }

    /// 校验动作引用的能力存在且参数合法
    pub fn validate_action(&self, capability: &str, params: &Value) -> Result<()> {
        let handler = self
            .get(capability)
            .ok_or_else(|| RuleError::Validation(format!("未注册的动作能力: {}", capability)))?;
        handler.validate_params(params)
    }

    /// 创建包含全部内置能力的注册表
    ///
    /// 副作用类能力写入 `sink`，AI 分类委托给 `classifier`，
    /// webhook 使用 `webhook_timeout` 作为 HTTP 超时
    pub fn with_defaults(
        sink: Arc<dyn EffectSink>,
        classifier: Arc<dyn Classifier>,
        webhook_timeout: Duration,
    ) -> Result<Self> {
        let mut registry = Self::new();

        info!("初始化内置动作能力");

        for capability in builtin_effect_capabilities(sink) {
            registry.register(capability);
        }
        registry.register(Arc::new(InvokeAiClassifier::new(classifier)));
        registry.register(Arc::new(WebhookCapability::new(webhook_timeout)?));

        info!(
            capability_count = registry.len(),
            names = ?registry.names(),
            "内置动作能力初始化完成"
        );

        Ok(registry)
    }
}
