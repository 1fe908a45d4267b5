//! `webhook` 能力：以 HTTP POST 把触发上下文推送到外部集成

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::{ActionContext, Capability, CapabilityOutcome, required_str};
use crate::error::{Result, RuleError};

const NAME: &str = "webhook";

/// Webhook 能力
///
/// 参数：`url`（必填，http/https）、`headers`（字符串键值对象）、
/// `payload`（附加到请求体的自定义数据）
pub struct WebhookCapability {
    client: reqwest::Client,
}

impl WebhookCapability {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RuleError::Internal(format!("创建 HTTP 客户端失败: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Capability for WebhookCapability {
    fn name(&self) -> &str {
        NAME
    }

    async fn execute(&self, params: &Value, ctx: &ActionContext) -> Result<CapabilityOutcome> {
        self.validate_params(params)?;
        let url = required_str(params, NAME, "url")?;

        let body = json!({
            "tenantId": ctx.tenant_id,
            "ruleId": ctx.rule_id,
            "ruleName": ctx.rule_name,
            "trigger": ctx.trigger,
            "payload": params.get("payload").cloned().unwrap_or(Value::Null),
        });

        let mut request = self.client.post(url).json(&body);
        if let Some(headers) = params.get("headers").and_then(Value::as_object) {
            for (name, value) in headers {
                if let Some(value) = value.as_str() {
                    request = request.header(name.as_str(), value);
                }
            }
        }

        let response = request
            .send()
            .await
            .map_err(|e| RuleError::Action(format!("webhook 请求失败: {}", e)))?;

        let status = response.status();
        debug!(url, status = status.as_u16(), "webhook 已响应");

        if status.is_success() {
            Ok(CapabilityOutcome::success(json!({ "status": status.as_u16() })))
        } else {
            warn!(url, status = status.as_u16(), "webhook 返回非成功状态");
            Ok(CapabilityOutcome::failure(json!({ "status": status.as_u16() })))
        }
    }

    fn validate_params(&self, params: &Value) -> Result<()> {
        let url = required_str(params, NAME, "url")?;
        let parsed = reqwest::Url::parse(url)
            .map_err(|e| RuleError::Validation(format!("webhook url 无效 '{}': {}", url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(RuleError::Validation(format!(
                "webhook url 仅支持 http/https: {}",
                url
            )));
        }
        if let Some(headers) = params.get("headers")
            && !headers
                .as_object()
                .is_some_and(|map| map.values().all(Value::is_string))
        {
            return Err(RuleError::Validation(
                "webhook headers 必须是字符串键值对象".to_string(),
            ));
        }
        Ok(())
    }

    fn description(&self) -> &'static str {
        "HTTP Webhook 集成"
    }
}
