//! 动作执行器
//!
//! 按顺序执行规则的动作列表。每个动作委托给注册表中的能力，
//! 单个动作的失败、超时或 panic 都被隔离并记录为该动作的结果。

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use automation_shared::observability::metrics;
use futures::FutureExt;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::capability::{ActionContext, CapabilityOutcome, CapabilityRegistry};
use crate::error::RuleError;
use crate::models::{ActionResult, ActionSpec, ActionStatus};

/// 一次动作列表执行的结果
#[derive(Debug, Clone, PartialEq)]
pub struct ActionExecutionResult {
    pub results: Vec<ActionResult>,
    /// 所有动作成功，或失败的均为 best-effort 的可恢复失败
    pub success: bool,
    /// 是否因致命失败提前终止
    pub aborted: bool,
}

impl ActionExecutionResult {
    /// 首个导致规则失败的动作错误
    pub fn first_error(&self) -> Option<String> {
        self.results
            .iter()
            .find(|r| match r.status {
                ActionStatus::Fatal => true,
                ActionStatus::Failed | ActionStatus::TimedOut => !r.best_effort,
                _ => false,
            })
            .map(|r| {
                format!(
                    "动作 #{} ({}) {}: {}",
                    r.index,
                    r.capability,
                    r.status.as_str(),
                    r.error.as_deref().unwrap_or("")
                )
            })
    }
}

/// 动作执行器
#[derive(Clone)]
pub struct ActionExecutor {
    registry: Arc<CapabilityRegistry>,
    default_timeout: Duration,
}

impl ActionExecutor {
    pub fn new(registry: Arc<CapabilityRegistry>, default_timeout: Duration) -> Self {
        Self {
            registry,
            default_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    /// 严格按列表顺序执行动作
    #[instrument(skip_all, fields(rule_id = %ctx.rule_id, action_count = actions.len()))]
    pub async fn execute(&self, actions: &[ActionSpec], ctx: &ActionContext) -> ActionExecutionResult {
        let mut results = Vec::with_capacity(actions.len());
        let mut success = true;
        let mut aborted = false;

        for (index, spec) in actions.iter().enumerate() {
            if aborted {
                results.push(ActionResult {
                    index,
                    capability: spec.capability.clone(),
                    status: ActionStatus::Skipped,
                    best_effort: spec.best_effort,
                    detail: Value::Null,
                    error: None,
                    duration_ms: 0,
                });
                continue;
            }

            let result = self.run_action(index, spec, ctx).await;
            metrics::record_action(&spec.capability, result.status.as_str());

            match result.status {
                ActionStatus::Succeeded | ActionStatus::Skipped => {}
                ActionStatus::Failed | ActionStatus::TimedOut => {
                    if !spec.best_effort {
                        success = false;
                    }
                }
                ActionStatus::Fatal => {
                    warn!(index, capability = %spec.capability, "动作致命失败，终止剩余动作");
                    success = false;
                    aborted = true;
                }
            }

            results.push(result);
        }

        ActionExecutionResult {
            results,
            success,
            aborted,
        }
    }

    async fn run_action(&self, index: usize, spec: &ActionSpec, ctx: &ActionContext) -> ActionResult {
        let start = Instant::now();
        let failed = |spec: &ActionSpec| {
            if spec.fatal {
                ActionStatus::Fatal
            } else {
                ActionStatus::Failed
            }
        };

        let (status, detail, error) = match self.registry.get(&spec.capability) {
            None => (
                failed(spec),
                Value::Null,
                Some(format!("未注册的动作能力: {}", spec.capability)),
            ),
            Some(capability) => {
                let timeout = spec
                    .timeout_ms
                    .map(Duration::from_millis)
                    .unwrap_or(self.default_timeout);
                let invocation = AssertUnwindSafe(capability.execute(&spec.params, ctx)).catch_unwind();

                match tokio::time::timeout(timeout, invocation).await {
                    Err(_) => (
                        if spec.fatal {
                            ActionStatus::Fatal
                        } else {
                            ActionStatus::TimedOut
                        },
                        Value::Null,
                        Some(
                            RuleError::Timeout(format!("动作超过 {} ms 未完成", timeout.as_millis()))
                                .to_string(),
                        ),
                    ),
                    Ok(Err(panic)) => (
                        failed(spec),
                        Value::Null,
                        Some(format!("动作执行 panic: {}", panic_message(panic.as_ref()))),
                    ),
                    Ok(Ok(Err(RuleError::FatalAction(msg)))) => (
                        ActionStatus::Fatal,
                        Value::Null,
                        Some(RuleError::FatalAction(msg).to_string()),
                    ),
                    Ok(Ok(Err(e))) => (failed(spec), Value::Null, Some(e.to_string())),
                    Ok(Ok(Ok(CapabilityOutcome { ok: true, detail, .. }))) => {
                        (ActionStatus::Succeeded, detail, None)
                    }
                    Ok(Ok(Ok(CapabilityOutcome { fatal, detail, .. }))) => (
                        if fatal {
                            ActionStatus::Fatal
                        } else {
                            failed(spec)
                        },
                        detail,
                        Some("能力返回失败".to_string()),
                    ),
                }
            }
        };

        debug!(index, capability = %spec.capability, status = status.as_str(), "动作执行完成");

        ActionResult {
            index,
            capability: spec.capability.clone(),
            status,
            best_effort: spec.best_effort,
            detail,
            error,
            duration_ms: start.elapsed().as_millis() as i64,
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{Capability, MockCapability};
    use crate::models::{TenantId, TriggerContext, TriggerType};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;
    use uuid::Uuid;

    /// 记录调用顺序的能力
    struct Recorder {
        name: &'static str,
        calls: Arc<Mutex<Vec<String>>>,
        outcome: CapabilityOutcome,
    }

    #[async_trait]
    impl Capability for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        async fn execute(
            &self,
            params: &Value,
            _ctx: &ActionContext,
        ) -> crate::error::Result<CapabilityOutcome> {
            self.calls
                .lock()
                .push(format!("{}:{}", self.name, params["step"]));
            Ok(self.outcome.clone())
        }
    }

    struct Sleeper;

    #[async_trait]
    impl Capability for Sleeper {
        fn name(&self) -> &str {
            "sleep"
        }

        async fn execute(
            &self,
            _params: &Value,
            _ctx: &ActionContext,
        ) -> crate::error::Result<CapabilityOutcome> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(CapabilityOutcome::success(Value::Null))
        }
    }

    struct Panicker;

    #[async_trait]
    impl Capability for Panicker {
        fn name(&self) -> &str {
            "panic"
        }

        async fn execute(
            &self,
            _params: &Value,
            _ctx: &ActionContext,
        ) -> crate::error::Result<CapabilityOutcome> {
            panic!("capability exploded");
        }
    }

    fn ctx() -> ActionContext {
        ActionContext {
            tenant_id: TenantId::new("org-1"),
            rule_id: Uuid::now_v7(),
            rule_name: "r".to_string(),
            trigger: TriggerContext::new("email", "m-1", TriggerType::EntityCreated, json!({})),
        }
    }

    fn executor_with(
        calls: &Arc<Mutex<Vec<String>>>,
        extra: Vec<Arc<dyn Capability>>,
    ) -> ActionExecutor {
        let mut registry = CapabilityRegistry::new();
        registry.register(Arc::new(Recorder {
            name: "ok",
            calls: calls.clone(),
            outcome: CapabilityOutcome::success(json!({"done": true})),
        }));
        registry.register(Arc::new(Recorder {
            name: "fail",
            calls: calls.clone(),
            outcome: CapabilityOutcome::failure(Value::Null),
        }));
        registry.register(Arc::new(Recorder {
            name: "fatal",
            calls: calls.clone(),
            outcome: CapabilityOutcome::fatal(Value::Null),
        }));
        for capability in extra {
            registry.register(capability);
        }
        ActionExecutor::new(Arc::new(registry), Duration::from_millis(50))
    }

    #[tokio::test]
    async fn test_actions_run_in_order() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let executor = executor_with(&calls, vec![]);
        let actions = vec![
            ActionSpec::new("ok", json!({"step": 1})),
            ActionSpec::new("ok", json!({"step": 2})),
            ActionSpec::new("ok", json!({"step": 3})),
        ];

        let result = executor.execute(&actions, &ctx()).await;

        assert!(result.success);
        assert!(!result.aborted);
        assert_eq!(*calls.lock(), vec!["ok:1", "ok:2", "ok:3"]);
        assert_eq!(result.results[0].detail["done"], true);
    }

    #[tokio::test]
    async fn test_recoverable_failure_continues() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let executor = executor_with(&calls, vec![]);
        let actions = vec![
            ActionSpec::new("fail", json!({"step": 1})),
            ActionSpec::new("ok", json!({"step": 2})),
        ];

        let result = executor.execute(&actions, &ctx()).await;

        assert!(!result.success);
        assert!(!result.aborted);
        assert_eq!(calls.lock().len(), 2);
        assert_eq!(result.results[0].status, ActionStatus::Failed);
        assert!(result.first_error().unwrap().contains("fail"));
    }

    #[tokio::test]
    async fn test_best_effort_failure_keeps_success() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let executor = executor_with(&calls, vec![]);
        let actions = vec![
            ActionSpec::new("fail", json!({"step": 1})).best_effort(),
            ActionSpec::new("ok", json!({"step": 2})),
        ];

        let result = executor.execute(&actions, &ctx()).await;
        assert!(result.success);
        assert!(result.first_error().is_none());
    }

    #[tokio::test]
    async fn test_declared_fatal_action_stops_remaining() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let executor = executor_with(&calls, vec![]);
        let actions = vec![
            ActionSpec::new("fail", json!({"step": 1})).fatal(),
            ActionSpec::new("ok", json!({"step": 2})),
        ];

        let result = executor.execute(&actions, &ctx()).await;

        assert!(!result.success);
        assert!(result.aborted);
        assert_eq!(*calls.lock(), vec!["fail:1"]);
        assert_eq!(result.results[0].status, ActionStatus::Fatal);
        assert_eq!(result.results[1].status, ActionStatus::Skipped);
    }

    #[tokio::test]
    async fn test_capability_declared_fatal_overrides_best_effort() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let executor = executor_with(&calls, vec![]);
        let actions = vec![
            ActionSpec::new("fatal", json!({"step": 1})).best_effort(),
            ActionSpec::new("ok", json!({"step": 2})),
        ];

        let result = executor.execute(&actions, &ctx()).await;
        assert!(!result.success);
        assert!(result.aborted);
        assert_eq!(calls.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_timeout_is_recoverable_unless_fatal() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let executor = executor_with(&calls, vec![Arc::new(Sleeper)]);

        let actions = vec![
            ActionSpec::new("sleep", Value::Null),
            ActionSpec::new("ok", json!({"step": 2})),
        ];
        let result = executor.execute(&actions, &ctx()).await;
        assert_eq!(result.results[0].status, ActionStatus::TimedOut);
        assert_eq!(result.results[1].status, ActionStatus::Succeeded);

        let actions = vec![
            ActionSpec::new("sleep", Value::Null).fatal().with_timeout_ms(10),
            ActionSpec::new("ok", json!({"step": 3})),
        ];
        let result = executor.execute(&actions, &ctx()).await;
        assert_eq!(result.results[0].status, ActionStatus::Fatal);
        assert_eq!(result.results[1].status, ActionStatus::Skipped);
    }

    #[tokio::test]
    async fn test_panic_and_unknown_capability_are_isolated() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let executor = executor_with(&calls, vec![Arc::new(Panicker)]);
        let actions = vec![
            ActionSpec::new("panic", Value::Null),
            ActionSpec::new("does-not-exist", Value::Null),
            ActionSpec::new("ok", json!({"step": 3})),
        ];

        let result = executor.execute(&actions, &ctx()).await;

        assert_eq!(result.results[0].status, ActionStatus::Failed);
        assert!(result.results[0].error.as_ref().unwrap().contains("exploded"));
        assert_eq!(result.results[1].status, ActionStatus::Failed);
        assert_eq!(result.results[2].status, ActionStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_error_result_from_mock_capability() {
        let mut mock = MockCapability::new();
        mock.expect_name().return_const("flaky".to_string());
        mock.expect_description().return_const("flaky");
        mock.expect_execute()
            .times(1)
            .returning(|_, _| Err(RuleError::FatalAction("凭证失效".to_string())));

        let calls = Arc::new(Mutex::new(Vec::new()));
        let executor = executor_with(&calls, vec![Arc::new(mock)]);
        let actions = vec![
            ActionSpec::new("flaky", Value::Null),
            ActionSpec::new("ok", json!({"step": 2})),
        ];

        let result = executor.execute(&actions, &ctx()).await;
        assert!(result.aborted);
        assert!(calls.lock().is_empty());
    }
}
