//! 集成测试共用的引擎装配

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rule_engine::capability::{InMemoryEffectSink, NoopClassifier};
use rule_engine::repository::MemoryStore;
use rule_engine::{
    ActionContext, ActionExecutor, Capability, CapabilityOutcome, CapabilityRegistry,
    ExecutionLedger, FailurePolicy, Result, RuleCompiler, RuleStore, TenantId, TriggerDispatcher,
};
use serde_json::{Value, json};

/// 总是失败的能力，`fatal` 参数为 true 时声明致命失败
pub struct FailingCapability;

#[async_trait]
impl Capability for FailingCapability {
    fn name(&self) -> &str {
        "always-fail"
    }

    async fn execute(&self, params: &Value, _ctx: &ActionContext) -> Result<CapabilityOutcome> {
        let detail = json!({"reason": "下游不可用"});
        if params.get("fatal").and_then(Value::as_bool).unwrap_or(false) {
            Ok(CapabilityOutcome::fatal(detail))
        } else {
            Ok(CapabilityOutcome::failure(detail))
        }
    }
}

pub struct Engine {
    pub dispatcher: Arc<TriggerDispatcher>,
    pub sink: Arc<InMemoryEffectSink>,
    pub memory: MemoryStore,
}

impl Engine {
    pub fn store(&self) -> &RuleStore {
        self.dispatcher.store()
    }
}

pub fn tenant() -> TenantId {
    TenantId::new("org-1")
}

pub fn engine_with_policy(policy: FailurePolicy) -> Engine {
    let memory = MemoryStore::new();
    let sink = Arc::new(InMemoryEffectSink::new());

    let mut registry =
        CapabilityRegistry::with_defaults(sink.clone(), Arc::new(NoopClassifier), Duration::from_secs(1))
            .expect("注册表初始化失败");
    registry.register(Arc::new(FailingCapability));
    let registry = Arc::new(registry);

    let store = RuleStore::new(
        Arc::new(memory.clone()),
        RuleCompiler::with_registry(registry.clone()),
    );
    let ledger = ExecutionLedger::new(
        Arc::new(memory.clone()),
        policy,
        chrono::Duration::minutes(5),
    );
    let dispatcher = TriggerDispatcher::new(
        store,
        Arc::new(ledger),
        ActionExecutor::new(registry, Duration::from_secs(1)),
        Duration::from_secs(5),
    );

    Engine {
        dispatcher: Arc::new(dispatcher),
        sink,
        memory,
    }
}

pub fn engine() -> Engine {
    engine_with_policy(FailurePolicy::Disabled)
}
