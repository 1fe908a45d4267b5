//! 统一规则引擎
//!
//! 多租户的“条件 → 动作”自动化引擎：
//! - 规则存储：定义校验、生命周期状态机、复制与启停
//! - 条件评估：JSON 条件树的短路求值
//! - 动作执行：按名称解析能力注册表中的处理器，逐个执行并隔离失败
//! - 触发分发：按优先级挑选并执行匹配规则，带截止时间与去重
//! - 执行账本：只追加的执行记录、原子计数器更新与失败策略
//! - 统计聚合、定时规则调度与 HTTP 接口

pub mod api;
pub mod capability;
pub mod compiler;
pub mod dispatcher;
pub mod error;
pub mod evaluator;
pub mod executor;
pub mod ledger;
pub mod lifecycle;
pub mod models;
pub mod operators;
pub mod policy;
pub mod repository;
pub mod scheduler;
pub mod stats;
pub mod store;
pub mod templates;

pub use capability::{ActionContext, Capability, CapabilityOutcome, CapabilityRegistry};
pub use compiler::RuleCompiler;
pub use dispatcher::{DispatchMode, DispatchSummary, TriggerDispatcher};
pub use error::{Result, RuleError};
pub use evaluator::{ConditionEvaluator, EvaluationResult};
pub use executor::ActionExecutor;
pub use ledger::ExecutionLedger;
pub use models::{
    ActionSpec, Condition, EvaluationContext, ExecutionOutcome, ExecutionRecord, LogicalGroup,
    Rule, RuleDraft, RuleNode, RulePatch, RuleStatus, RuleType, TenantId, TriggerContext,
    TriggerType,
};
pub use operators::{LogicalOperator, Operator};
pub use policy::FailurePolicy;
pub use scheduler::ScheduleTicker;
pub use stats::{RuleStats, StatsAggregator};
pub use store::RuleStore;
