//! 应用状态定义
//!
//! 包含 Axum 路由共享的引擎组件

use std::sync::Arc;

use chrono::Duration;

use crate::dispatcher::TriggerDispatcher;
use crate::stats::StatsAggregator;
use crate::store::RuleStore;

/// Axum 应用共享状态
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<TriggerDispatcher>,
    pub stats: StatsAggregator,
    /// 统计接口的默认时间窗口
    pub stats_window: Duration,
}

impl AppState {
    pub fn new(dispatcher: Arc<TriggerDispatcher>, stats: StatsAggregator, stats_window: Duration) -> Self {
        Self {
            dispatcher,
            stats,
            stats_window,
        }
    }

    pub fn store(&self) -> &RuleStore {
        self.dispatcher.store()
    }
}
