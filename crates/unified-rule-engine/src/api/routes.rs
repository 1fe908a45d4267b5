//! 路由配置模块
//!
//! 定义所有 REST API 端点的路由映射

use std::time::Duration;

use axum::{
    Router, middleware,
    routing::{get, post},
};
use automation_shared::observability::middleware::http_tracing;
use tower_http::timeout::TimeoutLayer;

use crate::api::{handlers, state::AppState};

/// 规则管理路由
fn rule_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/rules",
            get(handlers::rule::list_rules).post(handlers::rule::create_rule),
        )
        .route(
            "/rules/{id}",
            get(handlers::rule::get_rule)
                .patch(handlers::rule::update_rule)
                .delete(handlers::rule::delete_rule),
        )
        .route("/rules/{id}/status", post(handlers::rule::change_status))
        .route("/rules/{id}/toggle", post(handlers::rule::toggle_rule))
        .route("/rules/{id}/duplicate", post(handlers::rule::duplicate_rule))
}

/// 执行与触发路由
fn execution_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/rules/{id}/execute",
            post(handlers::execution::execute_rule),
        )
        .route(
            "/rules/{id}/executions",
            get(handlers::execution::list_executions),
        )
        .route("/triggers", post(handlers::execution::dispatch_trigger))
}

/// 统计路由
fn stats_routes() -> Router<AppState> {
    Router::new().route("/rules/stats", get(handlers::stats::get_stats))
}

/// 模板路由
fn template_routes() -> Router<AppState> {
    Router::new()
        .route("/rules/templates", get(handlers::template::list_templates))
        .route(
            "/rules/templates/{template_id}",
            get(handlers::template::get_template),
        )
}

/// 构建完整的 API 路由（不含前缀）
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .merge(rule_routes())
        .merge(execution_routes())
        .merge(stats_routes())
        .merge(template_routes())
}

/// 挂载 `/api/v1` 前缀并附加请求超时与追踪中间件
pub fn router(state: AppState, request_timeout: Duration) -> Router {
    Router::new()
        .nest("/api/v1", api_routes())
        .layer(TimeoutLayer::new(request_timeout))
        .layer(middleware::from_fn(http_tracing))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routes_construction() {
        let _rule = rule_routes();
        let _execution = execution_routes();
        let _stats = stats_routes();
        let _template = template_routes();
        let _api = api_routes();
    }
}
