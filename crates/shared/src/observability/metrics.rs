//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 指标通过独立的 HTTP 端口暴露，供 Prometheus 抓取。

use anyhow::Result;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::ObservabilityConfig;

/// Metrics 资源守卫
pub struct MetricsHandle {
    _server_handle: tokio::task::JoinHandle<()>,
}

/// 初始化 Prometheus 指标导出
///
/// 启动一个独立的 HTTP 服务器在指定端口暴露 `/metrics` 端点。
pub async fn init(config: &ObservabilityConfig) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    register_common_metrics(&config.service_name);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle {
        _server_handle: server_handle,
    })
}

/// 注册通用指标描述，出现在 /metrics 端点的 HELP 注释中
fn register_common_metrics(service_name: &str) {
    metrics::describe_counter!("http_requests_total", "Total number of HTTP requests");
    metrics::describe_histogram!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds"
    );

    metrics::describe_counter!(
        "rule_dispatches_total",
        "Total number of trigger dispatches"
    );
    metrics::describe_counter!(
        "rule_executions_total",
        "Total number of rule executions by outcome"
    );
    metrics::describe_histogram!(
        "rule_execution_duration_seconds",
        "Rule execution duration in seconds"
    );
    metrics::describe_counter!(
        "rule_actions_total",
        "Total number of capability invocations"
    );
    metrics::describe_counter!(
        "rule_dispatch_skipped_total",
        "Rules skipped during dispatch by reason"
    );
    metrics::describe_counter!(
        "rule_status_transitions_total",
        "Rule lifecycle transitions by target status"
    );

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

/// 启动指标 HTTP 服务器
async fn start_metrics_server(
    addr: SocketAddr,
    handle: PrometheusHandle,
) -> Result<tokio::task::JoinHandle<()>> {
    let app = Router::new()
        .route("/metrics", get(move || std::future::ready(handle.render())))
        .route("/health", get(|| async { "OK" }));

    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Metrics server error: {}", e);
        }
    });

    Ok(server_handle)
}

// ============================================================================
// 便捷的指标记录函数
// ============================================================================

/// 记录 HTTP 请求
#[inline]
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let status_str = status.to_string();
    metrics::counter!(
        "http_requests_total",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status_str.clone()
    )
    .increment(1);

    metrics::histogram!(
        "http_request_duration_seconds",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status_str
    )
    .record(duration_secs);
}

/// 记录一次触发分发（mode: automatic / manual / scheduled）
#[inline]
pub fn record_dispatch(mode: &str) {
    metrics::counter!("rule_dispatches_total", "mode" => mode.to_string()).increment(1);
}

/// 记录单条规则的执行结果
#[inline]
pub fn record_rule_execution(outcome: &str, duration_secs: f64) {
    metrics::counter!("rule_executions_total", "outcome" => outcome.to_string()).increment(1);
    metrics::histogram!("rule_execution_duration_seconds").record(duration_secs);
}

/// 记录能力调用
#[inline]
pub fn record_action(capability: &str, status: &str) {
    metrics::counter!(
        "rule_actions_total",
        "capability" => capability.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// 记录分发中被跳过的规则（reason: timeout / throttled / deduplicated）
#[inline]
pub fn record_dispatch_skipped(reason: &str, count: u64) {
    if count > 0 {
        metrics::counter!("rule_dispatch_skipped_total", "reason" => reason.to_string())
            .increment(count);
    }
}

/// 记录规则状态迁移
#[inline]
pub fn record_status_transition(to: &str) {
    metrics::counter!("rule_status_transitions_total", "to" => to.to_string()).increment(1);
}
