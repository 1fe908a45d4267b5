//! HTTP 请求追踪中间件

use std::time::Instant;

use axum::{
    extract::{MatchedPath, Request},
    middleware::Next,
    response::Response,
};
use tracing::{Instrument, info_span};

use super::metrics;

/// 租户请求头，记录到请求 span 上便于按租户检索日志
const TENANT_HEADER: &str = "x-organization-id";

/// 为每个请求创建 span，并按路由模板记录请求数与耗时
///
/// 指标的 path 标签取路由模板（如 `/api/v1/rules/{id}`），未匹配路由统一记为 `unmatched`，
/// 避免规则 ID 进入标签。
///
/// ```ignore
/// let app = Router::new()
///     .nest("/api/v1", api_routes())
///     .layer(axum::middleware::from_fn(http_tracing));
/// ```
pub async fn http_tracing(request: Request, next: Next) -> Response {
    let method = request.method().as_str().to_owned();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| "unmatched".to_owned());
    let tenant = request
        .headers()
        .get(TENANT_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_owned();

    let span = info_span!(
        "http_request",
        method = %method,
        route = %route,
        uri = %request.uri().path(),
        tenant_id = %tenant,
        status = tracing::field::Empty,
        latency_ms = tracing::field::Empty,
    );

    let started = Instant::now();
    let response = next.run(request).instrument(span.clone()).await;
    let elapsed = started.elapsed();
    let status = response.status().as_u16();

    span.record("status", status);
    span.record("latency_ms", elapsed.as_millis() as u64);
    metrics::record_http_request(&method, &route, status, elapsed.as_secs_f64());

    response
}
