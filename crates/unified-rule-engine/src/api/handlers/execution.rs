//! 规则执行 API 处理器
//!
//! 手动执行单条规则、查询执行历史，以及外部事件的自动分发入口。

use axum::{
    Json,
    extract::{Path, Query, State},
};
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use crate::api::dto::{
    ApiResponse, ExecuteRuleRequest, PageResponse, PaginationParams, TriggerRequest,
};
use crate::api::error::ApiError;
use crate::api::state::AppState;
use crate::api::tenant::Tenant;
use crate::dispatcher::{DispatchMode, DispatchSummary};
use crate::models::ExecutionRecord;

/// 手动执行规则
///
/// POST /api/v1/rules/{id}/execute
pub async fn execute_rule(
    State(state): State<AppState>,
    Tenant(tenant): Tenant,
    Path(id): Path<Uuid>,
    Json(req): Json<ExecuteRuleRequest>,
) -> Result<Json<ApiResponse<ExecutionRecord>>, ApiError> {
    req.validate()?;

    let record = state
        .dispatcher
        .execute_rule(&tenant, id, req.into_context())
        .await?;
    info!(
        tenant_id = %tenant,
        rule_id = %id,
        outcome = %record.outcome,
        "手动执行规则"
    );

    Ok(Json(ApiResponse::success(record)))
}

/// 规则执行历史（新到旧）
///
/// GET /api/v1/rules/{id}/executions?page=&pageSize=
pub async fn list_executions(
    State(state): State<AppState>,
    Tenant(tenant): Tenant,
    Path(id): Path<Uuid>,
    Query(pagination): Query<PaginationParams>,
) -> Result<Json<ApiResponse<PageResponse<ExecutionRecord>>>, ApiError> {
    let page = pagination.page();
    let page_size = pagination.limit();

    let (items, total) = state
        .dispatcher
        .ledger()
        .history(&tenant, id, page, page_size)
        .await?;

    Ok(Json(ApiResponse::success(PageResponse::new(
        items, total, page, page_size,
    ))))
}

/// 事件触发（自动分发）
///
/// POST /api/v1/triggers
///
/// 系统级错误返回 503，调用方可用相同的触发内容重试，已记录的执行不会重复
pub async fn dispatch_trigger(
    State(state): State<AppState>,
    Tenant(tenant): Tenant,
    Json(req): Json<TriggerRequest>,
) -> Result<Json<ApiResponse<DispatchSummary>>, ApiError> {
    req.validate()?;

    let summary = state
        .dispatcher
        .dispatch(&tenant, req.into_context(), DispatchMode::Automatic)
        .await?;

    Ok(Json(ApiResponse::success(summary)))
}
