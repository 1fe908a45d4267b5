//! 规则管理 API 处理器
//!
//! 规则的 CRUD、状态变更、启停切换与复制。
//! 所有写操作经由规则存储完成校验，处理器只负责请求转换。

use axum::{
    Json,
    extract::{Path, Query, State},
};
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use crate::api::dto::{
    ApiResponse, ChangeStatusRequest, CreateRuleRequest, DraftDto, RuleDto, RuleQuery,
    UpdateRuleRequest,
};
use crate::api::error::ApiError;
use crate::api::state::AppState;
use crate::api::tenant::Tenant;

/// 创建规则
///
/// POST /api/v1/rules
pub async fn create_rule(
    State(state): State<AppState>,
    Tenant(tenant): Tenant,
    Json(req): Json<CreateRuleRequest>,
) -> Result<Json<ApiResponse<RuleDto>>, ApiError> {
    req.validate()?;
    let draft = req.into_draft()?;

    let rule = state.store().create(&tenant, draft).await?;
    info!(tenant_id = %tenant, rule_id = %rule.id, name = %rule.name, "创建规则");

    Ok(Json(ApiResponse::success(rule.into())))
}

/// 获取规则列表
///
/// GET /api/v1/rules?type=&status=&search=
pub async fn list_rules(
    State(state): State<AppState>,
    Tenant(tenant): Tenant,
    Query(query): Query<RuleQuery>,
) -> Result<Json<ApiResponse<Vec<RuleDto>>>, ApiError> {
    let rules = state.store().list(&tenant, &query.into()).await?;
    Ok(Json(ApiResponse::success(
        rules.into_iter().map(Into::into).collect(),
    )))
}

/// 获取规则详情
///
/// GET /api/v1/rules/{id}
pub async fn get_rule(
    State(state): State<AppState>,
    Tenant(tenant): Tenant,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<RuleDto>>, ApiError> {
    let rule = state.store().get(&tenant, id).await?;
    Ok(Json(ApiResponse::success(rule.into())))
}

/// 更新规则（部分更新）
///
/// PATCH /api/v1/rules/{id}
pub async fn update_rule(
    State(state): State<AppState>,
    Tenant(tenant): Tenant,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateRuleRequest>,
) -> Result<Json<ApiResponse<RuleDto>>, ApiError> {
    req.validate()?;
    let patch = req.into_patch()?;

    let rule = state.store().update(&tenant, id, patch).await?;
    info!(tenant_id = %tenant, rule_id = %id, version = rule.version, "更新规则");

    Ok(Json(ApiResponse::success(rule.into())))
}

/// 删除规则
///
/// DELETE /api/v1/rules/{id}
pub async fn delete_rule(
    State(state): State<AppState>,
    Tenant(tenant): Tenant,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    state.store().delete(&tenant, id).await?;
    info!(tenant_id = %tenant, rule_id = %id, "删除规则");

    Ok(Json(ApiResponse::<()>::success_empty()))
}

/// 变更规则状态
///
/// POST /api/v1/rules/{id}/status
pub async fn change_status(
    State(state): State<AppState>,
    Tenant(tenant): Tenant,
    Path(id): Path<Uuid>,
    Json(req): Json<ChangeStatusRequest>,
) -> Result<Json<ApiResponse<RuleDto>>, ApiError> {
    let rule = state.store().set_status(&tenant, id, req.status).await?;
    info!(tenant_id = %tenant, rule_id = %id, status = %rule.status, "变更规则状态");

    Ok(Json(ApiResponse::success(rule.into())))
}

/// 启用 / 停用切换
///
/// POST /api/v1/rules/{id}/toggle
pub async fn toggle_rule(
    State(state): State<AppState>,
    Tenant(tenant): Tenant,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<RuleDto>>, ApiError> {
    let rule = state.store().toggle(&tenant, id).await?;
    info!(tenant_id = %tenant, rule_id = %id, status = %rule.status, "切换规则状态");

    Ok(Json(ApiResponse::success(rule.into())))
}

/// 复制规则
///
/// POST /api/v1/rules/{id}/duplicate
///
/// 返回未保存的草稿，客户端确认后再调用创建接口
pub async fn duplicate_rule(
    State(state): State<AppState>,
    Tenant(tenant): Tenant,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<DraftDto>>, ApiError> {
    let draft = state.store().duplicate(&tenant, id).await?;

    Ok(Json(ApiResponse::success_with_message(
        draft.into(),
        "已生成规则副本，保存后生效",
    )))
}
