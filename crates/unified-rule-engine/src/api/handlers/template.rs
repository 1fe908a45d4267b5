//! 规则模板 API 处理器

use axum::{Json, extract::Path};

use crate::api::dto::ApiResponse;
use crate::api::error::ApiError;
use crate::templates::{self, RuleTemplate};

/// 内置模板列表
///
/// GET /api/v1/rules/templates
pub async fn list_templates() -> Json<ApiResponse<Vec<RuleTemplate>>> {
    Json(ApiResponse::success(templates::builtin_templates()))
}

/// 获取单个模板
///
/// GET /api/v1/rules/templates/{template_id}
pub async fn get_template(
    Path(template_id): Path<String>,
) -> Result<Json<ApiResponse<RuleTemplate>>, ApiError> {
    templates::find_template(&template_id)
        .map(|t| Json(ApiResponse::success(t)))
        .ok_or(ApiError::TemplateNotFound(template_id))
}
