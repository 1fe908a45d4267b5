//! HTTP 接口错误类型
//!
//! 引擎错误按类别映射为 HTTP 状态码，响应体沿用统一的 `{success, code, message, data}` 结构。

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::error::RuleError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("参数验证失败: {0}")]
    Validation(String),

    #[error("缺少请求头: {0}")]
    MissingTenant(&'static str),

    #[error("模板不存在: {0}")]
    TemplateNotFound(String),

    #[error(transparent)]
    Rule(#[from] RuleError),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::MissingTenant(_) => StatusCode::BAD_REQUEST,
            Self::TemplateNotFound(_) => StatusCode::NOT_FOUND,
            Self::Rule(e) => match e {
                RuleError::NotFound(_) => StatusCode::NOT_FOUND,
                RuleError::Validation(_)
                | RuleError::InvalidTransition { .. }
                | RuleError::ConditionEvaluation(_)
                | RuleError::TypeMismatch { .. } => StatusCode::BAD_REQUEST,
                RuleError::Conflict(_) => StatusCode::CONFLICT,
                RuleError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
                RuleError::Storage(_) | RuleError::Database(_) => StatusCode::SERVICE_UNAVAILABLE,
                RuleError::Action(_)
                | RuleError::FatalAction(_)
                | RuleError::Json(_)
                | RuleError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::MissingTenant(_) => "MISSING_TENANT",
            Self::TemplateNotFound(_) => "TEMPLATE_NOT_FOUND",
            Self::Rule(e) => e.error_code(),
        }
    }

    /// 系统级错误：详细信息只写日志
    fn is_system_error(&self) -> bool {
        match self {
            Self::Rule(e) => matches!(
                e,
                RuleError::Storage(_)
                    | RuleError::Database(_)
                    | RuleError::Json(_)
                    | RuleError::Internal(_)
            ),
            _ => false,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let message = if self.is_system_error() {
            tracing::error!(error = %self, code = self.error_code(), "请求处理失败");
            "服务内部错误，请稍后重试".to_string()
        } else {
            self.to_string()
        };

        let body = json!({
            "success": false,
            "code": self.error_code(),
            "message": message,
            "data": serde_json::Value::Null
        });

        (status, axum::Json(body)).into_response()
    }
}

/// 从 validator 错误转换
impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self::Validation(errors.to_string())
    }
}
