//! 规则引擎错误类型

use thiserror::Error;

use crate::models::RuleStatus;

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("规则校验失败: {0}")]
    Validation(String),

    #[error("规则未找到: {0}")]
    NotFound(String),

    #[error("非法的状态迁移: {from} -> {to}")]
    InvalidTransition { from: RuleStatus, to: RuleStatus },

    #[error("并发修改冲突: {0}")]
    Conflict(String),

    #[error("条件评估失败: {0}")]
    ConditionEvaluation(String),

    #[error("类型不匹配: 期望 {expected}, 实际 {actual}")]
    TypeMismatch { expected: String, actual: String },

    #[error("动作执行失败: {0}")]
    Action(String),

    #[error("动作致命失败: {0}")]
    FatalAction(String),

    #[error("执行超时: {0}")]
    Timeout(String),

    #[error("存储错误: {0}")]
    Storage(String),

    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON 序列化错误: {0}")]
    Json(#[from] serde_json::Error),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl RuleError {
    /// 稳定的错误码，用于 API 响应和日志聚合
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::NotFound(_) => "NOT_FOUND",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::Conflict(_) => "CONFLICT",
            Self::ConditionEvaluation(_) | Self::TypeMismatch { .. } => {
                "CONDITION_EVALUATION_ERROR"
            }
            Self::Action(_) => "ACTION_ERROR",
            Self::FatalAction(_) => "FATAL_ACTION_ERROR",
            Self::Timeout(_) => "TIMEOUT",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Json(_) => "SERIALIZATION_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// 是否为系统级（可重试）错误
    ///
    /// 系统级错误会中止整次分发，由调用方以相同的触发上下文重试
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::Database(_))
    }

    /// 是否属于条件评估失败
    pub fn is_evaluation_error(&self) -> bool {
        matches!(self, Self::ConditionEvaluation(_) | Self::TypeMismatch { .. })
    }
}

pub type Result<T> = std::result::Result<T, RuleError>;
