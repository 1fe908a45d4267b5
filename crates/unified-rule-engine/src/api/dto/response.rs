//! 响应 DTO 定义
//!
//! 所有 REST API 的响应体结构

use serde::Serialize;

use crate::models::{Rule, RuleDraft};
use crate::stats::RuleStats;

/// 分页响应
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageResponse<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
    pub total_pages: i64,
}

impl<T> PageResponse<T> {
    /// 创建分页响应
    pub fn new(items: Vec<T>, total: i64, page: i64, page_size: i64) -> Self {
        let total_pages = if page_size > 0 {
            (total + page_size - 1) / page_size
        } else {
            0
        };

        Self {
            items,
            total,
            page,
            page_size,
            total_pages,
        }
    }
}

/// API 统一响应
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    pub success: bool,
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    /// 创建成功响应
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            code: "SUCCESS".to_string(),
            message: "操作成功".to_string(),
            data: Some(data),
        }
    }

    /// 创建成功响应（无数据）
    pub fn success_empty() -> ApiResponse<()> {
        ApiResponse {
            success: true,
            code: "SUCCESS".to_string(),
            message: "操作成功".to_string(),
            data: None,
        }
    }

    /// 创建成功响应（自定义消息）
    pub fn success_with_message(data: T, message: impl Into<String>) -> Self {
        Self {
            success: true,
            code: "SUCCESS".to_string(),
            message: message.into(),
            data: Some(data),
        }
    }
}

/// 规则 DTO
///
/// 在规则字段之外附带由状态派生的 `isActive` 与成功率
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleDto {
    #[serde(flatten)]
    pub rule: Rule,
    pub is_active: bool,
    pub success_rate: Option<f64>,
}

impl From<Rule> for RuleDto {
    fn from(rule: Rule) -> Self {
        Self {
            is_active: rule.is_active(),
            success_rate: rule.counters.success_rate(),
            rule,
        }
    }
}

/// 复制操作返回的草稿（尚未保存）
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftDto {
    #[serde(flatten)]
    pub draft: RuleDraft,
    pub is_active: bool,
}

impl From<RuleDraft> for DraftDto {
    fn from(draft: RuleDraft) -> Self {
        Self {
            is_active: false,
            draft,
        }
    }
}

/// 统计概览响应
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsDto {
    #[serde(flatten)]
    pub stats: RuleStats,
    /// 最近 24 小时已匹配的执行次数（与统计窗口无关）
    #[serde(rename = "executions24h")]
    pub executions_24h: i64,
}
