//! 租户提取器
//!
//! 鉴权不在本服务范围内，租户标识由上游网关写入 `X-Organization-Id` 请求头。

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::api::error::ApiError;
use crate::models::TenantId;

pub const TENANT_HEADER: &str = "x-organization-id";

/// 当前请求所属租户
#[derive(Debug, Clone)]
pub struct Tenant(pub TenantId);

impl<S> FromRequestParts<S> for Tenant
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(TENANT_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or(ApiError::MissingTenant("X-Organization-Id"))?;

        Ok(Self(TenantId::new(value)))
    }
}
