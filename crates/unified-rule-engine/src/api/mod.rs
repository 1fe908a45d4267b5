//! HTTP 接口层
//!
//! 规则管理、手动执行、事件触发与统计的 REST 端点，统一挂载在 `/api/v1` 下。
//! 租户通过 `X-Organization-Id` 请求头显式传入。

pub mod dto;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;
pub mod tenant;

pub use error::ApiError;
pub use routes::{api_routes, router};
pub use state::AppState;
pub use tenant::{TENANT_HEADER, Tenant};
