//! 统计 API 处理器

use axum::{
    Json,
    extract::{Query, State},
};
use chrono::Duration;
use validator::Validate;

use crate::api::dto::{ApiResponse, StatsDto, StatsQuery};
use crate::api::error::ApiError;
use crate::api::state::AppState;
use crate::api::tenant::Tenant;

/// 统计概览
///
/// GET /api/v1/rules/stats?windowHours=
pub async fn get_stats(
    State(state): State<AppState>,
    Tenant(tenant): Tenant,
    Query(query): Query<StatsQuery>,
) -> Result<Json<ApiResponse<StatsDto>>, ApiError> {
    query.validate()?;

    let window = query
        .window_hours
        .map(Duration::hours)
        .unwrap_or(state.stats_window);
    let stats = state.stats.stats_since(&tenant, window).await?;

    let day = Duration::hours(24);
    let executions_24h = if window == day {
        stats.executions
    } else {
        state.stats.executions_since(&tenant, day).await?
    };

    Ok(Json(ApiResponse::success(StatsDto {
        stats,
        executions_24h,
    })))
}
