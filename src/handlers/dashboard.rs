//! Dashboard endpoints. Paths, query parameters and response shapes are
//! versioned against the frontend; change them only with a frontend release.

use axum::response::IntoResponse;
use axum::{Json, extract::Query, extract::State};
use serde::Deserialize;
use std::sync::Arc;

use crate::AppState;
use crate::handlers::response::{ok, validate_limit, with_deadline};
use crate::utils::{ApiError, ApiResult, DASHBOARD_WINDOWS, IP_DIST_WINDOWS, parse_window};

fn truthy(flag: &Option<String>) -> bool {
    matches!(flag.as_deref(), Some("1") | Some("true"))
}

#[derive(Debug, Deserialize)]
pub struct PeriodQuery {
    pub period: Option<String>,
    pub no_cache: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PeriodLimitQuery {
    pub period: Option<String>,
    pub limit: Option<i64>,
    pub no_cache: Option<String>,
}

/// GET /api/dashboard/overview?period=24h|3d|7d|14d
#[utoipa::path(
    get,
    path = "/api/dashboard/overview",
    params(("period" = Option<String>, Query, description = "24h|3d|7d|14d")),
    responses((status = 200, description = "System overview counters")),
    tag = "Dashboard"
)]
pub async fn overview(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PeriodQuery>,
) -> ApiResult<impl IntoResponse> {
    let period = query.period.as_deref().unwrap_or("24h");
    let window = parse_window(period, DASHBOARD_WINDOWS)
        .ok_or_else(|| ApiError::invalid_params(format!("invalid period: {}", period)))?;
    let data = with_deadline(
        state
            .dashboard_service
            .system_overview(window, !truthy(&query.no_cache)),
    )
    .await?;
    Ok(ok(data))
}

/// GET /api/dashboard/usage?period=1h|6h|24h|3d|7d|14d
#[utoipa::path(
    get,
    path = "/api/dashboard/usage",
    params(("period" = Option<String>, Query, description = "1h|6h|24h|3d|7d|14d")),
    responses((status = 200, description = "Aggregate usage counters")),
    tag = "Dashboard"
)]
pub async fn usage(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PeriodQuery>,
) -> ApiResult<impl IntoResponse> {
    let period = query.period.as_deref().unwrap_or("24h");
    let window = parse_window(period, DASHBOARD_WINDOWS)
        .ok_or_else(|| ApiError::invalid_params(format!("invalid period: {}", period)))?;
    let data = with_deadline(
        state
            .dashboard_service
            .usage_statistics(window, !truthy(&query.no_cache)),
    )
    .await?;
    Ok(ok(data))
}

/// GET /api/dashboard/models?period=..&limit=1..50
///
/// Slot blobs oversample to the top 100 models, so any limit up to 50 is
/// exact after the cross-slot merge.
#[utoipa::path(
    get,
    path = "/api/dashboard/models",
    params(
        ("period" = Option<String>, Query, description = "1h|6h|24h|3d|7d|14d"),
        ("limit" = Option<i64>, Query, description = "1..=50"),
    ),
    responses((status = 200, description = "Top models by request count")),
    tag = "Dashboard"
)]
pub async fn models(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PeriodLimitQuery>,
) -> ApiResult<impl IntoResponse> {
    let period = query.period.as_deref().unwrap_or("7d");
    let window = parse_window(period, DASHBOARD_WINDOWS)
        .ok_or_else(|| ApiError::invalid_params(format!("invalid period: {}", period)))?;
    let limit = validate_limit(query.limit.unwrap_or(10))?;
    let data = with_deadline(
        state
            .dashboard_service
            .model_usage(window, limit, !truthy(&query.no_cache)),
    )
    .await?;
    Ok(ok(data))
}

/// GET /api/dashboard/top-users?period=..&limit=1..50
#[utoipa::path(
    get,
    path = "/api/dashboard/top-users",
    params(
        ("period" = Option<String>, Query, description = "1h|6h|24h|3d|7d|14d"),
        ("limit" = Option<i64>, Query, description = "1..=50"),
    ),
    responses((status = 200, description = "Top users by quota used")),
    tag = "Dashboard"
)]
pub async fn top_users(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PeriodLimitQuery>,
) -> ApiResult<impl IntoResponse> {
    let period = query.period.as_deref().unwrap_or("7d");
    let window = parse_window(period, DASHBOARD_WINDOWS)
        .ok_or_else(|| ApiError::invalid_params(format!("invalid period: {}", period)))?;
    let limit = validate_limit(query.limit.unwrap_or(10))?;
    let data = with_deadline(
        state
            .dashboard_service
            .top_users(window, limit, !truthy(&query.no_cache)),
    )
    .await?;
    Ok(ok(data))
}

#[derive(Debug, Deserialize)]
pub struct DaysQuery {
    pub days: Option<i64>,
    pub no_cache: Option<String>,
}

/// GET /api/dashboard/trends/daily?days=1..30
#[utoipa::path(
    get,
    path = "/api/dashboard/trends/daily",
    params(("days" = Option<i64>, Query, description = "1..=30")),
    responses((status = 200, description = "Per-day request trend, local midnights")),
    tag = "Dashboard"
)]
pub async fn daily_trends(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DaysQuery>,
) -> ApiResult<impl IntoResponse> {
    let days = query.days.unwrap_or(7);
    if !(1..=30).contains(&days) {
        return Err(ApiError::invalid_params(format!("days must be within 1..=30, got {}", days)));
    }
    let data = with_deadline(
        state
            .dashboard_service
            .daily_trends(days, !truthy(&query.no_cache)),
    )
    .await?;
    Ok(ok(data))
}

#[derive(Debug, Deserialize)]
pub struct HoursQuery {
    pub hours: Option<i64>,
    pub no_cache: Option<String>,
}

/// GET /api/dashboard/trends/hourly?hours=1..72
#[utoipa::path(
    get,
    path = "/api/dashboard/trends/hourly",
    params(("hours" = Option<i64>, Query, description = "1..=72")),
    responses((status = 200, description = "Per-hour request trend")),
    tag = "Dashboard"
)]
pub async fn hourly_trends(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HoursQuery>,
) -> ApiResult<impl IntoResponse> {
    let hours = query.hours.unwrap_or(24);
    if !(1..=72).contains(&hours) {
        return Err(ApiError::invalid_params(format!(
            "hours must be within 1..=72, got {}",
            hours
        )));
    }
    let data = with_deadline(
        state
            .dashboard_service
            .hourly_trends(hours, !truthy(&query.no_cache)),
    )
    .await?;
    Ok(ok(data))
}

/// GET /api/dashboard/channels
#[utoipa::path(
    get,
    path = "/api/dashboard/channels",
    responses((status = 200, description = "Channel status, top 20")),
    tag = "Dashboard"
)]
pub async fn channels(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    let data = with_deadline(state.dashboard_service.channel_status(true)).await?;
    Ok(ok(data))
}

#[derive(Debug, Deserialize)]
pub struct IpDistributionQuery {
    pub window: Option<String>,
    pub no_cache: Option<String>,
}

/// GET /api/dashboard/ip-distribution?window=1h|6h|24h|7d
#[utoipa::path(
    get,
    path = "/api/dashboard/ip-distribution",
    params(("window" = Option<String>, Query, description = "1h|6h|24h|7d")),
    responses((status = 200, description = "Geographic distribution of request traffic")),
    tag = "Dashboard"
)]
pub async fn ip_distribution(
    State(state): State<Arc<AppState>>,
    Query(query): Query<IpDistributionQuery>,
) -> ApiResult<impl IntoResponse> {
    let window_name = query.window.as_deref().unwrap_or("24h");
    let window = parse_window(window_name, IP_DIST_WINDOWS)
        .ok_or_else(|| ApiError::invalid_params(format!("invalid window: {}", window_name)))?;
    let data = with_deadline(
        state
            .ip_distribution_service
            .distribution(window, !truthy(&query.no_cache)),
    )
    .await?;
    Ok(ok(data))
}

#[derive(Debug, Deserialize)]
pub struct InvalidateRequest {
    pub pattern: Option<String>,
}

/// POST /api/dashboard/cache/invalidate
pub async fn invalidate_cache(
    State(state): State<Arc<AppState>>,
    body: Option<Json<InvalidateRequest>>,
) -> ApiResult<impl IntoResponse> {
    let pattern = body.and_then(|Json(b)| b.pattern);
    let cleared = state.dashboard_service.invalidate(pattern.as_deref()).await;
    Ok(ok(serde_json::json!({ "invalidated": cleared })))
}
