//! Auto-group endpoints.

use axum::response::IntoResponse;
use axum::{
    Json,
    extract::{Query, State},
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::AppState;
use crate::handlers::response::{ok, ok_with_message};
use crate::utils::{ApiError, ApiResult};

/// GET /api/auto-group/config
pub async fn get_config(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    let config = state.auto_group_service.load_config().await?;
    Ok(ok(config))
}

/// POST /api/auto-group/config
pub async fn save_config(
    State(state): State<Arc<AppState>>,
    Json(patch): Json<serde_json::Value>,
) -> ApiResult<impl IntoResponse> {
    if !patch.is_object() {
        return Err(ApiError::invalid_params("config patch must be a JSON object"));
    }
    let config = state.auto_group_service.save_config(&patch).await?;
    Ok(ok_with_message(config, "配置已保存 / config saved"))
}

#[derive(Debug, Deserialize)]
pub struct PreviewQuery {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

/// GET /api/auto-group/preview: users awaiting assignment.
pub async fn preview(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PreviewQuery>,
) -> ApiResult<impl IntoResponse> {
    let page = state
        .auto_group_service
        .pending_users(query.page.unwrap_or(1), query.page_size.unwrap_or(50))
        .await?;
    Ok(ok(page))
}

/// GET /api/auto-group/groups: groups currently assigned to users.
pub async fn groups(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    let groups = state.auto_group_service.groups_in_use().await?;
    Ok(ok(groups))
}

#[derive(Debug, Deserialize)]
pub struct ScanRequest {
    pub dry_run: Option<bool>,
}

/// POST /api/auto-group/scan
#[utoipa::path(
    post,
    path = "/api/auto-group/scan",
    responses(
        (status = 200, description = "Scan report"),
        (status = 409, description = "A scan is already running"),
    ),
    tag = "AutoGroup"
)]
pub async fn run_scan(
    State(state): State<Arc<AppState>>,
    body: Option<Json<ScanRequest>>,
) -> ApiResult<impl IntoResponse> {
    let dry_run = body.map(|Json(b)| b.dry_run.unwrap_or(false)).unwrap_or(false);
    let report = state.auto_group_service.run_scan(dry_run, "admin").await?;
    Ok(ok(report))
}

#[derive(Debug, Deserialize)]
pub struct BatchMoveRequest {
    pub user_ids: Vec<i64>,
    pub target_group: String,
}

/// POST /api/auto-group/batch-move
pub async fn batch_move(
    State(state): State<Arc<AppState>>,
    Json(request): Json<BatchMoveRequest>,
) -> ApiResult<impl IntoResponse> {
    let report = state
        .auto_group_service
        .batch_move(&request.user_ids, &request.target_group, "admin")
        .await?;
    Ok(ok(report))
}

#[derive(Debug, Deserialize)]
pub struct RevertRequest {
    pub log_id: i64,
}

/// POST /api/auto-group/revert
pub async fn revert(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RevertRequest>,
) -> ApiResult<impl IntoResponse> {
    let result = state.auto_group_service.revert(request.log_id, "admin").await?;
    Ok(ok(result))
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
    pub action: Option<String>,
    pub user_id: Option<i64>,
}

/// GET /api/auto-group/logs
pub async fn logs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LogsQuery>,
) -> ApiResult<impl IntoResponse> {
    if let Some(action) = query.action.as_deref()
        && !["assign", "revert", "batch_move"].contains(&action)
    {
        return Err(ApiError::invalid_params(format!("invalid action: {}", action)));
    }
    let page = state
        .audit_store
        .list_auto_group_logs(
            query.page.unwrap_or(1),
            query.page_size.unwrap_or(50),
            query.action.as_deref(),
            query.user_id,
        )
        .await?;
    Ok(ok(page))
}

/// GET /api/auto-group/stats: assignment counters for the overview card.
pub async fn stats(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    let pending = state.auto_group_service.pending_users(1, 1).await?;
    let logs = state
        .audit_store
        .list_auto_group_logs(1, 1, Some("assign"), None)
        .await?;
    Ok(ok(json!({
        "pending_users": pending.total,
        "total_assigned": logs.total,
    })))
}
