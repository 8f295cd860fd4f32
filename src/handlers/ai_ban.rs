//! AI auto-ban endpoints: scans, configuration, whitelist and audit logs.

use axum::response::IntoResponse;
use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::AppState;
use crate::handlers::response::{ok, ok_with_message, with_deadline};
use crate::utils::{ApiError, ApiResult, RISK_WINDOWS, parse_window};

#[derive(Debug, Deserialize)]
pub struct ScanRequest {
    pub window: Option<String>,
    pub limit: Option<usize>,
}

/// POST /api/ai-ban/scan: manual scan trigger; respects the scan lock.
#[utoipa::path(
    post,
    path = "/api/ai-ban/scan",
    responses(
        (status = 200, description = "Scan report"),
        (status = 409, description = "A scan is already running"),
    ),
    tag = "AiBan"
)]
pub async fn run_scan(
    State(state): State<Arc<AppState>>,
    body: Option<Json<ScanRequest>>,
) -> ApiResult<impl IntoResponse> {
    let request = body.map(|Json(b)| b).unwrap_or(ScanRequest { window: None, limit: None });
    let window_name = request.window.as_deref().unwrap_or("1h");
    let window = parse_window(window_name, RISK_WINDOWS)
        .ok_or_else(|| ApiError::invalid_params(format!("invalid window: {}", window_name)))?;
    let limit = request.limit.unwrap_or(10).clamp(1, 50);

    // Scans may legitimately run longer than the default deadline when the
    // LLM retries; cap at the scan's own budget instead.
    let report = state.ai_ban_service.run_scan(window, limit, true).await?;
    Ok(ok(report))
}

/// GET /api/ai-ban/config
pub async fn get_config(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    let report = state.ai_ban_service.config_report().await?;
    Ok(ok(report))
}

/// POST /api/ai-ban/config: partial update, merged into the stored config.
pub async fn save_config(
    State(state): State<Arc<AppState>>,
    Json(patch): Json<serde_json::Value>,
) -> ApiResult<impl IntoResponse> {
    if !patch.is_object() {
        return Err(ApiError::invalid_params("config patch must be a JSON object"));
    }
    state.ai_ban_service.save_config(&patch).await?;
    let report = state.ai_ban_service.config_report().await?;
    Ok(ok_with_message(report, "配置已保存 / config saved"))
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub status: Option<String>,
}

/// GET /api/ai-ban/logs
pub async fn scan_logs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LogsQuery>,
) -> ApiResult<impl IntoResponse> {
    let limit = query.limit.unwrap_or(50).clamp(1, 200);
    let offset = query.offset.unwrap_or(0).max(0);
    if let Some(status) = query.status.as_deref()
        && !["success", "partial", "failed", "empty"].contains(&status)
    {
        return Err(ApiError::invalid_params(format!("invalid status: {}", status)));
    }
    let (items, total) = state
        .audit_store
        .list_ai_audit_logs(limit, offset, query.status.as_deref())
        .await?;
    Ok(ok(json!({ "items": items, "total": total, "limit": limit, "offset": offset })))
}

/// GET /api/ai-ban/whitelist
pub async fn whitelist(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    let users = state.ai_ban_service.whitelist_users().await?;
    Ok(ok(users))
}

#[derive(Debug, Deserialize)]
pub struct WhitelistRequest {
    pub user_id: i64,
}

/// POST /api/ai-ban/whitelist
pub async fn add_whitelist(
    State(state): State<Arc<AppState>>,
    Json(request): Json<WhitelistRequest>,
) -> ApiResult<impl IntoResponse> {
    state.ai_ban_service.add_to_whitelist(request.user_id).await?;
    Ok(ok_with_message(json!({ "user_id": request.user_id }), "已添加到白名单 / whitelisted"))
}

/// DELETE /api/ai-ban/whitelist/{user_id}
pub async fn remove_whitelist(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    state.ai_ban_service.remove_from_whitelist(user_id).await?;
    Ok(ok_with_message(json!({ "user_id": user_id }), "已从白名单移除 / removed"))
}

#[derive(Debug, Deserialize)]
pub struct ModelsQuery {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub force_refresh: Option<bool>,
}

/// GET /api/ai-ban/models: cached for 30 days keyed by base URL.
pub async fn list_models(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ModelsQuery>,
) -> ApiResult<impl IntoResponse> {
    let models = with_deadline(state.ai_ban_service.fetch_models(
        query.base_url,
        query.api_key,
        query.force_refresh.unwrap_or(false),
    ))
    .await?;
    let count = models.len();
    Ok(ok(json!({ "models": models, "count": count })))
}

#[derive(Debug, Deserialize)]
pub struct TestModelRequest {
    pub model: String,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
}

/// POST /api/ai-ban/test-model
pub async fn test_model(
    State(state): State<Arc<AppState>>,
    Json(request): Json<TestModelRequest>,
) -> ApiResult<impl IntoResponse> {
    if request.model.trim().is_empty() {
        return Err(ApiError::invalid_params("model must not be empty"));
    }
    let result = state
        .ai_ban_service
        .test_model(&request.model, request.base_url, request.api_key)
        .await;
    Ok(ok(result))
}

/// POST /api/ai-ban/reset-health: manual breaker reset.
pub async fn reset_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.ai_ban_service.reset_health();
    ok_with_message(state.ai_ban_service.health_snapshot(), "API 健康状态已重置 / health reset")
}

/// GET /api/ai-ban/available-groups: for the exclusion config UI.
pub async fn available_groups(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    let groups = with_deadline(state.ai_ban_service.available_groups()).await?;
    Ok(ok(groups))
}

/// GET /api/ai-ban/available-models: for the exclusion config UI.
pub async fn available_models(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    let models = with_deadline(state.ai_ban_service.available_models()).await?;
    Ok(ok(models))
}
