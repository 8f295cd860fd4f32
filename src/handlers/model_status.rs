//! Model status heat-map endpoints.

use axum::response::IntoResponse;
use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::AppState;
use crate::handlers::response::{ok, with_deadline};
use crate::services::model_status_service::window_slots;
use crate::utils::{ApiError, ApiResult, MODEL_STATUS_WINDOWS, parse_window};

fn truthy(flag: &Option<String>) -> bool {
    matches!(flag.as_deref(), Some("1") | Some("true"))
}

/// GET /api/model-status/windows: supported windows and their slot shapes.
pub async fn windows() -> impl IntoResponse {
    let data: Vec<_> = MODEL_STATUS_WINDOWS
        .iter()
        .map(|w| {
            let (num_slots, slot_seconds) = window_slots(*w);
            json!({
                "window": w.as_str(),
                "num_slots": num_slots,
                "slot_seconds": slot_seconds,
            })
        })
        .collect();
    ok(data)
}

/// GET /api/model-status/models: recently active models.
pub async fn available_models(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    let data = with_deadline(state.model_status_service.available_models()).await?;
    Ok(ok(data))
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    pub window: Option<String>,
    pub no_cache: Option<String>,
}

/// GET /api/model-status/status/{model}?window=1h|6h|12h|24h
#[utoipa::path(
    get,
    path = "/api/model-status/status/{model}",
    params(
        ("model" = String, Path, description = "model name"),
        ("window" = Option<String>, Query, description = "1h|6h|12h|24h"),
    ),
    responses((status = 200, description = "Per-slot success-rate heat-map")),
    tag = "ModelStatus"
)]
pub async fn model_status(
    State(state): State<Arc<AppState>>,
    Path(model): Path<String>,
    Query(query): Query<StatusQuery>,
) -> ApiResult<impl IntoResponse> {
    let window_name = query.window.as_deref().unwrap_or("24h");
    let window = parse_window(window_name, MODEL_STATUS_WINDOWS)
        .ok_or_else(|| ApiError::invalid_params(format!("invalid window: {}", window_name)))?;
    let data = with_deadline(state.model_status_service.model_status(
        &model,
        window,
        !truthy(&query.no_cache),
    ))
    .await?;
    Ok(ok(data))
}

#[derive(Debug, Deserialize)]
pub struct BatchStatusRequest {
    pub models: Vec<String>,
    pub window: Option<String>,
    pub no_cache: Option<bool>,
}

/// POST /api/model-status/status/batch: one query buckets all models.
pub async fn batch_status(
    State(state): State<Arc<AppState>>,
    Json(request): Json<BatchStatusRequest>,
) -> ApiResult<impl IntoResponse> {
    if request.models.is_empty() || request.models.len() > 100 {
        return Err(ApiError::invalid_params("models must contain 1..=100 entries"));
    }
    let window_name = request.window.as_deref().unwrap_or("24h");
    let window = parse_window(window_name, MODEL_STATUS_WINDOWS)
        .ok_or_else(|| ApiError::invalid_params(format!("invalid window: {}", window_name)))?;
    let data = with_deadline(state.model_status_service.batch_status(
        &request.models,
        window,
        !request.no_cache.unwrap_or(false),
    ))
    .await?;
    Ok(ok(data))
}
