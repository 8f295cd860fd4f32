//! System information and operational tooling endpoints.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::AppState;
use crate::handlers::response::{ok, ok_with_message};
use crate::store::NewRedemption;
use crate::utils::{ApiError, ApiResult, now_ts};

/// GET /api/system/scale: current deployment classification and the
/// metrics it was derived from.
pub async fn scale(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let (total_users, logs_24h, total_logs) = state.scale_service.metrics();
    ok(json!({
        "scale": state.scale_service.current().as_str(),
        "detected_at": state.scale_service.detected_at(),
        "metrics": {
            "total_users": total_users,
            "logs_24h": logs_24h,
            "total_logs": total_logs,
        },
    }))
}

#[derive(Debug, Deserialize)]
pub struct RedemptionBatchRequest {
    pub user_id: Option<i64>,
    pub name: String,
    pub keys: Vec<String>,
    pub quota: i64,
}

/// POST /api/redemptions/batch: operational batch insert of redemption
/// codes.
pub async fn insert_redemptions(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RedemptionBatchRequest>,
) -> ApiResult<impl IntoResponse> {
    if request.keys.is_empty() || request.keys.len() > 500 {
        return Err(ApiError::invalid_params("keys must contain 1..=500 entries"));
    }
    if request.quota <= 0 {
        return Err(ApiError::invalid_params("quota must be positive"));
    }

    let created_time = now_ts();
    let batch: Vec<NewRedemption> = request
        .keys
        .iter()
        .map(|key| NewRedemption {
            user_id: request.user_id.unwrap_or(1),
            name: request.name.clone(),
            key: key.clone(),
            quota: request.quota,
            created_time,
        })
        .collect();

    let inserted = state.writer.insert_redemptions(&batch, "admin").await?;
    Ok(ok_with_message(
        json!({ "inserted": inserted }),
        "兑换码已生成 / redemption codes inserted",
    ))
}
