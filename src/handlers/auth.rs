//! Admin session endpoints (outside the auth layer).

use axum::{Json, extract::State};
use axum::response::IntoResponse;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::AppState;
use crate::handlers::response::ok_with_message;
use crate::utils::{ApiError, ApiResult};

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub password: String,
}

/// POST /api/auth/login
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<impl IntoResponse> {
    if state.auth_config.admin_password.is_empty() {
        return Err(ApiError::unauthorized("Admin password not configured"));
    }
    if req.password != state.auth_config.admin_password {
        tracing::warn!("failed admin login attempt");
        return Err(ApiError::unauthorized("密码错误 / invalid password"));
    }

    let (token, expires_at) = state.jwt_util.generate_token("admin")?;
    tracing::info!("admin session issued");
    Ok(ok_with_message(
        json!({ "token": token, "expires_at": expires_at }),
        "登录成功 / login successful",
    ))
}

/// POST /api/auth/logout. Sessions are stateless JWTs; this is an
/// acknowledgement for the frontend.
pub async fn logout() -> impl IntoResponse {
    ok_with_message(json!({}), "已退出登录 / logged out")
}
