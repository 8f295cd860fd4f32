//! Response envelope helpers. Every endpoint answers
//! `{success, data?, message?, error?}`.

use axum::Json;
use serde::Serialize;
use serde_json::{Value, json};
use std::future::Future;
use std::time::Duration;

use crate::utils::{ApiError, ApiResult};

/// Default deadline for public engine operations.
pub const OPERATION_DEADLINE: Duration = Duration::from_secs(30);

pub fn ok<T: Serialize>(data: T) -> Json<Value> {
    Json(json!({ "success": true, "data": data }))
}

pub fn ok_with_message<T: Serialize>(data: T, message: &str) -> Json<Value> {
    Json(json!({ "success": true, "data": data, "message": message }))
}

/// Run one engine operation under the standard deadline. A timed-out
/// operation drops its future, which releases any single-flight slot it
/// held.
pub async fn with_deadline<T, F>(operation: F) -> ApiResult<T>
where
    F: Future<Output = ApiResult<T>>,
{
    match tokio::time::timeout(OPERATION_DEADLINE, operation).await {
        Ok(result) => result,
        Err(_) => Err(ApiError::deadline_exceeded()),
    }
}

/// Validate a `limit` query parameter into `1..=50`.
pub fn validate_limit(limit: i64) -> ApiResult<i64> {
    if (1..=50).contains(&limit) {
        Ok(limit)
    } else {
        Err(ApiError::invalid_params(format!("limit must be within 1..=50, got {}", limit)))
    }
}
