//! API error types shared by every handler and service.
//!
//! Every user-visible failure is an `ApiError` carrying an HTTP status, a
//! stable ASCII error code and a human-readable message. The JSON body always
//! follows the response envelope:
//! `{"success": false, "error": {"code": "...", "message": "..."}}`.

use axum::Json;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::store::StoreError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, thiserror::Error)]
#[error("{code}: {message}")]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self { status: StatusCode::BAD_REQUEST, code: "INVALID_PARAMS", message: message.into() }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self { status: StatusCode::NOT_FOUND, code: "NOT_FOUND", message: message.into() }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self { status: StatusCode::UNAUTHORIZED, code: "UNAUTHORIZED", message: message.into() }
    }

    pub fn db_error(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "DB_ERROR",
            message: message.into(),
        }
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "INTERNAL_ERROR",
            message: message.into(),
        }
    }

    /// A manual scan was requested while another run of the same kind holds
    /// the scan lock.
    pub fn scan_busy(message: impl Into<String>) -> Self {
        Self { status: StatusCode::CONFLICT, code: "SCAN_BUSY", message: message.into() }
    }

    /// An engine operation ran past its deadline; the single-flight slot has
    /// been released.
    pub fn deadline_exceeded() -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "DEADLINE_EXCEEDED",
            message: "operation deadline exceeded".to_string(),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        // The SQL text and driver details stay in the logs, never in the
        // response body.
        tracing::error!("gateway store error: {}", err);
        ApiError::db_error("database query failed")
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!("local store error: {}", err);
        ApiError::db_error("local storage query failed")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "success": false,
            "error": {
                "code": self.code,
                "message": self.message,
            },
        }));

        let mut response = (self.status, body).into_response();
        if self.status == StatusCode::UNAUTHORIZED {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, header::HeaderValue::from_static("Bearer"));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(ApiError::invalid_params("x").code, "INVALID_PARAMS");
        assert_eq!(ApiError::unauthorized("x").code, "UNAUTHORIZED");
        assert_eq!(ApiError::db_error("x").code, "DB_ERROR");
        assert_eq!(ApiError::scan_busy("x").status, StatusCode::CONFLICT);
    }
}
