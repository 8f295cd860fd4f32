//! Authentication middleware: a configured `X-API-Key` header OR a bearer
//! JWT (HS256, subject `admin`). Health probes and the login endpoint are
//! mounted outside this layer.

use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

use crate::utils::{ApiError, JwtUtil};

#[derive(Clone)]
pub struct AuthState {
    pub api_key: String,
    pub jwt_util: Arc<JwtUtil>,
}

/// The authenticated principal, inserted into request extensions.
#[derive(Clone, Debug)]
pub struct AuthContext {
    pub method: AuthMethod,
    pub subject: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthMethod {
    ApiKey,
    Jwt,
}

pub async fn auth_middleware(
    State(state): State<AuthState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    // API key first: cheap and the common path for automation.
    if let Some(provided) = req
        .headers()
        .get("x-api-key")
        .and_then(|value| value.to_str().ok())
    {
        if !state.api_key.is_empty() && provided == state.api_key {
            req.extensions_mut().insert(AuthContext {
                method: AuthMethod::ApiKey,
                subject: "api_key".to_string(),
            });
            return Ok(next.run(req).await);
        }
        tracing::warn!("invalid API key for {} {}", method, path);
        return Err(ApiError::unauthorized("Invalid API key"));
    }

    if let Some(auth_header) = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
    {
        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or_else(|| ApiError::unauthorized("Invalid authorization header format"))?;
        let claims = state.jwt_util.verify_token(token).map_err(|err| {
            tracing::warn!("JWT verification failed for {} {}", method, path);
            err
        })?;
        req.extensions_mut()
            .insert(AuthContext { method: AuthMethod::Jwt, subject: claims.sub });
        return Ok(next.run(req).await);
    }

    tracing::warn!("missing authentication for {} {}", method, path);
    Err(ApiError::unauthorized("Authentication required (API Key or JWT Token)"))
}
