//! Risk monitoring endpoints: leaderboards, per-user analysis, the six
//! detectors and the moderation record surfaces.

use axum::response::IntoResponse;
use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::AppState;
use crate::handlers::response::{ok, ok_with_message, validate_limit, with_deadline};
use crate::store::LeaderboardSort;
use crate::utils::{ApiError, ApiResult, RISK_WINDOWS, Window, parse_window};

fn truthy(flag: &Option<String>) -> bool {
    matches!(flag.as_deref(), Some("1") | Some("true"))
}

fn risk_window(name: &str) -> ApiResult<Window> {
    parse_window(name, RISK_WINDOWS)
        .ok_or_else(|| ApiError::invalid_params(format!("invalid window: {}", name)))
}

#[derive(Debug, Deserialize)]
pub struct LeaderboardsQuery {
    pub windows: Option<String>,
    pub limit: Option<i64>,
    pub sort_by: Option<String>,
    pub no_cache: Option<String>,
}

/// GET /api/risk/leaderboards?windows=csv&limit=1..50&sort_by=...
#[utoipa::path(
    get,
    path = "/api/risk/leaderboards",
    params(
        ("windows" = Option<String>, Query, description = "comma separated windows"),
        ("limit" = Option<i64>, Query, description = "1..=50"),
        ("sort_by" = Option<String>, Query, description = "requests|quota|failure_rate"),
    ),
    responses((status = 200, description = "One ranked list per window")),
    tag = "Risk"
)]
pub async fn leaderboards(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LeaderboardsQuery>,
) -> ApiResult<impl IntoResponse> {
    let limit = validate_limit(query.limit.unwrap_or(10))? as usize;
    let sort_name = query.sort_by.as_deref().unwrap_or("requests");
    let sort = LeaderboardSort::parse(sort_name)
        .ok_or_else(|| ApiError::invalid_params(format!("invalid sort_by: {}", sort_name)))?;

    let raw = query.windows.as_deref().unwrap_or("1h,3h,6h,12h,24h");
    let mut windows = Vec::new();
    for name in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        windows.push(risk_window(name)?);
    }
    if windows.is_empty() {
        return Err(ApiError::invalid_params("no windows requested"));
    }

    let data = with_deadline(state.risk_service.leaderboards(
        &windows,
        limit,
        sort,
        !truthy(&query.no_cache),
    ))
    .await?;
    Ok(ok(data))
}

#[derive(Debug, Deserialize)]
pub struct AnalysisQuery {
    pub window: Option<String>,
    pub end_time: Option<i64>,
}

/// GET /api/risk/users/{id}/analysis?window=..&end_time=..
#[utoipa::path(
    get,
    path = "/api/risk/users/{id}/analysis",
    params(
        ("id" = i64, Path, description = "user id"),
        ("window" = Option<String>, Query, description = "analysis window"),
        ("end_time" = Option<i64>, Query, description = "historical end time (unix seconds)"),
    ),
    responses((status = 200, description = "Per-user behavior analysis")),
    tag = "Risk"
)]
pub async fn user_analysis(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i64>,
    Query(query): Query<AnalysisQuery>,
) -> ApiResult<impl IntoResponse> {
    let window = risk_window(query.window.as_deref().unwrap_or("24h"))?;
    let data =
        with_deadline(state.risk_service.user_analysis(user_id, window, query.end_time)).await?;
    Ok(ok(data))
}

/// GET /api/risk/users/{id}/ips: every IP a user was seen from in the
/// window (the analysis record carries only the top 10).
pub async fn user_ips(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i64>,
    Query(query): Query<AnalysisQuery>,
) -> ApiResult<impl IntoResponse> {
    let window = risk_window(query.window.as_deref().unwrap_or("24h"))?;
    let now = crate::utils::now_ts();
    let end = query.end_time.map(|t| t.min(now)).unwrap_or(now);
    let ips = with_deadline(async {
        state
            .log_store
            .user_ips(user_id, end - window.seconds(), end, 1000)
            .await
            .map_err(ApiError::from)
    })
    .await?;
    Ok(ok(ips))
}

/// GET /api/risk/users/{id}/ban-record: most recent ban entry for one user.
pub async fn latest_ban_record(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let record = state.risk_service.latest_ban_record(user_id).await?;
    Ok(ok(record))
}

#[derive(Debug, Deserialize)]
pub struct BanRecordsQuery {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
    pub action: Option<String>,
    pub user_id: Option<i64>,
}

/// GET /api/risk/ban-records
pub async fn ban_records(
    State(state): State<Arc<AppState>>,
    Query(query): Query<BanRecordsQuery>,
) -> ApiResult<impl IntoResponse> {
    if let Some(action) = query.action.as_deref()
        && action != "ban"
        && action != "unban"
    {
        return Err(ApiError::invalid_params(format!("invalid action: {}", action)));
    }
    let page = state
        .audit_store
        .list_security_audits(
            query.page.unwrap_or(1),
            query.page_size.unwrap_or(50),
            query.action.as_deref(),
            query.user_id,
        )
        .await?;
    Ok(ok(page))
}

// ---------------------------------------------------------------------------
// Detectors
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct SharedIpsQuery {
    pub window: Option<String>,
    pub min_tokens: Option<i64>,
    pub limit: Option<i64>,
    pub no_cache: Option<String>,
}

/// GET /api/risk/shared-ips
pub async fn shared_ips(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SharedIpsQuery>,
) -> ApiResult<impl IntoResponse> {
    let window = risk_window(query.window.as_deref().unwrap_or("24h"))?;
    let min_tokens = query.min_tokens.unwrap_or(2);
    if !(2..=50).contains(&min_tokens) {
        return Err(ApiError::invalid_params("min_tokens must be within 2..=50"));
    }
    let limit = validate_limit(query.limit.unwrap_or(50))?;
    let data = with_deadline(state.risk_service.shared_ips(
        window,
        min_tokens,
        limit,
        !truthy(&query.no_cache),
    ))
    .await?;
    Ok(ok(data))
}

#[derive(Debug, Deserialize)]
pub struct MultiIpQuery {
    pub window: Option<String>,
    pub min_ips: Option<i64>,
    pub limit: Option<i64>,
    pub no_cache: Option<String>,
}

/// GET /api/risk/multi-ip-tokens
pub async fn multi_ip_tokens(
    State(state): State<Arc<AppState>>,
    Query(query): Query<MultiIpQuery>,
) -> ApiResult<impl IntoResponse> {
    let window = risk_window(query.window.as_deref().unwrap_or("24h"))?;
    let min_ips = query.min_ips.unwrap_or(2);
    if !(2..=50).contains(&min_ips) {
        return Err(ApiError::invalid_params("min_ips must be within 2..=50"));
    }
    let limit = validate_limit(query.limit.unwrap_or(50))?;
    let data = with_deadline(state.risk_service.multi_ip_tokens(
        window,
        min_ips,
        limit,
        !truthy(&query.no_cache),
    ))
    .await?;
    Ok(ok(data))
}

/// GET /api/risk/multi-ip-users
pub async fn multi_ip_users(
    State(state): State<Arc<AppState>>,
    Query(query): Query<MultiIpQuery>,
) -> ApiResult<impl IntoResponse> {
    let window = risk_window(query.window.as_deref().unwrap_or("24h"))?;
    let min_ips = query.min_ips.unwrap_or(3);
    if !(2..=50).contains(&min_ips) {
        return Err(ApiError::invalid_params("min_ips must be within 2..=50"));
    }
    let limit = validate_limit(query.limit.unwrap_or(50))?;
    let data = with_deadline(state.risk_service.multi_ip_users(
        window,
        min_ips,
        limit,
        !truthy(&query.no_cache),
    ))
    .await?;
    Ok(ok(data))
}

#[derive(Debug, Deserialize)]
pub struct TokenRotationQuery {
    pub window: Option<String>,
    pub min_tokens: Option<i64>,
    pub max_requests_per_token: Option<i64>,
    pub limit: Option<i64>,
    pub no_cache: Option<String>,
}

/// GET /api/risk/token-rotation
pub async fn token_rotation(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TokenRotationQuery>,
) -> ApiResult<impl IntoResponse> {
    let window = risk_window(query.window.as_deref().unwrap_or("24h"))?;
    let min_tokens = query.min_tokens.unwrap_or(5);
    if !(2..=50).contains(&min_tokens) {
        return Err(ApiError::invalid_params("min_tokens must be within 2..=50"));
    }
    let max_per_token = query.max_requests_per_token.unwrap_or(10);
    if !(1..=100).contains(&max_per_token) {
        return Err(ApiError::invalid_params("max_requests_per_token must be within 1..=100"));
    }
    let limit = validate_limit(query.limit.unwrap_or(50))?;
    let data = with_deadline(state.risk_service.token_rotation(
        window,
        min_tokens,
        max_per_token,
        limit,
        !truthy(&query.no_cache),
    ))
    .await?;
    Ok(ok(data))
}

#[derive(Debug, Deserialize)]
pub struct AffiliatedQuery {
    pub min_invited: Option<i64>,
    pub include_activity: Option<bool>,
    pub limit: Option<i64>,
    pub no_cache: Option<String>,
}

/// GET /api/risk/affiliated-accounts
pub async fn affiliated_accounts(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AffiliatedQuery>,
) -> ApiResult<impl IntoResponse> {
    let min_invited = query.min_invited.unwrap_or(3);
    if !(2..=50).contains(&min_invited) {
        return Err(ApiError::invalid_params("min_invited must be within 2..=50"));
    }
    let limit = validate_limit(query.limit.unwrap_or(50))?;
    let data = with_deadline(state.risk_service.affiliated_accounts(
        min_invited,
        query.include_activity.unwrap_or(true),
        limit,
        !truthy(&query.no_cache),
    ))
    .await?;
    Ok(ok(data))
}

#[derive(Debug, Deserialize)]
pub struct SameIpQuery {
    pub window: Option<String>,
    pub min_users: Option<i64>,
    pub limit: Option<i64>,
    pub no_cache: Option<String>,
}

/// GET /api/risk/same-ip-registrations
pub async fn same_ip_registrations(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SameIpQuery>,
) -> ApiResult<impl IntoResponse> {
    let window = risk_window(query.window.as_deref().unwrap_or("7d"))?;
    let min_users = query.min_users.unwrap_or(3);
    if !(2..=50).contains(&min_users) {
        return Err(ApiError::invalid_params("min_users must be within 2..=50"));
    }
    let limit = validate_limit(query.limit.unwrap_or(50))?;
    let data = with_deadline(state.risk_service.same_ip_registrations(
        window,
        min_users,
        limit,
        !truthy(&query.no_cache),
    ))
    .await?;
    Ok(ok(data))
}

// ---------------------------------------------------------------------------
// IP surfaces
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct IpLookupQuery {
    pub window: Option<String>,
    pub no_cache: Option<String>,
}

/// GET /api/risk/ip/{ip}/users: who used this IP.
pub async fn ip_users(
    State(state): State<Arc<AppState>>,
    Path(ip): Path<String>,
    Query(query): Query<IpLookupQuery>,
) -> ApiResult<impl IntoResponse> {
    if ip.trim().is_empty() {
        return Err(ApiError::invalid_params("ip must not be empty"));
    }
    let window = risk_window(query.window.as_deref().unwrap_or("24h"))?;
    let data =
        with_deadline(state.risk_service.ip_lookup(&ip, window, !truthy(&query.no_cache))).await?;
    Ok(ok(data))
}

/// GET /api/risk/ip-stats: IP-recording adoption counters.
pub async fn ip_stats(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    let data = with_deadline(state.risk_service.ip_recording_stats(true)).await?;
    Ok(ok(data))
}

/// POST /api/risk/ip-recording/enable-all
pub async fn enable_all_ip_recording(
    State(state): State<Arc<AppState>>,
) -> ApiResult<impl IntoResponse> {
    let updated = state.writer.enable_all_ip_recording("admin").await?;
    Ok(ok_with_message(
        json!({ "updated_count": updated }),
        "已为全部用户开启 IP 记录 / IP recording enabled for all users",
    ))
}

// ---------------------------------------------------------------------------
// Manual moderation
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct BanRequest {
    pub reason: Option<String>,
    #[serde(default = "default_true")]
    pub disable_tokens: bool,
}

fn default_true() -> bool {
    true
}

/// POST /api/risk/users/{id}/ban
pub async fn ban_user(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i64>,
    body: Option<Json<BanRequest>>,
) -> ApiResult<impl IntoResponse> {
    let request = body.map(|Json(b)| b).unwrap_or(BanRequest {
        reason: None,
        disable_tokens: true,
    });
    let reason = request.reason.unwrap_or_else(|| "manual ban".to_string());
    state
        .writer
        .ban_user(user_id, &reason, request.disable_tokens, "admin", json!({"source": "manual"}))
        .await?;
    Ok(ok_with_message(json!({ "user_id": user_id }), "用户已封禁 / user banned"))
}

#[derive(Debug, Deserialize)]
pub struct UnbanRequest {
    pub reason: Option<String>,
}

/// POST /api/risk/users/{id}/unban
pub async fn unban_user(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i64>,
    body: Option<Json<UnbanRequest>>,
) -> ApiResult<impl IntoResponse> {
    let reason = body
        .and_then(|Json(b)| b.reason)
        .unwrap_or_else(|| "manual unban".to_string());
    state.writer.unban_user(user_id, "admin", &reason).await?;
    Ok(ok_with_message(json!({ "user_id": user_id }), "用户已解封 / user unbanned"))
}
