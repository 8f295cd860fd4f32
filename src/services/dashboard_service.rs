//! Dashboard engine: overview, usage, model usage, top users, trends and
//! channel status, all read through the cache tier.
//!
//! Windows of 3d and longer use the incremental slot path: finalized hour
//! slots are computed once, cached forever, and merged with one freshly
//! computed live slot. Short windows run a single aggregate query under a
//! short TTL.

use chrono::TimeZone;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

use crate::cache::{CacheTier, dashboard_ttl, scaled_ttl};
use crate::models::gateway::{
    ChannelStatus, DailyTrend, HourlyTrend, ModelUsage, SystemOverview, UsageTotals, UserRanking,
};
use crate::services::scale_service::ScaleService;
use crate::store::{AuditStore, LogStore};
use crate::utils::{ApiError, ApiResult, Window, now_ts};

/// Slot blobs oversample to this many entries per dimension so the merged
/// top-K (K <= 50) stays exact with very high probability.
const SLOT_TOP_N: i64 = 100;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UsageReport {
    pub period: String,
    pub total_requests: i64,
    pub total_quota_used: i64,
    pub total_prompt_tokens: i64,
    pub total_completion_tokens: i64,
    pub average_response_time: f64,
}

pub struct DashboardService {
    log_store: Arc<LogStore>,
    cache: Arc<CacheTier>,
    audit: Arc<AuditStore>,
    scale: Arc<ScaleService>,
}

impl DashboardService {
    pub fn new(
        log_store: Arc<LogStore>,
        cache: Arc<CacheTier>,
        audit: Arc<AuditStore>,
        scale: Arc<ScaleService>,
    ) -> Self {
        Self { log_store, cache, audit, scale }
    }

    // -----------------------------------------------------------------------
    // Overview
    // -----------------------------------------------------------------------

    pub async fn system_overview(
        &self,
        window: Window,
        use_cache: bool,
    ) -> ApiResult<SystemOverview> {
        let key = format!("dashboard:overview:{}", window.as_str());
        if !use_cache {
            self.cache.delete(&key).await;
        }
        let ttl = dashboard_ttl(window, self.scale.current());
        let value = self
            .cache
            .get_or_compute(&key, ttl, || async {
                let overview = self.compute_overview(window).await?;
                let value = serde_json::to_value(&overview)
                    .map_err(|e| ApiError::internal_error(e.to_string()))?;
                let _ = self.audit.save_snapshot("overview", &value).await;
                Ok::<_, ApiError>(value)
            })
            .await?;
        decode(value)
    }

    async fn compute_overview(&self, window: Window) -> ApiResult<SystemOverview> {
        let end = now_ts();
        let start = end - window.seconds();

        let total_users = self.log_store.count_users_total().await?;
        let active_users = self.log_store.count_active_users(start, end).await?;
        let (total_tokens, _) = self.log_store.token_totals().await?;
        let active_tokens = self.log_store.count_active_tokens(start, end).await?;
        let (total_channels, active_channels) = self.log_store.channel_totals().await?;
        let total_models = self.log_store.count_models().await.unwrap_or(0);
        let (total_redemptions, unused_redemptions) = self.log_store.redemption_totals().await?;

        Ok(SystemOverview {
            total_users,
            active_users,
            total_tokens,
            active_tokens,
            total_channels,
            active_channels,
            total_models,
            total_redemptions,
            unused_redemptions,
            period: window.as_str().to_string(),
        })
    }

    // -----------------------------------------------------------------------
    // Usage statistics
    // -----------------------------------------------------------------------

    pub async fn usage_statistics(&self, window: Window, use_cache: bool) -> ApiResult<UsageReport> {
        let key = format!("dashboard:usage:{}", window.as_str());
        if !use_cache {
            self.cache.delete(&key).await;
        }
        let ttl = dashboard_ttl(window, self.scale.current());
        let value = self
            .cache
            .get_or_compute(&key, ttl, || async {
                let totals = if window.is_incremental() {
                    self.usage_incremental(window).await?
                } else {
                    let end = now_ts();
                    self.log_store
                        .usage_stats(end - window.seconds(), end)
                        .await?
                };
                let report = UsageReport {
                    period: window.as_str().to_string(),
                    total_requests: totals.total_requests,
                    total_quota_used: totals.total_quota_used,
                    total_prompt_tokens: totals.total_prompt_tokens,
                    total_completion_tokens: totals.total_completion_tokens,
                    average_response_time: totals.average_response_time,
                };
                serde_json::to_value(&report).map_err(|e| ApiError::internal_error(e.to_string()))
            })
            .await?;
        decode(value)
    }

    async fn usage_incremental(&self, window: Window) -> ApiResult<UsageTotals> {
        let now = now_ts();
        let state = self.cache.missing_slots("usage_stats", window, now).await;
        tracing::debug!(
            metric = "usage_stats",
            window = window.as_str(),
            cached = state.cached.len(),
            missing = state.missing.len(),
            "incremental slot state"
        );

        let mut parts: Vec<UsageTotals> = Vec::with_capacity(state.cached.len() + 2);
        for (_, value) in &state.cached {
            if let Ok(totals) = serde_json::from_value(value.clone()) {
                parts.push(totals);
            }
        }
        for span in state.missing {
            let totals = self.log_store.usage_stats(span.start, span.end).await?;
            let value = serde_json::to_value(&totals)
                .map_err(|e| ApiError::internal_error(e.to_string()))?;
            self.cache.set_slot("usage_stats", window, span, &value).await;
            parts.push(totals);
        }
        if let Some(live) = state.live {
            parts.push(self.log_store.usage_stats(live.start, live.end).await?);
        }
        Ok(merge_usage_slots(&parts))
    }

    // -----------------------------------------------------------------------
    // Model usage
    // -----------------------------------------------------------------------

    pub async fn model_usage(
        &self,
        window: Window,
        limit: i64,
        use_cache: bool,
    ) -> ApiResult<Vec<ModelUsage>> {
        let key = format!("dashboard:models:{}:{}", window.as_str(), limit);
        if !use_cache {
            self.cache.delete(&key).await;
        }
        let ttl = scaled_ttl(600, self.scale.current());
        let value = self
            .cache
            .get_or_compute(&key, ttl, || async {
                let models = if window.is_incremental() {
                    self.model_usage_incremental(window, limit).await?
                } else {
                    let end = now_ts();
                    self.log_store
                        .model_usage(end - window.seconds(), end, limit)
                        .await?
                };
                let value = serde_json::to_value(&models)
                    .map_err(|e| ApiError::internal_error(e.to_string()))?;
                let _ = self
                    .audit
                    .save_snapshot(
                        "models",
                        &serde_json::json!({ "period": window.as_str(), "models": value.clone() }),
                    )
                    .await;
                Ok::<_, ApiError>(value)
            })
            .await?;
        decode(value)
    }

    async fn model_usage_incremental(
        &self,
        window: Window,
        limit: i64,
    ) -> ApiResult<Vec<ModelUsage>> {
        let now = now_ts();
        let state = self.cache.missing_slots("model_usage", window, now).await;

        let mut slot_lists: Vec<Vec<ModelUsage>> = Vec::with_capacity(state.cached.len() + 2);
        for (_, value) in &state.cached {
            if let Ok(list) = serde_json::from_value(value.clone()) {
                slot_lists.push(list);
            }
        }
        for span in state.missing {
            let list = self
                .log_store
                .model_usage(span.start, span.end, SLOT_TOP_N)
                .await?;
            let value = serde_json::to_value(&list)
                .map_err(|e| ApiError::internal_error(e.to_string()))?;
            self.cache.set_slot("model_usage", window, span, &value).await;
            slot_lists.push(list);
        }
        if let Some(live) = state.live {
            slot_lists.push(self.log_store.model_usage(live.start, live.end, SLOT_TOP_N).await?);
        }
        Ok(merge_model_slots(slot_lists, limit as usize))
    }

    // -----------------------------------------------------------------------
    // Top users
    // -----------------------------------------------------------------------

    pub async fn top_users(
        &self,
        window: Window,
        limit: i64,
        use_cache: bool,
    ) -> ApiResult<Vec<UserRanking>> {
        let key = format!("dashboard:topusers:{}:{}", window.as_str(), limit);
        if !use_cache {
            self.cache.delete(&key).await;
        }
        let ttl = scaled_ttl(600, self.scale.current());
        let value = self
            .cache
            .get_or_compute(&key, ttl, || async {
                let users = if window.is_incremental() {
                    self.top_users_incremental(window, limit).await?
                } else {
                    let end = now_ts();
                    self.log_store
                        .top_users(end - window.seconds(), end, limit)
                        .await?
                };
                serde_json::to_value(&users).map_err(|e| ApiError::internal_error(e.to_string()))
            })
            .await?;
        decode(value)
    }

    async fn top_users_incremental(
        &self,
        window: Window,
        limit: i64,
    ) -> ApiResult<Vec<UserRanking>> {
        let now = now_ts();
        let state = self.cache.missing_slots("top_users", window, now).await;

        let mut slot_lists: Vec<Vec<UserRanking>> = Vec::with_capacity(state.cached.len() + 2);
        for (_, value) in &state.cached {
            if let Ok(list) = serde_json::from_value(value.clone()) {
                slot_lists.push(list);
            }
        }
        for span in state.missing {
            let list = self
                .log_store
                .top_users(span.start, span.end, SLOT_TOP_N)
                .await?;
            let value = serde_json::to_value(&list)
                .map_err(|e| ApiError::internal_error(e.to_string()))?;
            self.cache.set_slot("top_users", window, span, &value).await;
            slot_lists.push(list);
        }
        if let Some(live) = state.live {
            slot_lists.push(self.log_store.top_users(live.start, live.end, SLOT_TOP_N).await?);
        }
        Ok(merge_user_slots(slot_lists, limit as usize))
    }

    // -----------------------------------------------------------------------
    // Trends
    // -----------------------------------------------------------------------

    pub async fn daily_trends(&self, days: i64, use_cache: bool) -> ApiResult<Vec<DailyTrend>> {
        let key = format!("dashboard:trends:daily:{}", days);
        if !use_cache {
            self.cache.delete(&key).await;
        }
        let ttl = scaled_ttl(900, self.scale.current());
        let value = self
            .cache
            .get_or_compute(&key, ttl, || async {
                let trends = self.compute_daily_trends(days).await?;
                serde_json::to_value(&trends).map_err(|e| ApiError::internal_error(e.to_string()))
            })
            .await?;
        decode(value)
    }

    async fn compute_daily_trends(&self, days: i64) -> ApiResult<Vec<DailyTrend>> {
        // Bucket boundaries are local midnights; the range includes today,
        // so `days` back yields days + 1 rows.
        let today = chrono::Local::now().date_naive();
        let mut ranges = Vec::with_capacity(days as usize + 1);
        for i in (0..=days).rev() {
            let day = today - chrono::Duration::days(i);
            let next = day + chrono::Duration::days(1);
            ranges.push((
                day.format("%Y-%m-%d").to_string(),
                local_midnight_ts(day),
                local_midnight_ts(next),
            ));
        }

        let rows = self.log_store.daily_counts(&ranges).await?;
        let by_date: std::collections::HashMap<String, (i64, i64, i64)> = rows
            .into_iter()
            .map(|(date, requests, quota, users)| (date, (requests, quota, users)))
            .collect();

        Ok(ranges
            .into_iter()
            .map(|(date, _, _)| {
                let (request_count, quota_used, unique_users) =
                    by_date.get(&date).copied().unwrap_or((0, 0, 0));
                DailyTrend { date, request_count, quota_used, unique_users }
            })
            .collect())
    }

    pub async fn hourly_trends(&self, hours: i64, use_cache: bool) -> ApiResult<Vec<HourlyTrend>> {
        let key = format!("dashboard:trends:hourly:{}", hours);
        if !use_cache {
            self.cache.delete(&key).await;
        }
        let ttl = scaled_ttl(300, self.scale.current());
        let value = self
            .cache
            .get_or_compute(&key, ttl, || async {
                let trends = self.compute_hourly_trends(hours).await?;
                serde_json::to_value(&trends).map_err(|e| ApiError::internal_error(e.to_string()))
            })
            .await?;
        decode(value)
    }

    async fn compute_hourly_trends(&self, hours: i64) -> ApiResult<Vec<HourlyTrend>> {
        let end = now_ts();
        // Buckets are generated from floor(now/3600) going back `hours`
        // steps. A row landing exactly on an hour boundary can shift one
        // bucket relative to a naive `end - hours*3600` window; this mirrors
        // the upstream dashboard's bucketing on purpose.
        let current_hour = end / 3600 * 3600;
        let mut buckets = Vec::with_capacity(hours as usize);
        for i in (0..hours).rev() {
            buckets.push(current_hour - i * 3600);
        }
        let start = buckets[0];

        let rows = self.log_store.hourly_counts(start, end + 1).await?;
        let by_hour: std::collections::HashMap<i64, (i64, i64, i64)> = rows
            .into_iter()
            .map(|(ts, requests, quota, users)| (ts, (requests, quota, users)))
            .collect();

        Ok(buckets
            .into_iter()
            .map(|ts| {
                let (request_count, quota_used, unique_users) =
                    by_hour.get(&ts).copied().unwrap_or((0, 0, 0));
                HourlyTrend {
                    hour: hour_label(ts),
                    timestamp: ts,
                    request_count,
                    quota_used,
                    unique_users,
                }
            })
            .collect())
    }

    // -----------------------------------------------------------------------
    // Channels
    // -----------------------------------------------------------------------

    pub async fn channel_status(&self, use_cache: bool) -> ApiResult<Vec<ChannelStatus>> {
        let key = "dashboard:channels";
        if !use_cache {
            self.cache.delete(key).await;
        }
        let ttl = scaled_ttl(120, self.scale.current());
        let value = self
            .cache
            .get_or_compute(key, ttl, || async {
                let channels = self.log_store.channel_status().await?;
                serde_json::to_value(&channels)
                    .map_err(|e| ApiError::internal_error(e.to_string()))
            })
            .await?;
        decode(value)
    }

    /// Operator-triggered invalidation; defaults to the whole dashboard
    /// namespace.
    pub async fn invalidate(&self, prefix: Option<&str>) -> u64 {
        let prefix = prefix.unwrap_or("dashboard:");
        self.cache.clear_prefix(prefix).await
    }
}

fn decode<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> ApiResult<T> {
    serde_json::from_value(value)
        .map_err(|e| ApiError::internal_error(format!("cache blob decode failed: {}", e)))
}

fn local_midnight_ts(date: chrono::NaiveDate) -> i64 {
    let naive = date.and_hms_opt(0, 0, 0).expect("midnight is always valid");
    chrono::Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.timestamp())
        .unwrap_or_else(|| naive.and_utc().timestamp())
}

fn hour_label(ts: i64) -> String {
    chrono::Local
        .timestamp_opt(ts, 0)
        .single()
        .map(|dt| dt.format("%H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}

// ---------------------------------------------------------------------------
// Slot merge functions (metric-specific, pure)
// ---------------------------------------------------------------------------

pub fn merge_usage_slots(parts: &[UsageTotals]) -> UsageTotals {
    let mut merged = UsageTotals::default();
    let mut weighted_time = 0.0;
    for part in parts {
        merged.total_requests += part.total_requests;
        merged.total_quota_used += part.total_quota_used;
        merged.total_prompt_tokens += part.total_prompt_tokens;
        merged.total_completion_tokens += part.total_completion_tokens;
        weighted_time += part.average_response_time * part.total_requests as f64;
    }
    if merged.total_requests > 0 {
        merged.average_response_time = weighted_time / merged.total_requests as f64;
    }
    merged
}

pub fn merge_model_slots(slot_lists: Vec<Vec<ModelUsage>>, limit: usize) -> Vec<ModelUsage> {
    let mut by_model: std::collections::HashMap<String, ModelUsage> = std::collections::HashMap::new();
    for list in slot_lists {
        for item in list {
            let entry = by_model
                .entry(item.model_name.clone())
                .or_insert_with(|| ModelUsage {
                    model_name: item.model_name.clone(),
                    request_count: 0,
                    quota_used: 0,
                    prompt_tokens: 0,
                    completion_tokens: 0,
                });
            entry.request_count += item.request_count;
            entry.quota_used += item.quota_used;
            entry.prompt_tokens += item.prompt_tokens;
            entry.completion_tokens += item.completion_tokens;
        }
    }
    let mut merged: Vec<ModelUsage> = by_model.into_values().collect();
    merged.sort_by(|a, b| {
        b.request_count
            .cmp(&a.request_count)
            .then(b.quota_used.cmp(&a.quota_used))
            .then(a.model_name.cmp(&b.model_name))
    });
    merged.truncate(limit);
    merged
}

pub fn merge_user_slots(slot_lists: Vec<Vec<UserRanking>>, limit: usize) -> Vec<UserRanking> {
    let mut by_user: std::collections::HashMap<i64, UserRanking> = std::collections::HashMap::new();
    for list in slot_lists {
        for item in list {
            let entry = by_user.entry(item.user_id).or_insert_with(|| UserRanking {
                user_id: item.user_id,
                username: item.username.clone(),
                request_count: 0,
                quota_used: 0,
            });
            entry.request_count += item.request_count;
            entry.quota_used += item.quota_used;
            if entry.username.is_empty() {
                entry.username = item.username;
            }
        }
    }
    let mut merged: Vec<UserRanking> = by_user.into_values().collect();
    merged.sort_by(|a, b| {
        b.quota_used
            .cmp(&a.quota_used)
            .then(b.request_count.cmp(&a.request_count))
            .then(a.user_id.cmp(&b.user_id))
    });
    merged.truncate(limit);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_merge_sums_counters_and_weights_latency() {
        let a = UsageTotals {
            total_requests: 100,
            total_quota_used: 200,
            total_prompt_tokens: 1000,
            total_completion_tokens: 500,
            average_response_time: 100.0,
        };
        let b = UsageTotals {
            total_requests: 300,
            total_quota_used: 100,
            total_prompt_tokens: 0,
            total_completion_tokens: 0,
            average_response_time: 200.0,
        };
        let merged = merge_usage_slots(&[a, b]);
        assert_eq!(merged.total_requests, 400);
        assert_eq!(merged.total_quota_used, 300);
        assert_eq!(merged.total_prompt_tokens, 1000);
        assert!((merged.average_response_time - 175.0).abs() < f64::EPSILON);
    }

    #[test]
    fn empty_usage_merge_is_zero() {
        let merged = merge_usage_slots(&[]);
        assert_eq!(merged.total_requests, 0);
        assert_eq!(merged.average_response_time, 0.0);
    }

    fn model(name: &str, requests: i64, quota: i64) -> ModelUsage {
        ModelUsage {
            model_name: name.to_string(),
            request_count: requests,
            quota_used: quota,
            prompt_tokens: 0,
            completion_tokens: 0,
        }
    }

    #[test]
    fn model_merge_unions_and_reranks() {
        let merged = merge_model_slots(
            vec![
                vec![model("gpt-4o", 10, 100), model("claude", 8, 50)],
                vec![model("claude", 20, 10), model("gemini", 5, 5)],
            ],
            2,
        );
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].model_name, "claude");
        assert_eq!(merged[0].request_count, 28);
        assert_eq!(merged[1].model_name, "gpt-4o");
    }

    #[test]
    fn model_merge_tie_breaks_by_quota_then_name() {
        let merged = merge_model_slots(
            vec![vec![model("b", 10, 5), model("a", 10, 5), model("c", 10, 9)]],
            3,
        );
        assert_eq!(merged[0].model_name, "c");
        assert_eq!(merged[1].model_name, "a");
        assert_eq!(merged[2].model_name, "b");
    }

    fn user(id: i64, requests: i64, quota: i64) -> UserRanking {
        UserRanking {
            user_id: id,
            username: format!("u{}", id),
            request_count: requests,
            quota_used: quota,
        }
    }

    #[test]
    fn user_merge_dedupes_across_slots() {
        let merged = merge_user_slots(
            vec![vec![user(1, 10, 50), user(2, 5, 80)], vec![user(1, 10, 40)]],
            10,
        );
        assert_eq!(merged[0].user_id, 1);
        assert_eq!(merged[0].quota_used, 90);
        assert_eq!(merged[0].request_count, 20);
        assert_eq!(merged[1].user_id, 2);
    }
}
