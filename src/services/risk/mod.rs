//! Risk detection engine: per-user behavior analysis, leaderboards and the
//! six abuse detectors.

pub mod analyzer;
pub mod merge;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use utoipa::ToSchema;

use crate::cache::{CacheTier, detector_ttl};
use crate::geo::GeoService;
use crate::models::behavior::{LeaderboardEntry, RiskFlag, RiskSection, UserBehavior};
use crate::models::gateway::{
    AffiliatedInviter, DetectorPage, InvitedUser, IpUserUsage, ModelCount, MultiIpToken,
    MultiIpUser, SameIpRegistration, SharedIp, TokenRotationUser,
};
use crate::services::scale_service::ScaleService;
use crate::store::{AuditStore, LeaderboardSort, LogStore};
use crate::utils::{ApiError, ApiResult, Window, now_ts};

const TOP_K: usize = 10;
const LEADERBOARD_DEPTH: i64 = 50;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LeaderboardsReport {
    pub windows: HashMap<String, Vec<LeaderboardEntry>>,
    pub sort_by: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct IpLookupReport {
    pub ip: String,
    pub window: String,
    pub total_requests: i64,
    pub unique_users: i64,
    pub unique_tokens: i64,
    pub items: Vec<IpUserUsage>,
    pub models: Vec<ModelCount>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct IpRecordingStats {
    pub total_users: i64,
    pub enabled_count: i64,
    pub disabled_count: i64,
    pub enabled_percentage: f64,
    pub unique_ips_24h: i64,
}

pub struct RiskService {
    log_store: Arc<LogStore>,
    cache: Arc<CacheTier>,
    geo: Arc<GeoService>,
    audit: Arc<AuditStore>,
    scale: Arc<ScaleService>,
}

impl RiskService {
    pub fn new(
        log_store: Arc<LogStore>,
        cache: Arc<CacheTier>,
        geo: Arc<GeoService>,
        audit: Arc<AuditStore>,
        scale: Arc<ScaleService>,
    ) -> Self {
        Self { log_store, cache, geo, audit, scale }
    }

    /// The most recent ban audit row for one user; the moderation UI shows
    /// it next to the analysis.
    pub async fn latest_ban_record(
        &self,
        user_id: i64,
    ) -> ApiResult<Option<crate::store::audit_store::SecurityAuditEntry>> {
        Ok(self.audit.latest_ban_record(user_id).await?)
    }

    // -----------------------------------------------------------------------
    // Per-user analysis
    // -----------------------------------------------------------------------

    /// Analyze one user's behavior over `[end_time - window, end_time)`.
    /// A future `end_time` is clamped to now.
    pub async fn user_analysis(
        &self,
        user_id: i64,
        window: Window,
        end_time: Option<i64>,
    ) -> ApiResult<UserBehavior> {
        let now = now_ts();
        let end = end_time.map(|t| t.min(now)).unwrap_or(now);
        let start = end - window.seconds();

        let user = self
            .log_store
            .user_row(user_id)
            .await?
            .ok_or_else(|| ApiError::not_found(format!("user {} not found", user_id)))?;

        let rows = self.log_store.user_logs_in_window(user_id, start, end).await?;

        let distinct_ips: Vec<String> = {
            let mut seen = std::collections::HashSet::new();
            rows.iter()
                .filter(|r| !r.ip.is_empty() && seen.insert(r.ip.clone()))
                .map(|r| r.ip.clone())
                .collect()
        };
        let geo = self.geo.lookup_batch(&distinct_ips).await;

        let summary = analyzer::summarize(&rows);
        let switches = analyzer::analyze_ip_switches(&rows, &geo);
        let risk_flags = analyzer::derive_flags(&summary, &switches);

        Ok(UserBehavior {
            user: crate::models::behavior::BehaviorUser {
                id: user.id,
                username: user.username,
                display_name: user.display_name,
                group: user.group,
                role: user.role,
                status: user.status,
            },
            window: window.as_str().to_string(),
            end_time: end,
            summary,
            risk: RiskSection { risk_flags, ip_switch_analysis: switches },
            top_ips: analyzer::top_ips(&rows, TOP_K),
            top_models: analyzer::top_models(&rows, TOP_K),
            top_groups: analyzer::top_groups(&rows, TOP_K),
            ips: analyzer::ip_usage(&rows, TOP_K),
        })
    }

    // -----------------------------------------------------------------------
    // Leaderboards
    // -----------------------------------------------------------------------

    pub async fn leaderboards(
        &self,
        windows: &[Window],
        limit: usize,
        sort_by: LeaderboardSort,
        use_cache: bool,
    ) -> ApiResult<LeaderboardsReport> {
        let sort_name = match sort_by {
            LeaderboardSort::Requests => "requests",
            LeaderboardSort::Quota => "quota",
            LeaderboardSort::FailureRate => "failure_rate",
        };

        let mut out = HashMap::with_capacity(windows.len());
        for window in windows {
            let key = format!("risk:lb:{}:{}", window.as_str(), sort_name);
            if !use_cache {
                self.cache.delete(&key).await;
            }
            let ttl = detector_ttl(self.scale.current()).min(120);
            let value = self
                .cache
                .get_or_compute(&key, ttl, || async {
                    let entries = self.compute_leaderboard(*window, sort_by).await?;
                    serde_json::to_value(&entries)
                        .map_err(|e| ApiError::internal_error(e.to_string()))
                })
                .await?;
            let mut entries: Vec<LeaderboardEntry> = serde_json::from_value(value)
                .map_err(|e| ApiError::internal_error(e.to_string()))?;
            entries.truncate(limit);
            out.insert(window.as_str().to_string(), entries);
        }

        Ok(LeaderboardsReport { windows: out, sort_by: sort_name.to_string() })
    }

    async fn compute_leaderboard(
        &self,
        window: Window,
        sort_by: LeaderboardSort,
    ) -> ApiResult<Vec<LeaderboardEntry>> {
        let end = now_ts();
        let rows = self
            .log_store
            .leaderboard(end - window.seconds(), end, sort_by, LEADERBOARD_DEPTH)
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| {
                // Only the cheap flag is attached here; the full switch
                // analysis is per-user and on demand.
                let mut risk_flags = Vec::new();
                if row.unique_ips >= 10 {
                    risk_flags.push(RiskFlag::ManyIps);
                }
                let failure_rate = if row.request_count > 0 {
                    (row.failure_count as f64 / row.request_count as f64 * 10000.0).round()
                        / 10000.0
                } else {
                    0.0
                };
                LeaderboardEntry {
                    user_id: row.user_id,
                    username: row.username,
                    request_count: row.request_count,
                    success_count: row.success_count,
                    failure_count: row.failure_count,
                    failure_rate,
                    quota_used: row.quota_used,
                    unique_ips: row.unique_ips,
                    unique_tokens: row.unique_tokens,
                    unique_models: row.unique_models,
                    risk_flags,
                }
            })
            .collect())
    }

    // -----------------------------------------------------------------------
    // Detectors
    // -----------------------------------------------------------------------

    pub async fn shared_ips(
        &self,
        window: Window,
        min_tokens: i64,
        limit: i64,
        use_cache: bool,
    ) -> ApiResult<DetectorPage<SharedIp>> {
        let key = format!("risk:shared_ips:{}:{}:{}", window.as_str(), min_tokens, limit);
        if !use_cache {
            self.cache.delete(&key).await;
        }
        let ttl = detector_ttl(self.scale.current());
        let value = self
            .cache
            .get_or_compute(&key, ttl, || async {
                let items = if window.is_incremental() {
                    self.shared_ips_incremental(window, min_tokens, limit).await?
                } else {
                    let end = now_ts();
                    self.log_store
                        .shared_ips(end - window.seconds(), end, min_tokens, limit)
                        .await?
                };
                serde_json::to_value(&items).map_err(|e| ApiError::internal_error(e.to_string()))
            })
            .await?;
        let items: Vec<SharedIp> =
            serde_json::from_value(value).map_err(|e| ApiError::internal_error(e.to_string()))?;
        Ok(DetectorPage::new(items))
    }

    async fn shared_ips_incremental(
        &self,
        window: Window,
        min_tokens: i64,
        limit: i64,
    ) -> ApiResult<Vec<SharedIp>> {
        let now = now_ts();
        let state = self.cache.missing_slots("shared_ips", window, now).await;

        let mut slot_lists = Vec::with_capacity(state.cached.len() + 2);
        for (_, value) in &state.cached {
            if let Ok(list) = serde_json::from_value(value.clone()) {
                slot_lists.push(list);
            }
        }
        for span in state.missing {
            let list = self
                .log_store
                .shared_ips_slot(span.start, span.end, min_tokens)
                .await?;
            if let Ok(value) = serde_json::to_value(&list) {
                self.cache.set_slot("shared_ips", window, span, &value).await;
            }
            slot_lists.push(list);
        }
        if let Some(live) = state.live {
            slot_lists.push(self.log_store.shared_ips_slot(live.start, live.end, min_tokens).await?);
        }

        let mut items = merge::merge_shared_ip_slots(slot_lists, min_tokens, limit as usize);

        // Phase 2: top-10 token detail for the surviving candidates, one
        // batched query over the effective window.
        let ips: Vec<String> = items.iter().map(|i| i.ip.clone()).collect();
        let detail = self
            .log_store
            .shared_ip_details(&ips, state.window_start, now)
            .await?;
        for item in &mut items {
            if let Some(tokens) = detail.get(&item.ip) {
                item.tokens = tokens.clone();
            }
        }
        Ok(items)
    }

    pub async fn multi_ip_tokens(
        &self,
        window: Window,
        min_ips: i64,
        limit: i64,
        use_cache: bool,
    ) -> ApiResult<DetectorPage<MultiIpToken>> {
        let key = format!("risk:multi_ip_tokens:{}:{}:{}", window.as_str(), min_ips, limit);
        if !use_cache {
            self.cache.delete(&key).await;
        }
        let ttl = detector_ttl(self.scale.current());
        let value = self
            .cache
            .get_or_compute(&key, ttl, || async {
                let items = if window.is_incremental() {
                    self.multi_ip_tokens_incremental(window, min_ips, limit).await?
                } else {
                    let end = now_ts();
                    self.log_store
                        .multi_ip_tokens(end - window.seconds(), end, min_ips, limit)
                        .await?
                };
                serde_json::to_value(&items).map_err(|e| ApiError::internal_error(e.to_string()))
            })
            .await?;
        let items: Vec<MultiIpToken> =
            serde_json::from_value(value).map_err(|e| ApiError::internal_error(e.to_string()))?;
        Ok(DetectorPage::new(items))
    }

    async fn multi_ip_tokens_incremental(
        &self,
        window: Window,
        min_ips: i64,
        limit: i64,
    ) -> ApiResult<Vec<MultiIpToken>> {
        let now = now_ts();
        let state = self.cache.missing_slots("multi_ip_tokens", window, now).await;

        let mut slot_lists = Vec::with_capacity(state.cached.len() + 2);
        for (_, value) in &state.cached {
            if let Ok(list) = serde_json::from_value(value.clone()) {
                slot_lists.push(list);
            }
        }
        for span in state.missing {
            let list = self
                .log_store
                .multi_ip_tokens_slot(span.start, span.end, min_ips)
                .await?;
            if let Ok(value) = serde_json::to_value(&list) {
                self.cache.set_slot("multi_ip_tokens", window, span, &value).await;
            }
            slot_lists.push(list);
        }
        if let Some(live) = state.live {
            slot_lists
                .push(self.log_store.multi_ip_tokens_slot(live.start, live.end, min_ips).await?);
        }

        let mut items = merge::merge_multi_ip_token_slots(slot_lists, min_ips, limit as usize);

        let token_ids: Vec<i64> = items.iter().map(|i| i.token_id).collect();
        let detail = self
            .log_store
            .token_ip_details(&token_ids, state.window_start, now)
            .await?;
        for item in &mut items {
            if let Some(ips) = detail.get(&item.token_id) {
                item.ips = ips.clone();
            }
        }
        Ok(items)
    }

    pub async fn multi_ip_users(
        &self,
        window: Window,
        min_ips: i64,
        limit: i64,
        use_cache: bool,
    ) -> ApiResult<DetectorPage<MultiIpUser>> {
        let key = format!("risk:multi_ip_users:{}:{}:{}", window.as_str(), min_ips, limit);
        if !use_cache {
            self.cache.delete(&key).await;
        }
        let ttl = detector_ttl(self.scale.current());
        let value = self
            .cache
            .get_or_compute(&key, ttl, || async {
                let items = if window.is_incremental() {
                    self.multi_ip_users_incremental(window, min_ips, limit).await?
                } else {
                    let end = now_ts();
                    self.log_store
                        .multi_ip_users(end - window.seconds(), end, min_ips, limit)
                        .await?
                };
                serde_json::to_value(&items).map_err(|e| ApiError::internal_error(e.to_string()))
            })
            .await?;
        let items: Vec<MultiIpUser> =
            serde_json::from_value(value).map_err(|e| ApiError::internal_error(e.to_string()))?;
        Ok(DetectorPage::new(items))
    }

    async fn multi_ip_users_incremental(
        &self,
        window: Window,
        min_ips: i64,
        limit: i64,
    ) -> ApiResult<Vec<MultiIpUser>> {
        let now = now_ts();
        let state = self.cache.missing_slots("multi_ip_users", window, now).await;

        let mut slot_lists = Vec::with_capacity(state.cached.len() + 2);
        for (_, value) in &state.cached {
            if let Ok(list) = serde_json::from_value(value.clone()) {
                slot_lists.push(list);
            }
        }
        for span in state.missing {
            let list = self
                .log_store
                .multi_ip_users_slot(span.start, span.end, min_ips)
                .await?;
            if let Ok(value) = serde_json::to_value(&list) {
                self.cache.set_slot("multi_ip_users", window, span, &value).await;
            }
            slot_lists.push(list);
        }
        if let Some(live) = state.live {
            slot_lists
                .push(self.log_store.multi_ip_users_slot(live.start, live.end, min_ips).await?);
        }

        let mut items = merge::merge_multi_ip_user_slots(slot_lists, min_ips, limit as usize);

        let user_ids: Vec<i64> = items.iter().map(|i| i.user_id).collect();
        let detail = self
            .log_store
            .user_ip_details(&user_ids, state.window_start, now)
            .await?;
        for item in &mut items {
            if let Some(ips) = detail.get(&item.user_id) {
                item.top_ips = ips.clone();
            }
        }
        Ok(items)
    }

    pub async fn token_rotation(
        &self,
        window: Window,
        min_tokens: i64,
        max_per_token: i64,
        limit: i64,
        use_cache: bool,
    ) -> ApiResult<DetectorPage<TokenRotationUser>> {
        let key = format!(
            "risk:token_rotation:{}:{}:{}:{}",
            window.as_str(),
            min_tokens,
            max_per_token,
            limit
        );
        if !use_cache {
            self.cache.delete(&key).await;
        }
        let ttl = detector_ttl(self.scale.current());
        let value = self
            .cache
            .get_or_compute(&key, ttl, || async {
                let end = now_ts();
                let items = self
                    .log_store
                    .token_rotation(
                        end - window.seconds(),
                        end,
                        min_tokens,
                        max_per_token as f64,
                        limit,
                    )
                    .await?;
                serde_json::to_value(&items).map_err(|e| ApiError::internal_error(e.to_string()))
            })
            .await?;
        let items: Vec<TokenRotationUser> =
            serde_json::from_value(value).map_err(|e| ApiError::internal_error(e.to_string()))?;
        Ok(DetectorPage::new(items))
    }

    pub async fn affiliated_accounts(
        &self,
        min_invited: i64,
        include_activity: bool,
        limit: i64,
        use_cache: bool,
    ) -> ApiResult<DetectorPage<AffiliatedInviter>> {
        let key = format!("risk:affiliated:{}:{}:{}", min_invited, limit, include_activity);
        if !use_cache {
            self.cache.delete(&key).await;
        }
        let ttl = detector_ttl(self.scale.current());
        let value = self
            .cache
            .get_or_compute(&key, ttl, || async {
                let items = self
                    .compute_affiliated(min_invited, include_activity, limit)
                    .await?;
                serde_json::to_value(&items).map_err(|e| ApiError::internal_error(e.to_string()))
            })
            .await?;
        let items: Vec<AffiliatedInviter> =
            serde_json::from_value(value).map_err(|e| ApiError::internal_error(e.to_string()))?;
        Ok(DetectorPage::new(items))
    }

    async fn compute_affiliated(
        &self,
        min_invited: i64,
        include_activity: bool,
        limit: i64,
    ) -> ApiResult<Vec<AffiliatedInviter>> {
        let inviters = self.log_store.affiliated_inviters(min_invited, limit).await?;
        if inviters.is_empty() {
            return Ok(Vec::new());
        }

        let inviter_ids: Vec<i64> = inviters.iter().map(|(id, _)| *id).collect();
        let mut invited_map = self.log_store.invited_users(&inviter_ids).await?;
        let inviter_rows = self.log_store.users_by_ids(&inviter_ids).await?;
        let inviter_names: HashMap<i64, String> =
            inviter_rows.into_iter().map(|u| (u.id, u.username)).collect();

        let activity = if include_activity {
            let invited_ids: Vec<i64> = invited_map
                .values()
                .flat_map(|list| list.iter().map(|(id, _, _)| *id))
                .collect();
            let end = now_ts();
            self.log_store
                .user_request_counts(&invited_ids, end - Window::D7.seconds(), end)
                .await?
        } else {
            HashMap::new()
        };

        Ok(inviters
            .into_iter()
            .map(|(inviter_id, invited_count)| {
                let invited = invited_map
                    .remove(&inviter_id)
                    .unwrap_or_default()
                    .into_iter()
                    .map(|(user_id, username, status)| InvitedUser {
                        user_id,
                        username,
                        status,
                        request_count: activity.get(&user_id).copied().unwrap_or(0),
                    })
                    .collect();
                AffiliatedInviter {
                    inviter_id,
                    inviter_username: inviter_names.get(&inviter_id).cloned().unwrap_or_default(),
                    invited_count,
                    invited,
                }
            })
            .collect())
    }

    pub async fn same_ip_registrations(
        &self,
        window: Window,
        min_users: i64,
        limit: i64,
        use_cache: bool,
    ) -> ApiResult<DetectorPage<SameIpRegistration>> {
        let key = format!("risk:same_ip_reg:{}:{}:{}", window.as_str(), min_users, limit);
        if !use_cache {
            self.cache.delete(&key).await;
        }
        let ttl = detector_ttl(self.scale.current());
        let value = self
            .cache
            .get_or_compute(&key, ttl, || async {
                let end = now_ts();
                let items = self
                    .log_store
                    .same_ip_registrations(end - window.seconds(), end, min_users, limit)
                    .await?;
                serde_json::to_value(&items).map_err(|e| ApiError::internal_error(e.to_string()))
            })
            .await?;
        let items: Vec<SameIpRegistration> =
            serde_json::from_value(value).map_err(|e| ApiError::internal_error(e.to_string()))?;
        Ok(DetectorPage::new(items))
    }

    // -----------------------------------------------------------------------
    // IP surfaces
    // -----------------------------------------------------------------------

    pub async fn ip_lookup(
        &self,
        ip: &str,
        window: Window,
        use_cache: bool,
    ) -> ApiResult<IpLookupReport> {
        let ip = ip.trim();
        let key = format!("risk:ip_lookup:{}:{}", ip, window.as_str());
        if use_cache
            && let Some(value) = self.cache.get(&key).await
            && let Ok(report) = serde_json::from_value::<IpLookupReport>(value)
        {
            return Ok(report);
        }

        let end = now_ts();
        let start = end - window.seconds();
        let items = self.log_store.ip_users(ip, start, end, 100).await?;
        let models = self.log_store.ip_models(ip, start, end).await?;

        let total_requests: i64 = items.iter().map(|i| i.request_count).sum();
        let unique_users = items
            .iter()
            .map(|i| i.user_id)
            .collect::<std::collections::HashSet<_>>()
            .len() as i64;

        let report = IpLookupReport {
            ip: ip.to_string(),
            window: window.as_str().to_string(),
            total_requests,
            unique_users,
            unique_tokens: items.len() as i64,
            items,
            models,
        };

        // Only non-empty results are worth caching.
        if !report.items.is_empty()
            && let Ok(value) = serde_json::to_value(&report)
        {
            self.cache.set(&key, &value, 300).await;
        }
        Ok(report)
    }

    pub async fn ip_recording_stats(&self, use_cache: bool) -> ApiResult<IpRecordingStats> {
        let key = "risk:ip_stats";
        if !use_cache {
            self.cache.delete(key).await;
        }
        let value = self
            .cache
            .get_or_compute(key, 60, || async {
                let (total_users, enabled_count) = self.log_store.ip_recording_stats().await?;
                let end = now_ts();
                let unique_ips_24h = self.log_store.unique_ips(end - 86400, end).await?;
                let enabled_percentage = if total_users > 0 {
                    (enabled_count as f64 / total_users as f64 * 10000.0).round() / 100.0
                } else {
                    0.0
                };
                let stats = IpRecordingStats {
                    total_users,
                    enabled_count,
                    disabled_count: total_users - enabled_count,
                    enabled_percentage,
                    unique_ips_24h,
                };
                serde_json::to_value(&stats).map_err(|e| ApiError::internal_error(e.to_string()))
            })
            .await?;
        serde_json::from_value(value).map_err(|e| ApiError::internal_error(e.to_string()))
    }
}
