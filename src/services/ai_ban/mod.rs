//! AI-adjudicated auto-ban pipeline.
//!
//! A scheduled scan pulls suspicious users off the request leaderboard,
//! builds an evidence prompt from their behavior analysis, asks an
//! OpenAI-compatible endpoint for a structured verdict and executes the
//! resulting action with a full audit trail. Safety rails: whitelist
//! (user id 1 + admins + explicit ids), a 24 h per-user cooldown, dry-run
//! isolation, and the circuit breaker in [`client::ApiHealth`].

pub mod client;
pub mod prompt;
pub mod verdict;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use utoipa::ToSchema;

use crate::models::behavior::UserBehavior;
use crate::services::risk::RiskService;
use crate::store::{AuditStore, ConfigStore, GatewayWriter, LocalCache, LogStore};
use crate::store::audit_store::AiScanCounts;
use crate::utils::{ApiError, ApiResult, ScheduledTask, Window, now_ts};

use client::{ApiHealth, ChatBackend, ChatOutcome, ModelEntry};
use verdict::BanAction;

pub const CONFIG_KEY: &str = "ai_ban_config";
pub const ASSESSMENT_COOLDOWN_SECONDS: i64 = 24 * 3600;

const MIN_REQUESTS_THRESHOLD: i64 = 50;
const EXCLUDED_RATIO_THRESHOLD: f64 = 0.8;
const MAX_RETRIES: u32 = 3;
const RETRY_DELAY_SECONDS: u64 = 2;
const MODELS_CACHE_KEY: &str = "ai_models_list";
const MODELS_CACHE_URL_KEY: &str = "ai_models_base_url";
const MODELS_CACHE_TTL_SECONDS: i64 = 30 * 24 * 3600;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AiBanConfig {
    pub enabled: bool,
    pub dry_run: bool,
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    /// 0 disables the scheduled scan.
    pub scan_interval_minutes: i64,
    pub custom_prompt: String,
    pub whitelist_ids: Vec<i64>,
    pub whitelist_initialized: bool,
    pub whitelist_ips: Vec<String>,
    pub blacklist_ips: Vec<String>,
    /// Requests to these models do not count toward risk analysis (prefix
    /// match with a trailing `*`).
    pub excluded_models: Vec<String>,
    pub excluded_groups: Vec<String>,
}

impl Default for AiBanConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dry_run: true,
            api_key: String::new(),
            base_url: String::new(),
            model: String::new(),
            scan_interval_minutes: 0,
            custom_prompt: String::new(),
            whitelist_ids: Vec::new(),
            whitelist_initialized: false,
            whitelist_ips: Vec::new(),
            blacklist_ips: Vec::new(),
            excluded_models: Vec::new(),
            excluded_groups: Vec::new(),
        }
    }
}

/// The narrow mutation surface the pipeline is allowed to touch, as a trait
/// so dry-run isolation is testable with a recording double.
#[async_trait]
pub trait ModerationExecutor: Send + Sync {
    async fn ban_user(
        &self,
        user_id: i64,
        reason: &str,
        disable_tokens: bool,
        operator: &str,
        context: serde_json::Value,
    ) -> Result<(), String>;
}

#[async_trait]
impl ModerationExecutor for GatewayWriter {
    async fn ban_user(
        &self,
        user_id: i64,
        reason: &str,
        disable_tokens: bool,
        operator: &str,
        context: serde_json::Value,
    ) -> Result<(), String> {
        GatewayWriter::ban_user(self, user_id, reason, disable_tokens, operator, context)
            .await
            .map_err(|e| e.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserScanResult {
    pub user_id: i64,
    pub username: String,
    pub action: String,
    pub message: String,
    pub executed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub assessment: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, ToSchema)]
pub struct ScanStats {
    pub total_scanned: i64,
    pub total_processed: i64,
    pub banned: i64,
    pub warned: i64,
    pub skipped: i64,
    pub errors: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ScanReport {
    pub success: bool,
    pub scan_id: String,
    pub dry_run: bool,
    pub window: String,
    pub elapsed_seconds: f64,
    pub api_suspended: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub stats: ScanStats,
    pub results: Vec<UserScanResult>,
}

impl ScanReport {
    fn refused(scan_id: String, window: Window, dry_run: bool, message: String, suspended: bool) -> Self {
        Self {
            success: false,
            scan_id,
            dry_run,
            window: window.as_str().to_string(),
            elapsed_seconds: 0.0,
            api_suspended: suspended,
            message: Some(message),
            stats: ScanStats::default(),
            results: Vec::new(),
        }
    }
}

pub struct AiBanService {
    config: Arc<ConfigStore>,
    local_cache: Arc<LocalCache>,
    audit: Arc<AuditStore>,
    risk: Arc<RiskService>,
    log_store: Arc<LogStore>,
    executor: Arc<dyn ModerationExecutor>,
    chat: Arc<dyn ChatBackend>,
    health: ApiHealth,
    scan_lock: tokio::sync::Mutex<()>,
    last_scheduled_scan: AtomicI64,
}

impl AiBanService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<ConfigStore>,
        local_cache: Arc<LocalCache>,
        audit: Arc<AuditStore>,
        risk: Arc<RiskService>,
        log_store: Arc<LogStore>,
        executor: Arc<dyn ModerationExecutor>,
        chat: Arc<dyn ChatBackend>,
    ) -> Self {
        Self {
            config,
            local_cache,
            audit,
            risk,
            log_store,
            executor,
            chat,
            health: ApiHealth::new(),
            scan_lock: tokio::sync::Mutex::new(()),
            last_scheduled_scan: AtomicI64::new(0),
        }
    }

    pub fn health(&self) -> &ApiHealth {
        &self.health
    }

    // -----------------------------------------------------------------------
    // Configuration & whitelist
    // -----------------------------------------------------------------------

    pub async fn load_config(&self) -> ApiResult<AiBanConfig> {
        Ok(self.config.get(CONFIG_KEY).await?)
    }

    pub async fn save_config(&self, patch: &serde_json::Value) -> ApiResult<AiBanConfig> {
        let merged = self.config.merge(CONFIG_KEY, patch).await?;
        let config: AiBanConfig = serde_json::from_value(merged)
            .map_err(|e| ApiError::invalid_params(format!("invalid config: {}", e)))?;
        tracing::info!(
            enabled = config.enabled,
            dry_run = config.dry_run,
            interval = config.scan_interval_minutes,
            "AI ban config updated"
        );
        Ok(config)
    }

    /// Whitelist closure: user id 1 and every admin (`role >= 10`) at
    /// startup time are always whitelisted. Runs once; later admin changes
    /// only affect the role-based check.
    pub async fn ensure_default_whitelist(&self) -> ApiResult<()> {
        let mut config = self.load_config().await?;
        if config.whitelist_initialized {
            return Ok(());
        }

        let mut ids: std::collections::BTreeSet<i64> = config.whitelist_ids.iter().copied().collect();
        ids.insert(1);
        match self.log_store.admin_user_ids().await {
            Ok(admins) => ids.extend(admins),
            Err(e) => tracing::warn!("admin whitelist bootstrap query failed: {}", e),
        }

        config.whitelist_ids = ids.into_iter().collect();
        config.whitelist_initialized = true;
        self.config.set(CONFIG_KEY, &config).await?;
        tracing::info!(count = config.whitelist_ids.len(), "AI ban whitelist initialized");
        Ok(())
    }

    fn is_whitelisted(config: &AiBanConfig, user_id: i64, role: i64) -> bool {
        user_id == 1 || role >= 10 || config.whitelist_ids.contains(&user_id)
    }

    pub async fn whitelist_users(&self) -> ApiResult<Vec<serde_json::Value>> {
        let config = self.load_config().await?;
        let users = self.log_store.users_by_ids(&config.whitelist_ids).await?;
        let by_id: std::collections::HashMap<i64, _> =
            users.into_iter().map(|u| (u.id, u)).collect();
        Ok(config
            .whitelist_ids
            .iter()
            .map(|id| match by_id.get(id) {
                Some(user) => json!({
                    "user_id": id,
                    "username": user.username,
                    "display_name": user.display_name,
                    "role": user.role,
                    "is_admin": user.role >= 10,
                }),
                None => json!({
                    "user_id": id,
                    "username": format!("User#{}", id),
                    "display_name": "",
                    "role": 0,
                    "is_admin": false,
                }),
            })
            .collect())
    }

    pub async fn add_to_whitelist(&self, user_id: i64) -> ApiResult<()> {
        let mut config = self.load_config().await?;
        if config.whitelist_ids.contains(&user_id) {
            return Err(ApiError::invalid_params("用户已在白名单中 / already whitelisted"));
        }
        if self.log_store.user_row(user_id).await?.is_none() {
            return Err(ApiError::not_found("用户不存在 / user not found"));
        }
        config.whitelist_ids.push(user_id);
        config.whitelist_ids.sort_unstable();
        self.config.set(CONFIG_KEY, &config).await?;
        Ok(())
    }

    pub async fn remove_from_whitelist(&self, user_id: i64) -> ApiResult<()> {
        let mut config = self.load_config().await?;
        let before = config.whitelist_ids.len();
        config.whitelist_ids.retain(|id| *id != user_id);
        if config.whitelist_ids.len() == before {
            return Err(ApiError::not_found("用户不在白名单中 / not in whitelist"));
        }
        self.config.set(CONFIG_KEY, &config).await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Cooldown
    // -----------------------------------------------------------------------

    fn cooldown_key(user_id: i64) -> String {
        format!("ai_ban_cooldown:{}", user_id)
    }

    async fn in_cooldown(&self, user_id: i64) -> bool {
        self.local_cache
            .contains(&Self::cooldown_key(user_id))
            .await
            .unwrap_or(false)
    }

    async fn set_cooldown(&self, user_id: i64) {
        let _ = self
            .local_cache
            .set(&Self::cooldown_key(user_id), &now_ts(), ASSESSMENT_COOLDOWN_SECONDS)
            .await;
    }

    pub async fn clear_cooldown(&self, user_id: i64) {
        let _ = self.local_cache.delete(&Self::cooldown_key(user_id)).await;
    }

    // -----------------------------------------------------------------------
    // Candidate selection
    // -----------------------------------------------------------------------

    /// Requests a user made against excluded models/groups as a share of
    /// their total; candidates dominated by excluded traffic are skipped.
    fn excluded_ratio(config: &AiBanConfig, behavior: &UserBehavior) -> f64 {
        if config.excluded_models.is_empty() && config.excluded_groups.is_empty() {
            return 0.0;
        }
        let total = behavior.summary.total_requests;
        if total <= 0 {
            return 0.0;
        }

        let mut excluded = 0i64;
        for model in &behavior.top_models {
            let hit = config.excluded_models.iter().any(|pattern| {
                if let Some(prefix) = pattern.strip_suffix('*') {
                    model.model_name.starts_with(prefix)
                } else {
                    model.model_name == *pattern
                }
            });
            if hit {
                excluded += model.requests;
            }
        }
        for group in &behavior.top_groups {
            if config.excluded_groups.contains(&group.group_name) {
                excluded += group.requests;
            }
        }
        excluded as f64 / total as f64
    }

    async fn suspicious_users(
        &self,
        config: &AiBanConfig,
        window: Window,
        limit: usize,
    ) -> ApiResult<Vec<UserBehavior>> {
        let report = self
            .risk
            .leaderboards(&[window], 50, crate::store::LeaderboardSort::Requests, false)
            .await?;
        let candidates = report
            .windows
            .get(window.as_str())
            .cloned()
            .unwrap_or_default();

        let mut suspicious = Vec::new();
        for candidate in candidates {
            if candidate.user_id <= 0 || self.in_cooldown(candidate.user_id).await {
                continue;
            }
            let behavior = match self.risk.user_analysis(candidate.user_id, window, None).await {
                Ok(b) => b,
                Err(e) => {
                    tracing::warn!("analysis failed for user {}: {}", candidate.user_id, e);
                    continue;
                }
            };
            if behavior.summary.total_requests < MIN_REQUESTS_THRESHOLD {
                continue;
            }
            if Self::excluded_ratio(config, &behavior) >= EXCLUDED_RATIO_THRESHOLD {
                tracing::debug!(
                    "user {} mostly uses excluded models/groups, skipping",
                    candidate.user_id
                );
                continue;
            }
            if !behavior.has_ip_risk() {
                continue;
            }
            suspicious.push(behavior);
            if suspicious.len() >= limit {
                break;
            }
        }
        Ok(suspicious)
    }

    // -----------------------------------------------------------------------
    // LLM invocation
    // -----------------------------------------------------------------------

    fn build_prompt(&self, config: &AiBanConfig, behavior: &UserBehavior) -> String {
        let unique_tokens = behavior.summary.unique_tokens;
        let avg_per_token = if unique_tokens > 0 {
            ((behavior.summary.total_requests as f64 / unique_tokens as f64) * 100.0).round()
                / 100.0
        } else {
            0.0
        };
        let user_ips: Vec<String> = behavior.top_ips.iter().map(|i| i.ip.clone()).collect();
        let vars = prompt::PromptVars {
            user_id: behavior.user.id,
            username: behavior.user.username.clone(),
            user_group: behavior.user.group.clone(),
            total_requests: behavior.summary.total_requests,
            unique_models: behavior.summary.unique_models,
            unique_tokens,
            unique_ips: behavior.summary.unique_ips,
            switch_count: behavior.risk.ip_switch_analysis.switch_count,
            real_switch_count: behavior.risk.ip_switch_analysis.real_switch_count,
            dual_stack_switches: behavior.risk.ip_switch_analysis.dual_stack_switches,
            rapid_switch_count: behavior.risk.ip_switch_analysis.rapid_switch_count,
            avg_ip_duration: behavior.risk.ip_switch_analysis.avg_ip_duration,
            min_switch_interval: behavior.risk.ip_switch_analysis.min_switch_interval,
            risk_flags: behavior
                .risk
                .risk_flags
                .iter()
                .map(|f| f.as_str().to_string())
                .collect(),
            avg_requests_per_token: avg_per_token,
            token_rotation_risk: prompt::token_rotation_risk(unique_tokens, avg_per_token)
                .to_string(),
            whitelist_ips: config.whitelist_ips.clone(),
            blacklist_ips: config.blacklist_ips.clone(),
            user_whitelisted_ips: user_ips
                .iter()
                .filter(|ip| config.whitelist_ips.contains(*ip))
                .cloned()
                .collect(),
            user_blacklisted_ips: user_ips
                .iter()
                .filter(|ip| config.blacklist_ips.contains(*ip))
                .cloned()
                .collect(),
            user_ips,
        };
        prompt::render_with_fallback(&config.custom_prompt, &vars)
    }

    /// Up to 3 attempts with linear backoff; total failure feeds the breaker.
    async fn call_ai(&self, config: &AiBanConfig, user_prompt: &str) -> Result<ChatOutcome, String> {
        if config.api_key.is_empty() {
            return Err("OpenAI API Key 未配置".to_string());
        }
        if let Some(remaining) = self.health.suspension_remaining(now_ts()) {
            return Err(format!("API 服务暂停中，剩余冷却时间 {} 秒", remaining));
        }

        let mut last_error = String::new();
        for attempt in 1..=MAX_RETRIES {
            match self
                .chat
                .chat(
                    &config.base_url,
                    &config.api_key,
                    &config.model,
                    prompt::SYSTEM_PROMPT,
                    user_prompt,
                    500,
                )
                .await
            {
                Ok(outcome) => {
                    self.health.record_success();
                    return Ok(outcome);
                }
                Err(e) => {
                    last_error = e.to_string();
                    tracing::warn!(
                        "moderation LLM call failed (attempt {}/{}): {}",
                        attempt,
                        MAX_RETRIES,
                        last_error
                    );
                    if attempt < MAX_RETRIES {
                        tokio::time::sleep(std::time::Duration::from_secs(
                            RETRY_DELAY_SECONDS * attempt as u64,
                        ))
                        .await;
                    }
                }
            }
        }

        self.health.record_failure(&last_error, now_ts());
        Err(last_error)
    }

    // -----------------------------------------------------------------------
    // Per-user processing
    // -----------------------------------------------------------------------

    pub(crate) async fn process_user(
        &self,
        config: &AiBanConfig,
        behavior: &UserBehavior,
    ) -> UserScanResult {
        let user_id = behavior.user.id;
        let username = behavior.user.username.clone();

        if Self::is_whitelisted(config, user_id, behavior.user.role) {
            self.set_cooldown(user_id).await;
            return UserScanResult {
                user_id,
                username,
                action: "skip".to_string(),
                message: "白名单用户，跳过评估".to_string(),
                executed: false,
                assessment: None,
            };
        }

        let user_prompt = self.build_prompt(config, behavior);
        let outcome = match self.call_ai(config, &user_prompt).await {
            Ok(outcome) => outcome,
            Err(e) => {
                return UserScanResult {
                    user_id,
                    username,
                    action: "error".to_string(),
                    message: format!("AI 评估失败: {}", e),
                    executed: false,
                    assessment: None,
                };
            }
        };

        let Some(verdict) = verdict::parse_verdict(&outcome.content) else {
            return UserScanResult {
                user_id,
                username,
                action: "error".to_string(),
                message: "AI 响应解析失败".to_string(),
                executed: false,
                assessment: Some(json!({ "raw_response": outcome.content })),
            };
        };

        self.set_cooldown(user_id).await;

        let assessment = json!({
            "should_ban": verdict.should_ban,
            "risk_score": verdict.risk_score,
            "confidence": verdict.confidence,
            "reason": verdict.reason,
            "action": verdict.action.as_str(),
            "model": outcome.model,
            "prompt_tokens": outcome.prompt_tokens,
            "completion_tokens": outcome.completion_tokens,
            "total_tokens": outcome.total_tokens,
            "api_duration_ms": outcome.duration_ms,
        });

        let mut result = UserScanResult {
            user_id,
            username: username.clone(),
            action: verdict.action.as_str().to_string(),
            message: String::new(),
            executed: false,
            assessment: Some(assessment),
        };

        match verdict.action {
            BanAction::Ban => {
                if config.dry_run {
                    // Dry-run isolation: no gateway mutation, no
                    // security_audit row, only the scan's audit entry.
                    result.message = format!("[试运行] 建议封禁: {}", verdict.reason);
                } else {
                    let context = json!({
                        "source": "ai_auto_ban",
                        "risk_score": verdict.risk_score,
                        "confidence": verdict.confidence,
                        "ai_reason": verdict.reason,
                    });
                    match self
                        .executor
                        .ban_user(
                            user_id,
                            &format!("[AI自动封禁] {}", verdict.reason),
                            true,
                            "AI自动封禁",
                            context,
                        )
                        .await
                    {
                        Ok(()) => {
                            result.executed = true;
                            result.message = format!("已封禁: {}", verdict.reason);
                        }
                        Err(e) => {
                            result.action = "error".to_string();
                            result.message = format!("封禁执行失败: {}", e);
                        }
                    }
                }
            }
            BanAction::Warn => {
                result.message = format!("风险告警: {}", verdict.reason);
                if !config.dry_run {
                    let context = json!({
                        "source": "ai_auto_ban",
                        "risk_score": verdict.risk_score,
                        "confidence": verdict.confidence,
                    });
                    if let Err(e) = self
                        .audit
                        .add_security_audit(
                            "ai_warn",
                            user_id,
                            &username,
                            "AI自动封禁",
                            &verdict.reason,
                            &context,
                        )
                        .await
                    {
                        tracing::error!("ai_warn audit insert failed: {}", e);
                    }
                }
            }
            BanAction::Monitor => {
                result.message = format!("继续观察: {}", verdict.reason);
            }
            BanAction::Skip => {
                result.message = format!("跳过: {}", verdict.reason);
            }
        }
        result
    }

    // -----------------------------------------------------------------------
    // Scan
    // -----------------------------------------------------------------------

    pub async fn run_scan(&self, window: Window, limit: usize, manual: bool) -> ApiResult<ScanReport> {
        let Ok(_guard) = self.scan_lock.try_lock() else {
            if manual {
                return Err(ApiError::scan_busy("扫描正在进行中 / a scan is already running"));
            }
            tracing::debug!("scheduled AI scan skipped: previous scan still running");
            return Ok(ScanReport::refused(
                String::new(),
                window,
                true,
                "scan already running".to_string(),
                false,
            ));
        };

        let config = self.load_config().await?;
        let scan_id: String = uuid::Uuid::new_v4().to_string().chars().take(8).collect();
        let scan_kind = if manual { "manual" } else { "scheduled" };

        if !config.enabled || config.api_key.is_empty() {
            return Ok(ScanReport::refused(
                scan_id,
                window,
                config.dry_run,
                "AI 自动封禁服务未启用".to_string(),
                false,
            ));
        }
        if let Some(remaining) = self.health.suspension_remaining(now_ts()) {
            tracing::warn!("AI scan refused: API suspended, {}s remaining", remaining);
            return Ok(ScanReport::refused(
                scan_id,
                window,
                config.dry_run,
                format!("API 服务暂停中，剩余冷却时间 {} 秒", remaining),
                true,
            ));
        }

        tracing::info!(scan_id = %scan_id, window = window.as_str(), limit, kind = scan_kind, "AI scan started");
        let started = std::time::Instant::now();

        let suspicious = self.suspicious_users(&config, window, limit).await?;
        tracing::info!(scan_id = %scan_id, candidates = suspicious.len(), "suspicious users selected");

        let mut results = Vec::with_capacity(suspicious.len());
        for behavior in &suspicious {
            let result = self.process_user(&config, behavior).await;
            tracing::info!(
                scan_id = %scan_id,
                user_id = result.user_id,
                action = %result.action,
                executed = result.executed,
                "user processed"
            );
            results.push(result);
        }

        let elapsed = started.elapsed().as_secs_f64();
        let stats = ScanStats {
            total_scanned: suspicious.len() as i64,
            total_processed: results.len() as i64,
            banned: results.iter().filter(|r| r.action == "ban" && r.executed).count() as i64,
            warned: results.iter().filter(|r| r.action == "warn").count() as i64,
            skipped: results
                .iter()
                .filter(|r| r.action == "skip" || r.action == "monitor")
                .count() as i64,
            errors: results.iter().filter(|r| r.action == "error").count() as i64,
        };

        let status = if stats.errors > 0 && stats.errors == stats.total_processed {
            "failed"
        } else if stats.errors > 0 {
            "partial"
        } else if stats.total_scanned == 0 {
            "empty"
        } else {
            "success"
        };

        if stats.total_scanned > 0 {
            let details = serde_json::to_value(&results).unwrap_or(serde_json::Value::Null);
            let counts = AiScanCounts {
                total_scanned: stats.total_scanned,
                total_processed: stats.total_processed,
                banned: stats.banned,
                warned: stats.warned,
                skipped: stats.skipped,
                errors: stats.errors,
            };
            if let Err(e) = self
                .audit
                .add_ai_audit_log(
                    &scan_id,
                    status,
                    window.as_str(),
                    counts,
                    config.dry_run,
                    (elapsed * 100.0).round() / 100.0,
                    &self.health.last_error().unwrap_or_default(),
                    &details,
                )
                .await
            {
                tracing::error!("ai audit log insert failed: {}", e);
            }
        }

        tracing::info!(
            scan_id = %scan_id,
            status,
            dry_run = config.dry_run,
            banned = stats.banned,
            warned = stats.warned,
            skipped = stats.skipped,
            errors = stats.errors,
            elapsed = format!("{:.2}s", elapsed),
            "AI scan finished"
        );

        Ok(ScanReport {
            success: true,
            scan_id,
            dry_run: config.dry_run,
            window: window.as_str().to_string(),
            elapsed_seconds: (elapsed * 100.0).round() / 100.0,
            api_suspended: false,
            message: None,
            stats,
            results,
        })
    }

    // -----------------------------------------------------------------------
    // Operational surface
    // -----------------------------------------------------------------------

    pub fn reset_health(&self) {
        self.health.reset();
        tracing::info!("AI moderation API health manually reset");
    }

    pub fn health_snapshot(&self) -> serde_json::Value {
        let now = now_ts();
        json!({
            "state": self.health.state(),
            "suspended": self.health.state() == client::HealthState::Suspended,
            "consecutive_failures": self.health.consecutive_failures(),
            "last_error": self.health.last_error(),
            "cooldown_remaining": self.health.suspension_remaining(now).unwrap_or(0),
        })
    }

    /// Masked config for the API: the key is never returned verbatim.
    pub async fn config_report(&self) -> ApiResult<serde_json::Value> {
        let config = self.load_config().await?;
        let masked_api_key = mask_key(&config.api_key);
        Ok(json!({
            "enabled": config.enabled,
            "dry_run": config.dry_run,
            "model": config.model,
            "base_url": config.base_url,
            "has_api_key": !config.api_key.is_empty(),
            "masked_api_key": masked_api_key,
            "whitelist_count": config.whitelist_ids.len(),
            "risk_score_threshold": verdict::RISK_SCORE_BAN_THRESHOLD,
            "confidence_threshold": verdict::CONFIDENCE_THRESHOLD,
            "cooldown_hours": ASSESSMENT_COOLDOWN_SECONDS / 3600,
            "scan_interval_minutes": config.scan_interval_minutes,
            "custom_prompt": config.custom_prompt,
            "default_prompt": prompt::DEFAULT_ASSESSMENT_PROMPT,
            "whitelist_ips": config.whitelist_ips,
            "blacklist_ips": config.blacklist_ips,
            "excluded_models": config.excluded_models,
            "excluded_groups": config.excluded_groups,
            "api_health": self.health_snapshot(),
        }))
    }

    /// Model list for the config UI, cached for 30 days keyed by base URL.
    pub async fn fetch_models(
        &self,
        base_url: Option<String>,
        api_key: Option<String>,
        force_refresh: bool,
    ) -> ApiResult<Vec<ModelEntry>> {
        let config = self.load_config().await?;
        let base = base_url
            .unwrap_or(config.base_url)
            .trim_end_matches('/')
            .to_string();
        let key = api_key.unwrap_or(config.api_key);
        if key.is_empty() {
            return Err(ApiError::invalid_params("API Key 未配置 / api key not configured"));
        }

        let cached_url: Option<String> = self.local_cache.get(MODELS_CACHE_URL_KEY).await?;
        let url_changed = cached_url.as_deref() != Some(base.as_str());
        if !force_refresh && !url_changed {
            let cached: Option<Vec<ModelEntry>> = self.local_cache.get(MODELS_CACHE_KEY).await?;
            if let Some(models) = cached
                && !models.is_empty()
            {
                return Ok(models);
            }
        }
        if url_changed {
            tracing::info!("moderation LLM base URL changed; refreshing model list");
        }

        let models = self
            .chat
            .list_models(&base, &key)
            .await
            .map_err(|e| ApiError::internal_error(format!("获取模型列表失败: {}", e)))?;

        let _ = self
            .local_cache
            .set(MODELS_CACHE_KEY, &models, MODELS_CACHE_TTL_SECONDS)
            .await;
        let _ = self
            .local_cache
            .set(MODELS_CACHE_URL_KEY, &base, MODELS_CACHE_TTL_SECONDS)
            .await;
        Ok(models)
    }

    /// One-shot connectivity probe against a specific model.
    pub async fn test_model(
        &self,
        model: &str,
        base_url: Option<String>,
        api_key: Option<String>,
    ) -> serde_json::Value {
        let config = match self.load_config().await {
            Ok(c) => c,
            Err(e) => return json!({ "success": false, "message": e.to_string() }),
        };
        let base = base_url.unwrap_or(config.base_url);
        let key = api_key.unwrap_or(config.api_key);
        if key.is_empty() {
            return json!({ "success": false, "message": "API Key 未配置" });
        }

        match self
            .chat
            .chat(
                &base,
                &key,
                model,
                "",
                "你好，这是一条 API 连接测试消息，请简短回复确认连接正常。",
                100,
            )
            .await
        {
            Ok(outcome) => json!({
                "success": true,
                "message": "连接成功",
                "model": outcome.model,
                "response": outcome.content,
                "latency_ms": outcome.duration_ms,
                "usage": {
                    "prompt_tokens": outcome.prompt_tokens,
                    "completion_tokens": outcome.completion_tokens,
                },
            }),
            Err(e) => json!({ "success": false, "message": format!("测试失败: {}", e) }),
        }
    }

    pub async fn available_models(&self) -> ApiResult<Vec<serde_json::Value>> {
        let start = now_ts() - Window::D7.seconds();
        Ok(self
            .log_store
            .recent_models(start, 100)
            .await?
            .into_iter()
            .map(|(model_name, requests)| json!({ "model_name": model_name, "requests": requests }))
            .collect())
    }

    pub async fn available_groups(&self) -> ApiResult<Vec<serde_json::Value>> {
        let start = now_ts() - Window::D7.seconds();
        Ok(self
            .log_store
            .recent_groups(start, 50)
            .await?
            .into_iter()
            .map(|(group_name, requests)| json!({ "group_name": group_name, "requests": requests }))
            .collect())
    }
}

/// One-minute tick that honors the configured interval.
impl ScheduledTask for AiBanService {
    fn run(&self) -> Pin<Box<dyn Future<Output = Result<(), anyhow::Error>> + Send + '_>> {
        Box::pin(async move {
            let config = self.load_config().await.map_err(|e| anyhow::anyhow!("{}", e))?;
            let interval = config.scan_interval_minutes;
            if interval <= 0 || !config.enabled || config.api_key.is_empty() {
                return Ok(());
            }

            let now = now_ts();
            let last = self.last_scheduled_scan.load(Ordering::Relaxed);
            if now - last < interval * 60 {
                return Ok(());
            }
            self.last_scheduled_scan.store(now, Ordering::Relaxed);

            match self.run_scan(Window::H1, 10, false).await {
                Ok(report) if report.success => {}
                Ok(report) => {
                    tracing::debug!(
                        "scheduled AI scan not executed: {}",
                        report.message.unwrap_or_default()
                    );
                }
                Err(e) => tracing::error!("scheduled AI scan failed: {}", e),
            }
            Ok(())
        })
    }
}

fn mask_key(key: &str) -> String {
    if key.is_empty() {
        String::new()
    } else if key.len() > 8 {
        format!("{}{}{}", &key[..4], "*".repeat(key.len() - 8), &key[key.len() - 4..])
    } else {
        "*".repeat(key.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_masking() {
        assert_eq!(mask_key(""), "");
        assert_eq!(mask_key("short"), "*****");
        assert_eq!(mask_key("sk-abcdefghijkl"), "sk-a********ijkl");
    }

    #[test]
    fn excluded_ratio_prefix_matching() {
        let config = AiBanConfig {
            excluded_models: vec!["text-embedding-*".to_string(), "whisper-1".to_string()],
            excluded_groups: vec!["bulk".to_string()],
            ..Default::default()
        };
        let behavior = UserBehavior {
            user: Default::default(),
            window: "1h".to_string(),
            end_time: 0,
            summary: crate::models::behavior::BehaviorSummary {
                total_requests: 100,
                ..Default::default()
            },
            risk: crate::models::behavior::RiskSection {
                risk_flags: vec![],
                ip_switch_analysis: Default::default(),
            },
            top_ips: vec![],
            top_models: vec![
                crate::models::behavior::TopModel {
                    model_name: "text-embedding-3-small".to_string(),
                    requests: 70,
                },
                crate::models::behavior::TopModel {
                    model_name: "gpt-4o".to_string(),
                    requests: 20,
                },
            ],
            top_groups: vec![crate::models::behavior::TopGroup {
                group_name: "bulk".to_string(),
                requests: 15,
            }],
            ips: vec![],
        };
        let ratio = AiBanService::excluded_ratio(&config, &behavior);
        assert!((ratio - 0.85).abs() < 1e-9);
    }

    #[test]
    fn whitelist_covers_root_admin_and_explicit_ids() {
        let config = AiBanConfig { whitelist_ids: vec![7], ..Default::default() };
        assert!(AiBanService::is_whitelisted(&config, 1, 0));
        assert!(AiBanService::is_whitelisted(&config, 99, 10));
        assert!(AiBanService::is_whitelisted(&config, 7, 0));
        assert!(!AiBanService::is_whitelisted(&config, 8, 1));
    }
}
