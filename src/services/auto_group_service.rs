//! Scheduled re-grouping of users by registration source.
//!
//! Users still in the `default` group are moved to a configured target group,
//! either one group for everyone (`simple` mode) or per registration source
//! (`by_source`). Every move is logged and reversible; a revert refuses when
//! the user's current group no longer matches the recorded post-state.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use utoipa::ToSchema;

use crate::models::gateway::RegistrationSource;
use crate::store::{AuditStore, ConfigStore, GatewayWriter, LogStore};
use crate::utils::{ApiError, ApiResult, ScheduledTask, now_ts};

pub const CONFIG_KEY: &str = "auto_group_config";
const DEFAULT_SCAN_INTERVAL_MINUTES: i64 = 60;
const SCAN_PAGE_SIZE: i64 = 1000;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoGroupConfig {
    pub enabled: bool,
    /// "simple" (one target group) or "by_source".
    pub mode: String,
    pub target_group: String,
    pub source_rules: HashMap<String, String>,
    pub scan_interval_minutes: i64,
    pub auto_scan_enabled: bool,
    pub whitelist_ids: Vec<i64>,
}

impl Default for AutoGroupConfig {
    fn default() -> Self {
        let source_rules = RegistrationSource::ALL
            .iter()
            .map(|s| (s.as_str().to_string(), String::new()))
            .collect();
        Self {
            enabled: false,
            mode: "simple".to_string(),
            target_group: String::new(),
            source_rules,
            scan_interval_minutes: DEFAULT_SCAN_INTERVAL_MINUTES,
            auto_scan_enabled: false,
            whitelist_ids: Vec::new(),
        }
    }
}

impl AutoGroupConfig {
    pub fn target_for(&self, source: RegistrationSource) -> String {
        if self.mode == "simple" {
            self.target_group.clone()
        } else {
            self.source_rules.get(source.as_str()).cloned().unwrap_or_default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PendingUser {
    pub id: i64,
    pub username: String,
    pub display_name: String,
    pub email: String,
    pub group: String,
    pub source: String,
    pub status: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PendingUsersPage {
    pub items: Vec<PendingUser>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
    pub total_pages: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct GroupScanReport {
    pub success: bool,
    pub dry_run: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub stats: GroupScanStats,
    pub elapsed_seconds: f64,
    #[schema(value_type = Vec<Object>)]
    pub results: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, ToSchema)]
pub struct GroupScanStats {
    pub total: i64,
    pub assigned: i64,
    pub skipped: i64,
    pub errors: i64,
}

pub struct AutoGroupService {
    config: Arc<ConfigStore>,
    log_store: Arc<LogStore>,
    writer: Arc<GatewayWriter>,
    audit: Arc<AuditStore>,
    scan_lock: tokio::sync::Mutex<()>,
    last_scheduled_scan: AtomicI64,
}

impl AutoGroupService {
    pub fn new(
        config: Arc<ConfigStore>,
        log_store: Arc<LogStore>,
        writer: Arc<GatewayWriter>,
        audit: Arc<AuditStore>,
    ) -> Self {
        Self {
            config,
            log_store,
            writer,
            audit,
            scan_lock: tokio::sync::Mutex::new(()),
            last_scheduled_scan: AtomicI64::new(0),
        }
    }

    pub async fn load_config(&self) -> ApiResult<AutoGroupConfig> {
        Ok(self.config.get(CONFIG_KEY).await?)
    }

    pub async fn save_config(&self, patch: &serde_json::Value) -> ApiResult<AutoGroupConfig> {
        if let Some(mode) = patch.get("mode").and_then(|v| v.as_str())
            && mode != "simple"
            && mode != "by_source"
        {
            return Err(ApiError::invalid_params(format!("invalid mode: {}", mode)));
        }
        if let Some(interval) = patch.get("scan_interval_minutes").and_then(|v| v.as_i64())
            && !(1..=1440).contains(&interval)
        {
            return Err(ApiError::invalid_params("scan_interval_minutes must be within 1..=1440"));
        }

        let merged = self.config.merge(CONFIG_KEY, patch).await?;
        let config: AutoGroupConfig = serde_json::from_value(merged)
            .map_err(|e| ApiError::invalid_params(format!("invalid config: {}", e)))?;
        tracing::info!(
            enabled = config.enabled,
            mode = %config.mode,
            auto_scan = config.auto_scan_enabled,
            "auto-group config updated"
        );
        Ok(config)
    }

    /// Users still in the default group, with their detected registration
    /// source.
    pub async fn pending_users(&self, page: i64, page_size: i64) -> ApiResult<PendingUsersPage> {
        let config = self.load_config().await?;
        let page = page.max(1);
        let page_size = page_size.clamp(1, 200);

        let (users, total) = self
            .log_store
            .pending_default_users(&config.whitelist_ids, page, page_size)
            .await?;

        let items = users
            .into_iter()
            .map(|user| {
                let source = RegistrationSource::detect(&user);
                PendingUser {
                    id: user.id,
                    username: user.username,
                    display_name: user.display_name,
                    email: user.email,
                    group: if user.group.is_empty() { "default".to_string() } else { user.group },
                    source: source.as_str().to_string(),
                    status: user.status,
                }
            })
            .collect();

        Ok(PendingUsersPage {
            items,
            total,
            page,
            page_size,
            total_pages: if total > 0 { (total + page_size - 1) / page_size } else { 0 },
        })
    }

    pub async fn groups_in_use(&self) -> ApiResult<Vec<serde_json::Value>> {
        Ok(self
            .log_store
            .user_groups_in_use()
            .await?
            .into_iter()
            .map(|(group, users)| json!({ "group": group, "users": users }))
            .collect())
    }

    pub async fn run_scan(&self, dry_run: bool, operator: &str) -> ApiResult<GroupScanReport> {
        let Ok(_guard) = self.scan_lock.try_lock() else {
            return Err(ApiError::scan_busy("分组扫描正在进行中 / a scan is already running"));
        };

        let config = self.load_config().await?;
        if !config.enabled {
            return Ok(GroupScanReport {
                success: false,
                dry_run,
                message: Some("自动分组功能未启用".to_string()),
                stats: GroupScanStats::default(),
                elapsed_seconds: 0.0,
                results: Vec::new(),
            });
        }
        if config.mode == "simple" && config.target_group.is_empty() {
            return Ok(GroupScanReport {
                success: false,
                dry_run,
                message: Some("未配置目标分组".to_string()),
                stats: GroupScanStats::default(),
                elapsed_seconds: 0.0,
                results: Vec::new(),
            });
        }
        if config.mode == "by_source" && config.source_rules.values().all(|v| v.is_empty()) {
            return Ok(GroupScanReport {
                success: false,
                dry_run,
                message: Some("未配置任何来源分组规则".to_string()),
                stats: GroupScanStats::default(),
                elapsed_seconds: 0.0,
                results: Vec::new(),
            });
        }

        let started = std::time::Instant::now();
        let (users, _) = self
            .log_store
            .pending_default_users(&config.whitelist_ids, 1, SCAN_PAGE_SIZE)
            .await?;
        tracing::info!(pending = users.len(), dry_run, "auto-group scan started");

        let mut stats = GroupScanStats { total: users.len() as i64, ..Default::default() };
        let mut results = Vec::with_capacity(users.len());
        for user in users {
            let source = RegistrationSource::detect(&user);
            let target = config.target_for(source);

            if target.is_empty() {
                stats.skipped += 1;
                results.push(json!({
                    "user_id": user.id,
                    "username": user.username,
                    "source": source.as_str(),
                    "action": "skipped",
                    "message": format!("来源 {} 未配置目标分组", source.as_str()),
                }));
                continue;
            }

            if dry_run {
                stats.assigned += 1;
                results.push(json!({
                    "user_id": user.id,
                    "username": user.username,
                    "source": source.as_str(),
                    "target_group": target,
                    "action": "would_assign",
                    "message": format!("[试运行] 将分配到 {}", target),
                }));
                continue;
            }

            match self
                .writer
                .move_group(user.id, &user.group, &target, "assign", source.as_str(), operator)
                .await
            {
                Ok(()) => {
                    stats.assigned += 1;
                    results.push(json!({
                        "user_id": user.id,
                        "username": user.username,
                        "source": source.as_str(),
                        "target_group": target,
                        "action": "assigned",
                        "message": format!("已分配到 {}", target),
                    }));
                }
                Err(e) => {
                    stats.errors += 1;
                    results.push(json!({
                        "user_id": user.id,
                        "username": user.username,
                        "source": source.as_str(),
                        "action": "error",
                        "message": e.to_string(),
                    }));
                }
            }
        }

        let elapsed = started.elapsed().as_secs_f64();
        tracing::info!(
            total = stats.total,
            assigned = stats.assigned,
            skipped = stats.skipped,
            errors = stats.errors,
            dry_run,
            elapsed = format!("{:.2}s", elapsed),
            "auto-group scan finished"
        );

        Ok(GroupScanReport {
            success: true,
            dry_run,
            message: None,
            stats,
            elapsed_seconds: (elapsed * 100.0).round() / 100.0,
            results,
        })
    }

    /// Manually move a batch of users into one target group.
    pub async fn batch_move(
        &self,
        user_ids: &[i64],
        target_group: &str,
        operator: &str,
    ) -> ApiResult<GroupScanReport> {
        if target_group.is_empty() {
            return Err(ApiError::invalid_params("目标分组不能为空 / target group required"));
        }
        if user_ids.is_empty() || user_ids.len() > 1000 {
            return Err(ApiError::invalid_params("user_ids must contain 1..=1000 entries"));
        }

        let users = self.log_store.users_by_ids(user_ids).await?;
        let by_id: HashMap<i64, _> = users.into_iter().map(|u| (u.id, u)).collect();

        let mut stats = GroupScanStats { total: user_ids.len() as i64, ..Default::default() };
        let mut results = Vec::with_capacity(user_ids.len());
        for user_id in user_ids {
            let Some(user) = by_id.get(user_id) else {
                stats.errors += 1;
                results.push(json!({
                    "user_id": user_id,
                    "action": "error",
                    "message": "用户不存在",
                }));
                continue;
            };
            if user.group == target_group {
                stats.skipped += 1;
                results.push(json!({
                    "user_id": user_id,
                    "username": user.username,
                    "action": "skipped",
                    "message": "已在目标分组",
                }));
                continue;
            }
            let source = RegistrationSource::detect(user);
            match self
                .writer
                .move_group(
                    user.id,
                    &user.group,
                    target_group,
                    "batch_move",
                    source.as_str(),
                    operator,
                )
                .await
            {
                Ok(()) => {
                    stats.assigned += 1;
                    results.push(json!({
                        "user_id": user_id,
                        "username": user.username,
                        "action": "assigned",
                        "message": format!("已移动到 {}", target_group),
                    }));
                }
                Err(e) => {
                    stats.errors += 1;
                    results.push(json!({
                        "user_id": user_id,
                        "username": user.username,
                        "action": "error",
                        "message": e.to_string(),
                    }));
                }
            }
        }

        Ok(GroupScanReport {
            success: true,
            dry_run: false,
            message: None,
            stats,
            elapsed_seconds: 0.0,
            results,
        })
    }

    /// Restore the group recorded in one auto-group log entry. Refuses when
    /// the user's current group no longer matches that entry's post-state.
    pub async fn revert(&self, log_id: i64, operator: &str) -> ApiResult<serde_json::Value> {
        let log = self
            .audit
            .get_auto_group_log(log_id)
            .await?
            .ok_or_else(|| ApiError::not_found("日志记录不存在 / log entry not found"))?;

        let user = self
            .log_store
            .user_row(log.user_id)
            .await?
            .ok_or_else(|| ApiError::not_found("用户不存在 / user not found"))?;

        let current_group =
            if user.group.is_empty() { "default".to_string() } else { user.group.clone() };
        if current_group != log.new_group {
            return Err(ApiError::invalid_params(format!(
                "用户当前分组 ({}) 与日志记录不符 ({})，无法恢复",
                current_group, log.new_group
            )));
        }

        self.writer
            .move_group(
                log.user_id,
                &log.new_group,
                &log.old_group,
                "revert",
                &log.source,
                operator,
            )
            .await?;

        Ok(json!({
            "user_id": log.user_id,
            "username": log.username,
            "old_group": log.new_group,
            "new_group": log.old_group,
            "message": format!("用户 {} 已恢复到 {}", log.username, log.old_group),
        }))
    }
}

/// One-minute tick that honors the configured interval.
impl ScheduledTask for AutoGroupService {
    fn run(&self) -> Pin<Box<dyn Future<Output = Result<(), anyhow::Error>> + Send + '_>> {
        Box::pin(async move {
            let config = self.load_config().await.map_err(|e| anyhow::anyhow!("{}", e))?;
            if !config.enabled || !config.auto_scan_enabled {
                return Ok(());
            }
            let interval = config.scan_interval_minutes.clamp(1, 1440);

            let now = now_ts();
            let last = self.last_scheduled_scan.load(Ordering::Relaxed);
            if now - last < interval * 60 {
                return Ok(());
            }
            self.last_scheduled_scan.store(now, Ordering::Relaxed);

            match self.run_scan(false, "system").await {
                Ok(report) if !report.success => {
                    tracing::debug!(
                        "scheduled auto-group scan not executed: {}",
                        report.message.unwrap_or_default()
                    );
                }
                Ok(_) => {}
                Err(e) => tracing::warn!("scheduled auto-group scan failed: {}", e),
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_all_source_rules() {
        let config = AutoGroupConfig::default();
        assert_eq!(config.source_rules.len(), RegistrationSource::ALL.len());
        assert!(config.source_rules.values().all(|v| v.is_empty()));
        assert!(!config.enabled);
    }

    #[test]
    fn target_resolution_per_mode() {
        let mut config = AutoGroupConfig {
            mode: "simple".to_string(),
            target_group: "vip".to_string(),
            ..Default::default()
        };
        assert_eq!(config.target_for(RegistrationSource::Github), "vip");

        config.mode = "by_source".to_string();
        config
            .source_rules
            .insert("github".to_string(), "gh-users".to_string());
        assert_eq!(config.target_for(RegistrationSource::Github), "gh-users");
        assert_eq!(config.target_for(RegistrationSource::Password), "");
    }
}
