//! The narrow mutating surface over the gateway database.
//!
//! Everything else in the sidecar is read-only. Each mutation here is
//! idempotent, runs in a single transaction where it touches more than one
//! table, produces exactly one audit row, and ends by invalidating the cache
//! prefixes whose inputs it changed.

use serde_json::json;
use std::sync::Arc;

use crate::cache::CacheTier;
use crate::store::audit_store::AuditStore;
use crate::store::dialect::GatewayDialect;
use crate::store::gateway::{GatewayClient, StoreError, StoreResult};
use crate::store::value::SqlParam;

/// User status values in the gateway schema.
pub const USER_STATUS_ACTIVE: i64 = 1;
pub const USER_STATUS_BANNED: i64 = 3;
/// Token status value for disabled tokens.
pub const TOKEN_STATUS_DISABLED: i64 = 3;

pub struct GatewayWriter {
    client: Arc<GatewayClient>,
    audit: Arc<AuditStore>,
    cache: Arc<CacheTier>,
}

impl GatewayWriter {
    pub fn new(client: Arc<GatewayClient>, audit: Arc<AuditStore>, cache: Arc<CacheTier>) -> Self {
        Self { client, audit, cache }
    }

    async fn invalidate_moderation_caches(&self) {
        for prefix in ["dashboard:", "risk:", "ip_dist:"] {
            let cleared = self.cache.clear_prefix(prefix).await;
            tracing::debug!("invalidated {} cache entries under {}", cleared, prefix);
        }
    }

    async fn username_of(&self, user_id: i64) -> String {
        let row = self
            .client
            .query("SELECT username FROM users WHERE id = ?", vec![user_id.into()])
            .await
            .ok()
            .and_then(|rows| rows.into_iter().next());
        row.map(|r| r.text(0)).unwrap_or_default()
    }

    /// Ban a user, optionally disabling all of their live tokens in the same
    /// transaction. Repeating the call on an already-banned user succeeds.
    pub async fn ban_user(
        &self,
        user_id: i64,
        reason: &str,
        disable_tokens: bool,
        operator: &str,
        context: serde_json::Value,
    ) -> StoreResult<()> {
        let username = self.username_of(user_id).await;

        let mut statements: Vec<(String, Vec<SqlParam>)> = vec![(
            "UPDATE users SET status = ? WHERE id = ?".to_string(),
            vec![USER_STATUS_BANNED.into(), user_id.into()],
        )];
        if disable_tokens {
            statements.push((
                "UPDATE tokens SET status = ? WHERE user_id = ? AND deleted_at IS NULL"
                    .to_string(),
                vec![TOKEN_STATUS_DISABLED.into(), user_id.into()],
            ));
        }
        self.client.execute_tx(statements).await?;

        self.audit
            .add_security_audit("ban", user_id, &username, operator, reason, &context)
            .await
            .map_err(|e| StoreError::Permanent(format!("audit insert failed: {}", e)))?;

        tracing::info!(
            user_id,
            username = %username,
            operator = %operator,
            disable_tokens,
            "user banned"
        );
        self.invalidate_moderation_caches().await;
        Ok(())
    }

    pub async fn unban_user(&self, user_id: i64, operator: &str, reason: &str) -> StoreResult<()> {
        let username = self.username_of(user_id).await;

        self.client
            .execute(
                "UPDATE users SET status = ? WHERE id = ?",
                vec![USER_STATUS_ACTIVE.into(), user_id.into()],
            )
            .await?;

        self.audit
            .add_security_audit("unban", user_id, &username, operator, reason, &json!({}))
            .await
            .map_err(|e| StoreError::Permanent(format!("audit insert failed: {}", e)))?;

        tracing::info!(user_id, username = %username, operator = %operator, "user unbanned");
        self.invalidate_moderation_caches().await;
        Ok(())
    }

    /// Move a user between groups, recording the transition in the
    /// auto-group log. Refuses when the user no longer exists.
    pub async fn move_group(
        &self,
        user_id: i64,
        old_group: &str,
        new_group: &str,
        action: &str,
        source: &str,
        operator: &str,
    ) -> StoreResult<()> {
        let d = self.client.dialect();
        let username = self.username_of(user_id).await;

        let sql = format!(
            "UPDATE users SET {group_col} = ? WHERE id = ? AND deleted_at IS NULL",
            group_col = d.group_col(),
        );
        let affected = self
            .client
            .execute(&sql, vec![new_group.into(), user_id.into()])
            .await?;
        if affected == 0 {
            return Err(StoreError::Permanent(format!("user {} not found", user_id)));
        }

        self.audit
            .add_auto_group_log(user_id, &username, old_group, new_group, action, source, operator)
            .await
            .map_err(|e| StoreError::Permanent(format!("audit insert failed: {}", e)))?;

        tracing::info!(
            user_id,
            username = %username,
            from = %old_group,
            to = %new_group,
            action = %action,
            "group moved"
        );
        self.invalidate_moderation_caches().await;
        Ok(())
    }

    /// Flip `setting.record_ip_log` to true for every user that does not have
    /// it yet. Returns the number of updated rows.
    pub async fn enable_all_ip_recording(&self, operator: &str) -> StoreResult<u64> {
        let d = self.client.dialect();
        let set_expr = d.json_set_bool_true("setting", "record_ip_log");
        let true_predicate = d.json_bool_is_true("setting", "record_ip_log");

        // NULL-safe: "<> true" alone would skip rows where the key is absent.
        let json_value = match d {
            GatewayDialect::MySql => "JSON_EXTRACT(setting, '$.record_ip_log') IS NULL",
            GatewayDialect::Postgres => "setting::jsonb->>'record_ip_log' IS NULL",
        };
        let sql = format!(
            r#"
            UPDATE users
            SET setting = {set_expr}
            WHERE deleted_at IS NULL
              AND (setting IS NULL OR setting = '' OR {json_value} OR NOT ({true_predicate}))
            "#,
        );
        let updated = self.client.execute(&sql, vec![]).await?;

        self.audit
            .add_security_audit(
                "ip_recording_enable_all",
                0,
                "",
                operator,
                "enable record_ip_log for all users",
                &json!({ "updated": updated }),
            )
            .await
            .map_err(|e| StoreError::Permanent(format!("audit insert failed: {}", e)))?;

        tracing::info!(updated, operator = %operator, "ip recording enabled for all users");
        self.invalidate_moderation_caches().await;
        Ok(updated)
    }

    /// Insert a batch of redemption codes. Used by operational tooling; the
    /// dashboard only reads redemption totals.
    pub async fn insert_redemptions(
        &self,
        batch: &[NewRedemption],
        operator: &str,
    ) -> StoreResult<u64> {
        if batch.is_empty() {
            return Ok(0);
        }
        let d = self.client.dialect();
        let key_col = match d {
            GatewayDialect::MySql => "`key`",
            GatewayDialect::Postgres => "\"key\"",
        };
        let mut statements = Vec::with_capacity(batch.len());
        for item in batch {
            statements.push((
                format!(
                    "INSERT INTO redemptions (user_id, name, {key_col}, quota, created_time, status) VALUES (?, ?, ?, ?, ?, 1)",
                ),
                vec![
                    item.user_id.into(),
                    item.name.as_str().into(),
                    item.key.as_str().into(),
                    item.quota.into(),
                    item.created_time.into(),
                ],
            ));
        }
        let inserted = self.client.execute_tx(statements).await?;

        self.audit
            .add_security_audit(
                "insert_redemptions",
                0,
                "",
                operator,
                "batch redemption insert",
                &json!({ "count": inserted }),
            )
            .await
            .map_err(|e| StoreError::Permanent(format!("audit insert failed: {}", e)))?;

        self.invalidate_moderation_caches().await;
        Ok(inserted)
    }
}

#[derive(Debug, Clone)]
pub struct NewRedemption {
    pub user_id: i64,
    pub name: String,
    pub key: String,
    pub quota: i64,
    pub created_time: i64,
}
