//! Repositories over the local audit tables: `security_audit`,
//! `ai_audit_logs`, `auto_group_logs` and `stats_snapshots`.

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use utoipa::ToSchema;

use crate::utils::now_ts;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SecurityAuditEntry {
    pub id: i64,
    pub action: String,
    pub user_id: i64,
    pub username: String,
    pub operator: String,
    pub reason: String,
    #[schema(value_type = Object)]
    pub context: serde_json::Value,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditPage<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
    pub total_pages: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AiAuditLogEntry {
    pub id: i64,
    pub scan_id: String,
    pub status: String,
    pub window: String,
    pub total_scanned: i64,
    pub total_processed: i64,
    pub banned_count: i64,
    pub warned_count: i64,
    pub skipped_count: i64,
    pub error_count: i64,
    pub dry_run: bool,
    pub elapsed_seconds: f64,
    pub error_message: String,
    #[schema(value_type = Object)]
    pub details: serde_json::Value,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AutoGroupLogEntry {
    pub id: i64,
    pub user_id: i64,
    pub username: String,
    pub old_group: String,
    pub new_group: String,
    pub action: String,
    pub source: String,
    pub operator: String,
    pub created_at: i64,
}

pub struct AuditStore {
    pool: SqlitePool,
}

impl AuditStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    // -----------------------------------------------------------------------
    // security_audit
    // -----------------------------------------------------------------------

    pub async fn add_security_audit(
        &self,
        action: &str,
        user_id: i64,
        username: &str,
        operator: &str,
        reason: &str,
        context: &serde_json::Value,
    ) -> Result<i64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO security_audit (action, user_id, username, operator, reason, context, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(action)
        .bind(user_id)
        .bind(username)
        .bind(operator)
        .bind(reason)
        .bind(context.to_string())
        .bind(now_ts())
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn list_security_audits(
        &self,
        page: i64,
        page_size: i64,
        action: Option<&str>,
        user_id: Option<i64>,
    ) -> Result<AuditPage<SecurityAuditEntry>, sqlx::Error> {
        let page = page.max(1);
        let page_size = page_size.clamp(1, 200);
        let offset = (page - 1) * page_size;

        let mut where_parts = Vec::new();
        if action.is_some() {
            where_parts.push("action = ?");
        }
        if user_id.is_some() {
            where_parts.push("user_id = ?");
        }
        let where_sql = if where_parts.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", where_parts.join(" AND "))
        };

        let count_sql = format!("SELECT COUNT(*) FROM security_audit {}", where_sql);
        let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
        if let Some(a) = action {
            count_query = count_query.bind(a.to_string());
        }
        if let Some(id) = user_id {
            count_query = count_query.bind(id);
        }
        let total = count_query.fetch_one(&self.pool).await?;

        let list_sql = format!(
            r#"
            SELECT id, action, user_id, username, operator, reason, context, created_at
            FROM security_audit
            {}
            ORDER BY created_at DESC
            LIMIT ? OFFSET ?
            "#,
            where_sql
        );
        let mut list_query =
            sqlx::query_as::<_, (i64, String, i64, String, String, String, String, i64)>(&list_sql);
        if let Some(a) = action {
            list_query = list_query.bind(a.to_string());
        }
        if let Some(id) = user_id {
            list_query = list_query.bind(id);
        }
        let rows = list_query
            .bind(page_size)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        let items = rows
            .into_iter()
            .map(|(id, action, user_id, username, operator, reason, context, created_at)| {
                SecurityAuditEntry {
                    id,
                    action,
                    user_id,
                    username,
                    operator,
                    reason,
                    context: serde_json::from_str(&context).unwrap_or(serde_json::json!({})),
                    created_at,
                }
            })
            .collect();

        Ok(AuditPage {
            items,
            total,
            page,
            page_size,
            total_pages: (total + page_size - 1) / page_size,
        })
    }

    pub async fn latest_ban_record(
        &self,
        user_id: i64,
    ) -> Result<Option<SecurityAuditEntry>, sqlx::Error> {
        let row = sqlx::query_as::<_, (i64, String, i64, String, String, String, String, i64)>(
            r#"
            SELECT id, action, user_id, username, operator, reason, context, created_at
            FROM security_audit
            WHERE user_id = ? AND action = 'ban'
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(id, action, user_id, username, operator, reason, context, created_at)| {
            SecurityAuditEntry {
                id,
                action,
                user_id,
                username,
                operator,
                reason,
                context: serde_json::from_str(&context).unwrap_or(serde_json::json!({})),
                created_at,
            }
        }))
    }

    /// Count of `action = 'ban'` rows for a user. Used by dry-run isolation
    /// tests and the moderation UI.
    pub async fn count_ban_rows(&self, user_id: i64) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM security_audit WHERE user_id = ? AND action = 'ban'",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
    }

    // -----------------------------------------------------------------------
    // ai_audit_logs
    // -----------------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    pub async fn add_ai_audit_log(
        &self,
        scan_id: &str,
        status: &str,
        window: &str,
        counts: AiScanCounts,
        dry_run: bool,
        elapsed_seconds: f64,
        error_message: &str,
        details: &serde_json::Value,
    ) -> Result<i64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO ai_audit_logs
                (scan_id, status, window, total_scanned, total_processed,
                 banned_count, warned_count, skipped_count, error_count,
                 dry_run, elapsed_seconds, error_message, details, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(scan_id)
        .bind(status)
        .bind(window)
        .bind(counts.total_scanned)
        .bind(counts.total_processed)
        .bind(counts.banned)
        .bind(counts.warned)
        .bind(counts.skipped)
        .bind(counts.errors)
        .bind(dry_run as i64)
        .bind(elapsed_seconds)
        .bind(error_message)
        .bind(details.to_string())
        .bind(now_ts())
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn list_ai_audit_logs(
        &self,
        limit: i64,
        offset: i64,
        status: Option<&str>,
    ) -> Result<(Vec<AiAuditLogEntry>, i64), sqlx::Error> {
        let where_sql = if status.is_some() { "WHERE status = ?" } else { "" };

        let count_sql = format!("SELECT COUNT(*) FROM ai_audit_logs {}", where_sql);
        let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
        if let Some(s) = status {
            count_query = count_query.bind(s.to_string());
        }
        let total = count_query.fetch_one(&self.pool).await?;

        let list_sql = format!(
            r#"
            SELECT id, scan_id, status, window, total_scanned, total_processed,
                   banned_count, warned_count, skipped_count, error_count,
                   dry_run, elapsed_seconds, error_message, details, created_at
            FROM ai_audit_logs
            {}
            ORDER BY created_at DESC
            LIMIT ? OFFSET ?
            "#,
            where_sql
        );

        type Row = (
            i64,
            String,
            String,
            String,
            i64,
            i64,
            i64,
            i64,
            i64,
            i64,
            i64,
            f64,
            String,
            String,
            i64,
        );
        let mut list_query = sqlx::query_as::<_, Row>(&list_sql);
        if let Some(s) = status {
            list_query = list_query.bind(s.to_string());
        }
        let rows = list_query
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        let items = rows
            .into_iter()
            .map(|row| AiAuditLogEntry {
                id: row.0,
                scan_id: row.1,
                status: row.2,
                window: row.3,
                total_scanned: row.4,
                total_processed: row.5,
                banned_count: row.6,
                warned_count: row.7,
                skipped_count: row.8,
                error_count: row.9,
                dry_run: row.10 != 0,
                elapsed_seconds: row.11,
                error_message: row.12,
                details: serde_json::from_str(&row.13).unwrap_or(serde_json::Value::Null),
                created_at: row.14,
            })
            .collect();

        Ok((items, total))
    }

    // -----------------------------------------------------------------------
    // auto_group_logs
    // -----------------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    pub async fn add_auto_group_log(
        &self,
        user_id: i64,
        username: &str,
        old_group: &str,
        new_group: &str,
        action: &str,
        source: &str,
        operator: &str,
    ) -> Result<i64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO auto_group_logs
                (user_id, username, old_group, new_group, action, source, operator, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(user_id)
        .bind(username)
        .bind(if old_group.is_empty() { "default" } else { old_group })
        .bind(new_group)
        .bind(action)
        .bind(source)
        .bind(if operator.is_empty() { "system" } else { operator })
        .bind(now_ts())
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn get_auto_group_log(
        &self,
        log_id: i64,
    ) -> Result<Option<AutoGroupLogEntry>, sqlx::Error> {
        let row = sqlx::query_as::<
            _,
            (i64, i64, String, String, String, String, String, String, i64),
        >(
            r#"
            SELECT id, user_id, username, old_group, new_group, action, source, operator, created_at
            FROM auto_group_logs
            WHERE id = ?
            "#,
        )
        .bind(log_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(auto_group_row))
    }

    pub async fn list_auto_group_logs(
        &self,
        page: i64,
        page_size: i64,
        action: Option<&str>,
        user_id: Option<i64>,
    ) -> Result<AuditPage<AutoGroupLogEntry>, sqlx::Error> {
        let page = page.max(1);
        let page_size = page_size.clamp(1, 200);
        let offset = (page - 1) * page_size;

        let mut where_parts = Vec::new();
        if action.is_some() {
            where_parts.push("action = ?");
        }
        if user_id.is_some() {
            where_parts.push("user_id = ?");
        }
        let where_sql = if where_parts.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", where_parts.join(" AND "))
        };

        let count_sql = format!("SELECT COUNT(*) FROM auto_group_logs {}", where_sql);
        let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
        if let Some(a) = action {
            count_query = count_query.bind(a.to_string());
        }
        if let Some(id) = user_id {
            count_query = count_query.bind(id);
        }
        let total = count_query.fetch_one(&self.pool).await?;

        let list_sql = format!(
            r#"
            SELECT id, user_id, username, old_group, new_group, action, source, operator, created_at
            FROM auto_group_logs
            {}
            ORDER BY created_at DESC
            LIMIT ? OFFSET ?
            "#,
            where_sql
        );
        let mut list_query = sqlx::query_as::<
            _,
            (i64, i64, String, String, String, String, String, String, i64),
        >(&list_sql);
        if let Some(a) = action {
            list_query = list_query.bind(a.to_string());
        }
        if let Some(id) = user_id {
            list_query = list_query.bind(id);
        }
        let rows = list_query
            .bind(page_size)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        Ok(AuditPage {
            items: rows.into_iter().map(auto_group_row).collect(),
            total,
            page,
            page_size,
            total_pages: (total + page_size - 1) / page_size,
        })
    }

    // -----------------------------------------------------------------------
    // stats_snapshots
    // -----------------------------------------------------------------------

    pub async fn save_snapshot(
        &self,
        snapshot_type: &str,
        data: &serde_json::Value,
    ) -> Result<i64, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO stats_snapshots (snapshot_type, data, created_at) VALUES (?, ?, ?)",
        )
        .bind(snapshot_type)
        .bind(data.to_string())
        .bind(now_ts())
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn latest_snapshot(
        &self,
        snapshot_type: &str,
    ) -> Result<Option<serde_json::Value>, sqlx::Error> {
        let row: Option<(String, i64)> = sqlx::query_as(
            r#"
            SELECT data, created_at FROM stats_snapshots
            WHERE snapshot_type = ?
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(snapshot_type)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.and_then(|(data, created_at)| {
            serde_json::from_str::<serde_json::Value>(&data).ok().map(|mut v| {
                if let Some(obj) = v.as_object_mut() {
                    obj.insert("_snapshot_time".to_string(), serde_json::json!(created_at));
                }
                v
            })
        }))
    }

    // -----------------------------------------------------------------------
    // Retention
    // -----------------------------------------------------------------------

    /// Age-based cleanup across all retained tables. Returns rows deleted.
    pub async fn cleanup(&self) -> Result<u64, sqlx::Error> {
        let now = now_ts();
        let mut deleted = 0u64;
        for (table, max_age_days) in [
            ("stats_snapshots", 30i64),
            ("ai_audit_logs", 30),
            ("auto_group_logs", 90),
        ] {
            let cutoff = now - max_age_days * 86400;
            let sql = format!("DELETE FROM {} WHERE created_at < ?", table);
            let result = sqlx::query(&sql).bind(cutoff).execute(&self.pool).await?;
            deleted += result.rows_affected();
        }
        if deleted > 0 {
            tracing::info!("cleaned up {} aged audit/snapshot rows", deleted);
        }
        Ok(deleted)
    }
}

/// Counter block for one AI scan run.
#[derive(Debug, Clone, Copy, Default)]
pub struct AiScanCounts {
    pub total_scanned: i64,
    pub total_processed: i64,
    pub banned: i64,
    pub warned: i64,
    pub skipped: i64,
    pub errors: i64,
}

fn auto_group_row(
    row: (i64, i64, String, String, String, String, String, String, i64),
) -> AutoGroupLogEntry {
    AutoGroupLogEntry {
        id: row.0,
        user_id: row.1,
        username: row.2,
        old_group: row.3,
        new_group: row.4,
        action: row.5,
        source: row.6,
        operator: row.7,
        created_at: row.8,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_memory_pool;

    #[tokio::test]
    async fn security_audit_round_trip() {
        let pool = create_memory_pool().await.unwrap();
        let store = AuditStore::new(pool);

        store
            .add_security_audit("ban", 42, "mallory", "admin", "abuse", &serde_json::json!({"source": "manual"}))
            .await
            .unwrap();
        store
            .add_security_audit("unban", 42, "mallory", "admin", "appeal", &serde_json::json!({}))
            .await
            .unwrap();

        let page = store.list_security_audits(1, 50, Some("ban"), None).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].user_id, 42);
        assert_eq!(page.items[0].context["source"], "manual");

        let latest = store.latest_ban_record(42).await.unwrap().unwrap();
        assert_eq!(latest.action, "ban");
        assert_eq!(store.count_ban_rows(42).await.unwrap(), 1);
        assert_eq!(store.count_ban_rows(7).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn ai_audit_log_round_trip() {
        let pool = create_memory_pool().await.unwrap();
        let store = AuditStore::new(pool);

        let counts = AiScanCounts {
            total_scanned: 3,
            total_processed: 3,
            banned: 1,
            warned: 1,
            skipped: 1,
            errors: 0,
        };
        store
            .add_ai_audit_log("scan-1", "success", "1h", counts, true, 4.2, "", &serde_json::json!([]))
            .await
            .unwrap();

        let (items, total) = store.list_ai_audit_logs(10, 0, None).await.unwrap();
        assert_eq!(total, 1);
        assert!(items[0].dry_run);
        assert_eq!(items[0].banned_count, 1);

        let (filtered, _) = store.list_ai_audit_logs(10, 0, Some("failed")).await.unwrap();
        assert!(filtered.is_empty());
    }

    #[tokio::test]
    async fn auto_group_log_round_trip() {
        let pool = create_memory_pool().await.unwrap();
        let store = AuditStore::new(pool);

        let id = store
            .add_auto_group_log(7, "alice", "default", "vip", "assign", "github", "system")
            .await
            .unwrap();
        let log = store.get_auto_group_log(id).await.unwrap().unwrap();
        assert_eq!(log.new_group, "vip");
        assert_eq!(log.operator, "system");

        let page = store.list_auto_group_logs(1, 10, Some("assign"), Some(7)).await.unwrap();
        assert_eq!(page.total, 1);
    }
}
